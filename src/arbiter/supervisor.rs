//! Supervision of the daemons the arbiter launches itself

use std::collections::HashMap;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::links::{DaemonLink, DaemonType};

/// Starts and watches local daemon processes
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Launch the process of a daemon declared with a launch spec
    async fn start(&self, link: &DaemonLink) -> Result<()>;

    /// Whether the process launched for that daemon still runs
    async fn is_running(&self, link: &DaemonLink) -> bool;

    /// Kill every process launched so far
    async fn kill_all(&self);
}

/// [`ProcessSupervisor`] spawning child processes with [`tokio::process`]
///
/// Children get `SATELLITE_TYPE` and `SATELLITE_PORT` in their environment and
/// are killed when the supervisor is dropped.
#[derive(Default)]
pub struct TokioProcessSupervisor {
    children: Mutex<HashMap<(DaemonType, String), Child>>,
}

impl TokioProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessSupervisor for TokioProcessSupervisor {
    async fn start(&self, link: &DaemonLink) -> Result<()> {
        let Some(spec) = link.launch() else {
            anyhow::bail!("{} '{}' is not launched locally", link.daemon_type(), link.name());
        };

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .env("SATELLITE_TYPE", link.daemon_type().as_str())
            .env("SATELLITE_PORT", link.port().to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to launch {}", spec.program))?;

        info!(
            "launched {} '{}' (pid {:?})",
            link.daemon_type(),
            link.name(),
            child.id()
        );
        self.children
            .lock()
            .await
            .insert((link.daemon_type(), link.name().to_string()), child);
        Ok(())
    }

    async fn is_running(&self, link: &DaemonLink) -> bool {
        let key = (link.daemon_type(), link.name().to_string());
        let mut children = self.children.lock().await;
        let Some(child) = children.get_mut(&key) else {
            return false;
        };

        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!("{} '{}' exited with {status}", key.0, key.1);
                children.remove(&key);
                false
            }
            Err(e) => {
                warn!("failed to query {} '{}': {e}", key.0, key.1);
                false
            }
        }
    }

    async fn kill_all(&self) {
        let mut children = self.children.lock().await;
        for ((daemon_type, name), mut child) in children.drain() {
            match child.kill().await {
                Ok(()) => debug!("killed {daemon_type} '{name}'"),
                Err(e) => warn!("failed to kill {daemon_type} '{name}': {e}"),
            }
        }
    }
}
