use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fleet_arbiter::{
    arbiter::{ArbiterHandle, TokioProcessSupervisor},
    config::read_config_file,
    events::FleetEvent,
    links::{HttpTransport, Transport},
    loader::build_dispatcher,
};
use tokio::{spawn, sync::broadcast};
use tracing::{debug, error, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("fleet_arbiter", LevelFilter::DEBUG),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = read_config_file(&args.file)?;

    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new().context("failed to build the HTTP client")?);
    let dispatcher =
        build_dispatcher(&config, transport.clone()).context("invalid configuration")?;

    let (handle, arbiter) =
        ArbiterHandle::spawn(dispatcher, transport, Arc::new(TokioProcessSupervisor::new()));

    spawn(log_events(handle.subscribe()));

    #[cfg(feature = "api")]
    {
        use fleet_arbiter::api::{ApiConfig, ApiState, spawn_api_server};

        if let Some(api) = &config.api {
            spawn_api_server(ApiConfig::from(api), ApiState::new(handle.clone())).await?;
        }
    }

    spawn(handle_signals(handle, args.file));

    arbiter.await.context("arbiter task failed")??;
    Ok(())
}

/// Ctrl-C stops the fleet gracefully, SIGHUP reloads the configuration
async fn handle_signals(handle: ArbiterHandle, file: String) {
    #[cfg(unix)]
    let mut hangup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
    {
        Ok(hangup) => Some(hangup),
        Err(e) => {
            warn!("failed to listen for SIGHUP: {e}");
            None
        }
    };

    loop {
        #[cfg(unix)]
        let reload = async {
            match hangup.as_mut() {
                Some(hangup) => hangup.recv().await,
                None => std::future::pending().await,
            }
        };
        #[cfg(not(unix))]
        let reload = std::future::pending::<Option<()>>();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("failed to listen for Ctrl-C: {e}");
                    return;
                }
                info!("interrupted, stopping the fleet");
                if let Err(e) = handle.shutdown(false).await {
                    debug!("{e:#}");
                }
                return;
            }

            Some(()) = reload => {
                info!("reloading {file}");
                let config = match read_config_file(&file) {
                    Ok(config) => config,
                    Err(e) => {
                        error!("{e:#}");
                        continue;
                    }
                };
                match handle.reload(config).await {
                    Ok(matched) => info!("configuration reloaded, {matched} daemon(s) carried over"),
                    Err(e) => error!("reload failed: {e:#}"),
                }
            }
        }
    }
}

#[instrument(skip_all)]
async fn log_events(mut events: broadcast::Receiver<FleetEvent>) {
    loop {
        match events.recv().await {
            Ok(FleetEvent::StateChanged { from, to }) => debug!("dispatch {from} -> {to}"),
            Ok(FleetEvent::LinkAlive {
                daemon,
                daemon_type,
            }) => info!("{daemon_type} '{daemon}' is alive"),
            Ok(FleetEvent::LinkDead {
                daemon,
                daemon_type,
            }) => warn!("{daemon_type} '{daemon}' is dead"),
            Ok(FleetEvent::ConfigurationPushed { .. }) => {}
            Ok(FleetEvent::ProblemRaised { problem }) => {
                warn!("problem: {} ({})", problem.key, problem.message)
            }
            Ok(FleetEvent::ProblemCleared { key }) => info!("resolved: {key}"),
            Ok(FleetEvent::Daemon {
                daemon,
                daemon_type,
                event,
            }) => info!("{daemon_type} '{daemon}' [{}] {}", event.kind, event.message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("event log lagging, {skipped} event(s) skipped")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
