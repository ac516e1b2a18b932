use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::{
    DaemonEvent, ManagedConfigurations, PingResponse, PushRequest, PushResponse, StopRequest,
    error::LinkError,
};

use super::DaemonType;

/// Header carrying the shared secret of a daemon
pub const SECRET_HEADER: &str = "X-MONITORING-SECRET";

/// Where and how to reach one daemon
#[derive(Debug, Clone)]
pub struct LinkTarget {
    pub name: String,
    pub daemon_type: DaemonType,
    pub uri: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

/// RPC surface of a remote daemon
#[async_trait]
pub trait Transport: Send + Sync {
    async fn ping(&self, target: &LinkTarget) -> Result<PingResponse, LinkError>;

    async fn managed_configurations(
        &self,
        target: &LinkTarget,
    ) -> Result<ManagedConfigurations, LinkError>;

    async fn push_configuration(
        &self,
        target: &LinkTarget,
        request: &PushRequest,
    ) -> Result<PushResponse, LinkError>;

    /// Ask the daemon to drop its configuration and wait for a new one
    async fn wait_new_conf(&self, target: &LinkTarget) -> Result<(), LinkError>;

    /// Tell a spare arbiter to stay passive
    async fn do_not_run(&self, target: &LinkTarget) -> Result<(), LinkError>;

    async fn get_events(&self, target: &LinkTarget) -> Result<Vec<DaemonEvent>, LinkError>;

    async fn stop_request(&self, target: &LinkTarget, stop_now: bool) -> Result<(), LinkError>;
}

/// [`Transport`] speaking JSON over HTTP
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
        })
    }

    fn request(&self, method: Method, target: &LinkTarget, path: &str) -> RequestBuilder {
        let url = format!("{}/{path}", target.uri.trim_end_matches('/'));
        trace!("{} {url}", method);

        let mut request = self.client.request(method, url).timeout(target.timeout);
        if let Some(token) = &target.token {
            request = request.header(SECRET_HEADER, token);
        }
        request
    }

    async fn send(request: RequestBuilder) -> Result<Response, LinkError> {
        let response = request
            .send()
            .await
            .map_err(|e| LinkError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LinkError::Application {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, LinkError> {
        let body = response
            .text()
            .await
            .map_err(|e| LinkError::Unreachable(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| LinkError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn ping(&self, target: &LinkTarget) -> Result<PingResponse, LinkError> {
        let response = Self::send(self.request(Method::GET, target, "ping")).await?;
        Self::decode(response).await
    }

    async fn managed_configurations(
        &self,
        target: &LinkTarget,
    ) -> Result<ManagedConfigurations, LinkError> {
        let response =
            Self::send(self.request(Method::GET, target, "managed_configurations")).await?;
        Self::decode(response).await
    }

    async fn push_configuration(
        &self,
        target: &LinkTarget,
        request: &PushRequest,
    ) -> Result<PushResponse, LinkError> {
        let response = Self::send(
            self.request(Method::POST, target, "push_configuration")
                .json(request),
        )
        .await?;
        Self::decode(response).await
    }

    async fn wait_new_conf(&self, target: &LinkTarget) -> Result<(), LinkError> {
        Self::send(self.request(Method::POST, target, "wait_new_conf")).await?;
        Ok(())
    }

    async fn do_not_run(&self, target: &LinkTarget) -> Result<(), LinkError> {
        Self::send(self.request(Method::POST, target, "do_not_run")).await?;
        Ok(())
    }

    async fn get_events(&self, target: &LinkTarget) -> Result<Vec<DaemonEvent>, LinkError> {
        let response = Self::send(self.request(Method::GET, target, "events")).await?;
        Self::decode(response).await
    }

    async fn stop_request(&self, target: &LinkTarget, stop_now: bool) -> Result<(), LinkError> {
        Self::send(
            self.request(Method::POST, target, "stop_request")
                .json(&StopRequest { stop_now }),
        )
        .await?;
        Ok(())
    }
}
