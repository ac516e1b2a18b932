//! Status API of the arbiter
//!
//! Read-only HTTP view over the [`ArbiterHandle`](crate::arbiter::ArbiterHandle).
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check
//! - `GET /api/v1/dispatch` - Dispatch state and counters
//! - `GET /api/v1/daemons` - Every declared daemon
//! - `GET /api/v1/daemons/{type}/{name}` - One daemon
//! - `GET /api/v1/problems` - Open problems

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod middleware;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;
#[cfg(feature = "api")]
pub use types::{DaemonsResponse, DispatchSummary, HealthResponse, ProblemsResponse};

use std::net::SocketAddr;

#[cfg(feature = "api")]
use axum::{Router, routing::get};
#[cfg(feature = "api")]
use tracing::info;

use crate::config::ApiSettings;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,

    /// Bearer token required on every request when set
    pub auth_token: Option<String>,

    pub enable_cors: bool,
}

impl From<&ApiSettings> for ApiConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            bind_addr: settings.bind,
            auth_token: settings.token.clone(),
            enable_cors: settings.enable_cors,
        }
    }
}

/// Router with every endpoint and the configured layers
#[cfg(feature = "api")]
pub fn build_router(config: &ApiConfig, state: ApiState) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/dispatch", get(routes::dispatch::get_dispatch))
        .route("/api/v1/daemons", get(routes::daemons::list_daemons))
        .route(
            "/api/v1/daemons/:daemon_type/:name",
            get(routes::daemons::get_daemon),
        )
        .route("/api/v1/problems", get(routes::problems::list_problems))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    if let Some(token) = config.auth_token.clone() {
        app = app.layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::require_operator_token,
        ));
    }

    app
}

/// Spawn the API server in a background task, returns the bound address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = build_router(&config, state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {e}");
        }
    });

    Ok(addr)
}

#[cfg(all(test, feature = "api"))]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        arbiter::{ArbiterHandle, TokioProcessSupervisor},
        dispatcher::{DaemonStatus, DispatchState, tests::small_fleet},
        links::{Transport, mock::MockTransport},
        loader::build_dispatcher,
    };

    fn router(token: Option<&str>) -> (Router, ArbiterHandle) {
        let mut config = small_fleet();
        config.arbiter.loop_interval = 3600;
        let transport: Arc<dyn Transport> = Arc::new(MockTransport::new());
        let dispatcher = build_dispatcher(&config, transport.clone()).unwrap();
        let (handle, _join) =
            ArbiterHandle::spawn(dispatcher, transport, Arc::new(TokioProcessSupervisor::new()));

        let api = ApiConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            auth_token: token.map(str::to_string),
            enable_cors: false,
        };
        (build_router(&api, ApiState::new(handle.clone())), handle)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(app: Router, uri: &str) -> (StatusCode, Option<T>) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).ok())
    }

    #[tokio::test]
    async fn test_dispatch_summary_after_a_tick() {
        let (app, handle) = router(None);
        handle.tick_now().await.unwrap();

        let (status, summary) = get_json::<DispatchSummary>(app, "/api/v1/dispatch").await;
        assert_eq!(status, StatusCode::OK);
        let summary = summary.unwrap();
        assert_eq!(summary.state, DispatchState::Dispatched);
        assert_eq!(summary.daemons, 6);
        assert_eq!(summary.parts, 1);
        assert_eq!(summary.assigned_parts, 1);
    }

    #[tokio::test]
    async fn test_single_daemon_lookup() {
        let (app, _handle) = router(None);

        let (status, daemon) =
            get_json::<DaemonStatus>(app.clone(), "/api/v1/daemons/poller/poller-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(daemon.unwrap().name, "poller-1");

        let (status, _) =
            get_json::<serde_json::Value>(app.clone(), "/api/v1/daemons/poller/poller-9").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) =
            get_json::<serde_json::Value>(app, "/api/v1/daemons/worker/poller-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_token_is_required() {
        let (app, _handle) = router(Some("secret"));

        let (status, refusal) =
            get_json::<serde_json::Value>(app.clone(), "/api/v1/health").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            refusal.unwrap()["error"],
            "the arbiter API requires an operator token"
        );

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/v1/health")
                    .header("Authorization", "Token secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/v1/problems")
                    .header("Authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(
                Request::get("/api/v1/problems")
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
