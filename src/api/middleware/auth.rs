//! Operator token guarding the arbiter API
//!
//! Fleet status and problems leak host and daemon names, so once an
//! `auth_token` is configured every route wants it as a bearer token.

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

pub async fn require_operator_token(
    State(operator_token): State<String>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, OperatorTokenError> {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(OperatorTokenError::Missing)?
        .strip_prefix("Bearer ")
        .ok_or(OperatorTokenError::NotBearer)?;

    if presented != operator_token {
        warn!("refused {} {}: wrong operator token", request.method(), request.uri().path());
        return Err(OperatorTokenError::Mismatch);
    }

    Ok(next.run(request).await)
}

#[derive(Debug, PartialEq, Eq)]
pub enum OperatorTokenError {
    Missing,
    NotBearer,
    /// Well formed, but not the token the arbiter was configured with
    Mismatch,
}

impl IntoResponse for OperatorTokenError {
    fn into_response(self) -> Response {
        let (status, reason) = match self {
            OperatorTokenError::Missing => (
                StatusCode::UNAUTHORIZED,
                "the arbiter API requires an operator token",
            ),
            OperatorTokenError::NotBearer => (
                StatusCode::UNAUTHORIZED,
                "send the operator token as 'Authorization: Bearer <token>'",
            ),
            OperatorTokenError::Mismatch => (
                StatusCode::FORBIDDEN,
                "operator token does not match the arbiter's",
            ),
        };

        (status, Json(json!({ "error": reason }))).into_response()
    }
}
