//! Request authentication middleware for the HTTP API surface.

use crate::AppState;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Duration;

/// Authenticated identity stored in request extensions.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user_id: String,
}

/// Extracts the bearer credential from `Authorization: Bearer` or the
/// `X-Parley-Key` header.
fn extract_credential(req: &Request<Body>) -> Option<String> {
    if let Some(val) = req.headers().get("Authorization") {
        let val = val.to_str().ok()?;
        return val.strip_prefix("Bearer ").map(str::to_string);
    }
    req.headers()
        .get("X-Parley-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Middleware that authenticates API requests against the configured
/// [`crate::auth::Authenticator`], bounded by the verification timeout.
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let credential = extract_credential(&req).ok_or(StatusCode::UNAUTHORIZED)?;

    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let verified = tokio::time::timeout(
        Duration::from_millis(state.auth_verify_timeout_ms),
        state.authenticator.verify(&credential),
    )
    .await;

    match verified {
        Ok(Ok(identity)) => {
            req.extensions_mut().insert(AuthContext {
                user_id: identity.user_id,
            });
            Ok(next.run(req).await)
        }
        Ok(Err(_)) => Err(StatusCode::UNAUTHORIZED),
        Err(_) => {
            tracing::warn!("credential verification timed out");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
