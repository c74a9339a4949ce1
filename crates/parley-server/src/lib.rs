//! Parley server library logic.

pub mod api_voice;
pub mod auth;
pub mod config;
pub mod middleware;

use auth::Authenticator;
use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use parley_tools::ToolRegistry;
use parley_voice::{SessionRecordStore, SessionRegistry};
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Active voice sessions.
    pub registry: SessionRegistry,
    /// Session record repository.
    pub records: Arc<dyn SessionRecordStore>,
    /// Tool dispatch table advertised to the upstream service.
    pub tools: Arc<ToolRegistry>,
    /// Credential verifier for API requests and the handshake gate.
    pub authenticator: Arc<dyn Authenticator>,
    /// HMAC key for short-lived WebSocket session tokens.
    pub ws_token_secret: [u8; 32],
    /// Upstream connection settings.
    pub upstream: config::UpstreamSettings,
    /// Per-session timer and persistence settings.
    pub session: config::SessionSettings,
    /// Bound on credential verification, in milliseconds.
    pub auth_verify_timeout_ms: u64,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route(
            "/api/voice/token",
            post(api_voice::create_voice_token_handler),
        )
        .route("/api/voice/sessions", get(api_voice::sessions_handler))
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(protected_routes)
        .route("/voice", get(api_voice::voice_handler))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(Extension(Arc::new(state)))
}
