//! Parley server binary — the voice session proxy entry point.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, the tool registry, and graceful shutdown on
//! SIGTERM/SIGINT.

use parley_server::{app, auth::StaticKeyAuthenticator, config, AppState};
use parley_tools::{
    CurrentTimeTool, ForwardDocumentTool, HttpMailer, StockQuoteConfig, StockQuoteTool,
    ToolRegistry, WeatherConfig, WeatherTool, WebSearchConfig, WebSearchTool,
};
use parley_voice::SessionRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

/// Builds the tool registry from configuration. Tools whose provider has
/// no key still register; they report themselves unconfigured when
/// called, which keeps the upstream's tool list stable per deployment.
fn build_tools(tools: &config::ToolSettings) -> ToolRegistry {
    let mut registry = ToolRegistry::new(Duration::from_secs(tools.call_timeout_secs));

    registry.register(Arc::new(CurrentTimeTool));
    registry.register(Arc::new(WeatherTool::new(WeatherConfig::default())));
    registry.register(Arc::new(WebSearchTool::new(WebSearchConfig {
        api_key: tools.search_api_key.clone(),
        ..WebSearchConfig::default()
    })));
    registry.register(Arc::new(StockQuoteTool::new(StockQuoteConfig {
        api_key: tools.stock_api_key.clone(),
        ..StockQuoteConfig::default()
    })));

    let mailer = Arc::new(HttpMailer::new(
        tools.email_endpoint.clone(),
        tools.email_api_key.clone(),
        tools.email_from.clone(),
        Duration::from_secs(tools.call_timeout_secs),
    ));
    registry.register(Arc::new(ForwardDocumentTool::new(mailer)));

    registry
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    if config.upstream.api_key.is_empty() {
        tracing::warn!(
            "no upstream API key configured — voice sessions will fail to connect \
             (set PARLEY_UPSTREAM_API_KEY or upstream.api_key)"
        );
    }
    if config.auth.api_keys.is_empty() {
        tracing::warn!("no client API keys configured — every handshake will be rejected");
    }

    // Initialize database
    let pool = parley_db::create_pool(
        &config.database.path,
        parley_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = parley_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let authenticator = Arc::new(StaticKeyAuthenticator::new(
        config
            .auth
            .api_keys
            .iter()
            .map(|entry| (entry.key.clone(), entry.user_id.clone())),
    ));

    let state = AppState {
        registry: SessionRegistry::new(),
        records: Arc::new(parley_db::SqliteSessionStore::new(pool)),
        tools: Arc::new(build_tools(&config.tools)),
        authenticator,
        ws_token_secret: parley_server::api_voice::derive_ws_token_secret(
            config.auth.token_secret.as_deref(),
        ),
        upstream: config.upstream.clone(),
        session: config.session.clone(),
        auth_verify_timeout_ms: config.auth.verify_timeout_ms,
    };

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting parley server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    tracing::info!("parley server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
