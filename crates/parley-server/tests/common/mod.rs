//! Shared fixture for server integration tests: a running server on an
//! ephemeral port with a counting record store and a static key table.

use chrono::{DateTime, Utc};
use parley_server::api_voice::derive_ws_token_secret;
use parley_server::auth::StaticKeyAuthenticator;
use parley_server::config::{SessionSettings, UpstreamSettings};
use parley_server::AppState;
use parley_tools::ToolRegistry;
use parley_types::Usage;
use parley_voice::{SessionRecordStore, SessionRegistry, StoreError};
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

/// API key accepted by every test server.
pub const TEST_API_KEY: &str = "pk_test";
pub const TEST_USER: &str = "user-test";

#[derive(Default)]
pub struct CountingStore {
    pub created: AtomicUsize,
    pub finalized: AtomicUsize,
}

#[async_trait::async_trait]
impl SessionRecordStore for CountingStore {
    async fn create_session_record(&self, _id: Uuid, _user_id: &str) -> Result<(), StoreError> {
        self.created.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn update_usage(&self, _id: Uuid, _usage: &Usage) -> Result<(), StoreError> {
        Ok(())
    }

    async fn finalize_session(
        &self,
        _id: Uuid,
        _ended_at: DateTime<Utc>,
        _usage: &Usage,
    ) -> Result<(), StoreError> {
        self.finalized
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: SessionRegistry,
    pub store: Arc<CountingStore>,
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn ws(&self, query: &str) -> String {
        format!("ws://{}/voice?{query}", self.addr)
    }
}

/// Starts a server whose upstream points at `upstream_url`.
pub async fn start_server(upstream_url: String) -> TestServer {
    let registry = SessionRegistry::new();
    let store = Arc::new(CountingStore::default());

    let state = AppState {
        registry: registry.clone(),
        records: store.clone(),
        tools: Arc::new(ToolRegistry::default()),
        authenticator: Arc::new(StaticKeyAuthenticator::new([(
            TEST_API_KEY.to_string(),
            TEST_USER.to_string(),
        )])),
        ws_token_secret: derive_ws_token_secret(Some("integration-test-secret")),
        upstream: UpstreamSettings {
            url: upstream_url,
            api_key: "upstream-test-key".to_string(),
            connect_timeout_secs: 2,
            ..UpstreamSettings::default()
        },
        session: SessionSettings::default(),
        auth_verify_timeout_ms: 1_000,
    };

    let app = parley_server::app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("test server error");
    });

    TestServer {
        addr,
        registry,
        store,
    }
}

/// An address nothing listens on, for connect-failure tests.
pub async fn dead_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("ws://{addr}")
}
