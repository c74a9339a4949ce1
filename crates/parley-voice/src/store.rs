//! Record repository seam.
//!
//! The proxy records session lifecycles and usage totals, but storage is
//! an external collaborator: the core only calls this trait, with a
//! bounded timeout, and treats every failure as log-and-continue. Tests
//! stub it without touching protocol logic.

use chrono::{DateTime, Utc};
use parley_types::Usage;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by a record store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store backend: {0}")]
    Backend(String),
}

/// Persistence contract for session records.
#[async_trait::async_trait]
pub trait SessionRecordStore: Send + Sync {
    /// Records that a session started. Called once, at creation.
    async fn create_session_record(&self, id: Uuid, user_id: &str) -> Result<(), StoreError>;

    /// Updates the running usage totals for a live session. Called after
    /// each upstream completion event that reported nonzero usage.
    async fn update_usage(&self, id: Uuid, usage: &Usage) -> Result<(), StoreError>;

    /// Closes out the record with the end time and final totals. Called
    /// exactly once per session, from the winning terminate path.
    async fn finalize_session(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        usage: &Usage,
    ) -> Result<(), StoreError>;
}
