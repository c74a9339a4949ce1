//! SQLite implementation of the core's record-repository seam.

use crate::pool::DbPool;
use chrono::{DateTime, SecondsFormat, Utc};
use parley_types::Usage;
use parley_voice::{SessionRecordStore, StoreError};
use uuid::Uuid;

/// [`SessionRecordStore`] backed by the shared SQLite pool.
///
/// Every method hops to the blocking pool: the callers are session pumps
/// and the terminate path, none of which may stall on disk I/O.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: DbPool,
}

impl SqliteSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F>(&self, op: F) -> Result<(), StoreError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<(), rusqlite::Error> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| StoreError::Backend(format!("pool: {e}")))?;
            op(&conn).map_err(|e| StoreError::Backend(format!("query: {e}")))
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task: {e}")))?
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait::async_trait]
impl SessionRecordStore for SqliteSessionStore {
    async fn create_session_record(&self, id: Uuid, user_id: &str) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        let started_at = rfc3339(Utc::now());
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO session_records (session_id, user_id, started_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![id.to_string(), user_id, started_at],
            )
            .map(|_| ())
        })
        .await
    }

    async fn update_usage(&self, id: Uuid, usage: &Usage) -> Result<(), StoreError> {
        let usage = *usage;
        self.run_blocking(move |conn| {
            conn.execute(
                "UPDATE session_records
                 SET input_tokens = ?2,
                     output_tokens = ?3,
                     input_audio_tokens = ?4,
                     output_audio_tokens = ?5
                 WHERE session_id = ?1",
                rusqlite::params![
                    id.to_string(),
                    usage.input_tokens,
                    usage.output_tokens,
                    usage.input_audio_tokens,
                    usage.output_audio_tokens,
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn finalize_session(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        usage: &Usage,
    ) -> Result<(), StoreError> {
        let usage = *usage;
        let ended_at = rfc3339(ended_at);
        self.run_blocking(move |conn| {
            conn.execute(
                "UPDATE session_records
                 SET ended_at = ?2,
                     input_tokens = ?3,
                     output_tokens = ?4,
                     input_audio_tokens = ?5,
                     output_audio_tokens = ?6
                 WHERE session_id = ?1",
                rusqlite::params![
                    id.to_string(),
                    ended_at,
                    usage.input_tokens,
                    usage.output_tokens,
                    usage.input_audio_tokens,
                    usage.output_audio_tokens,
                ],
            )
            .map(|_| ())
        })
        .await
    }
}
