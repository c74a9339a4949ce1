//! SQLite persistence for the Parley voice proxy.
//!
//! Provides connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and the [`SqliteSessionStore`] implementation
//! of the core's record-repository seam.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: single-process deployment, no external
//!   database. WAL allows concurrent readers with a single writer, which
//!   matches the write pattern of session records (short, infrequent
//!   updates from many sessions).
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management.
//! - **Embedded migrations**: SQL ships inside the binary via
//!   `include_str!`, so schema and code cannot drift apart.
//! - **`spawn_blocking` at the trait boundary**: rusqlite is synchronous;
//!   every async trait method hops to the blocking pool so session pumps
//!   never stall on disk I/O.

mod migrations;
mod pool;
mod store;

pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
pub use store::SqliteSessionStore;
