//! Core of the Parley voice proxy.
//!
//! One [`Session`] binds a client WebSocket connection to one upstream
//! conversational-AI connection for the duration of a conversation. Two
//! pumps move events between the legs through the session's translation
//! and dispatch logic, an idle watchdog supervises both, and the
//! [`SessionRegistry`] is the single point of creation, lookup, and
//! removal for all live sessions.
//!
//! The crate deliberately contains no HTTP routing, storage, or
//! credential logic: the record repository ([`SessionRecordStore`]), the
//! upstream transport ([`UpstreamSink`]), and tool business logic
//! (`parley-tools`) are seams that the server binary wires together.

pub mod bridge;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod store;
pub mod timer;

pub use bridge::{BridgeEvent, UpstreamBridge, UpstreamConfig, UpstreamSink};
pub use error::VoiceError;
pub use protocol::{
    ClientEvent, ServerEvent, SessionProfile, UpstreamCommand, UpstreamEvent, UsageReport,
};
pub use registry::SessionRegistry;
pub use session::{ClientFrame, Session, SessionParams};
pub use store::{SessionRecordStore, StoreError};
pub use timer::{spawn_watchdog, TimerConfig};
