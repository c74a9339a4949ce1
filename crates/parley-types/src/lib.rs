//! Shared types and constants for the Parley voice proxy.
//!
//! This crate provides the foundational vocabulary used across all Parley
//! crates: the session lifecycle enum, termination reasons, usage counters,
//! and the tool outcome contract. No crate in the workspace depends on
//! anything *except* `parley-types` for cross-cutting type definitions,
//! which keeps the dependency graph clean and prevents cycles.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a voice session.
///
/// Transitions are strictly monotonic: `Connecting → Active → Closing →
/// Terminated`. The only permitted skip is `Connecting → Closing` when the
/// upstream connection fails to establish. There are no backward
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionStatus {
    /// The upstream connection is being established and configured.
    Connecting = 0,
    /// Both pumps are running; all message types are accepted.
    Active = 1,
    /// A termination trigger fired; no new inbound messages are accepted.
    Closing = 2,
    /// Resources released, usage finalized, registry entry removed.
    Terminated = 3,
}

impl SessionStatus {
    /// Returns the numeric code used for atomic storage.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Attempts to convert a numeric code back to a status.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Connecting),
            1 => Some(Self::Active),
            2 => Some(Self::Closing),
            3 => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Returns the string label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Terminated => "terminated",
        }
    }

    /// Whether `next` is a legal forward transition from this state.
    ///
    /// `Connecting → Closing` is the single permitted skip (upstream
    /// connect failure). Everything else must step through in order.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Active)
                | (Self::Connecting, Self::Closing)
                | (Self::Active, Self::Closing)
                | (Self::Closing, Self::Terminated)
        )
    }

    /// Whether this state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Why a session was (or is being) torn down.
///
/// Whichever trigger fires first wins; the reason is recorded once and
/// reported to the client in the final `disconnected` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// The client closed its WebSocket (or the transport errored).
    ClientDisconnect,
    /// The upstream service closed its connection.
    UpstreamDisconnect,
    /// No activity on either leg within the idle threshold.
    IdleTimeout,
    /// Explicit cancellation (operator or shutdown).
    Cancelled,
    /// The upstream connection never established.
    UpstreamConnectFailed,
}

impl TerminationReason {
    /// Returns the wire label for this reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientDisconnect => "client-disconnect",
            Self::UpstreamDisconnect => "upstream-disconnect",
            Self::IdleTimeout => "idle-timeout",
            Self::Cancelled => "cancelled",
            Self::UpstreamConnectFailed => "upstream-connect-failed",
        }
    }
}

/// Token usage counters for one session.
///
/// Counters are monotonically non-decreasing: they are only ever
/// accumulated from upstream completion reports, never replaced or reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_audio_tokens: u64,
    pub output_audio_tokens: u64,
}

impl Usage {
    /// Adds another report's counters into this one.
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.input_audio_tokens += other.input_audio_tokens;
        self.output_audio_tokens += other.output_audio_tokens;
    }

    /// Whether every counter is zero (nothing worth persisting).
    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0
            && self.output_tokens == 0
            && self.input_audio_tokens == 0
            && self.output_audio_tokens == 0
    }
}

/// Result of a tool invocation, as fed back into the conversation.
///
/// The upstream protocol requires a response to every tool call, so this
/// type has no "nothing happened" state: a dispatch either succeeded with
/// `data` or failed with `error`, and either way exactly one result event
/// goes back upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    /// A successful outcome carrying the handler's output.
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed outcome carrying a structured error message.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Serializes the outcome into the string payload the upstream
    /// expects in a function-call result item.
    pub fn to_payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"error":"unserializable tool outcome"}"#.to_string()
        })
    }
}
