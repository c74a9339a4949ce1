//! Tool execution layer for the Parley voice proxy.
//!
//! The upstream conversational service can ask the proxy to run a named
//! local function and feed its result back into the conversation. This
//! crate provides the dispatch table for those requests — the
//! [`ToolRegistry`] — plus the built-in handlers (web search, weather,
//! stock quotes, current time, document forwarding).
//!
//! The registry's contract is deliberately narrow: unknown tool names
//! become a structured `unknown tool` error, every call is bounded by a
//! per-call timeout, and dispatch always produces exactly one
//! [`ToolOutcome`]. A misbehaving handler can never leave the session's
//! event pump without a result to send upstream.

pub mod clock;
pub mod forward;
pub mod registry;
pub mod search;
pub mod stocks;
pub mod weather;

pub use clock::CurrentTimeTool;
pub use forward::{ForwardDocumentTool, HttpMailer, Mailer, MailerError};
pub use registry::{ToolHandler, ToolRegistry, ToolSpec, DEFAULT_CALL_TIMEOUT};
pub use search::{WebSearchConfig, WebSearchTool};
pub use stocks::{StockQuoteConfig, StockQuoteTool};
pub use weather::{WeatherConfig, WeatherTool};
