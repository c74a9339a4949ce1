//! Tool name → handler dispatch table.

use parley_types::ToolOutcome;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on a single tool invocation. A slow external handler must
/// not stall the session's upstream pump indefinitely.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Declaration of a tool as advertised to the upstream service.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    /// Discriminator required by the upstream tool declaration format.
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub description: String,
    /// JSON schema of the handler's accepted arguments.
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function",
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// An executable tool handler.
///
/// Handlers are supplied by external collaborators; the registry only cares
/// that they describe themselves and produce a [`ToolOutcome`] for any
/// argument value they are given.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// The declaration sent to the upstream service.
    fn spec(&self) -> ToolSpec;

    /// Executes the tool. Implementations report failures through the
    /// outcome rather than panicking, but the registry tolerates panics
    /// anyway.
    async fn call(&self, args: serde_json::Value) -> ToolOutcome;
}

/// Synchronous lookup table from tool name to asynchronous handler.
///
/// Dispatch never fails: unknown names, handler errors, panics, and
/// timeouts all become structured error outcomes.
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    call_timeout: Duration,
}

impl ToolRegistry {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            call_timeout,
        }
    }

    /// Registers a handler under its declared name. A later registration
    /// with the same name replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.spec().name;
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(tool = %name, "replaced existing tool registration");
        }
    }

    /// Declarations of every registered tool, for the upstream session
    /// configuration.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.handlers.values().map(|h| h.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Looks up `name` and invokes the handler, bounded by the per-call
    /// timeout. Always returns an outcome.
    ///
    /// The handler runs on its own task so a panicking handler surfaces as
    /// a join error here instead of unwinding the caller's pump.
    pub async fn dispatch(&self, name: &str, args: serde_json::Value) -> ToolOutcome {
        let Some(handler) = self.handlers.get(name) else {
            return ToolOutcome::err(format!("unknown tool: {name}"));
        };

        let handler = handler.clone();
        let call = tokio::spawn(async move { handler.call(args).await });

        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => {
                tracing::error!(tool = %name, "tool handler panicked: {join_err}");
                ToolOutcome::err(format!("tool {name} failed internally"))
            }
            Err(_) => {
                tracing::warn!(
                    tool = %name,
                    timeout_secs = self.call_timeout.as_secs(),
                    "tool call timed out"
                );
                ToolOutcome::err(format!(
                    "tool {name} timed out after {}s",
                    self.call_timeout.as_secs()
                ))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}
