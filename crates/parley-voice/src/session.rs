//! The session state machine.
//!
//! A [`Session`] binds one client connection, one upstream sink, and one
//! idle timer, and owns the accumulated usage counters. Both pumps and
//! the timer call into the methods here rather than touching fields, so
//! state transitions stay linearized: status lives in an atomic and the
//! only transition with side effects — into `Closing` — is a
//! compare-and-set that exactly one caller can win.

use crate::bridge::UpstreamSink;
use crate::protocol::{ClientEvent, ServerEvent, UpstreamCommand, UpstreamEvent};
use crate::registry::SessionRegistry;
use crate::store::SessionRecordStore;
use chrono::{DateTime, Utc};
use parley_tools::ToolRegistry;
use parley_types::{SessionStatus, TerminationReason, Usage};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;

/// Frames queued for delivery to the client transport.
#[derive(Debug)]
pub enum ClientFrame {
    /// A serialized [`ServerEvent`].
    Text(String),
    /// A transport-level keepalive ping.
    Ping,
}

/// Everything a session needs from its environment.
pub struct SessionParams {
    pub user_id: String,
    /// Bounded queue drained by the client forwarder task. Slow consumers
    /// get frames dropped with a warning rather than unbounded buffering.
    pub client_tx: mpsc::Sender<ClientFrame>,
    pub tools: Arc<ToolRegistry>,
    pub records: Arc<dyn SessionRecordStore>,
    pub registry: SessionRegistry,
    /// Bound on each best-effort persistence call.
    pub persist_timeout: Duration,
}

pub struct Session {
    id: Uuid,
    user_id: String,
    status: AtomicU8,
    created_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    usage: Mutex<Usage>,
    close_reason: Mutex<Option<TerminationReason>>,
    /// Attached once the bridge establishes; `None` while `Connecting`.
    upstream: Mutex<Option<Arc<dyn UpstreamSink>>>,
    client_tx: mpsc::Sender<ClientFrame>,
    tools: Arc<ToolRegistry>,
    records: Arc<dyn SessionRecordStore>,
    registry: SessionRegistry,
    closed_tx: watch::Sender<bool>,
    persist_timeout: Duration,
}

impl Session {
    pub fn new(params: SessionParams) -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: Uuid::new_v4(),
            user_id: params.user_id,
            status: AtomicU8::new(SessionStatus::Connecting.as_u8()),
            created_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
            usage: Mutex::new(Usage::default()),
            close_reason: Mutex::new(None),
            upstream: Mutex::new(None),
            client_tx: params.client_tx,
            tools: params.tools,
            records: params.records,
            registry: params.registry,
            closed_tx,
            persist_timeout: params.persist_timeout,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> SessionStatus {
        // The atomic only ever holds values written from SessionStatus.
        SessionStatus::from_u8(self.status.load(Ordering::SeqCst))
            .unwrap_or(SessionStatus::Terminated)
    }

    pub fn usage_snapshot(&self) -> Usage {
        *lock(&self.usage)
    }

    pub fn close_reason(&self) -> Option<TerminationReason> {
        *lock(&self.close_reason)
    }

    /// A receiver that flips to `true` once termination begins. Pumps and
    /// the timer select on this to exit promptly.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Hands the established upstream connection to the session. Called
    /// once, between construction and `activate`.
    pub fn attach_upstream(&self, sink: Arc<dyn UpstreamSink>) {
        *lock(&self.upstream) = Some(sink);
    }

    /// `Connecting → Active`. Returns false if a termination trigger won
    /// the race first, in which case the caller must not start pumping.
    pub fn activate(&self) -> bool {
        self.status
            .compare_exchange(
                SessionStatus::Connecting.as_u8(),
                SessionStatus::Active.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Marks activity on either leg, deferring the idle timeout.
    pub fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    /// Time since the last event on either leg.
    pub fn idle_for(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    /// Queues a transport ping toward the client.
    pub fn send_ping(&self) {
        if let Err(e) = self.client_tx.try_send(ClientFrame::Ping) {
            tracing::debug!(session_id = %self.id, "could not queue client ping: {e}");
        }
    }

    fn send_to_client(&self, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                if let Err(e) = self.client_tx.try_send(ClientFrame::Text(json)) {
                    tracing::warn!(
                        session_id = %self.id,
                        "dropping frame for slow client: {e}"
                    );
                }
            }
            Err(e) => {
                tracing::error!(session_id = %self.id, "failed to serialize server event: {e}");
            }
        }
    }

    /// Routes one parsed client message by type into the upstream sink.
    ///
    /// In `Connecting` only control traffic is allowed: ping gets its
    /// pong, anything else gets a single error event because no upstream
    /// target exists yet. After `Closing` everything is dropped.
    pub async fn deliver_client_event(&self, event: ClientEvent) {
        self.touch();
        match self.status() {
            SessionStatus::Connecting => match event {
                ClientEvent::Ping => self.send_to_client(&ServerEvent::Pong),
                other => {
                    tracing::debug!(
                        session_id = %self.id,
                        event = ?other,
                        "rejecting client event before upstream is ready"
                    );
                    self.send_to_client(&ServerEvent::error("session is still connecting"));
                }
            },
            SessionStatus::Active => match event {
                ClientEvent::AppendAudio { audio } => {
                    self.forward_upstream(UpstreamCommand::AppendAudio { audio }).await;
                }
                ClientEvent::CommitAudio => {
                    self.forward_upstream(UpstreamCommand::CommitAudio).await;
                }
                ClientEvent::ClearAudio => {
                    self.forward_upstream(UpstreamCommand::ClearAudio).await;
                }
                ClientEvent::CreateItem { item } => {
                    self.forward_upstream(UpstreamCommand::CreateItem { item }).await;
                }
                ClientEvent::CreateResponse => {
                    self.forward_upstream(UpstreamCommand::CreateResponse).await;
                }
                ClientEvent::CancelResponse => {
                    self.forward_upstream(UpstreamCommand::CancelResponse).await;
                }
                ClientEvent::Ping => self.send_to_client(&ServerEvent::Pong),
            },
            SessionStatus::Closing | SessionStatus::Terminated => {
                tracing::debug!(session_id = %self.id, "dropping client event after close");
            }
        }
    }

    /// Routes one upstream event to the client, translating type-for-type
    /// and handling the two event kinds with side effects: completed tool
    /// calls and usage reports.
    pub async fn deliver_upstream_event(&self, event: UpstreamEvent) {
        self.touch();
        if matches!(
            self.status(),
            SessionStatus::Closing | SessionStatus::Terminated
        ) {
            tracing::debug!(session_id = %self.id, "dropping upstream event after close");
            return;
        }

        match event {
            UpstreamEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                self.send_to_client(&ServerEvent::FunctionCallArgumentsDone {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                });
                self.handle_tool_call(call_id, name, arguments).await;
            }
            UpstreamEvent::ResponseDone { usage } => {
                let delta = usage.to_usage();
                let total = {
                    let mut counters = lock(&self.usage);
                    counters.accumulate(&delta);
                    *counters
                };
                self.send_to_client(&ServerEvent::ResponseDone { usage });
                if !delta.is_zero() {
                    self.persist_usage(total);
                }
            }
            other => self.send_to_client(&other.into_server_event()),
        }
    }

    /// Executes one tool call and sends exactly one result event upstream,
    /// success or failure, then asks the upstream to continue generating.
    ///
    /// Once `Closing` has been entered no new dispatches start; the call
    /// is abandoned (the upstream connection is going away with it).
    async fn handle_tool_call(&self, call_id: String, name: String, arguments: String) {
        if matches!(
            self.status(),
            SessionStatus::Closing | SessionStatus::Terminated
        ) {
            tracing::debug!(
                session_id = %self.id,
                call_id = %call_id,
                tool = %name,
                "abandoning tool call on closing session"
            );
            return;
        }

        let outcome = if arguments.trim().is_empty() {
            self.tools.dispatch(&name, serde_json::json!({})).await
        } else {
            match serde_json::from_str::<serde_json::Value>(&arguments) {
                Ok(args) => self.tools.dispatch(&name, args).await,
                Err(e) => parley_types::ToolOutcome::err(format!("invalid tool arguments: {e}")),
            }
        };

        if !outcome.success {
            tracing::warn!(
                session_id = %self.id,
                call_id = %call_id,
                tool = %name,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "tool call failed"
            );
        }

        self.forward_upstream(UpstreamCommand::function_call_output(
            &call_id,
            outcome.to_payload(),
        ))
        .await;
        self.forward_upstream(UpstreamCommand::CreateResponse).await;
    }

    async fn forward_upstream(&self, command: UpstreamCommand) {
        let sink = lock(&self.upstream).clone();
        match sink {
            Some(sink) => {
                if let Err(e) = sink.send(command).await {
                    // The bridge's reader will surface the disconnect; no
                    // need to terminate from here as well.
                    tracing::warn!(session_id = %self.id, "upstream send failed: {e}");
                }
            }
            None => {
                tracing::warn!(
                    session_id = %self.id,
                    "dropping upstream command: no sink attached"
                );
            }
        }
    }

    /// Spawned, bounded, best-effort usage write. Never holds up a pump
    /// and never propagates failure to the live session.
    fn persist_usage(&self, total: Usage) {
        let records = self.records.clone();
        let id = self.id;
        let timeout = self.persist_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, records.update_usage(id, &total)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(session_id = %id, "usage persistence failed: {e}");
                }
                Err(_) => {
                    tracing::warn!(session_id = %id, "usage persistence timed out");
                }
            }
        });
    }

    /// Single-winner transition into `Closing`. Everything else in
    /// `terminate` runs at most once per session.
    fn begin_close(&self) -> bool {
        loop {
            let current = self.status.load(Ordering::SeqCst);
            if current >= SessionStatus::Closing.as_u8() {
                return false;
            }
            if self
                .status
                .compare_exchange(
                    current,
                    SessionStatus::Closing.as_u8(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Tears the session down. Idempotent and safe to call concurrently
    /// from the client pump, the upstream pump, and the timer: the first
    /// caller performs the teardown, later callers are no-ops.
    pub async fn terminate(&self, reason: TerminationReason) {
        if !self.begin_close() {
            return;
        }
        *lock(&self.close_reason) = Some(reason);

        tracing::info!(
            session_id = %self.id,
            user_id = %self.user_id,
            reason = reason.as_str(),
            "terminating session"
        );

        // Frames queue before the close signal flips so the forwarder can
        // still drain them. The failed-connect edge is the one fatal fault
        // where the client has seen nothing yet, hence its error event.
        if reason == TerminationReason::UpstreamConnectFailed {
            self.send_to_client(&ServerEvent::error("upstream connection failed"));
        }
        self.send_to_client(&ServerEvent::Disconnected {
            reason: reason.as_str().to_string(),
        });

        // Wake every task selecting on the close signal.
        let _ = self.closed_tx.send(true);

        let sink = lock(&self.upstream).take();
        if let Some(sink) = sink {
            sink.disconnect().await;
        }

        let usage = self.usage_snapshot();
        let ended_at = Utc::now();
        match tokio::time::timeout(
            self.persist_timeout,
            self.records.finalize_session(self.id, ended_at, &usage),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(session_id = %self.id, "session finalize failed: {e}");
            }
            Err(_) => {
                tracing::warn!(session_id = %self.id, "session finalize timed out");
            }
        }

        // Registry removal and the terminal transition form the atomic
        // pair the registry invariant requires: once Terminated is
        // observable, the entry is already gone.
        self.registry.remove(&self.id).await;
        self.status
            .store(SessionStatus::Terminated.as_u8(), Ordering::SeqCst);
    }
}

/// Mutex acquisition that shrugs off poisoning: every guarded section is
/// a short field read/write with no await points, so a panicked holder
/// leaves nothing half-updated worth refusing over.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
