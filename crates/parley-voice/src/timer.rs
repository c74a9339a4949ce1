//! Per-session idle watchdog and client heartbeat.

use crate::session::Session;
use parley_types::TerminationReason;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Timer thresholds. Both are deployment configuration; the defaults
/// match the reference system.
#[derive(Debug, Clone, Copy)]
pub struct TimerConfig {
    /// Forced termination after this long with no activity on either leg.
    pub idle_timeout: Duration,
    /// Interval between transport-level pings to the client. A missed
    /// pong does not itself terminate the session; transport close does.
    pub heartbeat_interval: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(600),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Spawns the watchdog task for one session.
///
/// The task sleeps until the idle deadline implied by the session's last
/// activity; any activity pushes the deadline out, so it re-checks and
/// re-arms instead of firing. It exits when the session's close signal
/// flips, which also makes it safe for the deadline path to call
/// `terminate` itself — the winning call flips the signal and the loop
/// ends on the next iteration.
pub fn spawn_watchdog(session: Arc<Session>, config: TimerConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut closed = session.closed_signal();

        let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await; // consume the immediate first tick

        loop {
            let remaining = config.idle_timeout.saturating_sub(session.idle_for());
            tokio::select! {
                // wait_for also resolves when the flag flipped before this
                // task subscribed, unlike changed(). The returned watch::Ref
                // is dropped inside the async block so it is not carried across
                // the terminate().await in the sibling branch (keeps the task
                // future Send).
                _ = async { let _ = closed.wait_for(|closed| *closed).await; } => break,
                _ = heartbeat.tick() => {
                    session.send_ping();
                }
                _ = tokio::time::sleep(remaining) => {
                    if session.idle_for() >= config.idle_timeout {
                        tracing::info!(
                            session_id = %session.id(),
                            idle_secs = config.idle_timeout.as_secs(),
                            "idle threshold reached"
                        );
                        session.terminate(TerminationReason::IdleTimeout).await;
                        break;
                    }
                    // Activity arrived while we slept; loop re-arms the
                    // deadline from the new last-activity instant.
                }
            }
        }
    })
}
