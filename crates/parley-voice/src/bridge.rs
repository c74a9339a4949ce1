//! Upstream Bridge: one outbound duplex connection per session.
//!
//! The bridge owns the WebSocket to the upstream conversational service,
//! sends the session configuration as its first frame, keeps the link
//! alive with an application-level ping, and surfaces everything it reads
//! as typed [`BridgeEvent`]s on a single channel — the session's upstream
//! pump is the only consumer. A dropped upstream connection always ends
//! the session; the bridge never reconnects.

use crate::error::VoiceError;
use crate::protocol::{SessionProfile, UpstreamCommand, UpstreamEvent};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Bytes, Message};

/// Connection parameters for the upstream leg.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Full WebSocket URL of the upstream realtime endpoint.
    pub url: String,
    /// Bearer credential for the upstream service.
    pub api_key: String,
    /// Session configuration sent as the first frame after connect.
    pub profile: SessionProfile,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
}

/// What the bridge surfaces to the session's upstream pump.
#[derive(Debug)]
pub enum BridgeEvent {
    /// A parsed upstream event.
    Event(UpstreamEvent),
    /// The upstream connection is gone. Emitted at most once, from the
    /// reader's single exit point.
    Disconnected,
}

/// Transport seam between the session and the upstream connection.
///
/// [`UpstreamBridge`] is the production implementation; tests substitute
/// a capturing stub so session logic is exercised without sockets.
#[async_trait::async_trait]
pub trait UpstreamSink: Send + Sync {
    async fn send(&self, command: UpstreamCommand) -> Result<(), VoiceError>;
    async fn disconnect(&self);
}

/// Owns the upstream WebSocket plus its reader and writer tasks.
#[derive(Debug)]
pub struct UpstreamBridge {
    outbound_tx: mpsc::Sender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl UpstreamBridge {
    /// Dials the upstream service, bounded by the configured connect
    /// timeout, and sends the session configuration. Returns the bridge
    /// and the event channel for the upstream pump.
    pub async fn connect(
        config: UpstreamConfig,
    ) -> Result<(Arc<Self>, mpsc::Receiver<BridgeEvent>), VoiceError> {
        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::InvalidUrl(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| VoiceError::InvalidUrl("api key is not header-safe".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _response) =
            tokio::time::timeout(config.connect_timeout, connect_async(request))
                .await
                .map_err(|_| VoiceError::ConnectTimeout(config.connect_timeout))?
                .map_err(|e| VoiceError::Connect(e.to_string()))?;

        let (mut sink, mut source) = stream.split();

        // Configure the upstream session before anything else flows.
        let hello = serde_json::to_string(&UpstreamCommand::SessionUpdate {
            session: config.profile.clone(),
        })?;
        sink.send(Message::text(hello))
            .await
            .map_err(|e| VoiceError::Connect(e.to_string()))?;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);
        let (event_tx, event_rx) = mpsc::channel::<BridgeEvent>(256);

        let heartbeat_interval = config.heartbeat_interval;
        let writer = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(heartbeat_interval);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            heartbeat.tick().await; // consume the immediate first tick
            loop {
                tokio::select! {
                    msg = outbound_rx.recv() => match msg {
                        Some(msg) => {
                            let closing = matches!(msg, Message::Close(_));
                            if sink.send(msg).await.is_err() {
                                break;
                            }
                            if closing {
                                break;
                            }
                        }
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    _ = heartbeat.tick() => {
                        if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<UpstreamEvent>(text.as_str()) {
                            Ok(event) => {
                                if event_tx.send(BridgeEvent::Event(event)).await.is_err() {
                                    // Pump is gone; the session is tearing down.
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::warn!("dropping unrecognized upstream event: {e}");
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    // Pings are answered by the stream itself; pongs need no action.
                    Ok(Message::Ping(_) | Message::Pong(_)) => {}
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("upstream read error: {e}");
                        break;
                    }
                }
            }
            // Single emission point: at most one Disconnected per bridge.
            let _ = event_tx.send(BridgeEvent::Disconnected).await;
        });

        Ok((
            Arc::new(Self {
                outbound_tx,
                reader,
                writer,
            }),
            event_rx,
        ))
    }
}

#[async_trait::async_trait]
impl UpstreamSink for UpstreamBridge {
    async fn send(&self, command: UpstreamCommand) -> Result<(), VoiceError> {
        let json = serde_json::to_string(&command)?;
        self.outbound_tx
            .send(Message::text(json))
            .await
            .map_err(|_| VoiceError::UpstreamClosed)
    }

    async fn disconnect(&self) {
        // Stop surfacing events first so the closing session does not see
        // its own close come back as an upstream disconnect.
        self.reader.abort();
        let _ = self.outbound_tx.try_send(Message::Close(None));
    }
}

impl Drop for UpstreamBridge {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
