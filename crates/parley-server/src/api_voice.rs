//! Voice API: the upgrade endpoint (Handshake Gate), session tokens, and
//! the per-connection task wiring.

use crate::middleware::AuthContext;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        ConnectInfo, Extension, Query, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use parley_types::TerminationReason;
use parley_voice::{
    spawn_watchdog, BridgeEvent, ClientEvent, ClientFrame, Session, SessionParams, UpstreamBridge,
    UpstreamConfig, UpstreamSink,
};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::mpsc;

/// Duration for which a WebSocket session token is valid (60 seconds).
/// Tokens are short-lived: the TTL limits replay risk for unused tokens.
const WS_TOKEN_TTL_SECS: u64 = 60;

/// Capacity of the per-session outbound frame queue. Beyond this the
/// client is too slow and frames are dropped.
const CLIENT_QUEUE_CAPACITY: usize = 256;

/// Derives the 32-byte HMAC key for WebSocket session tokens. Uses
/// SHA-256 with a domain-separation prefix; without a configured secret,
/// per-process randomness is mixed in instead (outstanding tokens die
/// with the process, which their one-minute TTL makes acceptable).
pub fn derive_ws_token_secret(configured: Option<&str>) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"parley-ws-token-v1:");
    match configured {
        Some(secret) if !secret.is_empty() => hasher.update(secret.as_bytes()),
        _ => {
            hasher.update(uuid::Uuid::new_v4().as_bytes());
            hasher.update(uuid::Uuid::new_v4().as_bytes());
        }
    }
    let result = hasher.finalize();
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&result);
    secret
}

/// Generates an HMAC-SHA256 signed WebSocket session token.
///
/// Token format: `base64(user_id|expires_unix_secs|hmac_signature)`.
/// The token binds the user to a time window, preventing both
/// impersonation and replay after expiry.
pub fn generate_ws_token(user_id: &str, secret: &[u8; 32]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let expires = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + WS_TOKEN_TTL_SECS;

    let payload = format!("{}|{}", user_id, expires);

    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC key length is valid");
    mac.update(payload.as_bytes());
    let signature = mac.finalize().into_bytes();

    use base64::Engine;
    let token_bytes = format!("{}|{}", payload, hex::encode(signature));
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(token_bytes.as_bytes())
}

/// Verifies an HMAC-SHA256 signed WebSocket session token.
/// Returns the bound user id if valid and not expired.
pub fn verify_ws_token(token: &str, secret: &[u8; 32]) -> Result<String, StatusCode> {
    use base64::Engine;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let token_str = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    // Parse: user_id|expires|signature_hex
    let parts: Vec<&str> = token_str.splitn(3, '|').collect();
    if parts.len() != 3 {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let user_id = parts[0];
    let expires_str = parts[1];
    let sig_hex = parts[2];

    let payload = format!("{}|{}", user_id, expires_str);
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC key length is valid");
    mac.update(payload.as_bytes());
    let expected_sig = mac.finalize().into_bytes();
    let provided_sig = hex::decode(sig_hex).map_err(|_| StatusCode::UNAUTHORIZED)?;

    if expected_sig.as_slice() != provided_sig.as_slice() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let expires: u64 = expires_str.parse().map_err(|_| StatusCode::UNAUTHORIZED)?;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    if now > expires {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(user_id.to_string())
}

/// `POST /api/voice/token` — issues a short-lived, HMAC-signed WebSocket
/// session token for the authenticated user. Clients call this and then
/// connect to `/voice?token=<token>` instead of putting their API key in
/// a URL.
pub async fn create_voice_token_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> axum::Json<serde_json::Value> {
    let token = generate_ws_token(&auth.user_id, &state.ws_token_secret);
    axum::Json(serde_json::json!({
        "token": token,
        "expires_in_secs": WS_TOKEN_TTL_SECS,
    }))
}

/// `GET /api/voice/sessions` — active session count, for operators.
pub async fn sessions_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "active": state.registry.count().await,
    }))
}

/// Query parameters for the upgrade endpoint.
///
/// Accepts either a signed `token` (preferred) or a raw `api_key`. When
/// both are present, `token` takes precedence. An `Authorization: Bearer`
/// header is accepted in place of the `api_key` parameter.
#[derive(Debug, Deserialize)]
pub struct VoiceConnectParams {
    pub token: Option<String>,
    pub api_key: Option<String>,
}

/// WebSocket handler: `GET /voice?token=...` or `GET /voice?api_key=...`.
///
/// The Handshake Gate: resolves an authenticated identity before the
/// protocol upgrade completes. Rejected handshakes respond 401 and
/// allocate nothing — no session, no upstream connection, no registry
/// entry.
pub async fn voice_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: axum::http::HeaderMap,
    ws: WebSocketUpgrade,
    Query(params): Query<VoiceConnectParams>,
) -> impl IntoResponse {
    let bearer = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let user_id = if let Some(ref token) = params.token {
        match verify_ws_token(token, &state.ws_token_secret) {
            Ok(user_id) => user_id,
            Err(code) => {
                tracing::warn!(
                    remote_addr = %addr,
                    status = %code,
                    "voice token verification failed"
                );
                return code.into_response();
            }
        }
    } else if let Some(api_key) = params.api_key.as_ref().or(bearer.as_ref()) {
        let verified = tokio::time::timeout(
            Duration::from_millis(state.auth_verify_timeout_ms),
            state.authenticator.verify(api_key),
        )
        .await;
        match verified {
            Ok(Ok(identity)) => identity.user_id,
            Ok(Err(_)) => {
                tracing::warn!(remote_addr = %addr, "voice api key rejected");
                return StatusCode::UNAUTHORIZED.into_response();
            }
            Err(_) => {
                tracing::warn!(remote_addr = %addr, "voice credential verification timed out");
                return StatusCode::UNAUTHORIZED.into_response();
            }
        }
    } else {
        tracing::warn!(remote_addr = %addr, "voice connect missing token and api_key");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    tracing::info!(
        user_id = %user_id,
        remote_addr = %addr,
        token_auth = params.token.is_some(),
        "voice handshake accepted"
    );
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// Builds the upstream connection parameters for a new session.
fn upstream_config(state: &AppState) -> UpstreamConfig {
    let tools = state
        .tools
        .specs()
        .into_iter()
        .filter_map(|spec| serde_json::to_value(spec).ok())
        .collect();

    UpstreamConfig {
        url: state.upstream.url.clone(),
        api_key: state.upstream.api_key.clone(),
        profile: parley_voice::SessionProfile {
            modalities: vec!["audio".to_string(), "text".to_string()],
            voice: Some(state.upstream.voice.clone()),
            instructions: state.upstream.instructions.clone(),
            input_audio_format: Some("pcm16".to_string()),
            output_audio_format: Some("pcm16".to_string()),
            turn_detection: Some(serde_json::json!({"type": "server_vad"})),
            tools,
        },
        connect_timeout: Duration::from_secs(state.upstream.connect_timeout_secs),
        heartbeat_interval: Duration::from_secs(state.upstream.heartbeat_interval_secs),
    }
}

/// Runs one voice session: creates the Session, registers it, starts the
/// forwarder, client pump, and watchdog, then establishes the upstream
/// leg and pumps its events until a termination trigger wins.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (client_tx, client_rx) = mpsc::channel::<ClientFrame>(CLIENT_QUEUE_CAPACITY);

    let session = Session::new(SessionParams {
        user_id: user_id.clone(),
        client_tx,
        tools: state.tools.clone(),
        records: state.records.clone(),
        registry: state.registry.clone(),
        persist_timeout: Duration::from_millis(state.session.persist_timeout_ms),
    });
    state.registry.insert(session.clone()).await;

    // Best-effort session record; a storage fault never blocks the call.
    {
        let records = state.records.clone();
        let id = session.id();
        let user_id = user_id.clone();
        tokio::spawn(async move {
            if let Err(e) = records.create_session_record(id, &user_id).await {
                tracing::warn!(session_id = %id, "failed to create session record: {e}");
            }
        });
    }

    let (ws_sender, ws_receiver) = socket.split();

    let forward = tokio::spawn(forward_frames(
        ws_sender,
        client_rx,
        session.closed_signal(),
    ));
    let client_pump = tokio::spawn(run_client_pump(session.clone(), ws_receiver));
    let watchdog = spawn_watchdog(session.clone(), state.session.timer_config());

    // Establish the upstream leg while the client pump is already
    // answering pings and rejecting premature audio.
    match UpstreamBridge::connect(upstream_config(&state)).await {
        Ok((bridge, events)) => {
            session.attach_upstream(bridge.clone());
            if session.activate() {
                tracing::info!(session_id = %session.id(), "session active");
                run_upstream_pump(session.clone(), events).await;
            } else {
                // A termination trigger won the race during connect; the
                // winner may have missed the just-attached bridge.
                bridge.disconnect().await;
            }
        }
        Err(e) => {
            tracing::warn!(session_id = %session.id(), "upstream connect failed: {e}");
            session
                .terminate(TerminationReason::UpstreamConnectFailed)
                .await;
        }
    }

    // The upstream pump only returns once termination began; let the
    // remaining tasks drain and exit on the close signal.
    if let Err(e) = forward.await {
        tracing::debug!("forwarder task ended abnormally: {e}");
    }
    if let Err(e) = client_pump.await {
        tracing::debug!("client pump ended abnormally: {e}");
    }
    if let Err(e) = watchdog.await {
        tracing::debug!("watchdog ended abnormally: {e}");
    }

    tracing::info!(
        session_id = %session.id(),
        reason = session.close_reason().map(|r| r.as_str()).unwrap_or("unknown"),
        "voice session closed"
    );
}

/// Drains the session's outbound queue into the WebSocket. On the close
/// signal it flushes whatever is already queued (the final error and
/// `disconnected` events) and closes the transport.
async fn forward_frames(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, AxumMessage>,
    mut client_rx: mpsc::Receiver<ClientFrame>,
    mut closed: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = client_rx.recv() => match frame {
                Some(frame) => {
                    if ws_sender.send(to_ws_message(frame)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => {
                while let Ok(frame) = client_rx.try_recv() {
                    if ws_sender.send(to_ws_message(frame)).await.is_err() {
                        return;
                    }
                }
                let _ = ws_sender.send(AxumMessage::Close(None)).await;
                break;
            }
        }
    }
}

fn to_ws_message(frame: ClientFrame) -> AxumMessage {
    match frame {
        ClientFrame::Text(text) => AxumMessage::Text(text.into()),
        ClientFrame::Ping => AxumMessage::Ping(Default::default()),
    }
}

/// Client → upstream pump: parses inbound frames and hands them to the
/// session. Malformed or unknown messages are logged and dropped, never
/// fatal; transport close is a termination trigger.
async fn run_client_pump(
    session: Arc<Session>,
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
) {
    let mut closed = session.closed_signal();
    loop {
        tokio::select! {
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => break,
            msg = receiver.next() => match msg {
                Some(Ok(AxumMessage::Text(text))) => {
                    match serde_json::from_str::<ClientEvent>(text.as_str()) {
                        Ok(event) => session.deliver_client_event(event).await,
                        Err(e) => {
                            tracing::warn!(
                                session_id = %session.id(),
                                "dropping unrecognized client message: {e}"
                            );
                        }
                    }
                }
                Some(Ok(AxumMessage::Pong(_))) => session.touch(),
                Some(Ok(AxumMessage::Ping(_))) => {
                    // The transport answers pings itself; still activity.
                    session.touch();
                }
                Some(Ok(AxumMessage::Binary(_))) => {
                    tracing::warn!(
                        session_id = %session.id(),
                        "dropping unexpected binary frame"
                    );
                }
                Some(Ok(AxumMessage::Close(_))) | None => {
                    session.terminate(TerminationReason::ClientDisconnect).await;
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(session_id = %session.id(), "client read error: {e}");
                    session.terminate(TerminationReason::ClientDisconnect).await;
                    break;
                }
            }
        }
    }
}

/// Upstream → client pump: consumes the bridge's event channel. The
/// bridge's single Disconnected notification — or the channel ending —
/// is a termination trigger.
async fn run_upstream_pump(session: Arc<Session>, mut events: mpsc::Receiver<BridgeEvent>) {
    let mut closed = session.closed_signal();
    loop {
        tokio::select! {
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => break,
            event = events.recv() => match event {
                Some(BridgeEvent::Event(event)) => {
                    session.deliver_upstream_event(event).await;
                }
                Some(BridgeEvent::Disconnected) | None => {
                    session.terminate(TerminationReason::UpstreamDisconnect).await;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_token_round_trips() {
        let secret = derive_ws_token_secret(Some("test-secret"));
        let token = generate_ws_token("user-7", &secret);
        let user = verify_ws_token(&token, &secret).expect("token should verify");
        assert_eq!(user, "user-7");
    }

    #[test]
    fn ws_token_rejects_wrong_secret() {
        let secret = derive_ws_token_secret(Some("secret-a"));
        let other = derive_ws_token_secret(Some("secret-b"));
        let token = generate_ws_token("user-7", &secret);
        assert!(verify_ws_token(&token, &other).is_err());
    }

    #[test]
    fn ws_token_rejects_tampered_user() {
        use base64::Engine;
        let secret = derive_ws_token_secret(Some("test-secret"));
        let token = generate_ws_token("user-7", &secret);

        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .unwrap();
        let tampered = String::from_utf8(decoded)
            .unwrap()
            .replacen("user-7", "user-8", 1);
        let forged =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tampered.as_bytes());

        assert!(verify_ws_token(&forged, &secret).is_err());
    }

    #[test]
    fn ws_token_rejects_garbage() {
        let secret = derive_ws_token_secret(None);
        assert!(verify_ws_token("not-base64!!", &secret).is_err());
        assert!(verify_ws_token("", &secret).is_err());
    }

    #[test]
    fn derived_secrets_differ_without_configuration() {
        // Without a configured secret the derivation mixes in process
        // randomness, so two derivations must not collide.
        assert_ne!(derive_ws_token_secret(None), derive_ws_token_secret(None));
        // With configuration the derivation is stable.
        assert_eq!(
            derive_ws_token_secret(Some("fixed")),
            derive_ws_token_secret(Some("fixed"))
        );
    }
}
