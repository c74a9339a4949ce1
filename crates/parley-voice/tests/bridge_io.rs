//! Upstream bridge tests against a local mock WebSocket server.

use futures_util::{SinkExt, StreamExt};
use parley_voice::{
    BridgeEvent, SessionProfile, UpstreamBridge, UpstreamCommand, UpstreamConfig, UpstreamEvent,
    UpstreamSink, VoiceError,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

fn config(addr: std::net::SocketAddr) -> UpstreamConfig {
    UpstreamConfig {
        url: format!("ws://{addr}"),
        api_key: "test-key".to_string(),
        profile: SessionProfile {
            modalities: vec!["audio".to_string(), "text".to_string()],
            voice: Some("sage".to_string()),
            ..SessionProfile::default()
        },
        connect_timeout: Duration::from_secs(5),
        heartbeat_interval: Duration::from_secs(30),
    }
}

#[tokio::test]
async fn bridge_configures_session_then_relays_events() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        // The first frame must be the session configuration.
        let first = ws.next().await.unwrap().unwrap();
        let text = first.into_text().unwrap();
        let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(frame["type"], "session.update");
        assert_eq!(frame["session"]["modalities"][0], "audio");
        assert_eq!(frame["session"]["voice"], "sage");

        ws.send(Message::text(
            r#"{"type":"session.created","session":{"id":"sess_1"}}"#,
        ))
        .await
        .unwrap();

        // A command sent through the bridge arrives verbatim.
        let second = ws.next().await.unwrap().unwrap();
        let text = second.into_text().unwrap();
        let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(frame["type"], "input_audio_buffer.commit");

        // Unknown event types must be dropped by the reader, not break it.
        ws.send(Message::text(r#"{"type":"totally.novel","x":1}"#))
            .await
            .unwrap();
        ws.send(Message::text(r#"{"type":"response.text.delta","delta":"ok"}"#))
            .await
            .unwrap();

        ws.close(None).await.unwrap();
    });

    let (bridge, mut events) = UpstreamBridge::connect(config(addr)).await.unwrap();

    let first = events.recv().await.expect("session.created should arrive");
    assert!(matches!(
        first,
        BridgeEvent::Event(UpstreamEvent::SessionCreated { .. })
    ));

    bridge.send(UpstreamCommand::CommitAudio).await.unwrap();

    let delta = events.recv().await.expect("delta should arrive");
    assert!(
        matches!(
            &delta,
            BridgeEvent::Event(UpstreamEvent::TextDelta { delta }) if delta.as_str() == "ok"
        ),
        "unknown event must be skipped, delta relayed: got {delta:?}"
    );

    // Upstream close surfaces as exactly one Disconnected, then the
    // channel ends.
    let disconnect = events.recv().await.expect("disconnect should arrive");
    assert!(matches!(disconnect, BridgeEvent::Disconnected));
    assert!(events.recv().await.is_none());

    server.await.unwrap();
}

#[tokio::test]
async fn connect_times_out_against_a_silent_peer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Accept the TCP connection but never answer the WebSocket handshake.
    let server = tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let mut cfg = config(addr);
    cfg.connect_timeout = Duration::from_millis(200);

    let err = UpstreamBridge::connect(cfg)
        .await
        .expect_err("handshake should time out");
    assert!(matches!(err, VoiceError::ConnectTimeout(_)));

    server.abort();
}

#[tokio::test]
async fn connect_fails_fast_when_nobody_listens() {
    // Bind then drop to get a port with no listener.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = UpstreamBridge::connect(config(addr))
        .await
        .expect_err("connect should fail");
    assert!(matches!(err, VoiceError::Connect(_)));
}

#[tokio::test]
async fn send_after_disconnect_reports_closed_upstream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // Consume the configuration frame, then linger.
        let _ = ws.next().await;
        while ws.next().await.is_some() {}
    });

    let (bridge, _events) = UpstreamBridge::connect(config(addr)).await.unwrap();
    bridge.disconnect().await;

    // The writer drains the queued close frame and stops; subsequent
    // sends eventually observe the closed channel.
    let mut saw_closed = false;
    for _ in 0..50 {
        if bridge.send(UpstreamCommand::CreateResponse).await.is_err() {
            saw_closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(saw_closed, "send should fail once the writer has shut down");

    server.abort();
}
