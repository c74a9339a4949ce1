//! End-to-end voice session tests: handshake gating, the connect-failure
//! edge, and a full client↔proxy↔upstream exchange against a mock
//! upstream server.

mod common;

use common::{dead_upstream, start_server, TEST_API_KEY};
use futures_util::{SinkExt, Stream, StreamExt};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Reads text frames until one parses with the given type, failing on
/// close or timeout.
async fn expect_event(
    ws: &mut (impl Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
    wanted: &str,
) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {wanted}"))
            .unwrap_or_else(|| panic!("stream ended waiting for {wanted}"))
            .expect("websocket error");
        match frame {
            Message::Text(text) => {
                let value: serde_json::Value =
                    serde_json::from_str(text.as_str()).expect("frames are JSON");
                if value["type"] == wanted {
                    return value;
                }
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => panic!("connection closed while waiting for {wanted}"),
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

/// Polls until the registry drains or the deadline passes.
async fn wait_for_empty_registry(server: &common::TestServer) {
    for _ in 0..100 {
        if server.registry.count().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("registry never drained");
}

#[tokio::test]
async fn rejected_handshake_creates_nothing() {
    let server = start_server(dead_upstream().await).await;

    let err = tokio_tungstenite::connect_async(server.ws("api_key=pk_wrong"))
        .await
        .expect_err("bad key must not upgrade");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected HTTP rejection, got {other}"),
    }

    assert_eq!(server.registry.count().await, 0);
    assert_eq!(server.store.created.load(Ordering::SeqCst), 0);
    assert_eq!(server.store.finalized.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_credentials_are_rejected() {
    let server = start_server(dead_upstream().await).await;

    let err = tokio_tungstenite::connect_async(format!("ws://{}/voice", server.addr))
        .await
        .expect_err("credential-less connect must not upgrade");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected HTTP rejection, got {other}"),
    }
}

#[tokio::test]
async fn upstream_connect_failure_sends_one_error_then_closes() {
    let server = start_server(dead_upstream().await).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws(&format!(
        "api_key={TEST_API_KEY}"
    )))
    .await
    .expect("handshake should succeed");

    let error = expect_event(&mut ws, "error").await;
    assert_eq!(error["message"], "upstream connection failed");

    let disconnected = expect_event(&mut ws, "disconnected").await;
    assert_eq!(disconnected["reason"], "upstream-connect-failed");

    // The transport closes after the final events.
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("close should arrive")
        {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(_)) => break,
        }
    }

    wait_for_empty_registry(&server).await;
    assert_eq!(server.store.finalized.load(Ordering::SeqCst), 1);
}

/// Mock upstream: accepts one connection, validates the configuration
/// frame, greets with session.created, then answers every audio append
/// with an audio delta and every commit with a completion event.
async fn mock_upstream() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("ws");

        let first = ws.next().await.expect("config frame").expect("read");
        let config: serde_json::Value =
            serde_json::from_str(first.into_text().expect("text").as_str()).expect("json");
        assert_eq!(config["type"], "session.update");

        ws.send(Message::text(
            r#"{"type":"session.created","session":{"id":"sess_mock"}}"#,
        ))
        .await
        .expect("send");

        while let Some(Ok(frame)) = ws.next().await {
            let Message::Text(text) = frame else {
                continue;
            };
            let value: serde_json::Value = match serde_json::from_str(text.as_str()) {
                Ok(v) => v,
                Err(_) => continue,
            };
            match value["type"].as_str() {
                Some("input_audio_buffer.append") => {
                    ws.send(Message::text(
                        r#"{"type":"response.audio.delta","delta":"Zm9v"}"#,
                    ))
                    .await
                    .expect("send delta");
                }
                Some("input_audio_buffer.commit") => {
                    ws.send(Message::text(
                        r#"{"type":"response.done","usage":{"input_tokens":7,"output_tokens":11}}"#,
                    ))
                    .await
                    .expect("send done");
                }
                _ => {}
            }
        }
    });

    (format!("ws://{addr}"), handle)
}

#[tokio::test]
async fn full_session_flow_bridges_both_legs() {
    let (upstream_url, upstream_task) = mock_upstream().await;
    let server = start_server(upstream_url).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws(&format!(
        "api_key={TEST_API_KEY}"
    )))
    .await
    .expect("handshake should succeed");

    // The upstream's session.created echo reaches the client.
    expect_event(&mut ws, "session.created").await;
    assert_eq!(server.registry.count().await, 1);

    // Client ping is answered locally.
    ws.send(Message::text(r#"{"type":"ping"}"#))
        .await
        .expect("send ping");
    expect_event(&mut ws, "pong").await;

    // Audio flows client → upstream → back as a delta.
    ws.send(Message::text(
        r#"{"type":"input_audio_buffer.append","audio":"QUJDRA=="}"#,
    ))
    .await
    .expect("send audio");
    let delta = expect_event(&mut ws, "response.audio.delta").await;
    assert_eq!(delta["delta"], "Zm9v");

    // Commit produces a completion event with usage intact.
    ws.send(Message::text(r#"{"type":"input_audio_buffer.commit"}"#))
        .await
        .expect("send commit");
    let done = expect_event(&mut ws, "response.done").await;
    assert_eq!(done["usage"]["input_tokens"], 7);
    assert_eq!(done["usage"]["output_tokens"], 11);

    // Unknown client messages are dropped without killing the session.
    ws.send(Message::text(r#"{"type":"not.a.thing"}"#))
        .await
        .expect("send junk");
    ws.send(Message::text(r#"{"type":"ping"}"#))
        .await
        .expect("send ping");
    expect_event(&mut ws, "pong").await;

    // Client disconnect tears the session down exactly once.
    ws.close(None).await.expect("close");
    wait_for_empty_registry(&server).await;
    assert_eq!(server.store.created.load(Ordering::SeqCst), 1);
    assert_eq!(server.store.finalized.load(Ordering::SeqCst), 1);

    upstream_task.abort();
}
