//! Integration tests for the pairing protocol: boot the relay on a free port
//! and drive it with real WebSocket clients through the documented scenarios
//! (connect, pair, reject, disconnect, relay). Server tasks are left running
//! when each test ends.

use futures_util::{SinkExt, StreamExt};
use lib::config::Config;
use lib::relay;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

/// Start a relay and wait until its health endpoint answers.
async fn spawn_relay() -> u16 {
    let port = free_port();
    let mut config = Config::default();
    config.relay.port = port;
    config.relay.bind = "127.0.0.1".to_string();
    tokio::spawn(async move {
        let _ = relay::run_relay(config).await;
    });

    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/healthz", port);
    for _ in 0..100 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return port;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("relay did not come up on port {}", port);
}

async fn connect(port: u16, query: &str) -> Ws {
    let url = format!("ws://127.0.0.1:{}/ws?{}", port, query);
    let (ws, _) = connect_async(&url).await.expect("websocket connect");
    ws
}

/// Next text frame as JSON, with a timeout so a missing frame fails the test
/// instead of hanging it.
async fn next_json(ws: &mut Ws) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("frame is JSON");
        }
    }
}

/// Assert that no text frame arrives within the window (silent-drop checks).
async fn expect_no_frame(ws: &mut Ws, window: Duration) {
    let result = tokio::time::timeout(window, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Some(text),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await;
    if let Ok(Some(text)) = result {
        panic!("expected silence, got frame: {}", text);
    }
}

/// Connect a primary and consume its handshake: a 4-digit session code and a
/// zero status.
async fn connect_primary(port: u16) -> (Ws, String) {
    let mut ws = connect(port, "type=primary").await;

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "sessionCode");
    let code = frame["sessionCode"].as_str().expect("code string").to_string();
    assert_eq!(code.len(), 4);
    assert!(code.chars().all(|c| c.is_ascii_digit()));

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "status");
    assert_eq!(frame["secondariesConnected"], 0);

    (ws, code)
}

/// Connect a secondary and assert it was accepted (the primary's status frame
/// is the caller's to consume).
async fn connect_secondary(port: u16, code: &str) -> Ws {
    connect(port, &format!("type=secondary&session={}", code)).await
}

async fn session_count(port: u16) -> u64 {
    let url = format!("http://127.0.0.1:{}/healthz", port);
    let json: serde_json::Value = reqwest::get(&url)
        .await
        .expect("healthz request")
        .json()
        .await
        .expect("healthz json");
    json["sessions"].as_u64().unwrap_or(0)
}

/// Poll until the registry holds `expected` sessions (cleanup is async).
async fn wait_for_session_count(port: u16, expected: u64) {
    for _ in 0..100 {
        if session_count(port).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("session count never reached {}", expected);
}

#[tokio::test]
async fn primary_receives_code_and_zero_status() {
    let port = spawn_relay().await;
    let (_ws, _code) = connect_primary(port).await;
    assert_eq!(session_count(port).await, 1);
}

#[tokio::test]
async fn secondary_join_updates_primary_status() {
    let port = spawn_relay().await;
    let (mut primary, code) = connect_primary(port).await;

    let _secondary = connect_secondary(port, &code).await;

    let frame = next_json(&mut primary).await;
    assert_eq!(frame["type"], "status");
    assert_eq!(frame["secondariesConnected"], 1);
}

#[tokio::test]
async fn second_secondary_is_rejected_and_first_keeps_working() {
    let port = spawn_relay().await;
    let (mut primary, code) = connect_primary(port).await;

    let mut first = connect_secondary(port, &code).await;
    let frame = next_json(&mut primary).await;
    assert_eq!(frame["secondariesConnected"], 1);

    let mut second = connect_secondary(port, &code).await;
    let frame = next_json(&mut second).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "session already has a secondary connected");

    // First binding is unaffected: its traffic still relays.
    first
        .send(Message::Text(r#"{"type":"stateUpdate","dx":1}"#.into()))
        .await
        .expect("send through first secondary");
    let frame = next_json(&mut primary).await;
    assert_eq!(frame["type"], "stateUpdate");
    assert_eq!(frame["dx"], 1);
}

#[tokio::test]
async fn unknown_code_is_rejected_without_side_effects() {
    let port = spawn_relay().await;
    let (_primary, _code) = connect_primary(port).await;

    let mut ws = connect_secondary(port, "0000").await;
    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "invalid session code");
    assert_eq!(session_count(port).await, 1);
}

#[tokio::test]
async fn malformed_code_is_rejected() {
    let port = spawn_relay().await;

    let mut ws = connect_secondary(port, "not-a-code").await;
    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "invalid session code");
}

#[tokio::test]
async fn missing_role_is_rejected() {
    let port = spawn_relay().await;

    let mut ws = connect(port, "type=spectator").await;
    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "unknown client type");
}

#[tokio::test]
async fn uppercase_session_param_is_accepted() {
    let port = spawn_relay().await;
    let (mut primary, code) = connect_primary(port).await;

    let _secondary = connect(port, &format!("type=secondary&SESSION={}", code)).await;

    let frame = next_json(&mut primary).await;
    assert_eq!(frame["type"], "status");
    assert_eq!(frame["secondariesConnected"], 1);
}

#[tokio::test]
async fn secondary_disconnect_reverts_session_to_joinable() {
    let port = spawn_relay().await;
    let (mut primary, code) = connect_primary(port).await;

    let mut secondary = connect_secondary(port, &code).await;
    let frame = next_json(&mut primary).await;
    assert_eq!(frame["secondariesConnected"], 1);

    secondary.close(None).await.expect("close secondary");

    let frame = next_json(&mut primary).await;
    assert_eq!(frame["type"], "status");
    assert_eq!(frame["secondariesConnected"], 0);

    // The session survives its secondary: a new one can join.
    let _replacement = connect_secondary(port, &code).await;
    let frame = next_json(&mut primary).await;
    assert_eq!(frame["secondariesConnected"], 1);
}

#[tokio::test]
async fn primary_disconnect_destroys_session_and_orphan_sends_are_dropped() {
    let port = spawn_relay().await;
    let (mut primary, code) = connect_primary(port).await;

    let mut orphan = connect_secondary(port, &code).await;
    let frame = next_json(&mut primary).await;
    assert_eq!(frame["secondariesConnected"], 1);

    primary.close(None).await.expect("close primary");
    wait_for_session_count(port, 0).await;

    // New secondaries can no longer resolve the code.
    let mut late = connect_secondary(port, &code).await;
    let frame = next_json(&mut late).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "invalid session code");

    // The orphan stays connected; its traffic goes nowhere, silently.
    orphan
        .send(Message::Text(r#"{"type":"stateUpdate","dx":1}"#.into()))
        .await
        .expect("orphan send");
    expect_no_frame(&mut orphan, Duration::from_millis(300)).await;

    orphan
        .send(Message::Text(r#"{"type":"stateUpdate","dx":2}"#.into()))
        .await
        .expect("orphan socket still open");
}

#[tokio::test]
async fn code_space_is_reusable_after_destroy() {
    let port = spawn_relay().await;
    let (mut primary, _code) = connect_primary(port).await;
    primary.close(None).await.expect("close primary");
    wait_for_session_count(port, 0).await;

    // Not asserting the same numeric value comes back (it is a random draw),
    // but the registry must be empty and happily hand out codes again.
    let (_ws, new_code) = connect_primary(port).await;
    assert_eq!(new_code.len(), 4);
}

#[tokio::test]
async fn state_update_payload_is_relayed_verbatim_with_tag() {
    let port = spawn_relay().await;
    let (mut primary, code) = connect_primary(port).await;
    let mut secondary = connect_secondary(port, &code).await;
    let frame = next_json(&mut primary).await;
    assert_eq!(frame["secondariesConnected"], 1);

    secondary
        .send(Message::Text(r#"{"type":"stateUpdate","dx":1}"#.into()))
        .await
        .expect("send state update");
    let frame = next_json(&mut primary).await;
    assert_eq!(frame["type"], "stateUpdate");
    assert_eq!(frame["dx"], 1);

    // Unrecognized kinds are re-tagged as state updates, fields intact.
    secondary
        .send(Message::Text(r#"{"type":"tilt","gamma":0.5}"#.into()))
        .await
        .expect("send tilt");
    let frame = next_json(&mut primary).await;
    assert_eq!(frame["type"], "stateUpdate");
    assert_eq!(frame["gamma"], 0.5);
}

#[tokio::test]
async fn control_command_keeps_its_discriminator() {
    let port = spawn_relay().await;
    let (mut primary, code) = connect_primary(port).await;
    let mut secondary = connect_secondary(port, &code).await;
    let frame = next_json(&mut primary).await;
    assert_eq!(frame["secondariesConnected"], 1);

    secondary
        .send(Message::Text(r#"{"type":"controlCommand"}"#.into()))
        .await
        .expect("send control command");
    let frame = next_json(&mut primary).await;
    assert_eq!(frame["type"], "controlCommand");
}

#[tokio::test]
async fn malformed_frames_are_dropped_and_connection_survives() {
    let port = spawn_relay().await;
    let (mut primary, code) = connect_primary(port).await;
    let mut secondary = connect_secondary(port, &code).await;
    let frame = next_json(&mut primary).await;
    assert_eq!(frame["secondariesConnected"], 1);

    secondary
        .send(Message::Text("this is not json".into()))
        .await
        .expect("send garbage");
    expect_no_frame(&mut primary, Duration::from_millis(300)).await;

    // The offending connection stays open and later frames still relay.
    secondary
        .send(Message::Text(r#"{"type":"stateUpdate","ok":true}"#.into()))
        .await
        .expect("send valid frame");
    let frame = next_json(&mut primary).await;
    assert_eq!(frame["type"], "stateUpdate");
    assert_eq!(frame["ok"], true);
}

#[tokio::test]
async fn relay_is_symmetric_for_primary_traffic() {
    let port = spawn_relay().await;
    let (mut primary, code) = connect_primary(port).await;
    let mut secondary = connect_secondary(port, &code).await;
    let frame = next_json(&mut primary).await;
    assert_eq!(frame["secondariesConnected"], 1);

    primary
        .send(Message::Text(r#"{"type":"ping","n":7}"#.into()))
        .await
        .expect("send from primary");
    let frame = next_json(&mut secondary).await;
    assert_eq!(frame["type"], "stateUpdate");
    assert_eq!(frame["n"], 7);
}

#[tokio::test]
async fn concurrent_joins_never_double_bind() {
    let port = spawn_relay().await;
    let (mut primary, code) = connect_primary(port).await;

    // Race a batch of secondaries at the same code; exactly one may win.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let code = code.clone();
        handles.push(tokio::spawn(async move {
            let mut ws = connect_secondary(port, &code).await;
            // Rejected joins see an error frame; the winner sees nothing
            // until the window elapses.
            let frame = tokio::time::timeout(Duration::from_secs(2), async {
                loop {
                    match ws.next().await {
                        Some(Ok(Message::Text(text))) => {
                            let value: serde_json::Value =
                                serde_json::from_str(&text).expect("json");
                            return Some(value);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(_)) | None => return None,
                    }
                }
            })
            .await
            .unwrap_or(None);
            matches!(frame, Some(value) if value["type"] == "error")
        }));
    }

    let mut rejected = 0;
    for handle in handles {
        if handle.await.expect("join task") {
            rejected += 1;
        }
    }
    assert_eq!(rejected, 7, "exactly one secondary may bind");

    let frame = next_json(&mut primary).await;
    assert_eq!(frame["type"], "status");
    assert_eq!(frame["secondariesConnected"], 1);
}
