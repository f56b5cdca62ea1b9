#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Connection-establishment tests: health probe, handshake, device
//! fingerprint step-up, and protocol violations.

mod common;

use veil_common::DeviceFingerprint;

use common::{connect_device, connect_frame, open_socket, start_test_server};

#[tokio::test]
async fn health_endpoint_returns_json() {
    let server = start_test_server().await;
    let resp = reqwest::get(format!("http://{}/health", server.addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["protocol"], 1);
}

#[tokio::test]
async fn known_device_handshake_returns_connected() {
    let server = start_test_server().await;
    let mut client = connect_device(&server, "alice", "laptop").await;

    // Heartbeat policy rides along so the client can set its ping cadence.
    client.send(serde_json::json!({ "type": "ping", "payload": { "ts": 42 } })).await;
    let pong = client.recv().await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["payload"]["ts"], 42);
}

#[tokio::test]
async fn invalid_token_is_refused() {
    let server = start_test_server().await;
    let mut client = open_socket(server.addr).await;
    client.send(connect_frame("no-such-token", "laptop")).await;

    let err = client.recv().await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["payload"]["code"], "AUTH_FAILED");
    assert!(client.expect_close().await);
}

#[tokio::test]
async fn unknown_device_must_step_up_before_any_traffic() {
    let server = start_test_server().await;
    server.auth.insert_token("tok-alice", "alice");
    let user = server.user_hash("alice");
    server.auth.set_step_up_code(&user, "483921");

    let mut client = open_socket(server.addr).await;
    client.send(connect_frame("tok-alice", "new-phone")).await;

    let challenge = client.recv().await;
    assert_eq!(challenge["type"], "step_up_required");

    client
        .send(serde_json::json!({ "type": "step_up", "payload": { "code": "483921" } }))
        .await;
    let hello = client.recv().await;
    assert_eq!(hello["type"], "connected");

    // The device is now in the known set: a reconnect skips the challenge.
    let mut again = open_socket(server.addr).await;
    again.send(connect_frame("tok-alice", "new-phone")).await;
    assert_eq!(again.recv().await["type"], "connected");
}

#[tokio::test]
async fn frames_before_step_up_are_refused() {
    let server = start_test_server().await;
    server.auth.insert_token("tok-alice", "alice");

    let mut client = open_socket(server.addr).await;
    client.send(connect_frame("tok-alice", "new-phone")).await;
    assert_eq!(client.recv().await["type"], "step_up_required");

    // Anything but a step_up frame terminates the connection unprocessed.
    client
        .send(serde_json::json!({
            "type": "draft_update",
            "payload": { "chat_id": "c1", "based_on_version": 0, "encrypted_content": "ZA==" }
        }))
        .await;
    assert!(client.expect_close().await);
}

#[tokio::test]
async fn wrong_step_up_code_is_refused() {
    let server = start_test_server().await;
    server.auth.insert_token("tok-alice", "alice");
    server.auth.set_step_up_code(&server.user_hash("alice"), "111111");

    let mut client = open_socket(server.addr).await;
    client.send(connect_frame("tok-alice", "new-phone")).await;
    assert_eq!(client.recv().await["type"], "step_up_required");

    client
        .send(serde_json::json!({ "type": "step_up", "payload": { "code": "999999" } }))
        .await;
    let err = client.recv().await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["payload"]["code"], "STEP_UP_DENIED");
    assert!(client.expect_close().await);
}

#[tokio::test]
async fn unknown_frame_type_closes_the_session() {
    let server = start_test_server().await;
    let mut client = connect_device(&server, "alice", "laptop").await;

    client
        .send(serde_json::json!({ "type": "mystery_frame", "payload": {} }))
        .await;
    let err = client.recv_kind("error").await;
    assert_eq!(err["payload"]["code"], "PROTOCOL_ERROR");
    assert!(client.expect_close().await);
}

#[tokio::test]
async fn second_session_for_same_device_replaces_the_first() {
    let server = start_test_server().await;
    let mut first = connect_device(&server, "alice", "laptop").await;

    server
        .auth
        .trust_device(&server.user_hash("alice"), &DeviceFingerprint::new("laptop"));
    let mut second = open_socket(server.addr).await;
    second.send(connect_frame("tok-alice", "laptop")).await;
    assert_eq!(second.recv().await["type"], "connected");

    assert!(first.expect_close().await);
}
