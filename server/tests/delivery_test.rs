//! Integration tests for the delivery engine scenarios: offline queueing
//! and replay, mixed live/queued fan-out, validation, and history.

use futures_util::StreamExt;
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use courier_server::auth::jwt;
use courier_server::state::AppState;
use courier_server::store::OfflineStore;
use courier_server::ws::registry::ConnectionRegistry;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Helper: start the server on a random port and return (addr, jwt_secret).
async fn start_test_server() -> (SocketAddr, Vec<u8>) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = courier_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret =
        jwt::load_or_generate_jwt_secret(&data_dir).expect("Failed to generate JWT secret");

    let state = AppState {
        db,
        jwt_secret: jwt_secret.clone(),
        registry: ConnectionRegistry::new(),
        store: OfflineStore::memory(),
    };

    let app = courier_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
        let _keep = tmp_dir;
    });

    (addr, jwt_secret)
}

async fn connect_ws(addr: SocketAddr, token: &str) -> WsStream {
    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

async fn next_json(ws: &mut WsStream) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for frame")
            .expect("Stream ended unexpectedly")
            .expect("WebSocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("Frame is not valid JSON");
        }
    }
}

async fn expect_silence(ws: &mut WsStream) {
    let result = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    if let Ok(Some(Ok(Message::Text(text)))) = result {
        panic!("Unexpected frame: {}", text);
    }
}

async fn wait_until_online(addr: SocketAddr, secret: &[u8], user_id: i64) {
    let token = jwt::issue_access_token(secret, user_id).unwrap();
    let client = reqwest::Client::new();
    for _ in 0..100 {
        let resp = client
            .get(format!("http://{}/api/presence/{}", addr, user_id))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        if body["online"] == true {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("User {} never came online", user_id);
}

async fn post_message(
    addr: SocketAddr,
    token: &str,
    body: serde_json::Value,
) -> (reqwest::StatusCode, serde_json::Value) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/api/messages", addr))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    let body: serde_json::Value = resp.json().await.unwrap();
    (status, body)
}

#[tokio::test]
async fn offline_message_is_queued_then_replayed_on_connect() {
    let (addr, secret) = start_test_server().await;
    let sender_token = jwt::issue_access_token(&secret, 1).unwrap();
    let receiver_token = jwt::issue_access_token(&secret, 2).unwrap();

    // Recipient 2 is disconnected: the message goes to the offline queue
    let (status, report) = post_message(
        addr,
        &sender_token,
        json!({ "receiver_id": 2, "content": "hi" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(report["status"], "sent");
    assert_eq!(report["accepted"][0]["disposition"], "queued");

    // On connect, the backlog is the first streamed record
    let mut ws = connect_ws(addr, &receiver_token).await;
    let frame = next_json(&mut ws).await;
    assert_eq!(frame["sender_id"], 1);
    assert_eq!(frame["content"], "hi");
    drop(ws);

    // The queue was drained: a reconnect replays nothing
    let mut ws = connect_ws(addr, &receiver_token).await;
    expect_silence(&mut ws).await;
}

#[tokio::test]
async fn backlog_is_replayed_in_send_order() {
    let (addr, secret) = start_test_server().await;
    let sender_token = jwt::issue_access_token(&secret, 1).unwrap();
    let receiver_token = jwt::issue_access_token(&secret, 2).unwrap();

    for content in ["first", "second", "third"] {
        let (status, _) = post_message(
            addr,
            &sender_token,
            json!({ "receiver_id": 2, "content": content }),
        )
        .await;
        assert_eq!(status, 200);
    }

    let mut ws = connect_ws(addr, &receiver_token).await;
    for expected in ["first", "second", "third"] {
        let frame = next_json(&mut ws).await;
        assert_eq!(frame["content"], expected);
    }
}

#[tokio::test]
async fn fanout_delivers_live_to_connected_and_queues_for_disconnected() {
    let (addr, secret) = start_test_server().await;
    let sender_token = jwt::issue_access_token(&secret, 1).unwrap();
    let receiver2_token = jwt::issue_access_token(&secret, 2).unwrap();
    let receiver3_token = jwt::issue_access_token(&secret, 3).unwrap();

    let mut ws2 = connect_ws(addr, &receiver2_token).await;
    wait_until_online(addr, &secret, 2).await;

    let (status, report) = post_message(
        addr,
        &sender_token,
        json!({ "receiver_id": [2, 3], "content": "hi" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(report["status"], "sent");
    assert_eq!(report["accepted"][0]["disposition"], "live");
    assert_eq!(report["accepted"][1]["disposition"], "queued");

    // 2 receives it live, exactly once
    let frame = next_json(&mut ws2).await;
    assert_eq!(frame["content"], "hi");
    expect_silence(&mut ws2).await;

    // 3 finds exactly one queued entry at connect
    let mut ws3 = connect_ws(addr, &receiver3_token).await;
    let frame = next_json(&mut ws3).await;
    assert_eq!(frame["sender_id"], 1);
    assert_eq!(frame["content"], "hi");
    expect_silence(&mut ws3).await;
}

#[tokio::test]
async fn empty_recipient_list_is_rejected_with_no_side_effects() {
    let (addr, secret) = start_test_server().await;
    let sender_token = jwt::issue_access_token(&secret, 1).unwrap();
    let receiver_token = jwt::issue_access_token(&secret, 2).unwrap();

    let (status, body) = post_message(
        addr,
        &sender_token,
        json!({ "receiver_id": [], "content": "hi" }),
    )
    .await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("receiver_id"));

    // Nothing was persisted for anyone
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://{}/api/messages", addr))
        .bearer_auth(&receiver_token)
        .send()
        .await
        .unwrap();
    let conversations: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(conversations.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn submission_without_token_is_rejected() {
    let (addr, _secret) = start_test_server().await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/api/messages", addr))
        .json(&json!({ "receiver_id": 2, "content": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn history_lists_latest_per_sender_and_full_conversation() {
    let (addr, secret) = start_test_server().await;
    let sender1_token = jwt::issue_access_token(&secret, 1).unwrap();
    let sender3_token = jwt::issue_access_token(&secret, 3).unwrap();
    let receiver_token = jwt::issue_access_token(&secret, 2).unwrap();

    for content in ["first", "second"] {
        post_message(
            addr,
            &sender1_token,
            json!({ "receiver_id": 2, "content": content }),
        )
        .await;
    }
    post_message(
        addr,
        &sender3_token,
        json!({ "receiver_id": 2, "content": "from three" }),
    )
    .await;

    let client = reqwest::Client::new();

    // Conversation overview: one entry per sender, latest message, newest first
    let resp = client
        .get(format!("http://{}/api/messages", addr))
        .bearer_auth(&receiver_token)
        .send()
        .await
        .unwrap();
    let overview: serde_json::Value = resp.json().await.unwrap();
    let overview = overview.as_array().unwrap();
    assert_eq!(overview.len(), 2);
    assert_eq!(overview[0]["sender_id"], 3);
    assert_eq!(overview[0]["content"], "from three");
    assert_eq!(overview[1]["sender_id"], 1);
    assert_eq!(overview[1]["content"], "second");

    // Full per-sender history, oldest first
    let resp = client
        .get(format!("http://{}/api/messages/1", addr))
        .bearer_auth(&receiver_token)
        .send()
        .await
        .unwrap();
    let history: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(history["sender_id"], 1);
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "first");
    assert_eq!(messages[1]["content"], "second");
}

#[tokio::test]
async fn presence_flag_follows_the_connection() {
    let (addr, secret) = start_test_server().await;
    let receiver_token = jwt::issue_access_token(&secret, 2).unwrap();
    let observer_token = jwt::issue_access_token(&secret, 1).unwrap();

    let client = reqwest::Client::new();
    let presence = |client: reqwest::Client, token: String| async move {
        let resp = client
            .get(format!("http://{}/api/presence/2", addr))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        body["online"] == true
    };

    assert!(!presence(client.clone(), observer_token.clone()).await);

    let ws = connect_ws(addr, &receiver_token).await;
    wait_until_online(addr, &secret, 2).await;
    drop(ws);

    // The relay clears the flag on termination
    let mut went_offline = false;
    for _ in 0..100 {
        if !presence(client.clone(), observer_token.clone()).await {
            went_offline = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(went_offline, "User 2 never went offline after disconnect");
}
