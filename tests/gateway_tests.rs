/// Live gateway integration tests
/// Channels stand in for WebSocket connections; frames are checked as JSON
use chat_server::db::{self, ChatStore, DbPool};
use chat_server::gateway::ChatGateway;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::timeout;

async fn recv_frame(rx: &mut UnboundedReceiver<String>) -> Value {
    let text = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("Timed out waiting for frame")
        .expect("Channel closed");
    serde_json::from_str(&text).expect("Frame is not JSON")
}

async fn assert_silent(rx: &mut UnboundedReceiver<String>) {
    let result = timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(result.is_err(), "unexpected frame: {:?}", result);
}

async fn create_chat(pool: &DbPool, participants: &[&str]) -> chat_server::db::models::Chat {
    let participants: Vec<String> = participants.iter().map(|s| s.to_string()).collect();
    ChatStore::create_chat(pool, &participants, false, None, None)
        .await
        .expect("Failed to create chat")
}

fn chat_message(chat_id: &str, sender: &str, text: &str) -> String {
    json!({
        "type": "chat_message",
        "chat_id": chat_id,
        "sender_id": sender,
        "timestamp": "2025-01-01T00:00:00Z",
        "content": {"type": "text", "text": text}
    })
    .to_string()
}

#[tokio::test]
async fn test_new_chat_notifies_everyone_but_creator() {
    let pool = db::create_test_pool();
    let gateway = ChatGateway::new(pool.clone());
    let (a_tx, mut a_rx) = unbounded_channel();
    let (b_tx, mut b_rx) = unbounded_channel();
    gateway.connect("alice", a_tx).await;
    gateway.connect("bob", b_tx).await;

    let chat = create_chat(&pool, &["alice", "bob", "carol"]).await;
    let notified = gateway.notify_chat_participants(&chat, "alice").await;
    assert_eq!(notified, 1); // carol is offline

    let frame = recv_frame(&mut b_rx).await;
    assert_eq!(frame["type"], "new_chat");
    assert_eq!(frame["chat"]["chat_id"], chat.chat_id.as_str());
    assert_silent(&mut a_rx).await;
}

#[tokio::test]
async fn test_chat_message_reaches_all_connected_participants() {
    let pool = db::create_test_pool();
    let gateway = ChatGateway::new(pool.clone());
    let (a_tx, mut a_rx) = unbounded_channel();
    let (b_tx, mut b_rx) = unbounded_channel();
    let (m_tx, mut m_rx) = unbounded_channel();
    gateway.connect("alice", a_tx).await;
    gateway.connect("bob", b_tx).await;
    gateway.connect("mallory", m_tx).await;

    let chat = create_chat(&pool, &["alice", "bob"]).await;
    gateway.handle_text("alice", &chat_message(&chat.chat_id, "alice", "hi")).await;

    let to_alice = recv_frame(&mut a_rx).await;
    let to_bob = recv_frame(&mut b_rx).await;
    for frame in [&to_alice, &to_bob] {
        assert_eq!(frame["type"], "chat_message");
        assert_eq!(frame["message"]["content"]["text"], "hi");
        assert_eq!(frame["message"]["content"]["content"], "hi");
    }
    let message_id = to_alice["message"]["message_id"].as_str().expect("message_id missing");
    assert!(!message_id.is_empty());
    assert_eq!(to_bob["message"]["message_id"], message_id);
    assert_silent(&mut m_rx).await;

    // A second message gets a fresh id
    gateway.handle_text("alice", &chat_message(&chat.chat_id, "alice", "again")).await;
    let next = recv_frame(&mut a_rx).await;
    assert_ne!(next["message"]["message_id"], message_id);

    let page = ChatStore::get_chat_messages(&pool, &chat.chat_id, 1, 20)
        .await
        .expect("Failed to list");
    assert_eq!(page.pagination.total_messages, 2);
}

#[tokio::test]
async fn test_failed_message_errors_only_to_sender() {
    let pool = db::create_test_pool();
    let gateway = ChatGateway::new(pool.clone());
    let (a_tx, mut a_rx) = unbounded_channel();
    let (b_tx, mut b_rx) = unbounded_channel();
    gateway.connect("alice", a_tx).await;
    gateway.connect("bob", b_tx).await;

    // Missing content and timestamp
    let incomplete = json!({"type": "chat_message", "chat_id": "chat_x", "sender_id": "alice"});
    gateway.handle_text("alice", &incomplete.to_string()).await;
    let frame = recv_frame(&mut a_rx).await;
    assert_eq!(frame["type"], "error");
    assert!(frame["message"].is_string());

    // Unknown chat
    gateway.handle_text("alice", &chat_message("chat_missing", "alice", "hello?")).await;
    let frame = recv_frame(&mut a_rx).await;
    assert_eq!(frame["type"], "error");
    assert!(frame["details"].is_string());

    assert_silent(&mut b_rx).await;
    assert!(gateway.registry().is_connected("alice").await);
}

#[tokio::test]
async fn test_read_receipt_pushes_then_persists() {
    let pool = db::create_test_pool();
    let gateway = ChatGateway::new(pool.clone());
    let (a_tx, mut a_rx) = unbounded_channel();
    let (b_tx, mut b_rx) = unbounded_channel();
    gateway.connect("alice", a_tx).await;
    gateway.connect("bob", b_tx).await;

    let chat = create_chat(&pool, &["alice", "bob"]).await;
    gateway.handle_text("bob", &chat_message(&chat.chat_id, "bob", "read me")).await;
    let message_id = recv_frame(&mut a_rx).await["message"]["message_id"]
        .as_str()
        .expect("message_id missing")
        .to_string();
    recv_frame(&mut b_rx).await;

    let receipt = json!({
        "type": "read_receipt",
        "chat_id": chat.chat_id,
        "message_id": message_id
    });
    gateway.handle_text("alice", &receipt.to_string()).await;

    let frame = recv_frame(&mut b_rx).await;
    assert_eq!(frame["type"], "read");
    assert_eq!(frame["user_id"], "alice");
    assert_eq!(frame["message_id"], message_id.as_str());
    assert_silent(&mut a_rx).await;

    // The durable update runs detached; poll for it
    let mut persisted = false;
    for _ in 0..50 {
        let message = ChatStore::get_message(&pool, &chat.chat_id, &message_id)
            .await
            .expect("Query failed")
            .expect("Message not found");
        if message.status.read_by.contains("alice") {
            persisted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(persisted, "read receipt was never persisted");
}

#[tokio::test]
async fn test_read_receipt_for_missing_message_still_notifies() {
    let pool = db::create_test_pool();
    let gateway = ChatGateway::new(pool.clone());
    let (a_tx, mut a_rx) = unbounded_channel();
    let (b_tx, mut b_rx) = unbounded_channel();
    gateway.connect("alice", a_tx).await;
    gateway.connect("bob", b_tx).await;

    let chat = create_chat(&pool, &["alice", "bob"]).await;
    let receipt = json!({
        "type": "read_receipt",
        "chat_id": chat.chat_id,
        "message_id": "msg_gone"
    });
    gateway.handle_text("alice", &receipt.to_string()).await;

    assert_eq!(recv_frame(&mut b_rx).await["type"], "read");
    // The background failure is logged, never reported to the client
    assert_silent(&mut a_rx).await;
}

#[tokio::test]
async fn test_friend_request_relay() {
    let pool = db::create_test_pool();
    let gateway = ChatGateway::new(pool);
    let (a_tx, mut a_rx) = unbounded_channel();
    let (b_tx, mut b_rx) = unbounded_channel();
    gateway.connect("alice", a_tx).await;
    gateway.connect("bob", b_tx).await;

    gateway
        .handle_text("alice", &json!({"type": "friend_request", "to_user_id": "bob"}).to_string())
        .await;
    let frame = recv_frame(&mut b_rx).await;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["notification_type"], "friend_request");
    assert_eq!(frame["from_user_id"], "alice");

    gateway
        .handle_text(
            "bob",
            &json!({
                "type": "friend_request_response",
                "from_user_id": "alice",
                "request_id": "req_1",
                "accepted": true
            })
            .to_string(),
        )
        .await;
    let frame = recv_frame(&mut a_rx).await;
    assert_eq!(frame["notification_type"], "friend_request_response");
    assert_eq!(frame["from_user_id"], "bob");
    assert_eq!(frame["request_id"], "req_1");
    assert_eq!(frame["accepted"], true);
}

#[tokio::test]
async fn test_offline_participant_catches_up_via_history() {
    let pool = db::create_test_pool();
    let gateway = ChatGateway::new(pool.clone());
    let (a_tx, mut a_rx) = unbounded_channel();
    gateway.connect("alice", a_tx).await;

    let chat = create_chat(&pool, &["alice", "bob"]).await;
    gateway.handle_text("alice", &chat_message(&chat.chat_id, "alice", "while you were out")).await;
    recv_frame(&mut a_rx).await;

    // bob connects later and gets nothing live
    let (b_tx, mut b_rx) = unbounded_channel();
    gateway.connect("bob", b_tx).await;
    assert_silent(&mut b_rx).await;

    let page = ChatStore::get_chat_messages(&pool, &chat.chat_id, 1, 20)
        .await
        .expect("Failed to list");
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].sender_id, "alice");
}

#[tokio::test]
async fn test_reconnect_replaces_previous_connection() {
    let pool = db::create_test_pool();
    let gateway = ChatGateway::new(pool.clone());
    let (old_tx, mut old_rx) = unbounded_channel();
    let (new_tx, mut new_rx) = unbounded_channel();
    let (a_tx, _a_rx) = unbounded_channel();
    gateway.connect("alice", a_tx).await;
    let old_id = gateway.connect("bob", old_tx).await;
    gateway.connect("bob", new_tx).await;

    let chat = create_chat(&pool, &["alice", "bob"]).await;
    gateway.handle_text("alice", &chat_message(&chat.chat_id, "alice", "which device?")).await;

    assert_eq!(recv_frame(&mut new_rx).await["type"], "chat_message");
    assert_eq!(old_rx.recv().await, None);

    gateway.release("bob", old_id).await;
    assert!(gateway.registry().is_connected("bob").await);
}
