/// Integration tests for the chat store
/// Exercises pagination, listing order and persistence through direct store calls
use chat_server::db::models::{MessageContent, NewMessage};
use chat_server::db::{self, ChatStore, Database, DbPool};
use chat_server::ChatError;
use std::collections::HashSet;

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

async fn direct_chat(pool: &DbPool, a: &str, b: &str) -> String {
    ChatStore::create_chat(pool, &ids(&[a, b]), false, None, None)
        .await
        .expect("Failed to create chat")
        .chat_id
}

async fn send_text(pool: &DbPool, chat_id: &str, sender: &str, text: &str) -> String {
    ChatStore::save_message(pool, &NewMessage::new(chat_id, sender, MessageContent::text(text)))
        .await
        .expect("Failed to save message")
        .message_id
}

#[tokio::test]
async fn test_pages_cover_every_message_once() {
    let pool = db::create_test_pool();
    let chat_id = direct_chat(&pool, "alice", "bob").await;

    let mut sent = HashSet::new();
    for i in 0..47 {
        let sender = if i % 2 == 0 { "alice" } else { "bob" };
        sent.insert(send_text(&pool, &chat_id, sender, &format!("message {}", i)).await);
    }

    for page_size in [1, 7, 20, 47, 100] {
        let first = ChatStore::get_chat_messages(&pool, &chat_id, 1, page_size)
            .await
            .expect("Failed to list");
        assert_eq!(first.pagination.total_messages, 47);

        let mut seen = Vec::new();
        let mut previous_timestamp: Option<String> = None;
        for page in 1..=first.pagination.total_pages {
            let result = ChatStore::get_chat_messages(&pool, &chat_id, page, page_size)
                .await
                .expect("Failed to list");
            assert_eq!(result.pagination.current_page, page);
            for message in result.messages {
                if let Some(prev) = &previous_timestamp {
                    assert!(message.timestamp <= *prev, "messages out of order");
                }
                previous_timestamp = Some(message.timestamp.clone());
                seen.push(message.message_id);
            }
        }

        assert_eq!(seen.len(), sent.len(), "page_size {}", page_size);
        assert_eq!(seen.iter().cloned().collect::<HashSet<_>>(), sent);
    }
}

#[tokio::test]
async fn test_newest_message_first() {
    let pool = db::create_test_pool();
    let chat_id = direct_chat(&pool, "alice", "bob").await;
    send_text(&pool, &chat_id, "alice", "first").await;
    let last = send_text(&pool, &chat_id, "bob", "second").await;

    let page = ChatStore::get_chat_messages(&pool, &chat_id, 1, 20)
        .await
        .expect("Failed to list");
    assert_eq!(page.messages[0].message_id, last);
}

#[tokio::test]
async fn test_page_is_clamped() {
    let pool = db::create_test_pool();
    let chat_id = direct_chat(&pool, "alice", "bob").await;
    for i in 0..25 {
        send_text(&pool, &chat_id, "alice", &format!("m{}", i)).await;
    }

    let low = ChatStore::get_chat_messages(&pool, &chat_id, 0, 10)
        .await
        .expect("Failed to list");
    assert_eq!(low.pagination.current_page, 1);
    assert_eq!(low.messages.len(), 10);
    assert!(!low.pagination.has_previous);

    let negative = ChatStore::get_chat_messages(&pool, &chat_id, -5, 10)
        .await
        .expect("Failed to list");
    assert_eq!(negative.messages, low.messages);

    let high = ChatStore::get_chat_messages(&pool, &chat_id, 99, 10)
        .await
        .expect("Failed to list");
    assert_eq!(high.pagination.current_page, 3);
    assert_eq!(high.messages.len(), 5);
    assert!(!high.pagination.has_next);
}

#[tokio::test]
async fn test_user_chats_and_bootstrap_window() {
    let pool = db::create_test_pool();

    let mut chat_ids = Vec::new();
    for i in 0..7 {
        chat_ids.push(direct_chat(&pool, "alice", &format!("friend{}", i)).await);
    }
    // Someone else's chat must not show up
    direct_chat(&pool, "mallory", "eve").await;

    for i in 0..35 {
        send_text(&pool, &chat_ids[0], "alice", &format!("burst {}", i)).await;
    }

    let chats = ChatStore::get_user_chats(&pool, "alice")
        .await
        .expect("Failed to list chats");
    assert_eq!(chats.len(), 7);
    for pair in chats.windows(2) {
        assert!(pair[0].updated_at >= pair[1].updated_at);
    }
    assert_eq!(chats[0].chat_id, chat_ids[0]);
    assert!(chats.iter().all(|c| c.messages.is_none()));

    let bootstrapped = ChatStore::get_user_chats_with_recent_messages(&pool, "alice")
        .await
        .expect("Failed to list chats");
    assert_eq!(bootstrapped.len(), 7);

    let embedded = bootstrapped[0].messages.as_ref().expect("messages missing");
    assert_eq!(embedded.len(), 30);
    assert_eq!(
        Some(&embedded[0].message_id),
        bootstrapped[0].last_message.as_ref().map(|m| &m.message_id)
    );
    for chat in &bootstrapped[1..5] {
        assert_eq!(chat.messages.as_ref().map(Vec::len), Some(0));
    }
    for chat in &bootstrapped[5..] {
        assert!(chat.messages.is_none());
    }
}

#[tokio::test]
async fn test_deleted_message_leaves_last_message_projection() {
    let pool = db::create_test_pool();
    let chat_id = direct_chat(&pool, "alice", "bob").await;
    let first = send_text(&pool, &chat_id, "alice", "keep me").await;
    let second = send_text(&pool, &chat_id, "alice", "regret").await;

    ChatStore::delete_message(&pool, &chat_id, &second, "alice")
        .await
        .expect("Failed to delete");

    let chat = ChatStore::get_chat_by_id(&pool, &chat_id)
        .await
        .expect("Query failed")
        .expect("Chat not found");
    assert_eq!(chat.last_message.map(|m| m.message_id), Some(first));

    let search = ChatStore::search_messages(&pool, &chat_id, "REGRET", 1, 20)
        .await
        .expect("Search failed");
    assert!(search.messages.is_empty());
}

#[tokio::test]
async fn test_read_receipts_accumulate() {
    let pool = db::create_test_pool();
    let participants = ids(&["alice", "bob", "carol"]);
    let chat = ChatStore::create_chat(&pool, &participants, true, Some("Trio"), Some("alice"))
        .await
        .expect("Failed to create chat");
    let message_id = send_text(&pool, &chat.chat_id, "alice", "hello all").await;

    for reader in ["bob", "carol", "bob"] {
        ChatStore::mark_message_read(&pool, &chat.chat_id, &message_id, reader)
            .await
            .expect("Failed to mark read");
    }
    ChatStore::update_message_status(&pool, &chat.chat_id, &message_id, "carol", true, false)
        .await
        .expect("Failed to mark delivered");

    let message = ChatStore::get_message(&pool, &chat.chat_id, &message_id)
        .await
        .expect("Query failed")
        .expect("Message not found");
    assert_eq!(message.status.read_by.len(), 2);
    assert_eq!(message.status.delivered_to.len(), 1);
}

#[tokio::test]
async fn test_removed_participant_cannot_send() {
    let pool = db::create_test_pool();
    let participants = ids(&["admin", "member"]);
    let chat = ChatStore::create_chat(&pool, &participants, true, Some("G"), Some("admin"))
        .await
        .expect("Failed to create chat");

    ChatStore::remove_participant(&pool, &chat.chat_id, "member", "admin")
        .await
        .expect("Failed to remove");

    let result = ChatStore::save_message(
        &pool,
        &NewMessage::new(&chat.chat_id, "member", MessageContent::text("still here?")),
    )
    .await;
    assert!(matches!(result, Err(ChatError::Forbidden(_))));

    let missing = ChatStore::remove_participant(&pool, &chat.chat_id, "member", "admin").await;
    assert!(matches!(missing, Err(ChatError::NotFound(_))));
}

#[tokio::test]
async fn test_file_backed_pool_persists() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("chat.db");
    let path = path.to_str().expect("Temp path is not UTF-8");

    let chat_id = {
        let pool = db::create_pool(path).expect("Failed to open database");
        Database::register_user(&pool, "alice", "Alice", None)
            .await
            .expect("Failed to register");
        let chat_id = direct_chat(&pool, "alice", "bob").await;
        send_text(&pool, &chat_id, "alice", "persisted").await;
        chat_id
    };

    let pool = db::create_pool(path).expect("Failed to reopen database");
    assert_eq!(
        ChatStore::get_message_count(&pool, &chat_id)
            .await
            .expect("Count failed"),
        1
    );
    let user = Database::get_user(&pool, "alice")
        .await
        .expect("Query failed")
        .expect("User not found");
    assert_eq!(user.full_name, "Alice");
}
