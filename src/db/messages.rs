/// Message persistence: insert with chat bookkeeping, delivery status,
/// soft delete, edit history and the paginated listings.
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::chats::{json_column, ChatStore};
use super::models::{
    EditRecord, LastMessage, MediaType, Message, MessageContent, MessageFilter, MessagePage,
    MessageStatus, NewMessage, Pagination,
};
use super::{now_timestamp, DbPool};
use crate::error::{ChatError, Result};

/// Column list decoded by [`message_from_row`]; expects the message table aliased as `m`
pub(crate) const MESSAGE_COLUMNS: &str = "m.message_id, m.chat_id, m.sender_id, m.content, \
     m.timestamp, m.is_deleted, m.deleted_at, m.deleted_by, m.edited, m.edit_history, m.reply_to, \
     (SELECT json_group_array(r.user_id) FROM message_receipts r \
        WHERE r.message_id = m.message_id AND r.kind = 'delivered'), \
     (SELECT json_group_array(r.user_id) FROM message_receipts r \
        WHERE r.message_id = m.message_id AND r.kind = 'read')";

const RECEIPT_DELIVERED: &str = "delivered";
const RECEIPT_READ: &str = "read";

fn not_found_or_forbidden() -> ChatError {
    ChatError::NotFound("Message not found or permission denied".to_string())
}

impl ChatStore {
    /// Persist a message and update the owning chat's `updated_at`,
    /// `last_message` and `unread_count` in the same transaction.
    ///
    /// The timestamp is assigned here. The sender must currently be a
    /// participant of an active chat.
    pub async fn save_message(pool: &DbPool, new_message: &NewMessage) -> Result<Message> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let chat_exists = tx
            .query_row(
                "SELECT 1 FROM chats WHERE chat_id = ?1 AND is_active = 1",
                params![&new_message.chat_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !chat_exists {
            return Err(ChatError::NotFound(format!(
                "Chat {} not found",
                new_message.chat_id
            )));
        }

        let is_participant = tx
            .query_row(
                "SELECT 1 FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
                params![&new_message.chat_id, &new_message.sender_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !is_participant {
            return Err(ChatError::Forbidden(format!(
                "{} is not a participant of {}",
                new_message.sender_id, new_message.chat_id
            )));
        }

        let message = Message {
            message_id: new_message.message_id.clone(),
            chat_id: new_message.chat_id.clone(),
            sender_id: new_message.sender_id.clone(),
            content: new_message.content.clone(),
            timestamp: now_timestamp(),
            status: MessageStatus::default(),
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            edited: false,
            edit_history: Vec::new(),
            reply_to: new_message.reply_to.clone(),
        };

        tx.execute(
            "INSERT INTO messages (message_id, chat_id, sender_id, content_type, media_type,
                                   content, search_text, timestamp, reply_to)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &message.message_id,
                &message.chat_id,
                &message.sender_id,
                message.content.kind().as_str(),
                message.content.media_type().map(|t| t.as_str()),
                serde_json::to_string(&message.content)?,
                message.content.search_text(),
                &message.timestamp,
                &message.reply_to,
            ],
        )?;
        tx.execute(
            "UPDATE chats SET last_message = ?2,
                              updated_at = MAX(updated_at, ?3),
                              unread_count = unread_count + 1
             WHERE chat_id = ?1",
            params![
                &message.chat_id,
                serde_json::to_string(&LastMessage::from(&message))?,
                &message.timestamp,
            ],
        )?;
        tx.commit()?;

        log::debug!(
            "Stored message {} in chat {} from {}",
            message.message_id,
            message.chat_id,
            message.sender_id
        );
        Ok(message)
    }

    /// Add `user_id` to the delivered and/or read sets of a message.
    /// Re-adding an existing entry is a no-op.
    pub async fn update_message_status(
        pool: &DbPool,
        chat_id: &str,
        message_id: &str,
        user_id: &str,
        delivered: bool,
        read: bool,
    ) -> Result<()> {
        let conn = pool.lock().await;
        if !message_exists(&conn, chat_id, message_id)? {
            return Err(ChatError::NotFound(format!(
                "Message {} not found",
                message_id
            )));
        }

        let mut kinds = Vec::with_capacity(2);
        if delivered {
            kinds.push(RECEIPT_DELIVERED);
        }
        if read {
            kinds.push(RECEIPT_READ);
        }
        for kind in kinds {
            conn.execute(
                "INSERT OR IGNORE INTO message_receipts (message_id, user_id, kind)
                 VALUES (?1, ?2, ?3)",
                params![message_id, user_id, kind],
            )?;
        }

        Ok(())
    }

    /// Record that `user_id` has read a message
    pub async fn mark_message_read(
        pool: &DbPool,
        chat_id: &str,
        message_id: &str,
        user_id: &str,
    ) -> Result<()> {
        Self::update_message_status(pool, chat_id, message_id, user_id, false, true).await
    }

    /// Fetch one message by id, including soft-deleted ones
    pub async fn get_message(
        pool: &DbPool,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<Message>> {
        let conn = pool.lock().await;
        fetch_message(&conn, chat_id, message_id)
    }

    /// Soft-delete a message. Only its sender may do this, and only once.
    pub async fn delete_message(
        pool: &DbPool,
        chat_id: &str,
        message_id: &str,
        user_id: &str,
    ) -> Result<()> {
        let conn = pool.lock().await;
        let message = fetch_message(&conn, chat_id, message_id)?
            .filter(|m| m.sender_id == user_id)
            .ok_or_else(not_found_or_forbidden)?;
        if message.is_deleted {
            return Err(ChatError::InvalidState(
                "Message is already deleted".to_string(),
            ));
        }

        conn.execute(
            "UPDATE messages SET is_deleted = 1, deleted_at = ?3, deleted_by = ?4
             WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id, message_id, now_timestamp(), user_id],
        )?;

        log::info!("Message {} in chat {} deleted by {}", message_id, chat_id, user_id);
        Ok(())
    }

    /// Replace a message's content, keeping the previous content in its edit history
    pub async fn edit_message(
        pool: &DbPool,
        chat_id: &str,
        message_id: &str,
        user_id: &str,
        new_content: MessageContent,
    ) -> Result<Message> {
        let conn = pool.lock().await;
        let mut message = fetch_message(&conn, chat_id, message_id)?
            .filter(|m| m.sender_id == user_id)
            .ok_or_else(not_found_or_forbidden)?;
        if message.is_deleted {
            return Err(ChatError::InvalidState(
                "Deleted messages cannot be edited".to_string(),
            ));
        }

        message.edit_history.push(EditRecord {
            old_content: message.content.clone(),
            edited_at: now_timestamp(),
            edited_by: user_id.to_string(),
        });
        message.content = new_content;
        message.edited = true;

        conn.execute(
            "UPDATE messages SET content = ?3, content_type = ?4, media_type = ?5,
                                 search_text = ?6, edited = 1, edit_history = ?7
             WHERE chat_id = ?1 AND message_id = ?2",
            params![
                chat_id,
                message_id,
                serde_json::to_string(&message.content)?,
                message.content.kind().as_str(),
                message.content.media_type().map(|t| t.as_str()),
                message.content.search_text(),
                serde_json::to_string(&message.edit_history)?,
            ],
        )?;

        Ok(message)
    }

    /// Edit history of a message, oldest first
    pub async fn get_message_history(
        pool: &DbPool,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Vec<EditRecord>> {
        let conn = pool.lock().await;
        let message = fetch_message(&conn, chat_id, message_id)?
            .ok_or_else(|| ChatError::NotFound(format!("Message {} not found", message_id)))?;
        Ok(message.edit_history)
    }

    /// Number of visible messages in a chat
    pub async fn get_message_count(pool: &DbPool, chat_id: &str) -> Result<i64> {
        let conn = pool.lock().await;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1 AND is_deleted = 0",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Newest-first page of a chat's visible messages
    pub async fn get_chat_messages(
        pool: &DbPool,
        chat_id: &str,
        page: i64,
        page_size: i64,
    ) -> Result<MessagePage> {
        let conn = pool.lock().await;
        paginate(&conn, chat_id, Vec::new(), page, page_size)
    }

    /// Newest-first page of media messages, optionally of one media subtype
    pub async fn get_media_messages(
        pool: &DbPool,
        chat_id: &str,
        media_type: Option<MediaType>,
        page: i64,
        page_size: i64,
    ) -> Result<MessagePage> {
        let mut conditions = vec![("m.content_type = ?", Value::from("media".to_string()))];
        if let Some(media_type) = media_type {
            conditions.push(("m.media_type = ?", Value::from(media_type.as_str().to_string())));
        }

        let conn = pool.lock().await;
        paginate(&conn, chat_id, conditions, page, page_size)
    }

    /// Case-insensitive substring search over message text, captions and media URLs
    pub async fn search_messages(
        pool: &DbPool,
        chat_id: &str,
        query: &str,
        page: i64,
        page_size: i64,
    ) -> Result<MessagePage> {
        if query.trim().is_empty() {
            return Err(ChatError::Validation(
                "Search query must not be empty".to_string(),
            ));
        }
        let needle = query.to_lowercase();
        let conditions = vec![("instr(m.search_text, ?) > 0", Value::from(needle))];

        let conn = pool.lock().await;
        paginate(&conn, chat_id, conditions, page, page_size)
    }

    /// Newest-first page of messages matching every set field of `filter`
    pub async fn filter_messages(
        pool: &DbPool,
        chat_id: &str,
        filter: &MessageFilter,
        page: i64,
        page_size: i64,
    ) -> Result<MessagePage> {
        let mut conditions = Vec::new();
        if let Some(kind) = filter.message_type {
            conditions.push(("m.content_type = ?", Value::from(kind.as_str().to_string())));
        }
        if let Some(sender_id) = &filter.sender_id {
            conditions.push(("m.sender_id = ?", Value::from(sender_id.clone())));
        }
        if let Some(start) = &filter.start_date {
            conditions.push(("m.timestamp >= ?", Value::from(normalize_bound(start, false)?)));
        }
        if let Some(end) = &filter.end_date {
            conditions.push(("m.timestamp <= ?", Value::from(normalize_bound(end, true)?)));
        }
        if let Some(media_type) = filter.media_type {
            conditions.push(("m.media_type = ?", Value::from(media_type.as_str().to_string())));
        }

        let conn = pool.lock().await;
        paginate(&conn, chat_id, conditions, page, page_size)
    }
}

/// Shared pagination envelope for every message listing.
/// Soft-deleted messages never appear; order is newest first with insertion order breaking ties.
fn paginate(
    conn: &Connection,
    chat_id: &str,
    conditions: Vec<(&str, Value)>,
    page: i64,
    page_size: i64,
) -> Result<MessagePage> {
    let chat_exists = conn
        .query_row(
            "SELECT 1 FROM chats WHERE chat_id = ?1 AND is_active = 1",
            params![chat_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !chat_exists {
        return Err(ChatError::NotFound(format!("Chat {} not found", chat_id)));
    }

    let mut clauses = vec!["m.chat_id = ?", "m.is_deleted = 0"];
    let mut values = vec![Value::from(chat_id.to_string())];
    for (clause, value) in conditions {
        clauses.push(clause);
        values.push(value);
    }
    let where_sql = clauses.join(" AND ");

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM messages m WHERE {}", where_sql),
        params_from_iter(values.iter()),
        |row| row.get(0),
    )?;
    let pagination = Pagination::new(total, page, page_size)?;

    values.push(Value::Integer(pagination.page_size));
    values.push(Value::Integer(pagination.offset()));
    let sql = format!(
        "SELECT {} FROM messages m WHERE {}
         ORDER BY m.timestamp DESC, m.id DESC
         LIMIT ? OFFSET ?",
        MESSAGE_COLUMNS, where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let messages = stmt
        .query_map(params_from_iter(values.iter()), |row| message_from_row(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(MessagePage {
        messages,
        pagination,
    })
}

fn fetch_message(conn: &Connection, chat_id: &str, message_id: &str) -> Result<Option<Message>> {
    let sql = format!(
        "SELECT {} FROM messages m WHERE m.chat_id = ?1 AND m.message_id = ?2",
        MESSAGE_COLUMNS
    );
    let message = conn
        .query_row(&sql, params![chat_id, message_id], |row| message_from_row(row, 0))
        .optional()?;
    Ok(message)
}

fn message_exists(conn: &Connection, chat_id: &str, message_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM messages WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id, message_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Accept RFC 3339 instants or bare `YYYY-MM-DD` dates (inclusive whole day)
fn normalize_bound(value: &str, end_of_day: bool) -> Result<String> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Micros, true));
    }

    let time = if end_of_day {
        NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    };
    if let (Ok(date), Some(time)) = (NaiveDate::parse_from_str(value, "%Y-%m-%d"), time) {
        return Ok(Utc
            .from_utc_datetime(&date.and_time(time))
            .to_rfc3339_opts(SecondsFormat::Micros, true));
    }

    Err(ChatError::Validation(format!("Invalid date: {}", value)))
}

/// Decode [`MESSAGE_COLUMNS`] starting at column `base`
pub(crate) fn message_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Message> {
    let delivered_to: Vec<String> = json_column(row, base + 11)?;
    let read_by: Vec<String> = json_column(row, base + 12)?;

    Ok(Message {
        message_id: row.get(base)?,
        chat_id: row.get(base + 1)?,
        sender_id: row.get(base + 2)?,
        content: json_column(row, base + 3)?,
        timestamp: row.get(base + 4)?,
        status: MessageStatus {
            delivered_to: delivered_to.into_iter().collect(),
            read_by: read_by.into_iter().collect(),
        },
        is_deleted: row.get(base + 5)?,
        deleted_at: row.get(base + 6)?,
        deleted_by: row.get(base + 7)?,
        edited: row.get(base + 8)?,
        edit_history: json_column(row, base + 9)?,
        reply_to: row.get(base + 10)?,
    })
}
