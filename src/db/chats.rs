/// Chat store: chat creation, chat reads with their last-message projection,
/// the recent-history bootstrap and group membership management.
///
/// Every read of a chat joins it to its newest visible message in the same
/// statement, so listing `n` chats costs one query regardless of how many
/// messages they hold.
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::collections::HashMap;

use super::messages::{message_from_row, MESSAGE_COLUMNS};
use super::models::{
    generate_chat_id, Chat, GroupInfo, GroupMember, LastMessage, Message, ParticipantInfo,
};
use super::{lookup_users, now_timestamp, DbPool};
use crate::error::{ChatError, Result};

/// Number of most recently updated chats that get embedded history
pub const RECENT_CHAT_COUNT: usize = 5;

/// Messages embedded per bootstrapped chat
pub const RECENT_MESSAGE_LIMIT: i64 = 30;

const CHAT_COLUMNS: &str = "c.chat_id, c.participants_info, c.is_group, c.group_name, \
     c.group_admin, c.unread_count, c.created_at, c.updated_at, c.is_active, \
     (SELECT json_group_array(json_array(p.position, p.user_id)) \
        FROM chat_participants p WHERE p.chat_id = c.chat_id)";

const CHAT_COLUMN_COUNT: usize = 10;

/// Correlated "newest visible message per chat" join
const LAST_MESSAGE_JOIN: &str = "LEFT JOIN messages m ON m.id = (\
        SELECT id FROM messages \
        WHERE chat_id = c.chat_id AND is_deleted = 0 \
        ORDER BY timestamp DESC, id DESC LIMIT 1)";

/// Chat persistence and query operations
pub struct ChatStore;

impl ChatStore {
    /// Create a new chat.
    ///
    /// Participants are deduplicated keeping first occurrence order. Display
    /// metadata is resolved best-effort: unknown users are left out of
    /// `participants_info` without failing the call.
    pub async fn create_chat(
        pool: &DbPool,
        participants: &[String],
        is_group: bool,
        group_name: Option<&str>,
        group_admin: Option<&str>,
    ) -> Result<Chat> {
        let mut unique: Vec<String> = Vec::with_capacity(participants.len());
        for participant in participants {
            if !unique.contains(participant) {
                unique.push(participant.clone());
            }
        }
        if unique.is_empty() {
            return Err(ChatError::Validation(
                "A chat needs at least one participant".to_string(),
            ));
        }

        let (group_name, group_admin) = if is_group {
            let admin = group_admin.ok_or_else(|| {
                ChatError::InvalidState("A group chat needs an admin".to_string())
            })?;
            if !unique.iter().any(|p| p == admin) {
                return Err(ChatError::InvalidState(
                    "Group admin must be a participant".to_string(),
                ));
            }
            (group_name.map(str::to_string), Some(admin.to_string()))
        } else {
            (None, None)
        };

        let mut conn = pool.lock().await;

        let participants_info: Vec<ParticipantInfo> = match lookup_users(&conn, &unique) {
            Ok(users) => {
                let by_id: HashMap<&str, ParticipantInfo> = users
                    .iter()
                    .map(|u| (u.user_id.as_str(), u.participant_info()))
                    .collect();
                unique
                    .iter()
                    .filter_map(|id| by_id.get(id.as_str()).cloned())
                    .collect()
            }
            Err(e) => {
                log::warn!("Participant lookup failed, creating chat without info: {}", e);
                Vec::new()
            }
        };

        let now = now_timestamp();
        let chat = Chat {
            chat_id: generate_chat_id(),
            participants: unique,
            participants_info: Some(participants_info),
            is_group,
            group_name,
            group_admin,
            messages: Some(Vec::new()),
            last_message: None,
            unread_count: 0,
            created_at: now.clone(),
            updated_at: now,
            is_active: true,
        };

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO chats (chat_id, participants_info, is_group, group_name, group_admin,
                                unread_count, created_at, updated_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, 1)",
            params![
                &chat.chat_id,
                serde_json::to_string(&chat.participants_info)?,
                chat.is_group,
                &chat.group_name,
                &chat.group_admin,
                &chat.created_at,
                &chat.updated_at,
            ],
        )?;
        for (position, user_id) in chat.participants.iter().enumerate() {
            tx.execute(
                "INSERT INTO chat_participants (chat_id, user_id, position) VALUES (?1, ?2, ?3)",
                params![&chat.chat_id, user_id, position as i64],
            )?;
        }
        tx.commit()?;

        log::info!(
            "Created {} chat {} with {} participants",
            if chat.is_group { "group" } else { "direct" },
            chat.chat_id,
            chat.participants.len()
        );

        Ok(chat)
    }

    /// Get an active chat merged with its most recent message
    pub async fn get_chat_by_id(pool: &DbPool, chat_id: &str) -> Result<Option<Chat>> {
        let conn = pool.lock().await;
        fetch_chat(&conn, chat_id)
    }

    /// Every active chat containing `user_id`, newest activity first
    pub async fn get_user_chats(pool: &DbPool, user_id: &str) -> Result<Vec<Chat>> {
        let conn = pool.lock().await;
        fetch_user_chats(&conn, user_id)
    }

    /// Same as [`ChatStore::get_user_chats`], with up to
    /// [`RECENT_MESSAGE_LIMIT`] newest messages embedded in each of the first
    /// [`RECENT_CHAT_COUNT`] chats.
    pub async fn get_user_chats_with_recent_messages(
        pool: &DbPool,
        user_id: &str,
    ) -> Result<Vec<Chat>> {
        let conn = pool.lock().await;
        let mut chats = fetch_user_chats(&conn, user_id)?;

        let recent_ids: Vec<String> = chats
            .iter()
            .take(RECENT_CHAT_COUNT)
            .map(|c| c.chat_id.clone())
            .collect();
        let mut recent = fetch_recent_messages(&conn, &recent_ids)?;

        for chat in chats.iter_mut().take(RECENT_CHAT_COUNT) {
            chat.messages = Some(recent.remove(&chat.chat_id).unwrap_or_default());
        }

        Ok(chats)
    }

    /// Add a participant to a group. Only the group admin may do this.
    pub async fn add_participant(
        pool: &DbPool,
        chat_id: &str,
        user_id: &str,
        added_by: &str,
    ) -> Result<Chat> {
        let mut conn = pool.lock().await;
        let chat = require_group_admin(&conn, chat_id, added_by)?;

        let tx = conn.transaction()?;
        if !chat.has_participant(user_id) {
            tx.execute(
                "INSERT INTO chat_participants (chat_id, user_id, position)
                 VALUES (?1, ?2, (SELECT COALESCE(MAX(position) + 1, 0)
                                  FROM chat_participants WHERE chat_id = ?1))",
                params![chat_id, user_id],
            )?;
        }
        touch_chat(&tx, chat_id)?;
        tx.commit()?;

        log::info!("{} added {} to group {}", added_by, user_id, chat_id);
        fetch_chat(&conn, chat_id)?
            .ok_or_else(|| ChatError::NotFound(format!("Chat {} not found", chat_id)))
    }

    /// Remove a participant from a group. The admin cannot be removed.
    pub async fn remove_participant(
        pool: &DbPool,
        chat_id: &str,
        user_id: &str,
        removed_by: &str,
    ) -> Result<Chat> {
        let mut conn = pool.lock().await;
        let chat = require_group_admin(&conn, chat_id, removed_by)?;

        if chat.group_admin.as_deref() == Some(user_id) {
            return Err(ChatError::InvalidState(
                "Group admin cannot be removed from the group".to_string(),
            ));
        }
        if !chat.has_participant(user_id) {
            return Err(ChatError::NotFound(format!(
                "User {} is not a participant of {}",
                user_id, chat_id
            )));
        }

        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id, user_id],
        )?;
        touch_chat(&tx, chat_id)?;
        tx.commit()?;

        log::info!("{} removed {} from group {}", removed_by, user_id, chat_id);
        fetch_chat(&conn, chat_id)?
            .ok_or_else(|| ChatError::NotFound(format!("Chat {} not found", chat_id)))
    }

    /// Hand group administration to an existing participant
    pub async fn change_admin(
        pool: &DbPool,
        chat_id: &str,
        new_admin_id: &str,
        current_admin_id: &str,
    ) -> Result<Chat> {
        let conn = pool.lock().await;
        let chat = require_group_admin(&conn, chat_id, current_admin_id)?;

        if !chat.has_participant(new_admin_id) {
            return Err(ChatError::InvalidState(
                "New admin must already be a participant".to_string(),
            ));
        }

        conn.execute(
            "UPDATE chats SET group_admin = ?2, updated_at = MAX(updated_at, ?3)
             WHERE chat_id = ?1",
            params![chat_id, new_admin_id, now_timestamp()],
        )?;

        log::info!(
            "Group {} admin changed from {} to {}",
            chat_id,
            current_admin_id,
            new_admin_id
        );
        fetch_chat(&conn, chat_id)?
            .ok_or_else(|| ChatError::NotFound(format!("Chat {} not found", chat_id)))
    }

    /// Membership summary of a group chat
    pub async fn get_group_info(pool: &DbPool, chat_id: &str) -> Result<GroupInfo> {
        let conn = pool.lock().await;
        let chat = fetch_chat(&conn, chat_id)?
            .ok_or_else(|| ChatError::NotFound(format!("Chat {} not found", chat_id)))?;
        if !chat.is_group {
            return Err(ChatError::InvalidState(format!(
                "Chat {} is not a group",
                chat_id
            )));
        }

        let participants = chat
            .participants
            .iter()
            .map(|user_id| GroupMember {
                user_id: user_id.clone(),
                is_admin: chat.group_admin.as_deref() == Some(user_id.as_str()),
            })
            .collect();

        Ok(GroupInfo {
            chat_id: chat.chat_id,
            group_name: chat.group_name,
            group_admin: chat.group_admin,
            participants,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        })
    }
}

pub(crate) fn fetch_chat(conn: &Connection, chat_id: &str) -> Result<Option<Chat>> {
    let sql = format!(
        "SELECT {}, {} FROM chats c {} WHERE c.chat_id = ?1 AND c.is_active = 1",
        CHAT_COLUMNS, MESSAGE_COLUMNS, LAST_MESSAGE_JOIN
    );
    let chat = conn
        .query_row(&sql, params![chat_id], chat_from_row)
        .optional()?;
    Ok(chat)
}

fn fetch_user_chats(conn: &Connection, user_id: &str) -> Result<Vec<Chat>> {
    let sql = format!(
        "SELECT {}, {} FROM chats c {}
         WHERE c.is_active = 1
           AND c.chat_id IN (SELECT chat_id FROM chat_participants WHERE user_id = ?1)
         ORDER BY c.updated_at DESC, c.rowid DESC",
        CHAT_COLUMNS, MESSAGE_COLUMNS, LAST_MESSAGE_JOIN
    );
    let mut stmt = conn.prepare(&sql)?;
    let chats = stmt
        .query_map(params![user_id], chat_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(chats)
}

/// Newest visible messages of several chats in one windowed query
fn fetch_recent_messages(
    conn: &Connection,
    chat_ids: &[String],
) -> Result<HashMap<String, Vec<Message>>> {
    let mut grouped: HashMap<String, Vec<Message>> = HashMap::new();
    if chat_ids.is_empty() {
        return Ok(grouped);
    }

    let placeholders = vec!["?"; chat_ids.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM (
            SELECT *, ROW_NUMBER() OVER (
                PARTITION BY chat_id ORDER BY timestamp DESC, id DESC) AS rn
            FROM messages
            WHERE is_deleted = 0 AND chat_id IN ({})
         ) m
         WHERE m.rn <= {}
         ORDER BY m.chat_id, m.timestamp DESC, m.id DESC",
        MESSAGE_COLUMNS, placeholders, RECENT_MESSAGE_LIMIT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(chat_ids.iter()), |row| {
        message_from_row(row, 0)
    })?;
    for message in rows {
        let message = message?;
        grouped
            .entry(message.chat_id.clone())
            .or_default()
            .push(message);
    }

    Ok(grouped)
}

/// Re-read the chat and check it is a group administered by `caller`
fn require_group_admin(conn: &Connection, chat_id: &str, caller: &str) -> Result<Chat> {
    let chat = fetch_chat(conn, chat_id)?
        .ok_or_else(|| ChatError::NotFound(format!("Chat {} not found", chat_id)))?;
    if !chat.is_group {
        return Err(ChatError::InvalidState(format!(
            "Chat {} is not a group",
            chat_id
        )));
    }
    if chat.group_admin.as_deref() != Some(caller) {
        return Err(ChatError::Forbidden(
            "Only the group admin can do this".to_string(),
        ));
    }
    Ok(chat)
}

fn touch_chat(conn: &Connection, chat_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE chats SET updated_at = MAX(updated_at, ?2) WHERE chat_id = ?1",
        params![chat_id, now_timestamp()],
    )
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    let mut positioned: Vec<(i64, String)> = json_column(row, 9)?;
    positioned.sort_by_key(|(position, _)| *position);

    let participants_info: Option<Vec<ParticipantInfo>> = match row.get::<_, Option<String>>(1)? {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| conversion_error(1, e))?,
        None => None,
    };

    let last_message = match row.get::<_, Option<String>>(CHAT_COLUMN_COUNT)? {
        Some(_) => Some(LastMessage::from(&message_from_row(row, CHAT_COLUMN_COUNT)?)),
        None => None,
    };

    Ok(Chat {
        chat_id: row.get(0)?,
        participants: positioned.into_iter().map(|(_, user_id)| user_id).collect(),
        participants_info,
        is_group: row.get(2)?,
        group_name: row.get(3)?,
        group_admin: row.get(4)?,
        messages: None,
        last_message,
        unread_count: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        is_active: row.get(8)?,
    })
}

/// Decode a JSON text column, surfacing failures as a column conversion error
pub(crate) fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn conversion_error(idx: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}
