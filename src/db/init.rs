/// Database schema initialization.
/// Sets up SQLite WAL mode and creates tables on startup.
use rusqlite::{Connection, Result as SqliteResult};

/// Initialize database connection with WAL mode and schema
pub fn initialize_database(conn: &Connection) -> SqliteResult<()> {
    // Enable WAL mode (for file-based DB only, ignore error for in-memory)
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");
    let _ = conn.execute_batch("PRAGMA synchronous = NORMAL;");
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    create_schema(conn)?;

    Ok(())
}

/// Create all database tables
fn create_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            profile_picture TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chats (
            chat_id TEXT PRIMARY KEY,
            participants_info TEXT,
            is_group INTEGER NOT NULL DEFAULT 0,
            group_name TEXT,
            group_admin TEXT,
            last_message TEXT,
            unread_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS chat_participants (
            chat_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (chat_id, user_id),
            FOREIGN KEY(chat_id) REFERENCES chats(chat_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY,
            message_id TEXT UNIQUE NOT NULL,
            chat_id TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            content_type TEXT NOT NULL,
            media_type TEXT,
            content TEXT NOT NULL,
            search_text TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            deleted_by TEXT,
            edited INTEGER NOT NULL DEFAULT 0,
            edit_history TEXT NOT NULL DEFAULT '[]',
            reply_to TEXT,
            FOREIGN KEY(chat_id) REFERENCES chats(chat_id)
        );

        CREATE TABLE IF NOT EXISTS message_receipts (
            message_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id, kind),
            FOREIGN KEY(message_id) REFERENCES messages(message_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chat_participants_user ON chat_participants(user_id);
        CREATE INDEX IF NOT EXISTS idx_chats_updated ON chats(updated_at);
        CREATE INDEX IF NOT EXISTS idx_messages_chat_time ON messages(chat_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id);
        "#,
    )?;

    Ok(())
}
