/// Database layer for persistent storage.
/// Owns the connection pool, the user directory and the chat store.

pub mod chats;
pub mod init;
pub mod messages;
pub mod models;

pub use chats::ChatStore;

use chrono::{SecondsFormat, Utc};
use models::User;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result as SqliteResult};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type DbPool = Arc<Mutex<Connection>>;

/// Create a connection pool (simplified for single-threaded SQLite)
pub fn create_pool(db_path: &str) -> SqliteResult<DbPool> {
    let conn = Connection::open(db_path)?;
    init::initialize_database(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Create an in-memory database for testing
pub fn create_test_pool() -> DbPool {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory DB");
    init::initialize_database(&conn).expect("Failed to initialize DB");
    Arc::new(Mutex::new(conn))
}

/// Current time as a sortable RFC 3339 UTC string.
/// Fixed microsecond precision keeps lexical order equal to chronological order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// User directory operations
pub struct Database;

impl Database {
    /// Insert or refresh a user's display profile
    pub async fn register_user(
        pool: &DbPool,
        user_id: &str,
        full_name: &str,
        profile_picture: Option<&str>,
    ) -> SqliteResult<User> {
        let conn = pool.lock().await;
        let created_at = now_timestamp();

        conn.execute(
            "INSERT INTO users (user_id, full_name, profile_picture, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                full_name = excluded.full_name,
                profile_picture = excluded.profile_picture",
            params![user_id, full_name, profile_picture, &created_at],
        )?;

        conn.query_row(
            "SELECT user_id, full_name, profile_picture, created_at FROM users WHERE user_id = ?1",
            params![user_id],
            row_to_user,
        )
    }

    /// Get user by id
    pub async fn get_user(pool: &DbPool, user_id: &str) -> SqliteResult<Option<User>> {
        let conn = pool.lock().await;

        conn.query_row(
            "SELECT user_id, full_name, profile_picture, created_at FROM users WHERE user_id = ?1",
            params![user_id],
            row_to_user,
        )
        .optional()
    }

    /// Resolve many users in one query. Unknown ids are simply absent from the result.
    pub async fn get_users_by_ids(pool: &DbPool, user_ids: &[String]) -> SqliteResult<Vec<User>> {
        let conn = pool.lock().await;
        lookup_users(&conn, user_ids)
    }
}

pub(crate) fn lookup_users(conn: &Connection, user_ids: &[String]) -> SqliteResult<Vec<User>> {
    if user_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; user_ids.len()].join(", ");
    let sql = format!(
        "SELECT user_id, full_name, profile_picture, created_at FROM users WHERE user_id IN ({})",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(params_from_iter(user_ids.iter()), row_to_user)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(users)
}

fn row_to_user(row: &rusqlite::Row<'_>) -> SqliteResult<User> {
    Ok(User {
        user_id: row.get(0)?,
        full_name: row.get(1)?,
        profile_picture: row.get(2)?,
        created_at: row.get(3)?,
    })
}
