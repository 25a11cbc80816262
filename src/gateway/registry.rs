/// Connection registry: which users are reachable right now.
/// One live connection per user; a new registration replaces the previous one.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;

/// Identifies one registration so a replaced connection cannot remove its successor
pub type ConnectionId = u64;

struct Connection {
    id: ConnectionId,
    tx: UnboundedSender<String>,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, Connection>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user's outbound channel, dropping any previous one
    pub async fn register(&self, user_id: &str, tx: UnboundedSender<String>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut connections = self.connections.write().await;
        if connections
            .insert(user_id.to_string(), Connection { id, tx })
            .is_some()
        {
            log::info!("Replaced existing connection for {}", user_id);
        }
        id
    }

    /// Remove a user's connection. No-op when the user is not registered.
    pub async fn unregister(&self, user_id: &str) {
        let mut connections = self.connections.write().await;
        connections.remove(user_id);
    }

    /// Remove the mapping only if it still belongs to connection `id`
    pub async fn unregister_if_current(&self, user_id: &str, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(user_id) {
            Some(conn) if conn.id == id => {
                connections.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// Best-effort push. Returns false when the user is offline or their channel is closed.
    pub async fn send_to(&self, user_id: &str, frame: &str) -> bool {
        let connections = self.connections.read().await;
        match connections.get(user_id) {
            Some(conn) => match conn.tx.send(frame.to_string()) {
                Ok(()) => true,
                Err(_) => {
                    log::debug!("Connection for {} already closed", user_id);
                    false
                }
            },
            None => {
                log::debug!("{} is offline, frame dropped", user_id);
                false
            }
        }
    }

    pub async fn is_connected(&self, user_id: &str) -> bool {
        let connections = self.connections.read().await;
        connections.contains_key(user_id)
    }

    pub async fn connected_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
