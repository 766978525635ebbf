//! Connection registry: id-keyed directory of live connections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::connection::ClientConnection;

/// Directory of connected clients, keyed by their chosen id.
///
/// Ids are last-wins: a reconnect under the same id displaces the prior
/// registration, which keeps a stale entry from shadowing the live peer.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection. Returns the displaced prior connection for
    /// the same id, if any.
    pub async fn register(&self, connection: Arc<ClientConnection>) -> Option<Arc<ClientConnection>> {
        let mut conns = self.connections.write().await;
        let prior = conns.insert(connection.id.clone(), connection.clone());
        if prior.is_some() {
            warn!(client_id = %connection.id, "connection id re-registered, displacing prior");
        } else {
            info!(client_id = %connection.id, total = conns.len(), "client connected");
        }
        prior
    }

    /// Remove a connection by id, returning it if present.
    pub async fn unregister(&self, client_id: &str) -> Option<Arc<ClientConnection>> {
        let mut conns = self.connections.write().await;
        let removed = conns.remove(client_id);
        if removed.is_some() {
            info!(client_id, total = conns.len(), "client disconnected");
        }
        removed
    }

    /// Remove `connection` only if it is still the registered entry for
    /// its id. A displaced connection's cleanup must not evict the
    /// replacement that took its id.
    pub async fn unregister_exact(&self, connection: &Arc<ClientConnection>) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get(&connection.id) {
            Some(current) if Arc::ptr_eq(current, connection) => {
                let _ = conns.remove(&connection.id);
                info!(client_id = %connection.id, total = conns.len(), "client disconnected");
                true
            }
            _ => false,
        }
    }

    /// Look up a connection by id.
    pub async fn get(&self, client_id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(client_id).cloned()
    }

    /// Number of live connections.
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Frames dropped across all live connections, summed for `/health`.
    pub async fn dropped_frames(&self) -> u64 {
        self.connections
            .read()
            .await
            .values()
            .map(|conn| conn.drop_count())
            .sum()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
