//! Active client connections and fan-out

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::util::time::unix_millis;
use crate::ws::protocol::ServerMsg;

/// Outbound queue depth per client. A client this far behind is dropped.
pub const CLIENT_QUEUE_CAPACITY: usize = 32;

/// A connected observer. The registry only holds the sending half of the
/// client's outbound queue; the socket itself lives in the writer task.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    tx: mpsc::Sender<String>,
    pub connected_at: u64,
}

/// Registry of all live client connections
pub struct ConnectionRegistry {
    clients: DashMap<Uuid, ClientConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    /// Add a connection to the active set
    pub fn register(&self, tx: mpsc::Sender<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.clients.insert(
            id,
            ClientConnection {
                tx,
                connected_at: unix_millis(),
            },
        );
        info!(client_id = %id, clients = self.clients.len(), "Client registered");
        id
    }

    pub fn unregister(&self, id: Uuid) -> bool {
        match self.clients.remove(&id) {
            Some((_, conn)) => {
                info!(
                    client_id = %id,
                    session_ms = unix_millis().saturating_sub(conn.connected_at),
                    clients = self.clients.len(),
                    "Client unregistered"
                );
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Send to every client. Each send is attempted independently; clients
    /// whose queue is full or closed are removed once the pass is done.
    /// Returns how many clients were dropped.
    pub fn broadcast(&self, msg: &ServerMsg) -> usize {
        let text = match serde_json::to_string(msg) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to serialize broadcast");
                return 0;
            }
        };

        let failed: Vec<Uuid> = self
            .clients
            .iter()
            .filter_map(|entry| match entry.tx.try_send(text.clone()) {
                Ok(()) => None,
                Err(e) => {
                    warn!(client_id = %entry.key(), error = %e, "Broadcast send failed");
                    Some(*entry.key())
                }
            })
            .collect();

        for id in &failed {
            if self.clients.remove(id).is_some() {
                info!(client_id = %id, "Removed client after send failure");
            }
        }

        failed.len()
    }

    /// Send to a single client. A failed send removes the client.
    pub fn send_to(&self, id: Uuid, msg: &ServerMsg) -> bool {
        let text = match serde_json::to_string(msg) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to serialize message");
                return false;
            }
        };

        let result = match self.clients.get(&id) {
            Some(conn) => conn.tx.try_send(text),
            None => return false,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(client_id = %id, error = %e, "Send failed");
                self.clients.remove(&id);
                false
            }
        }
    }

    /// Drop every connection. Writer tasks see their queue close and shut
    /// the socket.
    pub fn close_all(&self) {
        let count = self.clients.len();
        self.clients.clear();
        info!(count, "Closed all client connections");
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
