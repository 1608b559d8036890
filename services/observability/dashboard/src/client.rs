//! WebSocket client management

use crate::error::{DashboardError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Message kind replayed to clients that connect after it was published
const REPLAYED_KIND: &str = "STATS";

/// WebSocket client representation
pub struct Client {
    pub id: Uuid,
    pub sender: mpsc::UnboundedSender<Value>,
}

impl Client {
    pub fn new(sender: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
        }
    }

    pub fn send_message(&self, message: Value) -> Result<()> {
        self.sender.send(message).map_err(|_| DashboardError::Client {
            message: format!("Client {} channel closed", self.id),
        })
    }
}

/// Connected clients plus the latest STATS message, so a dashboard opened
/// mid-session shows the current pause state immediately.
pub struct ClientManager {
    clients: Arc<RwLock<HashMap<Uuid, Client>>>,
    latest_stats: RwLock<Option<Value>>,
    max_connections: usize,
}

impl ClientManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            latest_stats: RwLock::new(None),
            max_connections,
        }
    }

    pub async fn add_client(&self, client: Client) -> Result<()> {
        let mut clients = self.clients.write().await;

        if clients.len() >= self.max_connections {
            return Err(DashboardError::Client {
                message: format!("Maximum connections reached ({})", self.max_connections),
            });
        }

        if let Some(stats) = self.latest_stats.read().await.clone() {
            client.send_message(stats)?;
        }

        let client_id = client.id;
        clients.insert(client_id, client);

        info!(
            "Added client {}, total connections: {}",
            client_id,
            clients.len()
        );
        Ok(())
    }

    pub async fn remove_client(&self, client_id: Uuid) {
        let mut clients = self.clients.write().await;
        if clients.remove(&client_id).is_some() {
            info!(
                "Removed client {}, total connections: {}",
                client_id,
                clients.len()
            );
        }
    }

    /// Send to every client, dropping clients whose channel is gone
    pub async fn broadcast(&self, message: Value) {
        if message.get("type").and_then(Value::as_str) == Some(REPLAYED_KIND) {
            *self.latest_stats.write().await = Some(message.clone());
        }

        let clients = self.clients.read().await;
        let mut failed_clients = Vec::new();

        for (client_id, client) in clients.iter() {
            if client.send_message(message.clone()).is_err() {
                failed_clients.push(*client_id);
            }
        }

        drop(clients);

        if !failed_clients.is_empty() {
            let mut clients = self.clients.write().await;
            for client_id in failed_clients {
                clients.remove(&client_id);
                debug!("Removed disconnected client {}", client_id);
            }
        }
    }

    /// Send to a single client, e.g. a reply to its control command
    pub async fn send_to(&self, client_id: Uuid, message: Value) -> Result<()> {
        let clients = self.clients.read().await;
        match clients.get(&client_id) {
            Some(client) => client.send_message(message),
            None => Err(DashboardError::Client {
                message: format!("Unknown client {}", client_id),
            }),
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_client_manager() {
        let manager = ClientManager::new(1);
        assert_eq!(manager.client_count().await, 0);

        let (tx, _rx) = mpsc::unbounded_channel();
        let client = Client::new(tx);
        let client_id = client.id;
        manager.add_client(client).await.unwrap();
        assert_eq!(manager.client_count().await, 1);

        let (tx, _rx2) = mpsc::unbounded_channel();
        assert!(manager.add_client(Client::new(tx)).await.is_err());

        manager.remove_client(client_id).await;
        assert_eq!(manager.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_drops_closed_clients() {
        let manager = ClientManager::new(10);
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.add_client(Client::new(tx)).await.unwrap();
        let (tx, rx_closed) = mpsc::unbounded_channel();
        manager.add_client(Client::new(tx)).await.unwrap();
        drop(rx_closed);

        let message = json!({"type": "LOG", "data": {"message": "hello"}});
        manager.broadcast(message.clone()).await;

        assert_eq!(rx.recv().await.unwrap(), message);
        assert_eq!(manager.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_late_client_gets_latest_stats() {
        let manager = ClientManager::new(10);
        manager
            .broadcast(json!({"type": "STATS", "data": {"is_paused": false}}))
            .await;
        manager
            .broadcast(json!({"type": "STATS", "data": {"is_paused": true}}))
            .await;
        manager.broadcast(json!({"type": "LOG", "data": {}})).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.add_client(Client::new(tx)).await.unwrap();

        let replayed = rx.recv().await.unwrap();
        assert_eq!(replayed["data"]["is_paused"], true);
        assert!(rx.try_recv().is_err());
    }
}
