//! Gossip transport contract and the in-memory mesh implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// An envelope delivered by the transport.
#[derive(Clone, Debug)]
pub struct InboundEnvelope {
    /// Originating replica.
    pub node_id: String,
    /// String-keyed payload map; parsed lazily so one malformed envelope
    /// cannot take the receive loop down.
    pub payload: Value,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("transport disconnected")]
    Disconnected,
}

/// The anti-entropy transport consumed by the manager.
///
/// Publishing is fire-and-forget towards every connected peer; addressing
/// happens inside payloads, not at the transport.
#[async_trait]
pub trait GossipTransport: Send + Sync + 'static {
    /// The local replica id.
    fn node_id(&self) -> &str;

    /// Broadcast a payload to all connected peers.
    async fn publish(&self, payload: Value) -> Result<(), TransportError>;

    /// Take the inbound envelope stream. Can only be called once.
    fn subscribe(&self) -> mpsc::Receiver<InboundEnvelope>;
}

#[async_trait]
impl<T: GossipTransport> GossipTransport for Arc<T> {
    fn node_id(&self) -> &str {
        (**self).node_id()
    }

    async fn publish(&self, payload: Value) -> Result<(), TransportError> {
        (**self).publish(payload).await
    }

    fn subscribe(&self) -> mpsc::Receiver<InboundEnvelope> {
        (**self).subscribe()
    }
}

type SharedReceiver = Arc<RwLock<Option<mpsc::Receiver<InboundEnvelope>>>>;
type SharedOutgoing = Arc<RwLock<HashMap<String, mpsc::Sender<InboundEnvelope>>>>;

/// In-memory transport for tests and simulation.
///
/// Peers are wired together explicitly with [`MemoryGossip::connect_to`];
/// a publish clones the payload into every connected peer's inbox.
pub struct MemoryGossip {
    node_id: String,
    inbox_tx: mpsc::Sender<InboundEnvelope>,
    inbox_rx: SharedReceiver,
    outgoing: SharedOutgoing,
}

impl MemoryGossip {
    pub fn new(node_id: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        MemoryGossip {
            node_id: node_id.into(),
            inbox_tx: tx,
            inbox_rx: Arc::new(RwLock::new(Some(rx))),
            outgoing: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Wire two transports together in both directions.
    pub fn connect_to(&self, other: &MemoryGossip) {
        self.outgoing
            .write()
            .insert(other.node_id.clone(), other.inbox_tx.clone());
        other
            .outgoing
            .write()
            .insert(self.node_id.clone(), self.inbox_tx.clone());
    }

    /// Drop the link towards a peer.
    pub fn disconnect(&self, node_id: &str) {
        self.outgoing.write().remove(node_id);
    }

    /// Connected peer ids.
    pub fn peers(&self) -> Vec<String> {
        self.outgoing.read().keys().cloned().collect()
    }
}

#[async_trait]
impl GossipTransport for MemoryGossip {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn publish(&self, payload: Value) -> Result<(), TransportError> {
        let senders: Vec<_> = {
            let outgoing = self.outgoing.read();
            outgoing.values().cloned().collect()
        };
        for tx in senders {
            let envelope = InboundEnvelope {
                node_id: self.node_id.clone(),
                payload: payload.clone(),
            };
            // Gossip is best-effort; a departed peer must not fail the
            // whole publish.
            let _ = tx.send(envelope).await;
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<InboundEnvelope> {
        self.inbox_rx
            .write()
            .take()
            .expect("subscribe can only be called once")
    }
}

/// Create a fully connected mesh of memory transports.
pub fn create_mesh(node_ids: &[&str]) -> Vec<MemoryGossip> {
    let transports: Vec<_> = node_ids.iter().map(|id| MemoryGossip::new(*id)).collect();
    for i in 0..transports.len() {
        for j in (i + 1)..transports.len() {
            transports[i].connect_to(&transports[j]);
        }
    }
    transports
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_all_peers() {
        let mesh = create_mesh(&["a", "b", "c"]);
        let mut rx_b = mesh[1].subscribe();
        let mut rx_c = mesh[2].subscribe();

        mesh[0].publish(json!({"type": "ping"})).await.unwrap();

        let env = rx_b.recv().await.unwrap();
        assert_eq!(env.node_id, "a");
        assert_eq!(env.payload, json!({"type": "ping"}));
        assert!(rx_c.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_publish_with_no_peers_is_ok() {
        let lonely = MemoryGossip::new("solo");
        lonely.publish(json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_stops_delivery() {
        let mesh = create_mesh(&["a", "b"]);
        mesh[0].disconnect("b");
        assert!(mesh[0].peers().is_empty());

        let mut rx_b = mesh[1].subscribe();
        mesh[0].publish(json!({})).await.unwrap();
        // b still linked towards a, but a no longer delivers to b.
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mesh_is_fully_connected() {
        let mesh = create_mesh(&["a", "b", "c"]);
        for t in &mesh {
            assert_eq!(t.peers().len(), 2);
        }
    }
}
