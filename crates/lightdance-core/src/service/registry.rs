// Registry of connected nodes
// Maps a node's peer address to the send side of its connection

use std::{
    collections::BTreeMap,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::model::Frame;

/// Process-unique id of one accepted connection
pub type ConnectionId = u64;

/// Why a frame did not reach a node
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("node {0} is not connected")]
    NotConnected(IpAddr),

    #[error("outbound queue for node {0} is full")]
    QueueFull(IpAddr),

    #[error("connection to node {0} is closed")]
    Closed(IpAddr),
}

/// Send capability of one live connection.
///
/// Cloning is cheap; every clone feeds the same writer task.
#[derive(Clone, Debug)]
pub struct NodeHandle {
    pub connection_id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub connected_at: DateTime<Local>,
    tx: mpsc::Sender<Frame>,
}

impl NodeHandle {
    pub fn new(connection_id: ConnectionId, remote_addr: SocketAddr, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            connection_id,
            remote_addr,
            connected_at: Local::now(),
            tx,
        }
    }

    /// Queue a frame for the writer task without waiting.
    ///
    /// A peer that stopped reading fills its queue; further frames are
    /// rejected instead of blocking the caller.
    pub fn send(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull(self.remote_addr.ip()),
            TrySendError::Closed(_) => DeliveryError::Closed(self.remote_addr.ip()),
        })
    }
}

/// Result of sending one frame to every registered node
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: Vec<IpAddr>,
    pub failed: Vec<(IpAddr, DeliveryError)>,
}

impl BroadcastOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Thread-safe node registry.
///
/// Every read and write goes through one mutex. Sends never happen while it
/// is held: callers look up or snapshot handles first, then push frames.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<Mutex<BTreeMap<IpAddr, NodeHandle>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `addr`, returning the replaced handle
    pub fn register(&self, addr: IpAddr, handle: NodeHandle) -> Option<NodeHandle> {
        self.nodes.lock().insert(addr, handle)
    }

    pub fn unregister(&self, addr: &IpAddr) -> Option<NodeHandle> {
        self.nodes.lock().remove(addr)
    }

    /// Remove the entry for `addr` only if it still belongs to `connection_id`.
    ///
    /// A node that reconnects replaces its own entry; the old connection's
    /// handler must not evict the new one when it winds down.
    pub fn unregister_connection(&self, addr: &IpAddr, connection_id: ConnectionId) -> bool {
        let mut nodes = self.nodes.lock();
        match nodes.get(addr) {
            Some(handle) if handle.connection_id == connection_id => {
                nodes.remove(addr);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, addr: &IpAddr) -> Option<NodeHandle> {
        self.nodes.lock().get(addr).cloned()
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.nodes.lock().contains_key(addr)
    }

    /// Copy of every entry, ordered by address
    pub fn snapshot(&self) -> Vec<(IpAddr, NodeHandle)> {
        self.nodes
            .lock()
            .iter()
            .map(|(addr, handle)| (*addr, handle.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }

    /// Drop every entry, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut nodes = self.nodes.lock();
        let count = nodes.len();
        nodes.clear();
        count
    }

    pub fn send_to(&self, addr: &IpAddr, frame: Frame) -> Result<(), DeliveryError> {
        let handle = self.get(addr).ok_or(DeliveryError::NotConnected(*addr))?;
        handle.send(frame)
    }

    /// Send `frame` to every node in the current snapshot.
    ///
    /// A failure on one node does not stop delivery to the others.
    pub fn broadcast(&self, frame: &Frame) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();

        for (addr, handle) in self.snapshot() {
            match handle.send(frame.clone()) {
                Ok(()) => outcome.delivered.push(addr),
                Err(e) => outcome.failed.push((addr, e)),
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(connection_id: ConnectionId, addr: &str, capacity: usize) -> (NodeHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (NodeHandle::new(connection_id, addr.parse().unwrap(), tx), rx)
    }

    fn ip(addr: &str) -> IpAddr {
        addr.parse().unwrap()
    }

    #[test]
    fn test_register_distinct_addresses() {
        let registry = NodeRegistry::new();
        let mut receivers = Vec::new();
        for i in 1..=5 {
            let (h, rx) = handle(i, &format!("10.0.0.{}:4000", i), 4);
            registry.register(h.remote_addr.ip(), h);
            receivers.push(rx);
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 5);
        let mut addrs: Vec<IpAddr> = snapshot.iter().map(|(a, _)| *a).collect();
        addrs.dedup();
        assert_eq!(addrs.len(), 5);
    }

    #[test]
    fn test_reregister_replaces_entry() {
        let registry = NodeRegistry::new();
        let (first, _rx1) = handle(1, "10.0.0.1:4000", 4);
        let (second, _rx2) = handle(2, "10.0.0.1:4001", 4);

        assert!(registry.register(ip("10.0.0.1"), first).is_none());
        let replaced = registry.register(ip("10.0.0.1"), second).unwrap();

        assert_eq!(replaced.connection_id, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&ip("10.0.0.1")).unwrap().connection_id, 2);
    }

    #[test]
    fn test_unregister_absent_is_noop() {
        let registry = NodeRegistry::new();
        assert!(registry.unregister(&ip("10.0.0.9")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_connection_keeps_newer_entry() {
        let registry = NodeRegistry::new();
        let (old, _rx1) = handle(1, "10.0.0.1:4000", 4);
        let (new, _rx2) = handle(2, "10.0.0.1:4001", 4);
        registry.register(ip("10.0.0.1"), old);
        registry.register(ip("10.0.0.1"), new);

        assert!(!registry.unregister_connection(&ip("10.0.0.1"), 1));
        assert!(registry.contains(&ip("10.0.0.1")));
        assert!(registry.unregister_connection(&ip("10.0.0.1"), 2));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_send_to_absent_node() {
        let registry = NodeRegistry::new();
        let (h, mut rx) = handle(1, "10.0.0.1:4000", 4);
        registry.register(ip("10.0.0.1"), h);

        let result = registry.send_to(&ip("10.0.0.2"), Frame::sync_request());
        assert_eq!(result, Err(DeliveryError::NotConnected(ip("10.0.0.2"))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_continues_past_failures() {
        let registry = NodeRegistry::new();
        let (full, mut full_rx) = handle(1, "10.0.0.1:4000", 1);
        let (closed, closed_rx) = handle(2, "10.0.0.2:4000", 4);
        let (healthy, mut healthy_rx) = handle(3, "10.0.0.3:4000", 4);
        registry.register(ip("10.0.0.1"), full.clone());
        registry.register(ip("10.0.0.2"), closed);
        registry.register(ip("10.0.0.3"), healthy);

        full.send(Frame::sync_request()).unwrap();
        drop(closed_rx);

        let outcome = registry.broadcast(&Frame::command(vec!["ledtest".to_string()]));
        assert!(!outcome.is_complete());
        assert_eq!(outcome.delivered, vec![ip("10.0.0.3")]);
        assert_eq!(
            outcome.failed,
            vec![
                (ip("10.0.0.1"), DeliveryError::QueueFull(ip("10.0.0.1"))),
                (ip("10.0.0.2"), DeliveryError::Closed(ip("10.0.0.2"))),
            ]
        );
        assert_eq!(healthy_rx.try_recv().unwrap().kind(), "command");
        assert_eq!(full_rx.try_recv().unwrap().kind(), "sync");
    }

    #[test]
    fn test_clear() {
        let registry = NodeRegistry::new();
        let (h, rx) = handle(1, "10.0.0.1:4000", 4);
        registry.register(ip("10.0.0.1"), h);
        assert_eq!(registry.clear(), 1);
        assert!(registry.is_empty());
        drop(rx);
    }
}
