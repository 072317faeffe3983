//! Lazily created, shared per-node connection handles.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::{TransportError, TransportErrorKind};
use crate::identity::NodeId;

/// Opens a connection handle for one node.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Handle type shared by every request to a node.
    type Connection: Send + Sync;

    /// Opens a handle for `node_id`.
    async fn connect(&self, node_id: NodeId) -> Result<Self::Connection, TransportError>;
}

/// Map from node to connection handle, safe for concurrent lookup and creation.
///
/// At most one handle is created per node even when many executions ask at once; a failed
/// creation leaves the slot empty so a later call can retry. Handles are reference counted and
/// are never removed while a caller holds one.
pub struct ConnectionPool<C: Connector> {
    /// Connection factory.
    connector: C,
    /// One initialization cell per node.
    slots: Mutex<HashMap<NodeId, Arc<OnceCell<Arc<C::Connection>>>>>,
}

impl<C: Connector> ConnectionPool<C> {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the handle for `node_id`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns the connector's [`TransportError`] when creation fails, or an
    /// [`TransportErrorKind::Other`] error when the slot map lock is poisoned.
    pub async fn get(&self, node_id: NodeId) -> Result<Arc<C::Connection>, TransportError> {
        let slot = {
            let mut slots = self.slots.lock().map_err(|poisoned| {
                TransportError::new(TransportErrorKind::Other, poisoned.to_string())
            })?;
            Arc::clone(slots.entry(node_id).or_default())
        };
        slot.get_or_try_init(|| async {
            tracing::debug!(node = %node_id, "opening node connection");
            self.connector.connect(node_id).await.map(Arc::new)
        })
        .await
        .cloned()
    }

    /// Returns the number of nodes with an open handle.
    #[must_use]
    pub fn connected(&self) -> usize {
        self.slots.lock().map_or(0, |slots| {
            slots.values().filter(|slot| slot.initialized()).count()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Connector counting how many handles it opened.
    #[derive(Debug, Default)]
    struct CountingConnector {
        /// Number of connect calls.
        opened: AtomicUsize,
        /// Node that refuses connections.
        refuse: Option<NodeId>,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        type Connection = NodeId;

        async fn connect(&self, node_id: NodeId) -> Result<NodeId, TransportError> {
            let _ = self.opened.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.refuse == Some(node_id) {
                return Err(TransportError::new(
                    TransportErrorKind::Unavailable,
                    "connection refused",
                ));
            }
            Ok(node_id)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lookups_open_one_handle_per_node() {
        let pool = Arc::new(ConnectionPool::new(CountingConnector::default()));
        let mut tasks = Vec::new();
        for index in 0..32_u64 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                pool.get(NodeId::from_num(3 + index % 2)).await
            }));
        }
        for task in tasks {
            let handle = task.await;
            assert!(matches!(handle, Ok(Ok(_))));
        }
        assert_eq!(pool.connector.opened.load(Ordering::SeqCst), 2);
        assert_eq!(pool.connected(), 2);
    }

    #[tokio::test]
    async fn failed_connect_leaves_slot_retryable() {
        let pool = ConnectionPool::new(CountingConnector {
            opened: AtomicUsize::new(0),
            refuse: Some(NodeId::from_num(9)),
        });
        let first = pool.get(NodeId::from_num(9)).await;
        assert!(matches!(first, Err(ref error) if error.kind == TransportErrorKind::Unavailable));
        let second = pool.get(NodeId::from_num(9)).await;
        assert!(second.is_err());
        assert_eq!(pool.connector.opened.load(Ordering::SeqCst), 2);
        assert_eq!(pool.connected(), 0);
    }
}
