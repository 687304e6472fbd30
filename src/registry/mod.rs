//! Registry of live subscriber connections.
//!
//! Every consumed record is broadcast to all registered connections. Membership
//! is guarded by one lock; `broadcast` copies the membership under that lock and
//! sends outside it, so a slow subscriber never blocks register/deregister.
//! A connection whose send fails is removed on the spot, closed in the
//! background and never retried.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub mod testing;

/// Identity assigned to a connection at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a single frame could not be handed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("subscriber disconnected")]
    Disconnected,

    #[error("subscriber buffer full")]
    Backpressure,
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("registry is draining; no new subscribers accepted")]
    Closed,
}

/// Handle to one live bidirectional channel.
///
/// `send` must not wait on the remote peer: it either queues the frame for the
/// connection's writer or fails.
#[async_trait]
pub trait SubscriberConnection: Send + Sync {
    /// Queue one payload for delivery, preserving call order.
    fn send(&self, payload: Bytes) -> Result<(), SendError>;

    /// Whether the underlying channel is still usable.
    fn is_alive(&self) -> bool;

    /// Close the channel and wait until it is released.
    async fn close(&self);
}

/// Counts from one broadcast call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub delivered: usize,
    pub removed: usize,
}

type Connections = HashMap<ConnectionId, Arc<dyn SubscriberConnection>>;

struct Membership {
    accepting: bool,
    connections: Connections,
}

/// Concurrency-safe set of subscriber connections.
pub struct SubscriberRegistry {
    membership: RwLock<Membership>,
    // Serializes broadcasts so every subscriber sees them in issue order.
    broadcast_order: Mutex<()>,
    next_id: AtomicU64,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            membership: RwLock::new(Membership {
                accepting: true,
                connections: HashMap::new(),
            }),
            broadcast_order: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Take ownership of a connection.
    pub async fn register(
        &self,
        connection: Arc<dyn SubscriberConnection>,
    ) -> Result<ConnectionId, RegistryError> {
        let mut membership = self.membership.write().await;
        if !membership.accepting {
            return Err(RegistryError::Closed);
        }
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        membership.connections.insert(id, connection);
        info!(
            connection_id = %id,
            subscribers = membership.connections.len(),
            "Subscriber registered"
        );
        Ok(id)
    }

    /// Drop a connection. Returns it if it was still registered.
    pub async fn deregister(&self, id: ConnectionId) -> Option<Arc<dyn SubscriberConnection>> {
        let mut membership = self.membership.write().await;
        let removed = membership.connections.remove(&id);
        if removed.is_some() {
            debug!(
                connection_id = %id,
                subscribers = membership.connections.len(),
                "Subscriber deregistered"
            );
        }
        removed
    }

    /// Deliver `payload` to every connection registered when the call snapshots
    /// membership. Failing connections are removed; the rest still receive it.
    pub async fn broadcast(&self, payload: Bytes) -> BroadcastSummary {
        let _order = self.broadcast_order.lock().await;

        let snapshot: Vec<(ConnectionId, Arc<dyn SubscriberConnection>)> = {
            let membership = self.membership.read().await;
            membership
                .connections
                .iter()
                .map(|(id, conn)| (*id, Arc::clone(conn)))
                .collect()
        };

        let mut summary = BroadcastSummary::default();
        let mut failed = Vec::new();
        for (id, connection) in snapshot {
            match connection.send(payload.clone()) {
                Ok(()) => summary.delivered += 1,
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Dropping subscriber after failed send");
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let removed: Vec<_> = {
                let mut membership = self.membership.write().await;
                failed
                    .into_iter()
                    .filter_map(|id| membership.connections.remove(&id).map(|conn| (id, conn)))
                    .collect()
            };
            summary.removed = removed.len();
            for (id, connection) in removed {
                tokio::spawn(async move {
                    connection.close().await;
                    debug!(connection_id = %id, "Dropped subscriber closed");
                });
            }
        }

        debug!(
            delivered = summary.delivered,
            removed = summary.removed,
            "Broadcast complete"
        );
        summary
    }

    /// Stop accepting registrations and hand back every registered connection.
    pub async fn drain(&self) -> Vec<(ConnectionId, Arc<dyn SubscriberConnection>)> {
        let mut membership = self.membership.write().await;
        membership.accepting = false;
        let mut drained: Vec<_> = membership.connections.drain().collect();
        drained.sort_by_key(|(id, _)| *id);
        info!(subscribers = drained.len(), "Subscriber registry draining");
        drained
    }

    pub async fn is_accepting(&self) -> bool {
        self.membership.read().await.accepting
    }

    pub async fn len(&self) -> usize {
        self.membership.read().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.membership.read().await.connections.contains_key(&id)
    }
}
