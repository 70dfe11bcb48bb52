//! Connection registry: live outbound queues per identity.
//!
//! Every connection (local client or federation link) owns an unbounded
//! outbound queue. The registry maps each identity to the queues currently
//! bound to it, keyed by a per-connection [`ConnectionId`]. An identity is
//! present only while at least one connection is registered under it.
//!
//! All access goes through one coarse lock. The hot path is `lookup`
//! followed by queue sends outside the lock, so mutation contention is low.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use super::event::Event;
use super::metrics;

/// Outbound queue feeding one connection's transport.
pub type Outbound = mpsc::UnboundedSender<Event>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// A registered connection as seen by senders.
#[derive(Debug, Clone)]
pub struct Route {
    pub id: ConnectionId,
    tx: Outbound,
}

impl Route {
    /// Queue an event for this connection. Returns `false` if the
    /// connection has already shut down.
    pub fn send(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug, Default)]
struct Routes {
    /// identity → (connection → outbound queue). Never holds an empty set.
    live: HashMap<String, HashMap<ConnectionId, Outbound>>,
    /// Names carved out of the signup namespace (federation targets).
    reserved: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct Registry {
    routes: RwLock<Routes>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an outbound queue under `identity`, creating the entry if absent.
    pub fn register(&self, identity: &str, tx: Outbound) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.routes
            .write()
            .live
            .entry(identity.to_owned())
            .or_default()
            .insert(id, tx);
        metrics::connection_registered();
        debug!(identity, %id, "registered");
        id
    }

    /// Remove one connection, dropping the identity once its set is empty.
    /// Returns `false` if the connection was not registered.
    pub fn unregister(&self, identity: &str, id: ConnectionId) -> bool {
        let mut routes = self.routes.write();
        let Some(set) = routes.live.get_mut(identity) else {
            return false;
        };
        let removed = set.remove(&id).is_some();
        if set.is_empty() {
            routes.live.remove(identity);
        }
        drop(routes);

        if removed {
            metrics::connection_unregistered();
            debug!(identity, %id, "unregistered");
        }
        removed
    }

    /// Snapshot of the connections registered under `identity`, or `None`
    /// when there are none.
    pub fn lookup(&self, identity: &str) -> Option<Vec<Route>> {
        let routes = self.routes.read();
        let set = routes.live.get(identity)?;
        Some(
            set.iter()
                .map(|(id, tx)| Route {
                    id: *id,
                    tx: tx.clone(),
                })
                .collect(),
        )
    }

    /// Create a connection's outbound queue and register it. The returned
    /// [`Registration`] unregisters the connection when dropped.
    pub fn attach(self: &Arc<Self>, identity: &str) -> (Registration, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(identity, tx.clone());
        let registration = Registration {
            registry: Arc::clone(self),
            identity: identity.to_owned(),
            route: Route { id, tx },
        };
        (registration, rx)
    }

    /// Reserve a name so signups cannot claim it.
    pub fn reserve(&self, name: &str) {
        self.routes.write().reserved.insert(name.to_owned());
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.routes.read().reserved.contains(name)
    }

    /// True if `name` is reserved or has live connections.
    pub fn is_claimed(&self, name: &str) -> bool {
        let routes = self.routes.read();
        routes.reserved.contains(name) || routes.live.contains_key(name)
    }

    /// Identities with at least one live connection, sorted.
    pub fn identities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.read().live.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn connection_count(&self) -> usize {
        self.routes.read().live.values().map(HashMap::len).sum()
    }
}

/// Ownership of one registry entry. Dropping it unregisters the
/// connection exactly once, whatever ended the connection's task.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<Registry>,
    identity: String,
    route: Route,
}

impl Registration {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn id(&self) -> ConnectionId {
        self.route.id
    }

    /// This connection's own route, for replies to the sender.
    pub fn route(&self) -> &Route {
        &self.route
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.identity, self.route.id);
    }
}
