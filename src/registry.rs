//! C9 — the connection registry (§4.1, §7).
//!
//! Two process-wide maps in the source (`sockets: userId -> connectionId ->
//! Connection`, `uniqueClients: set<clientId>`); held here as one
//! explicitly constructed value (§9 redesign note — no hidden global) with
//! three indices over the same set of connections: by id, by client, by
//! user. The per-`clientId` uniqueness rule rejects the *new* registration,
//! not the existing one — a client reconnecting with a stale session does
//! not get to evict its own still-live tab.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use crate::connection::Connection;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque per-connection identifier, assigned at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub fn for_test(n: u64) -> Self {
        ConnectionId(n)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outcome of [`ConnectionRegistry::register`] (§4.1).
pub enum RegisterOutcome {
    Registered(Arc<Connection>),
    /// Duplicate `clientId`; the new socket was closed with
    /// `Client Already Connected` and never entered the registry.
    Rejected,
}

/// The live-connection table (C9). One instance is constructed by the
/// server entry point and shared by the websocket accept loop and the fan-
/// out dispatcher — never a global singleton (§9).
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    by_connection_id: Arc<DashMap<ConnectionId, Arc<Connection>, ahash::RandomState>>,
    by_client_id: Arc<DashMap<String, ConnectionId, ahash::RandomState>>,
    by_user_id: Arc<DashMap<String, DashSet<ConnectionId, ahash::RandomState>, ahash::RandomState>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `register(userId, socket, clientId)` (§4.1). `connection` must carry
    /// a fresh [`ConnectionId`] obtained via [`ConnectionId::next`] by the
    /// caller (typically the accept loop) before construction, since the
    /// `Connection`'s id is immutable once built.
    pub fn register(&self, connection: Connection) -> RegisterOutcome {
        if self.by_client_id.contains_key(&connection.client_id) {
            tracing::info!(client_id = %connection.client_id, "registry: rejecting duplicate clientId");
            connection.transport.close();
            return RegisterOutcome::Rejected;
        }

        let connection = Arc::new(connection);
        self.by_client_id
            .insert(connection.client_id.clone(), connection.id);
        self.by_user_id
            .entry(connection.user_id.clone())
            .or_default()
            .insert(connection.id);
        self.by_connection_id.insert(connection.id, connection.clone());
        tracing::info!(connection_id = %connection.id, user_id = %connection.user_id, client_id = %connection.client_id, "registry: registered");
        RegisterOutcome::Registered(connection)
    }

    /// `close(conn)` (§4.1). Idempotent on an already-closed connection.
    pub fn close(&self, connection_id: ConnectionId) {
        let Some((_, connection)) = self.by_connection_id.remove(&connection_id) else {
            return;
        };
        self.by_client_id
            .remove_if(&connection.client_id, |_, id| *id == connection_id);
        if let Some(user_connections) = self.by_user_id.get(&connection.user_id) {
            user_connections.remove(&connection_id);
            if user_connections.is_empty() {
                drop(user_connections);
                self.by_user_id
                    .remove_if(&connection.user_id, |_, set| set.is_empty());
            }
        }
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<Arc<Connection>> {
        self.by_connection_id.get(&connection_id).map(|e| e.clone())
    }

    /// Every live connection for a user, for fan-out (C10) and seed-
    /// exchange broadcast (C8). Tolerates a user with no live connections
    /// by returning an empty vector — "no such socket" is a no-op, not an
    /// error (§4.1).
    pub fn connections_for_user(&self, user_id: &str) -> Vec<Arc<Connection>> {
        let Some(ids) = self.by_user_id.get(user_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.by_connection_id.get(&*id).map(|e| e.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_connection_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_connection_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::FakeTransport;

    fn connection(id: u64, user_id: &str, client_id: &str) -> (Connection, crate::transport::tests::FakeTransportHandle) {
        let (transport, handle) = FakeTransport::new();
        (
            Connection::new(ConnectionId::for_test(id), user_id.into(), client_id.into(), Arc::new(transport)),
            handle,
        )
    }

    #[test]
    fn duplicate_client_id_rejects_the_new_connection_and_closes_its_socket() {
        let registry = ConnectionRegistry::new();
        let (c1, _h1) = connection(1, "u", "client-a");
        assert!(matches!(registry.register(c1), RegisterOutcome::Registered(_)));

        let (c2, h2) = connection(2, "u", "client-a");
        assert!(matches!(registry.register(c2), RegisterOutcome::Rejected));
        assert!(h2.was_closed());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(ConnectionId::for_test(1)).is_some());
    }

    #[test]
    fn distinct_client_ids_coexist_under_the_same_user() {
        let registry = ConnectionRegistry::new();
        let (c1, _) = connection(1, "u", "client-a");
        let (c2, _) = connection(2, "u", "client-b");
        registry.register(c1);
        registry.register(c2);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.connections_for_user("u").len(), 2);
    }

    #[test]
    fn close_removes_from_every_index() {
        let registry = ConnectionRegistry::new();
        let (c1, _) = connection(1, "u", "client-a");
        registry.register(c1);
        registry.close(ConnectionId::for_test(1));
        assert!(registry.is_empty());
        assert!(registry.connections_for_user("u").is_empty());
        // idempotent
        registry.close(ConnectionId::for_test(1));
    }

    #[test]
    fn close_of_the_last_connection_drops_the_now_empty_user_entry() {
        let registry = ConnectionRegistry::new();
        let (c1, _) = connection(1, "u", "client-a");
        registry.register(c1);
        registry.close(ConnectionId::for_test(1));
        assert!(!registry.by_user_id.contains_key("u"));
    }
}
