//! C8 — the seed-exchange mediator (§4.7).
//!
//! Routes a new device's request for the user's root secret to already-
//! validated sibling connections, and routes a validated device's response
//! back to the requester alone. The server stores the exchange in C3
//! (`§2`: "C8 inserts into C3, then broadcasts via C9") but never sees the
//! seed in cleartext — `encryptedSeed` is opaque ciphertext end to end.

use crate::connection::Connection;
use crate::registry::ConnectionRegistry;
use crate::store::{SeedExchangeRow, SeedExchangeStore};
use crate::wire::{OutboundMessage, ReceiveRequestForSeed, ReceiveSeed};

/// Requester side: stashes the pending request's public key on this
/// connection so a later [`send_seed`] fan-out knows to deliver to it.
pub fn open_seed_request(connection: &Connection, requester_public_key: Vec<u8>) {
    connection.set_requester_public_key(Some(requester_public_key));
}

/// `sendSeedRequest(userId, originConnectionId, requesterPublicKey)` (§4.7).
/// Records the key on the origin connection, inserts the pending exchange
/// into C3, then broadcasts to every connection of the user (including the
/// origin — whose own broadcaster is a guaranteed no-op since a requesting
/// device is by definition not yet key-validated).
pub async fn send_seed_request(
    store: &dyn SeedExchangeStore,
    registry: &ConnectionRegistry,
    user_id: &str,
    requester_public_key: Vec<u8>,
) {
    if let Err(err) = store
        .put_if_absent(SeedExchangeRow {
            user_id: user_id.to_string(),
            requester_public_key: requester_public_key.clone(),
            encrypted_seed: None,
        })
        .await
    {
        tracing::warn!(user_id, error = %err, "seed: failed to record pending exchange, broadcasting anyway");
    }

    let message = OutboundMessage::ReceiveRequestForSeed(ReceiveRequestForSeed {
        requester_public_key: requester_public_key.clone(),
    });
    for connection in registry.connections_for_user(user_id) {
        broadcast_seed_request(&connection, &message);
    }
}

/// Per-connection broadcaster: only a key-validated device ever receives a
/// seed request, so an unauthorized device cannot phish the secret.
fn broadcast_seed_request(connection: &Connection, message: &OutboundMessage) {
    if !connection.is_key_validated() {
        return;
    }
    if let Err(err) = connection.transport.send(message) {
        tracing::warn!(connection_id = %connection.id, error = %err, "seed: failed to send request");
    }
}

/// `sendSeed(userId, senderPublicKey, requesterPublicKey, encryptedSeed)`
/// (§4.7). Fans out to every connection of the user; each connection
/// forwards the payload only if its own pending `requesterPublicKey`
/// matches. Every other socket silently drops it.
pub async fn send_seed(
    store: &dyn SeedExchangeStore,
    registry: &ConnectionRegistry,
    user_id: &str,
    sender_public_key: Vec<u8>,
    requester_public_key: Vec<u8>,
    encrypted_seed: Vec<u8>,
) {
    if let Err(err) = store
        .update_encrypted_seed(user_id, &requester_public_key, encrypted_seed.clone())
        .await
    {
        tracing::warn!(user_id, error = %err, "seed: failed to record encrypted seed");
    }

    let message = OutboundMessage::ReceiveSeed(ReceiveSeed {
        sender_public_key,
        encrypted_seed,
    });
    for connection in registry.connections_for_user(user_id) {
        if connection.requester_public_key().as_deref() == Some(requester_public_key.as_slice()) {
            if let Err(err) = connection.transport.send(&message) {
                tracing::warn!(connection_id = %connection.id, error = %err, "seed: failed to deliver seed");
            }
        }
    }

    // Fan-out has happened; the row has done its job. Deletion is best-effort
    // cleanup — the store's own TTL is the backstop if this fails.
    if let Err(err) = store.delete(user_id, &requester_public_key).await {
        tracing::warn!(user_id, error = %err, "seed: failed to delete completed exchange row");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionId, RegisterOutcome};
    use crate::store::memory::InMemorySeedExchangeStore;
    use crate::transport::tests::FakeTransport;
    use std::sync::Arc;

    fn register(
        registry: &ConnectionRegistry,
        id: u64,
        user_id: &str,
        client_id: &str,
    ) -> (Arc<Connection>, crate::transport::tests::FakeTransportHandle) {
        let (transport, handle) = FakeTransport::new();
        let connection = Connection::new(ConnectionId::for_test(id), user_id.into(), client_id.into(), Arc::new(transport));
        match registry.register(connection) {
            RegisterOutcome::Registered(c) => (c, handle),
            RegisterOutcome::Rejected => unreachable!(),
        }
    }

    /// S6 — three-device seed exchange: a new device's request reaches
    /// only validated siblings, and the response reaches only the
    /// requester.
    #[tokio::test]
    async fn seed_request_reaches_only_validated_siblings_and_seed_reaches_only_requester() {
        let registry = ConnectionRegistry::new();
        let store = InMemorySeedExchangeStore::new();

        let (a, ha) = register(&registry, 1, "u", "device-a");
        let (b, hb) = register(&registry, 2, "u", "device-b");
        let (n, hn) = register(&registry, 3, "u", "device-n");
        a.validate_key();
        b.validate_key();
        // n is the new, unvalidated device.

        let pk_n = vec![9, 9, 9];
        open_seed_request(&n, pk_n.clone());
        send_seed_request(&store, &registry, "u", pk_n.clone()).await;

        assert_eq!(ha.sent_messages().len(), 1);
        assert_eq!(hb.sent_messages().len(), 1);
        assert!(hn.sent_messages().is_empty());

        let pk_a = vec![1, 1, 1];
        let enc = vec![7, 7, 7];
        send_seed(&store, &registry, "u", pk_a, pk_n.clone(), enc.clone()).await;

        assert!(ha.sent_messages().len() <= 1); // A is the sender, not a requester; no ReceiveSeed to A
        assert!(hb.sent_messages().len() <= 1); // B never requested; drops
        let n_messages = hn.sent_messages();
        assert_eq!(n_messages.len(), 1);
        match &n_messages[0] {
            OutboundMessage::ReceiveSeed(msg) => assert_eq!(msg.encrypted_seed, enc),
            _ => panic!("expected ReceiveSeed"),
        }

        assert!(store.get("u", &pk_n).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn send_seed_deletes_the_row_once_delivery_has_fanned_out() {
        let registry = ConnectionRegistry::new();
        let store = InMemorySeedExchangeStore::new();

        let (a, _ha) = register(&registry, 1, "u", "device-a");
        a.validate_key();

        let pk_requester = vec![9, 9, 9];
        store
            .put_if_absent(SeedExchangeRow {
                user_id: "u".into(),
                requester_public_key: pk_requester.clone(),
                encrypted_seed: None,
            })
            .await
            .unwrap();

        send_seed(&store, &registry, "u", vec![1, 1, 1], pk_requester.clone(), vec![7, 7, 7]).await;

        assert!(store.get("u", &pk_requester).await.unwrap().is_none());
    }
}
