//! C10 — the fan-out dispatcher.
//!
//! Entry point called when a new transaction is committed: fans out to
//! every connection of the owning user, delegating the fast-path/slow-path
//! split to each connection's own `DatabaseState` actor (§4.6), which is
//! the only thing allowed to decide since it alone knows the current
//! `lastSeqNo`.

use futures::future::join_all;

use crate::registry::ConnectionRegistry;
use crate::wire::TransactionRecord;

/// `onTransactionCommitted(tx, userId)` (§4.6). Connections with no
/// `DatabaseState` open for `tx.database_id` are skipped silently — the
/// socket simply has not opened that database yet (§7). Each connection's
/// actor owns its own state independently, so the fan-out runs concurrently
/// rather than waiting on one socket before starting the next.
pub async fn on_transaction_committed(
    registry: &ConnectionRegistry,
    user_id: &str,
    tx: TransactionRecord,
) {
    let connections = registry.connections_for_user(user_id);
    if connections.is_empty() {
        tracing::debug!(user_id, database_id = tx.database_id, seq_no = tx.seq_no, "dispatcher: no connections for user");
        return;
    }
    let deliveries = connections.into_iter().filter_map(|connection| {
        let handle = connection.database(tx.database_id)?;
        let tx = tx.clone();
        Some(async move { handle.transaction_committed(tx).await })
    });
    join_all(deliveries).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::registry::ConnectionId;
    use crate::store::memory::{InMemoryBundleStore, InMemoryTransactionLogStore};
    use crate::transport::tests::FakeTransport;
    use crate::wire::{Command, OutboundMessage};
    use chrono::Utc;
    use std::sync::Arc;

    #[tokio::test]
    async fn fans_out_to_every_connection_of_the_user_with_the_database_open() {
        let registry = ConnectionRegistry::new();
        let log_store: Arc<dyn crate::store::TransactionLogStore> =
            Arc::new(InMemoryTransactionLogStore::new());
        let bundle_store: Arc<dyn crate::store::BundleStore> = Arc::new(InMemoryBundleStore::new());

        let (t1, h1) = FakeTransport::new();
        let c1 = Connection::new(ConnectionId::for_test(1), "u".into(), "client-a".into(), Arc::new(t1));
        c1.open_database(1, 0, None, log_store.clone(), bundle_store.clone());
        let c1 = match registry.register(c1) {
            crate::registry::RegisterOutcome::Registered(c) => c,
            _ => unreachable!(),
        };
        // Open the database so there is a DatabaseState for it to commit
        // against; the open emits its own header message.
        c1.database(1)
            .unwrap()
            .push(crate::push::PushRequest {
                db_name_hash: Some("h".into()),
                db_key: Some(b"k".into()),
                reopen_at_seq_no: None,
            })
            .await;

        let (t2, h2) = FakeTransport::new();
        let c2 = Connection::new(ConnectionId::for_test(2), "u".into(), "client-b".into(), Arc::new(t2));
        // c2 never opens database 1 — should be silently skipped.
        registry.register(c2);

        let tx = TransactionRecord {
            database_id: 1,
            seq_no: 1,
            command: Command::Delete { key: "k".into() },
            creation_date: Utc::now(),
        };
        on_transaction_committed(&registry, "u", tx).await;

        let sent = h1.sent_messages();
        assert_eq!(sent.len(), 2); // the open header, then the fast-path commit
        match &sent[1] {
            OutboundMessage::ApplyTransactions(msg) => {
                assert_eq!(msg.transaction_log.len(), 1);
                assert_eq!(msg.transaction_log[0].seq_no, 1);
            }
            _ => panic!("expected ApplyTransactions"),
        }
        assert!(h2.sent_messages().is_empty());
    }
}
