//! C6 — the rollback writer (§4.5).
//!
//! Fills a gap window `[from, to]` with `Rollback` sentinels via conditional
//! puts. Proceeds best-effort across the window: a condition failure on one
//! slot (another writer already claimed it) does not stop attempts on the
//! rest of the window, since that slot is already correctly filled by
//! someone else. The first *other* error (a transient store failure, not a
//! condition failure) is remembered and returned after the whole window has
//! been attempted, aborting the enclosing push step.

use chrono::Utc;

use crate::errors::StoreError;
use crate::store::TransactionLogStore;
use crate::wire::{Command, DatabaseId, SeqNo, TransactionRecord};

/// Attempts a conditional put of a `Rollback` sentinel at every sequence
/// number in `from..=to`. Returns exactly the sentinels this call wrote —
/// never slots another writer filled first.
pub async fn write_rollback_window(
    store: &dyn TransactionLogStore,
    database_id: DatabaseId,
    from: SeqNo,
    to: SeqNo,
) -> Result<Vec<TransactionRecord>, StoreError> {
    let mut written = Vec::new();
    let mut first_error = None;

    for seq_no in from..=to {
        let creation_date = Utc::now();
        match store
            .put_if_absent(database_id, seq_no, Command::Rollback, creation_date)
            .await
        {
            Ok(()) => written.push(TransactionRecord {
                database_id,
                seq_no,
                command: Command::Rollback,
                creation_date,
            }),
            Err(StoreError::ConditionFailed { .. }) => {
                tracing::debug!(database_id, seq_no, "rollback slot already filled by another writer");
            }
            Err(other) => {
                tracing::warn!(database_id, seq_no, error = %other, "rollback conditional put failed");
                if first_error.is_none() {
                    first_error = Some(other);
                }
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(written),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryTransactionLogStore;

    #[tokio::test]
    async fn writes_a_sentinel_for_every_slot_in_an_empty_window() {
        let store = InMemoryTransactionLogStore::new();
        let written = write_rollback_window(&store, 1, 5, 7).await.unwrap();
        assert_eq!(
            written.iter().map(|r| r.seq_no).collect::<Vec<_>>(),
            vec![5, 6, 7]
        );
        for record in &written {
            assert_eq!(record.command, Command::Rollback);
        }
    }

    #[tokio::test]
    async fn skips_a_slot_another_writer_already_claimed_but_continues_the_window() {
        let store = InMemoryTransactionLogStore::new();
        store
            .put_if_absent(1, 6, Command::Delete { key: "k".into() }, Utc::now())
            .await
            .unwrap();

        let written = write_rollback_window(&store, 1, 5, 7).await.unwrap();
        assert_eq!(written.iter().map(|r| r.seq_no).collect::<Vec<_>>(), vec![5, 7]);
    }

    #[tokio::test]
    async fn rollback_partial_failure_returns_only_written_sentinels() {
        let store = InMemoryTransactionLogStore::new();
        // Pre-claim two of the five slots in the window; the rest should
        // still be attempted and returned.
        store
            .put_if_absent(1, 3, Command::Delete { key: "k".into() }, Utc::now())
            .await
            .unwrap();
        store
            .put_if_absent(1, 5, Command::Delete { key: "k".into() }, Utc::now())
            .await
            .unwrap();

        let written = write_rollback_window(&store, 1, 1, 5).await.unwrap();
        assert_eq!(written.iter().map(|r| r.seq_no).collect::<Vec<_>>(), vec![1, 2, 4]);
        assert!(!written.iter().any(|r| r.seq_no == 3 || r.seq_no == 5));
    }
}
