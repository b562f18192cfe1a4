//! In-process fixtures for the C1/C2/C3 store contracts, used by tests and
//! the demo binary. Not a production backing store — everything here is
//! lost on restart.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::errors::StoreError;
use crate::wire::{Command, DatabaseId, SeqNo, TransactionRecord};

use super::{BundleStore, SeedExchangeRow, SeedExchangeStore, TransactionLogStore};

/// In-memory [`TransactionLogStore`]: one ordered map per database, keyed by
/// `seq_no`.
#[derive(Default)]
pub struct InMemoryTransactionLogStore {
    logs: DashMap<DatabaseId, BTreeMap<SeqNo, TransactionRecord>, ahash::RandomState>,
}

impl InMemoryTransactionLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionLogStore for InMemoryTransactionLogStore {
    async fn scan_after(
        &self,
        database_id: DatabaseId,
        after: SeqNo,
        page_size: usize,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let log = match self.logs.get(&database_id) {
            Some(log) => log,
            None => return Ok(Vec::new()),
        };
        Ok(log
            .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
            .take(page_size)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn put_if_absent(
        &self,
        database_id: DatabaseId,
        seq_no: SeqNo,
        command: Command,
        creation_date: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut log = self.logs.entry(database_id).or_default();
        if log.contains_key(&seq_no) {
            return Err(StoreError::ConditionFailed {
                database_id,
                sequence_no: seq_no,
            });
        }
        log.insert(
            seq_no,
            TransactionRecord {
                database_id,
                seq_no,
                command,
                creation_date,
            },
        );
        Ok(())
    }
}

/// In-memory [`BundleStore`]: callers seed bundle bytes via [`Self::put`].
#[derive(Default)]
pub struct InMemoryBundleStore {
    bundles: DashMap<(DatabaseId, SeqNo), Vec<u8>, ahash::RandomState>,
}

impl InMemoryBundleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, database_id: DatabaseId, bundle_seq_no: SeqNo, bytes: Vec<u8>) {
        self.bundles.insert((database_id, bundle_seq_no), bytes);
    }
}

#[async_trait]
impl BundleStore for InMemoryBundleStore {
    async fn get(&self, database_id: DatabaseId, bundle_seq_no: SeqNo) -> Result<Vec<u8>, StoreError> {
        self.bundles
            .get(&(database_id, bundle_seq_no))
            .map(|b| b.clone())
            .ok_or_else(|| StoreError::BundleFetch {
                database_id,
                bundle_seq_no,
                message: "no such bundle".into(),
            })
    }
}

type SeedKey = (String, Vec<u8>);

/// In-memory [`SeedExchangeStore`]. Real deployments TTL-evict rows after
/// roughly a day; this fixture never evicts since tests control their own
/// clock via [`Self::rows`] inspection rather than waiting out a TTL.
#[derive(Default)]
pub struct InMemorySeedExchangeStore {
    rows: Arc<Mutex<BTreeMap<SeedKey, SeedExchangeRow>>>,
}

impl InMemorySeedExchangeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeedExchangeStore for InMemorySeedExchangeStore {
    async fn put_if_absent(&self, row: SeedExchangeRow) -> Result<(), StoreError> {
        let key = (row.user_id.clone(), row.requester_public_key.clone());
        let mut rows = self.rows.lock();
        if rows.contains_key(&key) {
            return Err(StoreError::SeedExchange {
                user_id: row.user_id,
                message: "a row already exists for this requester".into(),
            });
        }
        rows.insert(key, row);
        Ok(())
    }

    async fn get(
        &self,
        user_id: &str,
        requester_public_key: &[u8],
    ) -> Result<Option<SeedExchangeRow>, StoreError> {
        let key = (user_id.to_string(), requester_public_key.to_vec());
        Ok(self.rows.lock().get(&key).cloned())
    }

    async fn update_encrypted_seed(
        &self,
        user_id: &str,
        requester_public_key: &[u8],
        encrypted_seed: Vec<u8>,
    ) -> Result<(), StoreError> {
        let key = (user_id.to_string(), requester_public_key.to_vec());
        let mut rows = self.rows.lock();
        match rows.get_mut(&key) {
            Some(row) => {
                row.encrypted_seed = Some(encrypted_seed);
                Ok(())
            }
            None => Err(StoreError::SeedExchange {
                user_id: user_id.to_string(),
                message: "no pending seed exchange for this requester".into(),
            }),
        }
    }

    async fn delete(&self, user_id: &str, requester_public_key: &[u8]) -> Result<(), StoreError> {
        let key = (user_id.to_string(), requester_public_key.to_vec());
        self.rows.lock().remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_if_absent_rejects_a_second_write_at_the_same_seq_no() {
        let store = InMemoryTransactionLogStore::new();
        store
            .put_if_absent(1, 1, Command::Delete { key: "k".into() }, Utc::now())
            .await
            .unwrap();
        let err = store
            .put_if_absent(1, 1, Command::Rollback, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed { .. }));
    }

    #[tokio::test]
    async fn scan_after_returns_ascending_records_past_the_cursor() {
        let store = InMemoryTransactionLogStore::new();
        for seq in 1..=5 {
            store
                .put_if_absent(1, seq, Command::Delete { key: "k".into() }, Utc::now())
                .await
                .unwrap();
        }
        let page = store.scan_after(1, 2, 2).await.unwrap();
        assert_eq!(page.iter().map(|r| r.seq_no).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[tokio::test]
    async fn seed_exchange_put_if_absent_then_update_then_delete() {
        let store = InMemorySeedExchangeStore::new();
        let row = SeedExchangeRow {
            user_id: "u1".into(),
            requester_public_key: vec![1, 2, 3],
            encrypted_seed: None,
        };
        store.put_if_absent(row.clone()).await.unwrap();
        assert!(store.put_if_absent(row.clone()).await.is_err());

        store
            .update_encrypted_seed("u1", &[1, 2, 3], vec![9, 9])
            .await
            .unwrap();
        let fetched = store.get("u1", &[1, 2, 3]).await.unwrap().unwrap();
        assert_eq!(fetched.encrypted_seed, Some(vec![9, 9]));

        store.delete("u1", &[1, 2, 3]).await.unwrap();
        assert!(store.get("u1", &[1, 2, 3]).await.unwrap().is_none());
    }
}
