//! Store contracts (C1, C2, C3).
//!
//! The storage driver itself is an external collaborator (§1, out of
//! scope); this module only states the shape the core needs from it. Real
//! deployments implement these traits against whatever key-ordered,
//! conditional-write store backs the service. [`memory`] provides
//! in-process fixtures used by tests and the demo binary.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::StoreError;
use crate::wire::{Command, DatabaseId, SeqNo, TransactionRecord};

/// C1 — the append-only transaction log, keyed by `(database_id, seq_no)`.
#[async_trait]
pub trait TransactionLogStore: Send + Sync {
    /// Ascending-order scan of every record with `seq_no > after`, for one
    /// database. Implementations may paginate internally; callers treat
    /// the returned vector as one page and call again using the last
    /// returned `seq_no` as the new `after` until fewer than `page_size`
    /// records come back.
    async fn scan_after(
        &self,
        database_id: DatabaseId,
        after: SeqNo,
        page_size: usize,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Conditional put: succeeds only if no record exists at
    /// `(database_id, seq_no)` yet. Used exclusively by the rollback
    /// writer (C6) to insert `Rollback` sentinels.
    async fn put_if_absent(
        &self,
        database_id: DatabaseId,
        seq_no: SeqNo,
        command: Command,
        creation_date: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// C2 — the bundle (snapshot) store.
#[async_trait]
pub trait BundleStore: Send + Sync {
    async fn get(
        &self,
        database_id: DatabaseId,
        bundle_seq_no: SeqNo,
    ) -> Result<Vec<u8>, StoreError>;
}

/// A pending or completed device-to-device seed exchange (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedExchangeRow {
    pub user_id: String,
    pub requester_public_key: Vec<u8>,
    pub encrypted_seed: Option<Vec<u8>>,
}

/// C3 — the seed-exchange row store. Composite key is
/// `(user_id, requester_public_key)`; rows are TTL-evicted (~1 day) by the
/// store itself.
#[async_trait]
pub trait SeedExchangeStore: Send + Sync {
    /// Conditional put: succeeds only if no row exists for this key yet.
    async fn put_if_absent(&self, row: SeedExchangeRow) -> Result<(), StoreError>;

    async fn get(
        &self,
        user_id: &str,
        requester_public_key: &[u8],
    ) -> Result<Option<SeedExchangeRow>, StoreError>;

    /// Set `encrypted_seed` on an existing row.
    async fn update_encrypted_seed(
        &self,
        user_id: &str,
        requester_public_key: &[u8],
        encrypted_seed: Vec<u8>,
    ) -> Result<(), StoreError>;

    async fn delete(&self, user_id: &str, requester_public_key: &[u8]) -> Result<(), StoreError>;
}
