//! C4 — per-connection state: the `Connection` object and the
//! `DatabaseState` it owns per open database.
//!
//! Per §5/§9, each `DatabaseState` is owned exclusively by a single-owner
//! task that drains a command channel — this is the chosen alternative to
//! an async mutex around mutations and the three defensive re-checks in
//! §4.3: there is nothing to race because only this task ever touches the
//! state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::push::{self, PushRequest, PushTuning};
use crate::registry::ConnectionId;
use crate::store::{BundleStore, TransactionLogStore};
use crate::transport::Transport;
use crate::wire::{ApplyTransactions, DatabaseId, SeqNo, TransactionRecord};

/// C4 data: `{ bundleSeqNo, lastSeqNo, transactionLogSize, init }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseState {
    pub bundle_seq_no: SeqNo,
    pub last_seq_no: SeqNo,
    pub transaction_log_size: usize,
    pub init: bool,
}

impl DatabaseState {
    /// `openDatabase` (§4.2). `bundleSeqNo` is normalized to `-1` if
    /// non-positive. `init` starts `true` only on reopen, since a reopening
    /// client already has the header.
    pub fn open(bundle_seq_no: SeqNo, reopen_at_seq_no: Option<SeqNo>) -> Self {
        DatabaseState {
            bundle_seq_no: if bundle_seq_no > 0 { bundle_seq_no } else { -1 },
            last_seq_no: reopen_at_seq_no.unwrap_or(0),
            transaction_log_size: 0,
            init: reopen_at_seq_no.is_some(),
        }
    }
}

/// Commands a `DatabaseActor` accepts, per the §9-preferred single-owner
/// design. `done` is notified once the command has been fully applied
/// (state mutated and, on success, the message hand off to the transport
/// attempted) so tests and callers can await completion deterministically.
enum DatabaseCommand {
    Push {
        request: PushRequest,
        done: oneshot::Sender<()>,
    },
    TransactionCommitted {
        record: TransactionRecord,
        done: oneshot::Sender<()>,
    },
    Close,
}

struct DatabaseActor {
    database_id: DatabaseId,
    connection_id: ConnectionId,
    state: DatabaseState,
    log_store: Arc<dyn TransactionLogStore>,
    bundle_store: Arc<dyn BundleStore>,
    transport: Arc<dyn Transport>,
    tuning: PushTuning,
    rx: mpsc::UnboundedReceiver<DatabaseCommand>,
}

impl DatabaseActor {
    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                DatabaseCommand::Push { request, done } => {
                    self.handle_push(request).await;
                    let _ = done.send(());
                }
                DatabaseCommand::TransactionCommitted { record, done } => {
                    self.handle_transaction_committed(record).await;
                    let _ = done.send(());
                }
                DatabaseCommand::Close => break,
            }
        }
    }

    async fn handle_push(&mut self, request: PushRequest) {
        let result = push::push(
            &mut self.state,
            self.log_store.as_ref(),
            self.bundle_store.as_ref(),
            self.database_id,
            self.connection_id,
            request,
            &self.tuning,
        )
        .await;
        self.dispatch_result(result, "push");
    }

    /// C10's split: fast path if the commit is the immediate next sequence
    /// number, else fall back to a full `push`.
    async fn handle_transaction_committed(&mut self, record: TransactionRecord) {
        if record.seq_no == self.state.last_seq_no + 1 {
            let result = push::fast_path_apply(
                &mut self.state,
                self.database_id,
                self.connection_id,
                record,
                &self.tuning,
            );
            self.dispatch_result(result, "fast-path commit");
        } else {
            let result = push::push(
                &mut self.state,
                self.log_store.as_ref(),
                self.bundle_store.as_ref(),
                self.database_id,
                self.connection_id,
                PushRequest::default(),
                &self.tuning,
            )
            .await;
            self.dispatch_result(result, "slow-path commit");
        }
    }

    fn dispatch_result(
        &self,
        result: Result<Option<ApplyTransactions>, crate::errors::PushError>,
        context: &str,
    ) {
        match result {
            Ok(Some(message)) => {
                if let Err(err) = self
                    .transport
                    .send(&crate::wire::OutboundMessage::ApplyTransactions(message))
                {
                    tracing::warn!(database_id = self.database_id, connection_id = %self.connection_id, error = %err, "{context}: send failed");
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(database_id = self.database_id, connection_id = %self.connection_id, error = %err, "{context}: abandoned");
            }
        }
    }
}

/// A handle to a spawned [`DatabaseActor`]; the only way callers touch a
/// `DatabaseState`.
#[derive(Clone)]
pub struct DatabaseHandle {
    tx: mpsc::UnboundedSender<DatabaseCommand>,
}

impl DatabaseHandle {
    fn spawn(
        database_id: DatabaseId,
        connection_id: ConnectionId,
        state: DatabaseState,
        log_store: Arc<dyn TransactionLogStore>,
        bundle_store: Arc<dyn BundleStore>,
        transport: Arc<dyn Transport>,
        tuning: PushTuning,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = DatabaseActor {
            database_id,
            connection_id,
            state,
            log_store,
            bundle_store,
            transport,
            tuning,
            rx,
        };
        tokio::spawn(actor.run());
        DatabaseHandle { tx }
    }

    /// Sends a `Push` command and waits for it to be fully applied.
    pub async fn push(&self, request: PushRequest) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .tx
            .send(DatabaseCommand::Push {
                request,
                done: done_tx,
            })
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }

    /// Sends a `TransactionCommitted` notification (C10) and waits for it
    /// to be fully applied.
    pub async fn transaction_committed(&self, record: TransactionRecord) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .tx
            .send(DatabaseCommand::TransactionCommitted {
                record,
                done: done_tx,
            })
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }

    pub fn close(&self) {
        let _ = self.tx.send(DatabaseCommand::Close);
    }
}

/// A live session (§3). Created when the websocket handshake completes;
/// destroyed when the socket closes.
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: String,
    pub client_id: String,
    pub transport: Arc<dyn Transport>,
    key_validated: AtomicBool,
    requester_public_key: Mutex<Option<Vec<u8>>>,
    databases: DashMap<DatabaseId, DatabaseHandle, ahash::RandomState>,
    tuning: PushTuning,
}

impl Connection {
    pub fn new(id: ConnectionId, user_id: String, client_id: String, transport: Arc<dyn Transport>) -> Self {
        Self::with_tuning(id, user_id, client_id, transport, PushTuning::default())
    }

    /// Like [`Connection::new`], but with the §6 tuning the accept loop
    /// derives from `Config`/`General` rather than the defaults.
    pub fn with_tuning(
        id: ConnectionId,
        user_id: String,
        client_id: String,
        transport: Arc<dyn Transport>,
        tuning: PushTuning,
    ) -> Self {
        Connection {
            id,
            user_id,
            client_id,
            transport,
            key_validated: AtomicBool::new(false),
            requester_public_key: Mutex::new(None),
            databases: DashMap::with_hasher(ahash::RandomState::default()),
            tuning,
        }
    }

    /// `openDatabase` (§4.2): creates the `DatabaseState` and spawns its
    /// owning actor.
    pub fn open_database(
        &self,
        database_id: DatabaseId,
        bundle_seq_no: SeqNo,
        reopen_at_seq_no: Option<SeqNo>,
        log_store: Arc<dyn TransactionLogStore>,
        bundle_store: Arc<dyn BundleStore>,
    ) -> DatabaseHandle {
        let state = DatabaseState::open(bundle_seq_no, reopen_at_seq_no);
        let handle = DatabaseHandle::spawn(
            database_id,
            self.id,
            state,
            log_store,
            bundle_store,
            self.transport.clone(),
            self.tuning,
        );
        self.databases.insert(database_id, handle.clone());
        handle
    }

    pub fn database(&self, database_id: DatabaseId) -> Option<DatabaseHandle> {
        self.databases.get(&database_id).map(|h| h.clone())
    }

    /// `validateKey()` (§4.8).
    pub fn validate_key(&self) {
        self.key_validated.store(true, Ordering::SeqCst);
    }

    pub fn is_key_validated(&self) -> bool {
        self.key_validated.load(Ordering::SeqCst)
    }

    /// Requester side of the seed exchange (§4.7): records the pending
    /// request's public key on this connection.
    pub fn set_requester_public_key(&self, key: Option<Vec<u8>>) {
        *self.requester_public_key.lock() = key;
    }

    pub fn requester_public_key(&self) -> Option<Vec<u8>> {
        self.requester_public_key.lock().clone()
    }

    pub fn close(&self) {
        for entry in self.databases.iter() {
            entry.value().close();
        }
        self.transport.close();
    }
}
