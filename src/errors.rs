//! Errors.

use thiserror::Error;

use crate::registry::ConnectionId;

/// Top-level errors surfaced by the fan-out core.
///
/// Almost none of these ever reach a caller that could close a socket over
/// them — they are logged and absorbed at the push/dispatch boundary (see
/// [`crate::push`] and [`crate::dispatcher`]).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Push(#[from] PushError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration load/validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file '{path}': {message}")]
    Read { path: String, message: String },

    #[error("could not parse config file: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by the C1/C2/C3 store contracts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient error reading transaction log for database {database_id}: {message}")]
    RangeQuery { database_id: i64, message: String },

    #[error("conditional put failed: a record already exists at ({database_id}, {sequence_no})")]
    ConditionFailed { database_id: i64, sequence_no: i64 },

    #[error(
        "failed to fetch bundle for database {database_id} at seq {bundle_seq_no}: {message}"
    )]
    BundleFetch {
        database_id: i64,
        bundle_seq_no: i64,
        message: String,
    },

    #[error("seed exchange store error for user {user_id}: {message}")]
    SeedExchange { user_id: String, message: String },
}

/// Protocol-precondition violations detected while assembling a push (§4.3).
///
/// These are never sent to the client and never close the socket; the
/// surrounding push is simply abandoned and will converge on the next
/// commit or client action.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("database {database_id} on connection {connection_id}: opening but lastSeqNo is already {last_seq_no}")]
    AlreadyOpened {
        database_id: i64,
        connection_id: ConnectionId,
        last_seq_no: i64,
    },

    #[error("database {database_id} on connection {connection_id}: reopen at {reopen_at} but lastSeqNo is {last_seq_no}")]
    ReopenMismatch {
        database_id: i64,
        connection_id: ConnectionId,
        reopen_at: i64,
        last_seq_no: i64,
    },

    #[error("database {database_id} on connection {connection_id}: incremental push before init")]
    NotInitialized {
        database_id: i64,
        connection_id: ConnectionId,
    },

    #[error("database {database_id} on connection {connection_id}: non-contiguous batch, first seq {first_seq} does not follow lastSeqNo {last_seq_no}")]
    NonContiguous {
        database_id: i64,
        connection_id: ConnectionId,
        first_seq: i64,
        last_seq_no: i64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the transport contract (C11) — the websocket framing layer
/// this crate never touches directly. A send/close failure here means the
/// socket already died; callers swallow it.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    #[error("failed to send message: {0}")]
    Send(String),
}
