//! C5 — the push pipeline, and C7 — the bundling trigger.
//!
//! The hard part of the core: given a [`crate::connection::DatabaseState`],
//! reconcile it against the transaction log and emit one `ApplyTransactions`
//! message covering everything the client still needs, including on-the-fly
//! gap repair via the rollback writer (C6).

use chrono::{DateTime, Utc};

use crate::config::General;
use crate::connection::DatabaseState;
use crate::errors::PushError;
use crate::registry::ConnectionId;
use crate::rollback::write_rollback_window;
use crate::store::{BundleStore, TransactionLogStore};
use crate::wire::{
    estimate_size_of_record, ApplyTransactions, DatabaseId, SeqNo, TransactionEntry,
    TransactionRecord,
};

/// The §6 tuning constants, sourced from `Config`/`General` at startup
/// rather than hard-coded, so a deployment can retune liveness and
/// bundling without a rebuild.
#[derive(Debug, Clone, Copy)]
pub struct PushTuning {
    /// How long an unfilled sequence number is tolerated before the server
    /// declares it dead and rolls it back.
    pub rollback_threshold: chrono::Duration,
    /// Cumulative unbundled bytes since the last bundle hint before the
    /// next emission is tagged `buildBundle`.
    pub bundle_trigger_bytes: usize,
    /// Page size for C1 range-scan pagination during gap repair.
    pub scan_page_size: usize,
}

impl Default for PushTuning {
    fn default() -> Self {
        PushTuning {
            rollback_threshold: chrono::Duration::milliseconds(10_000),
            bundle_trigger_bytes: 50 * 1024,
            scan_page_size: 256,
        }
    }
}

impl From<&General> for PushTuning {
    fn from(general: &General) -> Self {
        PushTuning {
            rollback_threshold: chrono::Duration::microseconds(
                general.rollback_threshold.as_micros() as i64,
            ),
            bundle_trigger_bytes: general.bundle_trigger.as_usize(),
            scan_page_size: general.scan_page_size,
        }
    }
}

/// Arguments to [`push`]; absence of all three means an incremental push.
#[derive(Debug, Clone, Default)]
pub struct PushRequest {
    pub db_name_hash: Option<String>,
    pub db_key: Option<Vec<u8>>,
    pub reopen_at_seq_no: Option<SeqNo>,
}

impl PushRequest {
    fn is_opening(&self) -> bool {
        self.db_name_hash.is_some() && self.db_key.is_some() && self.reopen_at_seq_no.is_none()
    }

    fn is_reopening(&self) -> bool {
        self.reopen_at_seq_no.is_some()
    }
}

/// Replaces the source's early-abort-with-a-boolean gap scan (§9 redesign
/// note) with an explicit state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Scanning,
    GapYoung,
    GapRolledBack,
    Done,
}

struct ScanOutcome {
    buffer: Vec<TransactionRecord>,
    cursor: SeqNo,
    final_state: ScanState,
}

/// Range-scans C1 past `cursor`, repairing gaps as it goes (§4.3).
async fn scan_with_gap_repair(
    log_store: &dyn TransactionLogStore,
    database_id: DatabaseId,
    mut cursor: SeqNo,
    last_seq_no: SeqNo,
    tuning: &PushTuning,
) -> Result<ScanOutcome, PushError> {
    let mut buffer = Vec::new();
    let mut state = ScanState::Scanning;

    'pages: loop {
        let page = log_store
            .scan_after(database_id, cursor, tuning.scan_page_size)
            .await
            .map_err(PushError::from)?;
        if page.is_empty() {
            state = ScanState::Done;
            break;
        }
        let page_len = page.len();

        for t in page {
            let gap = t.seq_no > cursor + 1;
            if gap {
                let age = Utc::now().signed_duration_since(t.creation_date);
                if age > tuning.rollback_threshold {
                    let sentinels =
                        write_rollback_window(log_store, database_id, cursor + 1, t.seq_no - 1)
                            .await
                            .map_err(PushError::from)?;
                    for sentinel in sentinels {
                        if sentinel.seq_no > last_seq_no {
                            buffer.push(sentinel);
                        }
                    }
                    state = ScanState::GapRolledBack;
                } else {
                    state = ScanState::GapYoung;
                    break 'pages;
                }
            }

            cursor = t.seq_no;
            if t.seq_no > last_seq_no {
                buffer.push(t);
            }
        }

        if page_len < tuning.scan_page_size {
            state = ScanState::Done;
            break;
        }
    }

    Ok(ScanOutcome {
        buffer,
        cursor,
        final_state: state,
    })
}

/// C5 — `push(databaseId, dbNameHash?, dbKey?, reopenAtSeqNo?)`.
///
/// Returns `Ok(None)` when nothing was sent (abandoned precondition check,
/// or an incremental push that found nothing new and had no header to
/// send).
pub async fn push(
    state: &mut DatabaseState,
    log_store: &dyn TransactionLogStore,
    bundle_store: &dyn BundleStore,
    database_id: DatabaseId,
    connection_id: ConnectionId,
    request: PushRequest,
    tuning: &PushTuning,
) -> Result<Option<ApplyTransactions>, PushError> {
    if request.is_opening() {
        if state.last_seq_no != 0 {
            tracing::warn!(%database_id, %connection_id, "push: opening but lastSeqNo already advanced, abandoning");
            return Err(PushError::AlreadyOpened {
                database_id,
                connection_id,
                last_seq_no: state.last_seq_no,
            });
        }
    } else if let Some(reopen_at) = request.reopen_at_seq_no {
        if state.last_seq_no != reopen_at {
            tracing::warn!(%database_id, %connection_id, "push: reopen mismatch, abandoning");
            return Err(PushError::ReopenMismatch {
                database_id,
                connection_id,
                reopen_at,
                last_seq_no: state.last_seq_no,
            });
        }
    } else if !state.init {
        tracing::warn!(%database_id, %connection_id, "push: incremental push before init, abandoning");
        return Err(PushError::NotInitialized {
            database_id,
            connection_id,
        });
    }

    // Bundle preface: only on a from-scratch catch-up (lastSeqNo untouched).
    let (cursor, bundle_seq_no_for_payload, bundle_bytes) =
        if state.bundle_seq_no > 0 && state.last_seq_no == 0 {
            let bytes = bundle_store
                .get(database_id, state.bundle_seq_no)
                .await
                .map_err(PushError::from)?;
            (state.bundle_seq_no, Some(state.bundle_seq_no), Some(bytes))
        } else {
            (state.last_seq_no, None, None)
        };

    let outcome =
        scan_with_gap_repair(log_store, database_id, cursor, state.last_seq_no, tuning).await?;
    match outcome.final_state {
        ScanState::GapYoung => {
            tracing::debug!(%database_id, %connection_id, cursor = outcome.cursor, "push: young gap, deferring");
        }
        ScanState::GapRolledBack => {
            tracing::info!(%database_id, %connection_id, cursor = outcome.cursor, "push: gap rolled back");
        }
        ScanState::Scanning | ScanState::Done => {}
    }

    // Post-scan precondition re-checks (§4.3): another concurrent push may
    // have mutated `state` while we were suspended on store I/O. With the
    // single-owner-task design (§9) this can only happen within the same
    // task between await points, i.e. never — but the checks stay, encoding
    // the invariant explicitly rather than relying on the scheduling model.
    if request.is_opening() && state.last_seq_no != 0 {
        tracing::warn!(%database_id, %connection_id, "push: post-scan, opening but lastSeqNo moved, abandoning");
        return Ok(None);
    }
    if let Some(reopen_at) = request.reopen_at_seq_no {
        if state.last_seq_no != reopen_at {
            tracing::warn!(%database_id, %connection_id, "push: post-scan, reopen mismatch, abandoning");
            return Ok(None);
        }
    } else if !request.is_opening() && !state.init {
        tracing::warn!(%database_id, %connection_id, "push: post-scan, not initialized, abandoning");
        return Ok(None);
    }

    if outcome.buffer.is_empty() {
        if request.is_opening() || request.is_reopening() {
            if bundle_bytes.is_some() {
                state.last_seq_no = state.bundle_seq_no;
            }
            state.init = true;
            return Ok(Some(ApplyTransactions {
                db_id: database_id,
                db_name_hash: request.db_name_hash,
                db_key: request.db_key,
                bundle_seq_no: bundle_seq_no_for_payload,
                bundle: bundle_bytes,
                transaction_log: Vec::new(),
                build_bundle: None,
            }));
        }
        return Ok(None);
    }

    send_payload(
        state,
        database_id,
        connection_id,
        request.db_name_hash,
        request.db_key,
        bundle_seq_no_for_payload,
        bundle_bytes,
        outcome.buffer,
        tuning,
    )
}

/// C10's fast path: a single newly-committed transaction applied directly,
/// no store read. Bypasses the precondition checks in [`push`] since the
/// dispatcher already verified `tx.seqNo == state.lastSeqNo + 1`.
pub fn fast_path_apply(
    state: &mut DatabaseState,
    database_id: DatabaseId,
    connection_id: ConnectionId,
    record: TransactionRecord,
    tuning: &PushTuning,
) -> Result<Option<ApplyTransactions>, PushError> {
    send_payload(
        state,
        database_id,
        connection_id,
        None,
        None,
        None,
        None,
        vec![record],
        tuning,
    )
}

/// C4/C7 — `sendPayload`: trims, re-projects, gates on contiguity, applies
/// the bundling trigger, and advances `lastSeqNo`/`init`.
fn send_payload(
    state: &mut DatabaseState,
    database_id: DatabaseId,
    connection_id: ConnectionId,
    db_name_hash: Option<String>,
    db_key: Option<Vec<u8>>,
    bundle_seq_no_for_payload: Option<SeqNo>,
    bundle_bytes: Option<Vec<u8>>,
    buffer: Vec<TransactionRecord>,
    tuning: &PushTuning,
) -> Result<Option<ApplyTransactions>, PushError> {
    let surviving: Vec<&TransactionRecord> = buffer
        .iter()
        .filter(|r| r.seq_no > state.last_seq_no)
        .collect();
    if surviving.is_empty() {
        return Ok(None);
    }

    let first_seq = surviving[0].seq_no;
    let expected_first = bundle_seq_no_for_payload
        .map(|b| b + 1)
        .unwrap_or(state.last_seq_no + 1);
    if first_seq != state.last_seq_no + 1 && first_seq != expected_first {
        return Err(PushError::NonContiguous {
            database_id,
            connection_id,
            first_seq,
            last_seq_no: state.last_seq_no,
        });
    }

    let mut size = 0usize;
    let mut entries = Vec::with_capacity(surviving.len());
    for record in &surviving {
        size += estimate_size_of_record(record);
        entries.push(TransactionEntry::from(*record));
    }
    let last_seq = surviving.last().unwrap().seq_no;

    let build_bundle = state.transaction_log_size + size >= tuning.bundle_trigger_bytes;
    if build_bundle {
        state.transaction_log_size = 0;
    } else {
        state.transaction_log_size += size;
    }

    state.last_seq_no = last_seq;
    state.init = true;

    Ok(Some(ApplyTransactions {
        db_id: database_id,
        db_name_hash,
        db_key,
        bundle_seq_no: bundle_seq_no_for_payload,
        bundle: bundle_bytes,
        transaction_log: entries,
        build_bundle: build_bundle.then_some(true),
    }))
}
