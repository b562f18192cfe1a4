//! Wire shapes sent to and stored for a client: the JSON messages pushed
//! over the transport, and the polymorphic transaction record as read back
//! from the log store.
//!
//! Transactions are polymorphic over the capability set {has key, has
//! record, has operations}; we model that as a tagged variant over commands
//! rather than one struct with every field optional, so a given `Command`
//! can only carry the fields that make sense for it. The wire projection
//! (`TransactionEntry`) keeps the same shape but flattens back down to
//! optional fields, since that's what the client protocol expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DatabaseId = i64;
pub type SeqNo = i64;

/// The operations payload of a `BatchTransaction` record. Opaque to the
/// core — it is whatever the client's encrypted operation log looks like.
pub type Operations = serde_json::Value;

/// A single record as stored in the transaction log (C1).
///
/// Primary key is `(database_id, seq_no)`. `key`/`record`/`operations` are
/// populated depending on `command`; see [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub database_id: DatabaseId,
    pub seq_no: SeqNo,
    pub command: Command,
    pub creation_date: DateTime<Utc>,
}

/// The tagged command variant a transaction record carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
    Insert {
        key: String,
        #[serde(with = "base64_bytes")]
        record: Vec<u8>,
    },
    Update {
        key: String,
        #[serde(with = "base64_bytes")]
        record: Vec<u8>,
    },
    Delete {
        key: String,
    },
    BatchTransaction {
        operations: Operations,
    },
    Bundle {
        bundle_seq_no: SeqNo,
    },
    Rollback,
}

impl Command {
    pub fn key(&self) -> Option<&str> {
        match self {
            Command::Insert { key, .. } | Command::Update { key, .. } | Command::Delete { key } => {
                Some(key)
            }
            Command::BatchTransaction { .. } | Command::Bundle { .. } | Command::Rollback => None,
        }
    }
}

/// The wire projection of a [`TransactionRecord`] inside a `transactionLog`
/// array. Optional fields are simply absent (not null) when the command
/// doesn't carry them — `#[serde(flatten)]` on the command gets us that
/// for free since `Command` itself never serializes an absent field.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEntry {
    pub seq_no: SeqNo,
    pub db_id: DatabaseId,
    #[serde(flatten)]
    pub command: Command,
}

impl From<&TransactionRecord> for TransactionEntry {
    fn from(record: &TransactionRecord) -> Self {
        TransactionEntry {
            seq_no: record.seq_no,
            db_id: record.database_id,
            command: record.command.clone(),
        }
    }
}

/// `{route: "ApplyTransactions", ...}` — the one logical message the push
/// pipeline ever emits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "route", rename = "ApplyTransactions")]
#[serde(rename_all = "camelCase")]
pub struct ApplyTransactions {
    pub db_id: DatabaseId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_name_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", with = "base64_bytes_opt")]
    pub db_key: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_seq_no: Option<SeqNo>,
    #[serde(skip_serializing_if = "Option::is_none", with = "base64_bytes_opt")]
    pub bundle: Option<Vec<u8>>,
    pub transaction_log: Vec<TransactionEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_bundle: Option<bool>,
}

/// `{route: "ReceiveRequestForSeed", requesterPublicKey}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "route", rename = "ReceiveRequestForSeed")]
#[serde(rename_all = "camelCase")]
pub struct ReceiveRequestForSeed {
    #[serde(with = "base64_bytes")]
    pub requester_public_key: Vec<u8>,
}

/// `{route: "ReceiveSeed", senderPublicKey, encryptedSeed}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "route", rename = "ReceiveSeed")]
#[serde(rename_all = "camelCase")]
pub struct ReceiveSeed {
    #[serde(with = "base64_bytes")]
    pub sender_public_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub encrypted_seed: Vec<u8>,
}

/// Everything the core can push down a socket.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    ApplyTransactions(ApplyTransactions),
    ReceiveRequestForSeed(ReceiveRequestForSeed),
    ReceiveSeed(ReceiveSeed),
}

/// Default implementation of the external `estimate_size_of_record`
/// function (§6): approximate stored byte cost of a record. The core
/// treats this as opaque/swappable — it is not part of any invariant.
pub fn estimate_size_of_record(record: &TransactionRecord) -> usize {
    let key_len = record.command.key().map(str::len).unwrap_or(0);
    let payload = match &record.command {
        Command::Insert { record, .. } | Command::Update { record, .. } => key_len + record.len(),
        Command::Delete { .. } => key_len,
        Command::BatchTransaction { operations } => {
            serde_json::to_vec(operations).map(|v| v.len()).unwrap_or(0)
        }
        Command::Bundle { .. } | Command::Rollback => 0,
    };
    // Fixed overhead for the envelope (db id, seq no, command tag, timestamp).
    payload + 48
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_entry_uses_camel_case_field_names() {
        let entry = TransactionEntry {
            seq_no: 5,
            db_id: 1,
            command: Command::Insert {
                key: "k".into(),
                record: vec![1, 2, 3],
            },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["seqNo"], 5);
        assert_eq!(json["dbId"], 1);
        assert_eq!(json["key"], "k");
        assert!(json.get("operations").is_none());
    }

    #[test]
    fn rollback_has_no_key_or_record() {
        let entry = TransactionEntry {
            seq_no: 6,
            db_id: 1,
            command: Command::Rollback,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("\"key\""));
        assert!(!json.contains("\"record\""));
    }

    #[test]
    fn apply_transactions_omits_absent_header_fields() {
        let msg = ApplyTransactions {
            db_id: 1,
            db_name_hash: None,
            db_key: None,
            bundle_seq_no: None,
            bundle: None,
            transaction_log: vec![],
            build_bundle: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("dbNameHash"));
        assert!(!json.contains("bundleSeqNo"));
        assert!(!json.contains("buildBundle"));
        assert!(json.contains("\"route\":\"ApplyTransactions\""));
    }

    #[test]
    fn estimate_size_accounts_for_payload() {
        let small = TransactionRecord {
            database_id: 1,
            seq_no: 1,
            command: Command::Delete { key: "k".into() },
            creation_date: Utc::now(),
        };
        let big = TransactionRecord {
            database_id: 1,
            seq_no: 2,
            command: Command::Insert {
                key: "k".into(),
                record: vec![0u8; 1024],
            },
            creation_date: Utc::now(),
        };
        assert!(estimate_size_of_record(&big) > estimate_size_of_record(&small));
    }
}
