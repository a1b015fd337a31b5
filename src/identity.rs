//! Identity model handed in by the upstream correlator.
//!
//! An identity is a cluster of records attributed to one entity (an
//! application, a user, a host). The evaluator treats identities as
//! read-only: the store references point at per-store SQLite databases for
//! the optimized path, and `anchor_records` carries small pre-materialized
//! rows for the in-memory fallback path.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of in-memory evidence, keyed by column name.
pub type AnchorRow = serde_json::Map<String, Value>;

/// Bundle of rows keyed by store identifier, the shape both evaluation
/// paths agree on.
pub type RecordBundle = IndexMap<String, AnchorRow>;

/// Reference to an opened store backing an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    /// Path to the store's SQLite database file.
    pub path:          PathBuf,
    /// Artifact class the store holds (prefetch, srum, event logs, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>
}

/// The unit of evaluation: one correlated entity and its evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Identity {
    /// Kind of entity ("application", "user", "host", ...).
    #[serde(default)]
    pub identity_type:  String,
    /// Primary identifying value (executable name, account name, ...).
    #[serde(default)]
    pub identity_value: String,
    /// Display name, may be empty.
    #[serde(default)]
    pub identity_name:  String,
    /// Stores contributing records to this identity.
    #[serde(default)]
    pub store_records:  IndexMap<String, StoreRecord>,
    /// Pre-materialized rows used by the in-memory fallback path.
    #[serde(default)]
    pub anchor_records: RecordBundle
}

impl Identity {
    /// Store paths usable by the optimized path. Stores whose database
    /// file does not exist are dropped here so workers never open them.
    pub fn store_paths(&self) -> IndexMap<String, PathBuf> {
        self.store_records
            .iter()
            .filter(|(_, record)| record.path.exists())
            .map(|(store_id, record)| (store_id.clone(), record.path.clone()))
            .collect()
    }

    /// Record bundle for identity-level rules: a single `_identity` row
    /// holding the identity's own fields.
    pub fn identity_bundle(&self) -> RecordBundle {
        let mut row = AnchorRow::new();
        row.insert(
            "identity_type".to_string(),
            Value::String(self.identity_type.clone())
        );
        row.insert(
            "identity_value".to_string(),
            Value::String(self.identity_value.clone())
        );
        row.insert(
            "identity_name".to_string(),
            Value::String(self.identity_name.clone())
        );
        let mut bundle = RecordBundle::new();
        bundle.insert(crate::rules::IDENTITY_STORE.to_string(), row);
        bundle
    }
}
