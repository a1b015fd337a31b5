//! Read-only store adapter and descriptor pre-filter.
//!
//! Every artifact store is an independently-openable SQLite database with
//! a data table (`feather_data`) and a descriptor table
//! (`feather_metadata`). The adapter exposes the narrow surface the
//! evaluator consumes: open read-only, read the descriptor, register the
//! REGEXP scalar function, run a parameterized query, and release the
//! handle on every exit path (the handle closes on drop).
//!
//! Handles are never shared: each worker opens its own connection for the
//! store group it processes.

use std::path::{Path, PathBuf};

use rusqlite::{
    Connection, OpenFlags, OptionalExtension, functions::FunctionFlags, types::ValueRef
};
use thiserror::Error;
use tracing::debug;

use crate::{cache::compile_pattern_cached, query::BuiltQuery};

/// Conventional name of the descriptor table inside every store.
pub const METADATA_TABLE: &str = "feather_metadata";

/// Busy timeout applied to every store connection (ms).
const BUSY_TIMEOUT_MS: u64 = 2_000;

/// Failures inside the adapter. All of them are recoverable by the
/// evaluator through the in-memory fallback, except where the caller
/// explicitly promotes them (REGEXP probe).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open store '{}': {source}", .path.display())]
    Open {
        path:   PathBuf,
        source: rusqlite::Error
    },
    #[error("cannot read descriptor: {0}")]
    Descriptor(#[source] rusqlite::Error),
    #[error("cannot register REGEXP function: {0}")]
    Regexp(#[source] rusqlite::Error),
    #[error("query failed: {0}")]
    Query(#[source] rusqlite::Error)
}

/// Descriptor row maintained by each store's producer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Descriptor {
    pub artifact_type: Option<String>,
    pub columns:       Vec<String>,
    pub row_count:     i64,
    pub last_indexed:  Option<String>
}

impl Descriptor {
    /// Case-insensitive column membership, matching SQLite identifier
    /// semantics.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(name))
    }
}

/// Cheap go/no-go decision for one store and one rule, from the
/// descriptor alone. Returns the skip reason, or `None` to proceed.
///
/// A correct descriptor makes skipping sound: a store without the
/// required columns, with zero rows, or of the wrong artifact type
/// cannot contain a satisfying row.
pub fn prefilter_skip_reason(
    descriptor: Option<&Descriptor>,
    required_columns: &[&str],
    required_artifact_type: Option<&str>
) -> Option<String> {
    let Some(descriptor) = descriptor else {
        return Some("descriptor missing or empty".to_string());
    };
    if descriptor.row_count == 0 {
        return Some("store has no records".to_string());
    }
    if let Some(required) = required_artifact_type {
        match descriptor.artifact_type.as_deref() {
            Some(actual) if actual.eq_ignore_ascii_case(required) => {}
            Some(actual) => {
                return Some(format!(
                    "artifact type '{}' does not match required '{}'",
                    actual, required
                ));
            }
            None => return Some("artifact type missing from descriptor".to_string())
        }
    }
    for column in required_columns {
        if !descriptor.has_column(column) {
            return Some(format!("column '{}' absent from descriptor", column));
        }
    }
    None
}

/// An open read-only store connection. Closes on drop.
pub struct StoreHandle {
    connection: Connection,
    path:       PathBuf
}

impl StoreHandle {
    /// Open a store read-only.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let connection = Connection::open_with_flags(path, flags).map_err(|source| {
            StoreError::Open {
                path: path.to_path_buf(),
                source
            }
        })?;
        connection
            .busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))
            .map_err(|source| StoreError::Open {
                path: path.to_path_buf(),
                source
            })?;
        Ok(Self {
            connection,
            path: path.to_path_buf()
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the store's descriptor row, if the table exists and has one.
    ///
    /// The `columns` cell holds a JSON string array; a plain
    /// comma-separated list is tolerated for older producers.
    pub fn metadata(&self) -> Result<Option<Descriptor>, StoreError> {
        // A store without a descriptor table is skippable, not broken; a
        // store that cannot answer this query at all is broken.
        let table_exists: bool = self
            .connection
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [METADATA_TABLE],
                |row| row.get(0)
            )
            .map_err(StoreError::Descriptor)?;
        if !table_exists {
            return Ok(None);
        }

        let sql = format!(
            "SELECT artifact_type, columns, row_count, last_indexed FROM {} LIMIT 1",
            METADATA_TABLE
        );
        let row = self
            .connection
            .query_row(&sql, [], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?
                ))
            })
            .optional()
            .map_err(StoreError::Descriptor)?;

        Ok(row.map(|(artifact_type, columns, row_count, last_indexed)| Descriptor {
            artifact_type,
            columns: parse_column_list(columns.as_deref().unwrap_or_default()),
            row_count,
            last_indexed
        }))
    }

    /// Bind the REGEXP scalar function to this connection.
    ///
    /// SQLite rewrites `X REGEXP Y` to `regexp(Y, X)`, so the function
    /// receives the pattern first. Patterns go through the global cache;
    /// an invalid pattern matches nothing rather than erroring the query.
    pub fn register_regexp(&self) -> Result<(), StoreError> {
        self.connection
            .create_scalar_function(
                "regexp",
                2,
                FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
                move |ctx| {
                    let pattern = value_text(ctx.get_raw(0));
                    let candidate = value_text(ctx.get_raw(1));
                    let (Some(pattern), Some(candidate)) = (pattern, candidate) else {
                        return Ok(false);
                    };
                    Ok(compile_pattern_cached(&pattern)
                        .map(|regex| regex.is_match(&candidate))
                        .unwrap_or(false))
                }
            )
            .map_err(StoreError::Regexp)
    }

    /// Execute a built query and report whether any row matched.
    ///
    /// Matches are set-valued: rows are never materialized or returned.
    pub fn has_rows(&self, query: &BuiltQuery) -> Result<bool, StoreError> {
        let mut statement = self
            .connection
            .prepare(&query.sql)
            .map_err(StoreError::Query)?;
        let exists = statement
            .exists(rusqlite::params_from_iter(query.params.iter()))
            .map_err(StoreError::Query)?;
        debug!(path = %self.path.display(), sql = %query.sql, matched = exists, "store query");
        Ok(exists)
    }
}

/// Verify the host REGEXP function can be registered at all.
///
/// Runs against an in-memory connection before the optimized path starts;
/// failure here is the one fatal adapter condition.
pub fn probe_regexp_support() -> Result<(), StoreError> {
    let connection = Connection::open_in_memory().map_err(|source| StoreError::Open {
        path: PathBuf::from(":memory:"),
        source
    })?;
    connection
        .create_scalar_function(
            "regexp",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |_| Ok(false)
        )
        .map_err(StoreError::Regexp)
}

fn parse_column_list(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    if let Ok(columns) = serde_json::from_str::<Vec<String>>(raw) {
        return columns;
    }
    raw.split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn value_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(r) => Some(r.to_string()),
        ValueRef::Null | ValueRef::Blob(_) => None
    }
}
