// SPDX-FileCopyrightText: 2026 Crow Forensics
// SPDX-License-Identifier: MIT

use std::{fs, path::Path};

use artifact_semantics::{
    query::{BuiltQuery, ParamValue},
    store::{Descriptor, StoreHandle, prefilter_skip_reason, probe_regexp_support}
};
use rusqlite::{Connection, params};
use tempfile::TempDir;

/// Create a store database with a data table, rows, and a descriptor.
/// `descriptor_columns` may disagree with the real table on purpose.
fn create_store(
    path: &Path,
    artifact_type: &str,
    table_columns: &[&str],
    descriptor_columns: &[&str],
    rows: &[Vec<(&str, &str)>]
) {
    let conn = Connection::open(path).unwrap();
    let columns_sql = table_columns
        .iter()
        .map(|c| format!("{} TEXT", c))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(&format!("CREATE TABLE feather_data ({})", columns_sql), [])
        .unwrap();
    conn.execute(
        "CREATE TABLE feather_metadata (artifact_type TEXT, columns TEXT, row_count INTEGER, last_indexed TEXT)",
        []
    )
    .unwrap();

    for row in rows {
        let names: Vec<&str> = row.iter().map(|(name, _)| *name).collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{}", i)).collect();
        let values: Vec<&str> = row.iter().map(|(_, value)| *value).collect();
        conn.execute(
            &format!(
                "INSERT INTO feather_data ({}) VALUES ({})",
                names.join(", "),
                placeholders.join(", ")
            ),
            rusqlite::params_from_iter(values.iter())
        )
        .unwrap();
    }

    conn.execute(
        "INSERT INTO feather_metadata VALUES (?1, ?2, ?3, ?4)",
        params![
            artifact_type,
            serde_json::to_string(descriptor_columns).unwrap(),
            rows.len() as i64,
            "2026-01-01T00:00:00Z"
        ]
    )
    .unwrap();
}

fn query(sql: &str, params: Vec<ParamValue>) -> BuiltQuery {
    BuiltQuery {
        sql: sql.to_string(),
        params
    }
}

#[test]
fn test_open_missing_store_fails() {
    let dir = TempDir::new().unwrap();
    assert!(StoreHandle::open(&dir.path().join("absent.db")).is_err());
}

#[test]
fn test_metadata_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("prefetch.db");
    create_store(
        &path,
        "prefetch",
        &["executable_name", "run_count"],
        &["executable_name", "run_count"],
        &[vec![("executable_name", "CHROME.EXE"), ("run_count", "3")]]
    );

    let handle = StoreHandle::open(&path).unwrap();
    let descriptor = handle.metadata().unwrap().unwrap();
    assert_eq!(descriptor.artifact_type.as_deref(), Some("prefetch"));
    assert_eq!(descriptor.row_count, 1);
    assert!(descriptor.has_column("executable_name"));
    assert!(descriptor.has_column("EXECUTABLE_NAME"));
    assert!(!descriptor.has_column("missing"));
}

#[test]
fn test_metadata_missing_descriptor_table_is_none() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bare.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute("CREATE TABLE feather_data (x TEXT)", []).unwrap();
    drop(conn);

    let handle = StoreHandle::open(&path).unwrap();
    assert!(handle.metadata().unwrap().is_none());
}

#[test]
fn test_metadata_comma_separated_columns_tolerated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute("CREATE TABLE feather_data (a TEXT, b TEXT)", []).unwrap();
    conn.execute(
        "CREATE TABLE feather_metadata (artifact_type TEXT, columns TEXT, row_count INTEGER, last_indexed TEXT)",
        []
    )
    .unwrap();
    conn.execute(
        "INSERT INTO feather_metadata VALUES ('logs', 'a, b', 5, NULL)",
        []
    )
    .unwrap();
    drop(conn);

    let handle = StoreHandle::open(&path).unwrap();
    let descriptor = handle.metadata().unwrap().unwrap();
    assert_eq!(descriptor.columns, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_metadata_errors_on_truncated_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("truncated.db");
    fs::write(&path, b"this is not a sqlite database").unwrap();

    let handle = StoreHandle::open(&path).unwrap();
    assert!(handle.metadata().is_err());
}

fn descriptor(artifact_type: &str, columns: &[&str], row_count: i64) -> Descriptor {
    Descriptor {
        artifact_type: Some(artifact_type.to_string()),
        columns: columns.iter().map(ToString::to_string).collect(),
        row_count,
        last_indexed: None
    }
}

#[test]
fn test_prefilter_missing_descriptor_skips() {
    assert!(prefilter_skip_reason(None, &["a"], None).is_some());
}

#[test]
fn test_prefilter_empty_store_skips() {
    let d = descriptor("prefetch", &["a"], 0);
    let reason = prefilter_skip_reason(Some(&d), &["a"], None).unwrap();
    assert!(reason.contains("no records"));
}

#[test]
fn test_prefilter_artifact_type_mismatch_skips() {
    let d = descriptor("srum", &["a"], 10);
    assert!(prefilter_skip_reason(Some(&d), &["a"], Some("prefetch")).is_some());
}

#[test]
fn test_prefilter_artifact_type_case_insensitive() {
    let d = descriptor("Prefetch", &["a"], 10);
    assert!(prefilter_skip_reason(Some(&d), &["a"], Some("prefetch")).is_none());
}

#[test]
fn test_prefilter_missing_column_skips() {
    let d = descriptor("prefetch", &["executable_name"], 10);
    let reason = prefilter_skip_reason(Some(&d), &["application_name"], None).unwrap();
    assert!(reason.contains("application_name"));
}

#[test]
fn test_prefilter_passes_when_all_checks_hold() {
    let d = descriptor("prefetch", &["executable_name"], 10);
    assert!(prefilter_skip_reason(Some(&d), &["executable_name"], None).is_none());
}

#[test]
fn test_has_rows_with_bound_parameters() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("prefetch.db");
    create_store(
        &path,
        "prefetch",
        &["executable_name"],
        &["executable_name"],
        &[vec![("executable_name", "CHROME.EXE")]]
    );

    let handle = StoreHandle::open(&path).unwrap();
    assert!(
        handle
            .has_rows(&query(
                "SELECT * FROM feather_data WHERE (executable_name = ?)",
                vec![ParamValue::Text("CHROME.EXE".to_string())]
            ))
            .unwrap()
    );
    assert!(
        !handle
            .has_rows(&query(
                "SELECT * FROM feather_data WHERE (executable_name = ?)",
                vec![ParamValue::Text("FIREFOX.EXE".to_string())]
            ))
            .unwrap()
    );
}

#[test]
fn test_regexp_function_matches_case_insensitively() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("prefetch.db");
    create_store(
        &path,
        "prefetch",
        &["executable_name"],
        &["executable_name"],
        &[vec![("executable_name", "chrome.exe")]]
    );

    let handle = StoreHandle::open(&path).unwrap();
    handle.register_regexp().unwrap();
    assert!(
        handle
            .has_rows(&query(
                "SELECT * FROM feather_data WHERE (executable_name REGEXP ?)",
                vec![ParamValue::Text("(CHROME|FIREFOX)".to_string())]
            ))
            .unwrap()
    );
}

#[test]
fn test_regexp_invalid_pattern_matches_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("prefetch.db");
    create_store(
        &path,
        "prefetch",
        &["executable_name"],
        &["executable_name"],
        &[vec![("executable_name", "chrome.exe")]]
    );

    let handle = StoreHandle::open(&path).unwrap();
    handle.register_regexp().unwrap();
    assert!(
        !handle
            .has_rows(&query(
                "SELECT * FROM feather_data WHERE (executable_name REGEXP ?)",
                vec![ParamValue::Text("(unclosed".to_string())]
            ))
            .unwrap()
    );
}

#[test]
fn test_query_against_missing_column_errors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("prefetch.db");
    create_store(
        &path,
        "prefetch",
        &["executable_name"],
        &["executable_name"],
        &[vec![("executable_name", "chrome.exe")]]
    );

    let handle = StoreHandle::open(&path).unwrap();
    assert!(
        handle
            .has_rows(&query(
                "SELECT * FROM feather_data WHERE (application_name = ?)",
                vec![ParamValue::Text("x".to_string())]
            ))
            .is_err()
    );
}

#[test]
fn test_adversarial_parameter_does_not_alter_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("prefetch.db");
    create_store(
        &path,
        "prefetch",
        &["executable_name"],
        &["executable_name"],
        &[vec![("executable_name", "chrome.exe")]]
    );
    let before = fs::read(&path).unwrap();

    let handle = StoreHandle::open(&path).unwrap();
    let matched = handle
        .has_rows(&query(
            "SELECT * FROM feather_data WHERE (executable_name = ?)",
            vec![ParamValue::Text("' OR 1=1; --".to_string())]
        ))
        .unwrap();
    assert!(!matched);
    drop(handle);

    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn test_probe_regexp_support_succeeds() {
    assert!(probe_regexp_support().is_ok());
}
