//! Error types and constructors for the semantic evaluation engine.
//!
//! This module provides error construction functions that create properly
//! formatted [`AppError`] instances with context-specific messages.
//!
//! Only two kinds of failure reach the caller: configuration/input errors
//! raised before evaluation starts, and the fatal adapter error raised
//! when the host REGEXP function cannot be registered at all. Every other
//! failure mode is internal and degrades to the in-memory path.

pub use masterror::{AppError, AppResult};

/// Create file read error with path context.
///
/// # Arguments
///
/// * `path` - The file path that failed to read
/// * `source` - The underlying IO error
pub fn file_read_error(path: &str, source: std::io::Error) -> AppError {
    AppError::internal(format!("Failed to read file '{}': {}", path, source))
}

/// Create identity document parse error
pub fn identity_parse_error(message: impl Into<String>) -> AppError {
    AppError::bad_request(format!("Invalid identity document: {}", message.into()))
}

/// Create config error
pub fn config_error(message: impl Into<String>) -> AppError {
    AppError::bad_request(message.into())
}

/// Fatal adapter error: the REGEXP scalar function cannot be registered
/// for any store, so the optimized path cannot run at all.
pub fn fatal_adapter_error(message: impl Into<String>) -> AppError {
    AppError::service(format!(
        "Store adapter unusable: {}. Evaluation aborted with no matches.",
        message.into()
    ))
}

/// Create rule directory error (scope directory unreadable)
pub fn rule_dir_error(path: &str, source: std::io::Error) -> AppError {
    AppError::internal(format!(
        "Failed to scan rule directory '{}': {}",
        path, source
    ))
}
