//! Compiled-pattern caching shared by both evaluation paths.
//!
//! This module provides a process-wide, thread-safe cache for compiled
//! regular expressions. Patterns are compiled case-insensitively once and
//! reused by every worker; invalid patterns are negative-cached so the
//! engine never attempts recompilation.
//!
//! # Example
//!
//! ```
//! use artifact_semantics::cache::compile_pattern_cached;
//!
//! let pattern = compile_pattern_cached("(CHROME|FIREFOX|EDGE)").unwrap();
//! assert!(pattern.is_match("chrome.exe"));
//!
//! // Invalid patterns are cached as misses and never recompiled.
//! assert!(compile_pattern_cached("(unclosed").is_none());
//! ```

use std::{
    collections::HashMap,
    sync::{LazyLock, RwLock}
};

use regex::{Regex, RegexBuilder};
use tracing::error;

/// Global pattern cache with default capacity of 1000 entries.
static PATTERN_CACHE: LazyLock<RwLock<PatternCache>> =
    LazyLock::new(|| RwLock::new(PatternCache::new(1000)));

/// Thread-safe cache mapping pattern strings to compiled regexes.
///
/// `None` entries record invalid patterns so repeated rule evaluations do
/// not pay the compilation failure twice. The cache stops inserting once
/// the size bound is reached; lookups still compile uncached.
pub struct PatternCache {
    cache:    HashMap<String, Option<Regex>>,
    max_size: usize
}

impl PatternCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: HashMap::with_capacity(max_size.min(64)),
            max_size
        }
    }

    pub fn get(&self, pattern: &str) -> Option<Option<Regex>> {
        self.cache.get(pattern).cloned()
    }

    /// Compile and insert, negative-caching failures.
    ///
    /// # Notes
    ///
    /// - Compilation is case-insensitive for every caller
    /// - Entries beyond `max_size` are compiled but not cached
    pub fn compile_and_insert(&mut self, pattern: &str) -> Option<Regex> {
        if let Some(cached) = self.cache.get(pattern) {
            return cached.clone();
        }
        let compiled = match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(regex) => Some(regex),
            Err(e) => {
                error!(
                    pattern,
                    error = %e,
                    "pattern compilation failed; rules using it will not match"
                );
                None
            }
        };
        if self.cache.len() < self.max_size {
            self.cache.insert(pattern.to_string(), compiled.clone());
        }
        compiled
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Compile a pattern through the global cache.
///
/// Fast path reads under the shared lock; on a miss the write lock is
/// taken, the cache re-checked, and the pattern compiled once. Returns
/// `None` for empty or invalid patterns.
pub fn compile_pattern_cached(pattern: &str) -> Option<Regex> {
    if pattern.is_empty() {
        return None;
    }

    if let Ok(cache) = PATTERN_CACHE.read()
        && let Some(cached) = cache.get(pattern)
    {
        return cached;
    }

    match PATTERN_CACHE.write() {
        Ok(mut cache) => cache.compile_and_insert(pattern),
        // Lock poisoned: compile uncached rather than fail the condition
        Err(_) => RegexBuilder::new(pattern).case_insensitive(true).build().ok()
    }
}

/// Number of entries currently cached (test support).
pub fn cached_pattern_count() -> usize {
    PATTERN_CACHE.read().map(|c| c.len()).unwrap_or(0)
}
