//! Callback deduplication.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A correlation id under which an external response is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackKey(String);

impl CallbackKey {
    /// Wraps a correlation id.
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self(correlation_id.into())
    }

    /// Get the underlying key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallbackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remembers which callbacks were already delivered.
#[derive(Debug, Default)]
pub struct CallbackLedger {
    seen: HashSet<CallbackKey>,
}

impl CallbackLedger {
    /// Create a new empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the key has been seen before, and mark it as seen.
    ///
    /// Returns `true` the first time a key is offered and `false` for
    /// every duplicate.
    pub fn check_and_mark(&mut self, key: &CallbackKey) -> bool {
        self.seen.insert(key.clone())
    }

    /// Check if a key has been seen without marking it.
    #[must_use]
    pub fn is_seen(&self, key: &CallbackKey) -> bool {
        self.seen.contains(key)
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` if no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
