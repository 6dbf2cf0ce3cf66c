//! Warnings that should appear at most once per distinct key.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};
use tracing::warn;

/// Set of keys already reported.
#[derive(Debug, Default)]
pub struct LogOnce {
    seen: Mutex<HashSet<String>>,
}

impl LogOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time `key` is offered, false afterwards.
    pub fn first_time(&self, key: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if seen.contains(key) {
            return false;
        }
        seen.insert(key.to_string());
        true
    }
}

/// The set shared by the whole process.
fn process_wide() -> &'static LogOnce {
    static INSTANCE: OnceLock<LogOnce> = OnceLock::new();
    INSTANCE.get_or_init(LogOnce::new)
}

/// Emit `message` as a warning unless `key` was already warned about in this
/// process. Returns whether the warning was emitted.
pub fn warn_once(key: &str, message: &str) -> bool {
    if process_wide().first_time(key) {
        warn!(key = %key, "{}", message);
        true
    } else {
        false
    }
}
