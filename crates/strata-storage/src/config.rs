//! Retention Configuration
//!
//! Bounds applied by `garbage_collect`. Both limits use `-1` to mean
//! "unbounded", matching the server's CLI defaults.

/// Retention bounds for a datastore.
#[derive(Debug, Clone, Copy)]
pub struct RetentionConfig {
    /// Maximum total log size in bytes, `-1` for unbounded.
    ///
    /// Size-bounded collection is accepted in configuration but not yet
    /// enforced by any backend; see DESIGN.md.
    pub max_log_bytes: i64,

    /// Maximum age of a log entry in seconds, `-1` for unbounded.
    pub max_log_age_secs: i64,
}

impl RetentionConfig {
    /// Keep everything forever.
    pub fn unbounded() -> Self {
        Self {
            max_log_bytes: -1,
            max_log_age_secs: -1,
        }
    }

    pub fn age_limited(&self) -> bool {
        self.max_log_age_secs > 0
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self::unbounded()
    }
}
