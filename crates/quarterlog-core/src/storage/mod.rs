mod config;
pub mod database;
mod lock;
mod memory;

pub use config::{Config, CycleConfig, TimerConfig, WakeConfig};
pub use database::Database;
pub use lock::SessionLock;
pub use memory::MemoryStore;

use std::path::PathBuf;

use crate::error::{ConfigError, StoreError};

/// Returns `~/.config/quarterlog[-dev]/` based on QUARTERLOG_ENV.
///
/// Set QUARTERLOG_ENV=dev to use development data directory.
/// QUARTERLOG_DATA_DIR overrides both.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("QUARTERLOG_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("QUARTERLOG_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("quarterlog-dev")
            } else {
                base_dir.join("quarterlog")
            }
        }
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}

/// Crash-safe key/value persistence.
///
/// Writes are grouped: every key of a `put`, `delete` or `take` call lands
/// together or not at all. Reads reflect the last completed write.
pub trait StateStore: Send {
    /// Write all `entries` of `group` atomically.
    fn put(&mut self, group: &str, entries: &[(&str, String)]) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete all `keys` of `group` atomically. Missing keys are fine.
    fn delete(&mut self, group: &str, keys: &[&str]) -> Result<(), StoreError>;

    /// Read and delete `keys` in one step. Values come back in `keys` order.
    fn take(&mut self, group: &str, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError>;
}

/// Key names of the persisted groups.
pub mod keys {
    pub const SESSION_GROUP: &str = "session";
    pub const SESSION_ID: &str = "session.id";
    pub const SESSION_DURATION_MS: &str = "session.duration_ms";
    pub const SESSION_TOTAL_CYCLES: &str = "session.total_cycles";
    pub const SESSION_CYCLES_LEFT: &str = "session.cycles_left";
    pub const SESSION_CYCLES_COMPLETED: &str = "session.cycles_completed";
    pub const SESSION_END_TIME_MS: &str = "session.end_time_ms";
    pub const SESSION_PHASE: &str = "session.phase";
    pub const SESSION_STARTED_AT_MS: &str = "session.started_at_ms";
    pub const SESSION_KEYS: &[&str] = &[
        SESSION_ID,
        SESSION_DURATION_MS,
        SESSION_TOTAL_CYCLES,
        SESSION_CYCLES_LEFT,
        SESSION_CYCLES_COMPLETED,
        SESSION_END_TIME_MS,
        SESSION_PHASE,
        SESSION_STARTED_AT_MS,
    ];

    pub const DECISION_GROUP: &str = "decision";
    pub const DECISION_KIND: &str = "decision.kind";
    pub const DECISION_NOTE: &str = "decision.note";
    pub const DECISION_CAPTURED_AT_MS: &str = "decision.captured_at_ms";
    pub const DECISION_KEYS: &[&str] = &[DECISION_KIND, DECISION_NOTE, DECISION_CAPTURED_AT_MS];

    pub const DAILY_GROUP: &str = "daily";
    pub const DAILY_HOUR: &str = "daily.hour";
    pub const DAILY_MINUTE: &str = "daily.minute";
    pub const DAILY_DURATION_MIN: &str = "daily.duration_min";
    pub const DAILY_TOTAL_CYCLES: &str = "daily.total_cycles";
    pub const DAILY_ENABLED: &str = "daily.enabled";
    pub const DAILY_KEYS: &[&str] = &[
        DAILY_HOUR,
        DAILY_MINUTE,
        DAILY_DURATION_MIN,
        DAILY_TOTAL_CYCLES,
        DAILY_ENABLED,
    ];
}

/// Parse a stored value, mapping failures to [`StoreError::Corrupt`].
pub(crate) fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}
