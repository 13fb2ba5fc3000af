//! Runtime configuration: the `metadata.config` key/value table loaded
//! into a process-wide snapshot.
//!
//! Reads and writes go through a mutex; workers refresh the snapshot from
//! the database at cycle boundaries, so updates are observed at the next
//! chunk boundary.

use std::sync::{Arc, Mutex};

use sqlx::{PgPool, Row};
use tracing::{info, warn};

use tributary_core::defaults::{
    CHUNK_SIZE, CHUNK_SIZE_MAX, CHUNK_SIZE_MIN, MIN_CYCLE_SLEEP_SECS, SYNC_INTERVAL_MAX_SECS,
    SYNC_INTERVAL_MIN_SECS, SYNC_INTERVAL_SECS,
};
use tributary_core::{Error, Result};

/// One configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Rows per chunk.
    pub chunk_size: u64,
    /// Seconds between replication cycles.
    pub sync_interval_secs: u64,
    /// Log level name (DEBUG/INFO/WARN/ERROR/FATAL).
    pub debug_level: String,
    pub show_timestamps: bool,
    pub show_thread_id: bool,
    pub show_file_line: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            sync_interval_secs: SYNC_INTERVAL_SECS,
            debug_level: "INFO".to_string(),
            show_timestamps: true,
            show_thread_id: false,
            show_file_line: false,
        }
    }
}

pub fn valid_chunk_size(size: u64) -> bool {
    (CHUNK_SIZE_MIN..=CHUNK_SIZE_MAX).contains(&size)
}

pub fn valid_sync_interval(interval: u64) -> bool {
    (SYNC_INTERVAL_MIN_SECS..=SYNC_INTERVAL_MAX_SECS).contains(&interval)
}

/// Recognized level names, normalized to tracing's vocabulary.
pub fn normalize_level(level: &str) -> Option<&'static str> {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => Some("debug"),
        "INFO" => Some("info"),
        "WARN" | "WARNING" => Some("warn"),
        "ERROR" => Some("error"),
        "FATAL" | "CRITICAL" => Some("error"),
        _ => None,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Apply one key/value pair to a settings struct. Returns whether the
/// settings changed; unknown keys and out-of-range values are rejected.
pub fn apply_setting(settings: &mut SyncSettings, key: &str, value: &str) -> bool {
    match key {
        "chunk_size" => match value.trim().parse::<u64>() {
            Ok(size) if valid_chunk_size(size) => {
                if settings.chunk_size != size {
                    settings.chunk_size = size;
                    return true;
                }
                false
            }
            _ => {
                warn!(
                    subsystem = "catalog",
                    component = "config",
                    value,
                    "chunk_size out of range (1-1073741824); keeping current value"
                );
                false
            }
        },
        "sync_interval" => match value.trim().parse::<u64>() {
            Ok(interval) if valid_sync_interval(interval) => {
                if settings.sync_interval_secs != interval {
                    settings.sync_interval_secs = interval;
                    return true;
                }
                false
            }
            _ => {
                warn!(
                    subsystem = "catalog",
                    component = "config",
                    value,
                    "sync_interval out of range (5-3600s); keeping current value"
                );
                false
            }
        },
        "debug_level" => match normalize_level(value) {
            Some(_) => {
                let value = value.to_ascii_uppercase();
                if settings.debug_level != value {
                    settings.debug_level = value;
                    return true;
                }
                false
            }
            None => {
                warn!(
                    subsystem = "catalog",
                    component = "config",
                    value,
                    "Unknown debug_level; keeping current value"
                );
                false
            }
        },
        "debug_show_timestamps" => match parse_bool(value) {
            Some(flag) if settings.show_timestamps != flag => {
                settings.show_timestamps = flag;
                true
            }
            _ => false,
        },
        "debug_show_thread_id" => match parse_bool(value) {
            Some(flag) if settings.show_thread_id != flag => {
                settings.show_thread_id = flag;
                true
            }
            _ => false,
        },
        "debug_show_file_line" => match parse_bool(value) {
            Some(flag) if settings.show_file_line != flag => {
                settings.show_file_line = flag;
                true
            }
            _ => false,
        },
        _ => {
            warn!(
                subsystem = "catalog",
                component = "config",
                key,
                "Unknown configuration key"
            );
            false
        }
    }
}

/// Sleep between worker cycles: `max(5, sync_interval / 4)` seconds.
pub fn cycle_sleep_secs(sync_interval_secs: u64) -> u64 {
    (sync_interval_secs / 4).max(MIN_CYCLE_SLEEP_SECS)
}

/// Process-wide configuration handle, cloneable across workers.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<Mutex<SyncSettings>>,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedConfig {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SyncSettings::default())),
        }
    }

    /// Clone the current snapshot.
    pub fn snapshot(&self) -> SyncSettings {
        self.inner.lock().expect("config mutex poisoned").clone()
    }

    pub fn chunk_size(&self) -> u64 {
        self.inner.lock().expect("config mutex poisoned").chunk_size
    }

    pub fn sync_interval_secs(&self) -> u64 {
        self.inner
            .lock()
            .expect("config mutex poisoned")
            .sync_interval_secs
    }

    /// Reload from `metadata.config`. Invalid rows are skipped with a
    /// warning; valid changes are logged and take effect at the next
    /// chunk boundary.
    pub async fn refresh(&self, pool: &PgPool) -> Result<()> {
        let rows = sqlx::query("SELECT key, value FROM metadata.config")
            .fetch_all(pool)
            .await
            .map_err(Error::Database)?;

        let mut settings = self.inner.lock().expect("config mutex poisoned");
        for row in rows {
            let key: String = row.get(0);
            let value: String = row.get(1);
            if apply_setting(&mut settings, &key, &value) {
                info!(
                    subsystem = "catalog",
                    component = "config",
                    key,
                    value,
                    "Configuration updated"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.chunk_size, 25_000);
        assert_eq!(settings.sync_interval_secs, 30);
        assert_eq!(settings.debug_level, "INFO");
    }

    #[test]
    fn test_chunk_size_validation() {
        assert!(valid_chunk_size(1));
        assert!(valid_chunk_size(25_000));
        assert!(valid_chunk_size(1_073_741_824));
        assert!(!valid_chunk_size(0));
        assert!(!valid_chunk_size(1_073_741_825));
    }

    #[test]
    fn test_sync_interval_validation() {
        assert!(valid_sync_interval(5));
        assert!(valid_sync_interval(3600));
        assert!(!valid_sync_interval(4));
        assert!(!valid_sync_interval(3601));
    }

    #[test]
    fn test_apply_setting_chunk_size() {
        let mut settings = SyncSettings::default();
        assert!(apply_setting(&mut settings, "chunk_size", "100"));
        assert_eq!(settings.chunk_size, 100);
        // Out-of-range values leave the setting alone.
        assert!(!apply_setting(&mut settings, "chunk_size", "0"));
        assert_eq!(settings.chunk_size, 100);
        // Unchanged value reports no change.
        assert!(!apply_setting(&mut settings, "chunk_size", "100"));
    }

    #[test]
    fn test_apply_setting_unknown_key() {
        let mut settings = SyncSettings::default();
        assert!(!apply_setting(&mut settings, "mystery", "1"));
        assert_eq!(settings, SyncSettings::default());
    }

    #[test]
    fn test_apply_setting_debug_level_aliases() {
        let mut settings = SyncSettings::default();
        assert!(apply_setting(&mut settings, "debug_level", "warning"));
        assert_eq!(settings.debug_level, "WARNING");
        assert!(!apply_setting(&mut settings, "debug_level", "noisy"));
        assert_eq!(settings.debug_level, "WARNING");
    }

    #[test]
    fn test_normalize_level() {
        assert_eq!(normalize_level("DEBUG"), Some("debug"));
        assert_eq!(normalize_level("warning"), Some("warn"));
        assert_eq!(normalize_level("CRITICAL"), Some("error"));
        assert_eq!(normalize_level("verbose"), None);
    }

    #[test]
    fn test_apply_setting_bool_toggles() {
        let mut settings = SyncSettings::default();
        assert!(apply_setting(&mut settings, "debug_show_thread_id", "true"));
        assert!(settings.show_thread_id);
        assert!(!apply_setting(&mut settings, "debug_show_thread_id", "yes"));
        assert!(settings.show_thread_id);
    }

    #[test]
    fn test_cycle_sleep_floor() {
        assert_eq!(cycle_sleep_secs(30), 7);
        assert_eq!(cycle_sleep_secs(5), 5);
        assert_eq!(cycle_sleep_secs(3600), 900);
    }

    #[test]
    fn test_shared_config_snapshot_isolated() {
        let shared = SharedConfig::new();
        let snapshot = shared.snapshot();
        assert_eq!(snapshot.chunk_size, shared.chunk_size());
    }
}
