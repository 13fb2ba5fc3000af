//! Centralized default constants for tributary.
//!
//! **This module is the single source of truth** for shared default values.
//! All crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// CHUNKING
// =============================================================================

/// Default number of rows fetched and applied per chunk.
pub const CHUNK_SIZE: u64 = 25_000;

/// Valid chunk_size range (rows).
pub const CHUNK_SIZE_MIN: u64 = 1;
pub const CHUNK_SIZE_MAX: u64 = 1_073_741_824;

/// Upper bound on rows per SQL statement inside a chunk. Sub-batches are
/// sized `min(chunk_size / 2, SUB_BATCH_CAP)` to keep statements bounded.
pub const SUB_BATCH_CAP: u64 = 500;

/// Sub-batch size for existence probes and write statements:
/// `min(chunk_size / 2, SUB_BATCH_CAP)`, never zero.
pub fn sub_batch_size(chunk_size: u64) -> usize {
    (chunk_size / 2).min(SUB_BATCH_CAP).max(1) as usize
}

// =============================================================================
// SCHEDULING
// =============================================================================

/// Default seconds between replication cycles.
pub const SYNC_INTERVAL_SECS: u64 = 30;

/// Valid sync_interval range (seconds).
pub const SYNC_INTERVAL_MIN_SECS: u64 = 5;
pub const SYNC_INTERVAL_MAX_SECS: u64 = 3600;

/// Minimum sleep between worker cycles regardless of configuration.
pub const MIN_CYCLE_SLEEP_SECS: u64 = 5;

// =============================================================================
// HARD LIMITS (runaway-loop protection)
// =============================================================================

/// Maximum chunks processed for one table in one cycle.
pub const MAX_CHUNKS_PER_CYCLE: u64 = 10_000;

/// Maximum wall-clock seconds spent on one table in one cycle (2 hours).
pub const MAX_TABLE_SECS_PER_CYCLE: u64 = 7_200;

/// Per-row retries after an aborted transaction, per sub-batch.
pub const ABORT_RETRY_CAP: usize = 100;

/// Per-row retries after a data/syntax error, per sub-batch.
pub const SYNTAX_RETRY_CAP: usize = 50;

// =============================================================================
// TIMEOUTS
// =============================================================================

/// Statement timeout applied to every write transaction, seconds.
pub const STATEMENT_TIMEOUT_SECS: u64 = 600;

/// Wait/lock/net timeouts applied to source sessions, seconds.
pub const SOURCE_SESSION_TIMEOUT_SECS: u64 = 600;

// =============================================================================
// BINARY DATA
// =============================================================================

/// Binary cell values longer than this are truncated by the normalizer.
pub const BINARY_VALUE_CAP: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_defaults() {
        assert_eq!(CHUNK_SIZE, 25_000);
        assert!(CHUNK_SIZE >= CHUNK_SIZE_MIN && CHUNK_SIZE <= CHUNK_SIZE_MAX);
    }

    #[test]
    fn test_interval_defaults() {
        assert_eq!(SYNC_INTERVAL_SECS, 30);
        assert!(SYNC_INTERVAL_SECS >= SYNC_INTERVAL_MIN_SECS);
        assert!(SYNC_INTERVAL_SECS <= SYNC_INTERVAL_MAX_SECS);
    }

    #[test]
    fn test_retry_caps_ordering() {
        // Abort recovery is allowed to work harder than syntax recovery.
        assert!(ABORT_RETRY_CAP > SYNTAX_RETRY_CAP);
    }
}
