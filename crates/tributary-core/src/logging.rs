//! Structured logging field name constants for tributary.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded replication, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, cycle/table completions |
//! | DEBUG | Decision points, cursor positions, config choices |
//! | TRACE | Per-row iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "engine", "catalog", "target", "sources", "daemon"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "table_sync", "catalog_sync", "writer", "pool", "worker"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "full_load", "bulk_upsert", "cleanup", "read_chunk"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Source database engine ("MariaDB", "MSSQL", "MongoDB", "PostgreSQL").
pub const ENGINE: &str = "engine";

/// Source schema name being replicated.
pub const SCHEMA: &str = "schema";

/// Source table name being replicated.
pub const TABLE: &str = "table";

/// Catalog status of the table ("FULL_LOAD", "LISTENING_CHANGES", ...).
pub const STATUS: &str = "status";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Rows affected/applied by an operation.
pub const ROW_COUNT: &str = "row_count";

/// Chunk ordinal within a load.
pub const CHUNK_NUMBER: &str = "chunk_number";

/// Row count on the source side.
pub const SOURCE_COUNT: &str = "source_count";

/// Row count on the target side.
pub const TARGET_COUNT: &str = "target_count";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the target pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the target pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
