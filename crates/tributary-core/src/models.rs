//! Core data models for tributary.
//!
//! These types are shared across all tributary crates and represent the
//! domain entities of the replication pipeline: the catalog row describing
//! one replicated table, its lifecycle status, the pagination strategy, and
//! the transient chunk/cursor types that flow between source adapters and
//! the target writer.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// =============================================================================
// ENGINES
// =============================================================================

/// Supported source database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbEngine {
    MariaDb,
    Mssql,
    MongoDb,
    Postgres,
}

impl DbEngine {
    /// All recognized engines, in orchestration order.
    pub const ALL: [DbEngine; 4] = [
        DbEngine::MariaDb,
        DbEngine::Mssql,
        DbEngine::MongoDb,
        DbEngine::Postgres,
    ];

    /// Catalog string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DbEngine::MariaDb => "MariaDB",
            DbEngine::Mssql => "MSSQL",
            DbEngine::MongoDb => "MongoDB",
            DbEngine::Postgres => "PostgreSQL",
        }
    }

    /// Parse the catalog string representation.
    pub fn parse(s: &str) -> Option<DbEngine> {
        match s {
            "MariaDB" => Some(DbEngine::MariaDb),
            "MSSQL" => Some(DbEngine::Mssql),
            "MongoDB" => Some(DbEngine::MongoDb),
            "PostgreSQL" => Some(DbEngine::Postgres),
            _ => None,
        }
    }
}

impl std::fmt::Display for DbEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// TABLE STATUS
// =============================================================================

/// Per-table synchronization state, persisted in `metadata.catalog.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableStatus {
    /// Discovered but not yet activated by an operator.
    Pending,
    /// Initial bulk copy in progress (or queued).
    FullLoad,
    /// Steady state: incremental updates and delete reconciliation.
    ListeningChanges,
    /// Operator requested a truncate-and-reload.
    Reset,
    /// Source and target both empty.
    NoData,
    /// Sticky failure; cleared by an operator or a successful cycle.
    Error,
    /// Deactivated row, progress zeroed.
    Skip,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Pending => "PENDING",
            TableStatus::FullLoad => "FULL_LOAD",
            TableStatus::ListeningChanges => "LISTENING_CHANGES",
            TableStatus::Reset => "RESET",
            TableStatus::NoData => "NO_DATA",
            TableStatus::Error => "ERROR",
            TableStatus::Skip => "SKIP",
        }
    }

    pub fn parse(s: &str) -> Option<TableStatus> {
        match s {
            "PENDING" => Some(TableStatus::Pending),
            "FULL_LOAD" => Some(TableStatus::FullLoad),
            "LISTENING_CHANGES" => Some(TableStatus::ListeningChanges),
            "RESET" => Some(TableStatus::Reset),
            "NO_DATA" => Some(TableStatus::NoData),
            "ERROR" => Some(TableStatus::Error),
            "SKIP" => Some(TableStatus::Skip),
            _ => None,
        }
    }
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PK STRATEGY
// =============================================================================

/// How a table is paginated during bulk copy, and which progress field is
/// meaningful (`last_processed_pk` for `Pk`/`TemporalPk`, `last_offset`
/// for `Offset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PkStrategy {
    /// Cursor over the first primary-key column.
    Pk,
    /// Cursor over the first candidate (monotonic, non-PK) column.
    TemporalPk,
    /// LIMIT/OFFSET pagination; last resort.
    Offset,
}

impl PkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PkStrategy::Pk => "PK",
            PkStrategy::TemporalPk => "TEMPORAL_PK",
            PkStrategy::Offset => "OFFSET",
        }
    }

    pub fn parse(s: &str) -> Option<PkStrategy> {
        match s {
            "PK" => Some(PkStrategy::Pk),
            "TEMPORAL_PK" => Some(PkStrategy::TemporalPk),
            "OFFSET" => Some(PkStrategy::Offset),
            _ => None,
        }
    }

    /// Classify a table from its PK/candidate-column evidence.
    ///
    /// Any primary key wins; otherwise the first monotonic candidate column
    /// drives a temporal cursor; otherwise OFFSET pagination.
    pub fn classify(pk_columns: &[String], candidate_columns: &[String]) -> PkStrategy {
        if !pk_columns.is_empty() {
            PkStrategy::Pk
        } else if !candidate_columns.is_empty() {
            PkStrategy::TemporalPk
        } else {
            PkStrategy::Offset
        }
    }

    /// Whether progress for this strategy lives in `last_processed_pk`.
    pub fn uses_pk_progress(&self) -> bool {
        matches!(self, PkStrategy::Pk | PkStrategy::TemporalPk)
    }
}

impl std::fmt::Display for PkStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// SOURCE TOPOLOGY
// =============================================================================

/// A `(schema, table)` pair as named on the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaTable {
    pub schema: String,
    pub table: String,
}

impl SchemaTable {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for SchemaTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// One column as described by the source, in ordinal position order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Source column name (original casing).
    pub name: String,
    /// Source-declared data type, e.g. `varchar`, `datetime2`, `int`.
    pub data_type: String,
    pub nullable: bool,
    /// Key marker; `PRI` for primary-key members.
    pub key: String,
    /// Vendor extra info, e.g. `auto_increment` / `identity`.
    pub extra: String,
    /// Character maximum length, when declared.
    pub max_length: Option<u32>,
    pub numeric_precision: Option<u32>,
    pub numeric_scale: Option<u32>,
}

impl ColumnSpec {
    pub fn is_primary(&self) -> bool {
        self.key == "PRI"
    }

    /// Whether this column can serve as a monotonic cursor when the table
    /// has no primary key: temporal types and identity columns.
    pub fn is_cursor_candidate(&self) -> bool {
        let ty = self.data_type.to_ascii_lowercase();
        ty.contains("timestamp")
            || ty.contains("datetime")
            || ty == "date"
            || self.extra.eq_ignore_ascii_case("auto_increment")
            || self.extra.to_ascii_lowercase().contains("identity")
    }
}

// =============================================================================
// CURSORS AND CHUNKS
// =============================================================================

/// Ordered primary-key values identifying one target row. `None` marks a
/// NULL key component.
pub type PkTuple = Vec<Option<String>>;

/// The resumable position inside a bulk load, shaped by the PK strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkCursor {
    /// Last seen value of the first PK column; `None` before the first chunk.
    Pk(Option<String>),
    /// Last seen value of the first candidate column.
    Temporal(Option<String>),
    /// Count of rows already copied.
    Offset(u64),
}

impl ChunkCursor {
    pub fn strategy(&self) -> PkStrategy {
        match self {
            ChunkCursor::Pk(_) => PkStrategy::Pk,
            ChunkCursor::Temporal(_) => PkStrategy::TemporalPk,
            ChunkCursor::Offset(_) => PkStrategy::Offset,
        }
    }
}

/// One chunk of source rows, column-ordered, cells as raw text.
///
/// Cells arrive as `Option<String>` — text-protocol semantics shared by all
/// adapters; `None` is a source NULL. The declared source types travel with
/// the catalog's column specs, not with the chunk.
#[derive(Debug, Clone, Default)]
pub struct RowChunk {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RowChunk {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column by name (case-insensitive; sources may report
    /// original casing while the catalog stores lowercase).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// The last row's value for the named column, used to advance cursors.
    pub fn last_value_of(&self, column: &str) -> Option<String> {
        let idx = self.column_index(column)?;
        self.rows.last().and_then(|row| row.get(idx).cloned().flatten())
    }
}

// =============================================================================
// CATALOG ROW
// =============================================================================

/// A persisted record describing one replicated table; one row per
/// `(schema_name, table_name, db_engine)` in `metadata.catalog`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRow {
    pub schema_name: String,
    pub table_name: String,
    pub cluster_name: Option<String>,
    pub db_engine: DbEngine,
    /// Opaque to the core; consumed by the vendor driver.
    pub connection_string: String,
    /// High-water mark on the time column.
    pub last_sync_time: Option<NaiveDateTime>,
    /// Column used for incremental change detection.
    pub last_sync_column: Option<String>,
    pub status: TableStatus,
    /// Meaningful only under `PkStrategy::Offset`.
    pub last_offset: Option<i64>,
    /// Meaningful only under `PkStrategy::Pk` / `TemporalPk`.
    pub last_processed_pk: Option<String>,
    pub pk_strategy: PkStrategy,
    /// Ordered primary-key column names.
    pub pk_columns: Vec<String>,
    /// Ordered non-PK cursor candidates.
    pub candidate_columns: Vec<String>,
    pub has_pk: bool,
    /// Estimated row count, for scheduling order.
    pub table_size: i64,
    pub active: bool,
}

impl CatalogRow {
    /// Target schema name: the source schema, lowercased.
    pub fn target_schema(&self) -> String {
        self.schema_name.to_lowercase()
    }

    /// Whether stored progress is at the beginning (fresh start).
    pub fn progress_is_zero(&self) -> bool {
        self.last_offset.unwrap_or(0) == 0 && self.last_processed_pk.is_none()
    }

    /// Build the resume cursor from the persisted progress fields.
    pub fn cursor(&self) -> ChunkCursor {
        match self.pk_strategy {
            PkStrategy::Pk => ChunkCursor::Pk(self.last_processed_pk.clone()),
            PkStrategy::TemporalPk => ChunkCursor::Temporal(self.last_processed_pk.clone()),
            PkStrategy::Offset => ChunkCursor::Offset(self.last_offset.unwrap_or(0).max(0) as u64),
        }
    }

    /// Whether the progress fields respect the strategy invariant: exactly
    /// the strategy's own field may be populated.
    pub fn progress_consistent(&self) -> bool {
        if self.pk_strategy.uses_pk_progress() {
            self.last_offset.is_none()
        } else {
            self.last_processed_pk.is_none()
        }
    }

    /// Whether `has_pk` agrees with the stored PK column list.
    pub fn pk_flag_consistent(&self) -> bool {
        self.has_pk == !self.pk_columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> CatalogRow {
        CatalogRow {
            schema_name: "Sales".into(),
            table_name: "orders".into(),
            cluster_name: None,
            db_engine: DbEngine::MariaDb,
            connection_string: "mysql://app@db-01/sales".into(),
            last_sync_time: None,
            last_sync_column: Some("updated_at".into()),
            status: TableStatus::FullLoad,
            last_offset: None,
            last_processed_pk: None,
            pk_strategy: PkStrategy::Pk,
            pk_columns: vec!["id".into()],
            candidate_columns: vec![],
            has_pk: true,
            table_size: 0,
            active: true,
        }
    }

    #[test]
    fn test_engine_round_trip() {
        for engine in DbEngine::ALL {
            assert_eq!(DbEngine::parse(engine.as_str()), Some(engine));
        }
        assert_eq!(DbEngine::parse("Oracle"), None);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TableStatus::Pending,
            TableStatus::FullLoad,
            TableStatus::ListeningChanges,
            TableStatus::Reset,
            TableStatus::NoData,
            TableStatus::Error,
            TableStatus::Skip,
        ] {
            assert_eq!(TableStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TableStatus::parse("RUNNING"), None);
    }

    #[test]
    fn test_strategy_round_trip() {
        for strategy in [PkStrategy::Pk, PkStrategy::TemporalPk, PkStrategy::Offset] {
            assert_eq!(PkStrategy::parse(strategy.as_str()), Some(strategy));
        }
    }

    #[test]
    fn test_classify_pk_wins() {
        let strategy = PkStrategy::classify(&["id".into()], &["updated_at".into()]);
        assert_eq!(strategy, PkStrategy::Pk);
    }

    #[test]
    fn test_classify_temporal_without_pk() {
        let strategy = PkStrategy::classify(&[], &["updated_at".into()]);
        assert_eq!(strategy, PkStrategy::TemporalPk);
    }

    #[test]
    fn test_classify_offset_fallback() {
        assert_eq!(PkStrategy::classify(&[], &[]), PkStrategy::Offset);
    }

    #[test]
    fn test_cursor_shapes() {
        let mut row = sample_row();
        row.last_processed_pk = Some("42".into());
        assert_eq!(row.cursor(), ChunkCursor::Pk(Some("42".into())));

        row.pk_strategy = PkStrategy::Offset;
        row.last_processed_pk = None;
        row.last_offset = Some(500);
        assert_eq!(row.cursor(), ChunkCursor::Offset(500));
    }

    #[test]
    fn test_progress_consistency() {
        let mut row = sample_row();
        assert!(row.progress_consistent());

        // PK strategy must not carry an offset.
        row.last_offset = Some(10);
        assert!(!row.progress_consistent());

        // OFFSET strategy must not carry a PK cursor.
        row.pk_strategy = PkStrategy::Offset;
        row.last_offset = Some(10);
        row.last_processed_pk = Some("7".into());
        assert!(!row.progress_consistent());
        row.last_processed_pk = None;
        assert!(row.progress_consistent());
    }

    #[test]
    fn test_pk_flag_consistency() {
        let mut row = sample_row();
        assert!(row.pk_flag_consistent());
        row.pk_columns.clear();
        assert!(!row.pk_flag_consistent());
    }

    #[test]
    fn test_progress_is_zero() {
        let mut row = sample_row();
        assert!(row.progress_is_zero());
        row.last_offset = Some(0);
        assert!(row.progress_is_zero());
        row.last_processed_pk = Some("3".into());
        assert!(!row.progress_is_zero());
    }

    #[test]
    fn test_target_schema_lowercased() {
        assert_eq!(sample_row().target_schema(), "sales");
    }

    #[test]
    fn test_row_chunk_helpers() {
        let mut chunk = RowChunk::new(vec!["ID".into(), "name".into()]);
        chunk.rows.push(vec![Some("1".into()), Some("a".into())]);
        chunk.rows.push(vec![Some("2".into()), None]);

        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk.column_index("id"), Some(0));
        assert_eq!(chunk.last_value_of("id"), Some("2".into()));
        assert_eq!(chunk.last_value_of("name"), None);
        assert_eq!(chunk.last_value_of("missing"), None);
    }

    #[test]
    fn test_column_spec_cursor_candidates() {
        let ts = ColumnSpec {
            name: "updated_at".into(),
            data_type: "timestamp".into(),
            nullable: true,
            key: String::new(),
            extra: String::new(),
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
        };
        assert!(ts.is_cursor_candidate());

        let serial = ColumnSpec {
            name: "seq".into(),
            data_type: "bigint".into(),
            nullable: false,
            key: String::new(),
            extra: "auto_increment".into(),
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
        };
        assert!(serial.is_cursor_candidate());

        let plain = ColumnSpec {
            name: "name".into(),
            data_type: "varchar".into(),
            nullable: true,
            key: String::new(),
            extra: String::new(),
            max_length: Some(50),
            numeric_precision: None,
            numeric_scale: None,
        };
        assert!(!plain.is_cursor_candidate());
    }
}
