//! The source adapter capability set.
//!
//! Every vendor adapter exposes the same read-only surface: discovery,
//! column description, key/time-column detection, counting, cursor-shaped
//! chunk reads, change reads, and a batched existence probe for deletion
//! reconciliation. The table synchronizer is written against this trait
//! only; per-engine differences collapse into the four implementations.

use std::collections::HashSet;

use async_trait::async_trait;

use tributary_core::{
    ChunkCursor, ColumnSpec, DbEngine, Error, PkTuple, Result, RowChunk, SchemaTable,
};

/// Time-column candidates, most-preferred first.
pub const TIME_COLUMN_PRIORITY: [&str; 7] = [
    "updated_at",
    "modified_at",
    "last_modified",
    "updated_time",
    "created_at",
    "created_time",
    "timestamp",
];

/// Choose the incremental-detection column from a described column list:
/// the priority names first, then any `*_at` suffix or `fecha_*` prefix.
pub fn pick_time_column(columns: &[ColumnSpec]) -> Option<String> {
    for name in TIME_COLUMN_PRIORITY {
        if let Some(col) = columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)) {
            return Some(col.name.clone());
        }
    }
    columns
        .iter()
        .find(|c| {
            let n = c.name.to_ascii_lowercase();
            n.ends_with("_at") || n.starts_with("fecha_")
        })
        .map(|c| c.name.clone())
}

/// Non-PK columns usable as monotonic cursors, in ordinal order.
pub fn candidate_columns_from(columns: &[ColumnSpec]) -> Vec<String> {
    columns
        .iter()
        .filter(|c| !c.is_primary() && c.is_cursor_candidate())
        .map(|c| c.name.clone())
        .collect()
}

pub use tributary_core::defaults::sub_batch_size;

/// Read-only, per-vendor source surface.
///
/// Methods take `&mut self`: each adapter owns a single session, mirroring
/// the one-connection-per-table discipline of the synchronizer.
#[async_trait]
pub trait SourceAdapter: Send {
    /// Which engine this adapter talks to.
    fn engine(&self) -> DbEngine;

    /// All replicable tables, excluding system schemas.
    async fn list_tables(&mut self) -> Result<Vec<SchemaTable>>;

    /// Column descriptions in source ordinal order.
    async fn describe_columns(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnSpec>>;

    /// Primary-key column names in key-ordinal order; empty without a PK.
    async fn primary_key(&mut self, schema: &str, table: &str) -> Result<Vec<String>>;

    /// The column used as the incremental high-water mark, if any.
    async fn time_column(&mut self, schema: &str, table: &str) -> Result<Option<String>> {
        let columns = self.describe_columns(schema, table).await?;
        Ok(pick_time_column(&columns))
    }

    /// Non-PK monotonic cursor candidates.
    async fn candidate_columns(&mut self, schema: &str, table: &str) -> Result<Vec<String>> {
        let columns = self.describe_columns(schema, table).await?;
        Ok(candidate_columns_from(&columns))
    }

    /// Source row count.
    async fn count(&mut self, schema: &str, table: &str) -> Result<u64>;

    /// Read one chunk at the cursor. `key_column` names the cursor column
    /// for the PK/temporal shapes and is ignored for offset pagination.
    /// Rows come back ordered by the cursor column ascending.
    async fn read_chunk(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[ColumnSpec],
        cursor: &ChunkCursor,
        key_column: Option<&str>,
        chunk_size: u64,
    ) -> Result<RowChunk>;

    /// Rows whose `time_column` exceeds `since`, ordered by that column.
    async fn rows_modified_since(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[ColumnSpec],
        time_column: &str,
        since: &str,
    ) -> Result<RowChunk>;

    /// The subset of `keys` that still exists on the source. Queries run in
    /// sub-batches of `min(chunk_size / 2, 500)` to bound statement length.
    async fn existing_keys(
        &mut self,
        schema: &str,
        table: &str,
        pk_columns: &[String],
        keys: &[PkTuple],
        chunk_size: u64,
    ) -> Result<HashSet<PkTuple>>;

    /// The source server's own hostname, when the engine can report one.
    async fn hostname(&mut self) -> Result<Option<String>>;
}

/// Open a source session for the given engine. The connection string is
/// opaque here and handed to the vendor driver as-is.
pub async fn open_source(
    engine: DbEngine,
    connection_string: &str,
) -> Result<Box<dyn SourceAdapter>> {
    if connection_string.trim().is_empty() {
        return Err(Error::Config(format!(
            "empty connection string for {engine} source"
        )));
    }
    match engine {
        DbEngine::MariaDb => Ok(Box::new(
            crate::mariadb::MariaDbSource::open(connection_string).await?,
        )),
        DbEngine::Mssql => Ok(Box::new(
            crate::mssql::MssqlSource::open(connection_string).await?,
        )),
        DbEngine::MongoDb => Ok(Box::new(
            crate::mongodb::MongoSource::open(connection_string).await?,
        )),
        DbEngine::Postgres => Ok(Box::new(
            crate::postgres::PostgresSource::open(connection_string).await?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str, key: &str, extra: &str) -> ColumnSpec {
        ColumnSpec {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            key: key.into(),
            extra: extra.into(),
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
        }
    }

    #[test]
    fn test_time_column_priority_order() {
        let columns = vec![
            col("created_at", "timestamp", "", ""),
            col("updated_at", "timestamp", "", ""),
        ];
        // updated_at outranks created_at regardless of ordinal position.
        assert_eq!(pick_time_column(&columns), Some("updated_at".into()));
    }

    #[test]
    fn test_time_column_suffix_fallback() {
        let columns = vec![
            col("name", "varchar", "", ""),
            col("archived_at", "timestamp", "", ""),
        ];
        assert_eq!(pick_time_column(&columns), Some("archived_at".into()));
    }

    #[test]
    fn test_time_column_fecha_prefix() {
        let columns = vec![col("fecha_registro", "datetime", "", "")];
        assert_eq!(pick_time_column(&columns), Some("fecha_registro".into()));
    }

    #[test]
    fn test_time_column_none() {
        let columns = vec![col("name", "varchar", "", "")];
        assert_eq!(pick_time_column(&columns), None);
    }

    #[test]
    fn test_candidate_columns_exclude_pk() {
        let columns = vec![
            col("id", "int", "PRI", "auto_increment"),
            col("updated_at", "timestamp", "", ""),
            col("seq", "bigint", "", "auto_increment"),
            col("name", "varchar", "", ""),
        ];
        assert_eq!(
            candidate_columns_from(&columns),
            vec!["updated_at".to_string(), "seq".to_string()]
        );
    }

    #[test]
    fn test_sub_batch_size() {
        assert_eq!(sub_batch_size(25_000), 500);
        assert_eq!(sub_batch_size(100), 50);
        assert_eq!(sub_batch_size(1), 1);
        assert_eq!(sub_batch_size(0), 1);
    }
}
