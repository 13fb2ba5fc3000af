//! The catalog repository over `metadata.catalog`.
//!
//! The catalog is both the system of record and the coordination medium:
//! workers communicate exclusively through these rows. All mutations keep
//! the strategy/progress invariant — exactly one of `last_offset` /
//! `last_processed_pk` is populated, matching the row's PK strategy.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use tributary_core::{
    CatalogRow, DbEngine, Error, PkStrategy, Result, SchemaTable, TableStatus,
};

/// Column list shared by every catalog SELECT.
const CATALOG_COLUMNS: &str = "schema_name, table_name, cluster_name, db_engine, \
     connection_string, last_sync_time, last_sync_column, status, last_offset, \
     last_processed_pk, pk_strategy, pk_columns, candidate_columns, has_pk, \
     table_size, active";

/// Serialize a column list for the catalog's JSON-array text columns.
pub fn columns_to_json(columns: &[String]) -> String {
    serde_json::to_string(columns).unwrap_or_else(|_| "[]".to_string())
}

/// Parse a catalog JSON-array text column; malformed input yields empty.
pub fn parse_columns(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.to_lowercase().replace('"', "\"\""))
}

/// A table observed on a source during catalog discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredTable {
    pub schema: String,
    pub table: String,
    pub engine: DbEngine,
    pub connection_string: String,
    pub time_column: Option<String>,
    pub pk_columns: Vec<String>,
    pub candidate_columns: Vec<String>,
    pub pk_strategy: PkStrategy,
    pub has_pk: bool,
    pub table_size: i64,
}

/// Repository over `metadata.catalog`.
#[derive(Clone)]
pub struct CatalogStore {
    pool: PgPool,
}

fn parse_catalog_row(row: &PgRow) -> Option<CatalogRow> {
    let engine: String = row.try_get("db_engine").ok()?;
    let db_engine = DbEngine::parse(&engine)?;

    let status: String = row.try_get("status").ok()?;
    let strategy: String = row.try_get("pk_strategy").ok()?;
    let pk_columns: Option<String> = row.try_get("pk_columns").ok()?;
    let candidate_columns: Option<String> = row.try_get("candidate_columns").ok()?;
    let last_offset: Option<String> = row.try_get("last_offset").ok()?;

    Some(CatalogRow {
        schema_name: row.try_get("schema_name").ok()?,
        table_name: row.try_get("table_name").ok()?,
        cluster_name: row.try_get("cluster_name").ok()?,
        db_engine,
        connection_string: row.try_get("connection_string").ok()?,
        last_sync_time: row.try_get("last_sync_time").ok()?,
        last_sync_column: row.try_get("last_sync_column").ok()?,
        status: TableStatus::parse(&status).unwrap_or(TableStatus::Pending),
        last_offset: last_offset.and_then(|s| s.trim().parse::<i64>().ok()),
        last_processed_pk: row.try_get("last_processed_pk").ok()?,
        pk_strategy: PkStrategy::parse(&strategy).unwrap_or(PkStrategy::Offset),
        pk_columns: parse_columns(pk_columns.as_deref()),
        candidate_columns: parse_columns(candidate_columns.as_deref()),
        has_pk: row.try_get("has_pk").ok()?,
        table_size: row.try_get("table_size").ok()?,
        active: row.try_get("active").ok()?,
    })
}

impl CatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Active rows for one engine, smallest tables first so quick tables
    /// are never starved by big loads.
    pub async fn list_active_by_engine(&self, engine: DbEngine) -> Result<Vec<CatalogRow>> {
        let sql = format!(
            "SELECT {CATALOG_COLUMNS} FROM metadata.catalog \
             WHERE active = true AND db_engine = $1 AND status != 'NO_DATA' \
             ORDER BY table_size ASC, schema_name, table_name"
        );
        let rows = sqlx::query(&sql)
            .bind(engine.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.iter().filter_map(parse_catalog_row).collect())
    }

    pub async fn get(
        &self,
        schema: &str,
        table: &str,
        engine: DbEngine,
    ) -> Result<Option<CatalogRow>> {
        let sql = format!(
            "SELECT {CATALOG_COLUMNS} FROM metadata.catalog \
             WHERE schema_name = $1 AND table_name = $2 AND db_engine = $3"
        );
        let row = sqlx::query(&sql)
            .bind(schema)
            .bind(table)
            .bind(engine.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.as_ref().and_then(parse_catalog_row))
    }

    /// Insert a newly discovered table: `PENDING`, inactive, progress
    /// zeroed. Activation is an operator action.
    pub async fn insert_pending(&self, discovered: &DiscoveredTable) -> Result<()> {
        sqlx::query(
            "INSERT INTO metadata.catalog \
             (schema_name, table_name, cluster_name, db_engine, connection_string, \
              last_sync_time, last_sync_column, status, last_offset, last_processed_pk, \
              pk_strategy, pk_columns, candidate_columns, has_pk, table_size, active) \
             VALUES ($1, $2, NULL, $3, $4, NOW(), $5, 'PENDING', $6, NULL, $7, $8, $9, $10, $11, false)",
        )
        .bind(&discovered.schema)
        .bind(&discovered.table)
        .bind(discovered.engine.as_str())
        .bind(&discovered.connection_string)
        .bind(discovered.time_column.as_deref().unwrap_or(""))
        .bind(if discovered.pk_strategy == PkStrategy::Offset {
            Some("0")
        } else {
            None
        })
        .bind(discovered.pk_strategy.as_str())
        .bind(columns_to_json(&discovered.pk_columns))
        .bind(columns_to_json(&discovered.candidate_columns))
        .bind(discovered.has_pk)
        .bind(discovered.table_size)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Refresh discovery metadata on an existing row. Status and progress
    /// are never touched here.
    pub async fn update_discovered(&self, discovered: &DiscoveredTable) -> Result<()> {
        sqlx::query(
            "UPDATE metadata.catalog SET \
             last_sync_column = $1, pk_columns = $2, pk_strategy = $3, has_pk = $4, \
             candidate_columns = $5, table_size = $6 \
             WHERE schema_name = $7 AND table_name = $8 AND db_engine = $9",
        )
        .bind(discovered.time_column.as_deref().unwrap_or(""))
        .bind(columns_to_json(&discovered.pk_columns))
        .bind(discovered.pk_strategy.as_str())
        .bind(discovered.has_pk)
        .bind(columns_to_json(&discovered.candidate_columns))
        .bind(discovered.table_size)
        .bind(&discovered.schema)
        .bind(&discovered.table)
        .bind(discovered.engine.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Update a row's status and progress, refreshing `last_sync_time` to
    /// `MAX(last_sync_column)` of the target when the column and table
    /// exist, else `NOW()`. Progress lands in the strategy's own field and
    /// the other side is nulled.
    pub async fn update_status(
        &self,
        row: &CatalogRow,
        status: TableStatus,
        progress: u64,
    ) -> Result<()> {
        let sync_time_expr = match row.last_sync_column.as_deref() {
            Some(column) if !column.is_empty() => {
                let target_schema = row.target_schema();
                let target_table = row.table_name.to_lowercase();
                let exists: bool = sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                     WHERE table_schema = $1 AND table_name = $2)",
                )
                .bind(&target_schema)
                .bind(&target_table)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;

                if exists {
                    format!(
                        "(SELECT MAX({})::timestamp FROM {}.{})",
                        quote_ident(column),
                        quote_ident(&target_schema),
                        quote_ident(&target_table)
                    )
                } else {
                    "NOW()".to_string()
                }
            }
            _ => "NOW()".to_string(),
        };

        let progress_assignment = if row.pk_strategy.uses_pk_progress() {
            "last_processed_pk = $2, last_offset = NULL"
        } else {
            "last_offset = $2, last_processed_pk = NULL"
        };

        let sql = format!(
            "UPDATE metadata.catalog SET status = $1, {progress_assignment}, \
             last_sync_time = {sync_time_expr} \
             WHERE schema_name = $3 AND table_name = $4 AND db_engine = $5"
        );
        sqlx::query(&sql)
            .bind(status.as_str())
            .bind(progress.to_string())
            .bind(&row.schema_name)
            .bind(&row.table_name)
            .bind(row.db_engine.as_str())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// Set only the status (error marks and resets).
    pub async fn set_status(
        &self,
        schema: &str,
        table: &str,
        engine: DbEngine,
        status: TableStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE metadata.catalog SET status = $1 \
             WHERE schema_name = $2 AND table_name = $3 AND db_engine = $4",
        )
        .bind(status.as_str())
        .bind(schema)
        .bind(table)
        .bind(engine.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Advance the PK/temporal cursor; keeps `last_offset` null.
    pub async fn update_last_processed_pk(
        &self,
        schema: &str,
        table: &str,
        engine: DbEngine,
        last_pk: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE metadata.catalog SET last_processed_pk = $1, last_offset = NULL \
             WHERE schema_name = $2 AND table_name = $3 AND db_engine = $4",
        )
        .bind(last_pk)
        .bind(schema)
        .bind(table)
        .bind(engine.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Advance the offset cursor; keeps `last_processed_pk` null.
    pub async fn update_last_offset(
        &self,
        schema: &str,
        table: &str,
        engine: DbEngine,
        offset: u64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE metadata.catalog SET last_offset = $1, last_processed_pk = NULL \
             WHERE schema_name = $2 AND table_name = $3 AND db_engine = $4",
        )
        .bind(offset.to_string())
        .bind(schema)
        .bind(table)
        .bind(engine.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Zero progress for a fresh load: offset 0, PK cursor cleared.
    pub async fn reset_progress(
        &self,
        schema: &str,
        table: &str,
        engine: DbEngine,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE metadata.catalog SET last_offset = '0', last_processed_pk = NULL \
             WHERE schema_name = $1 AND table_name = $2 AND db_engine = $3",
        )
        .bind(schema)
        .bind(table)
        .bind(engine.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    pub async fn remove(&self, schema: &str, table: &str, engine: DbEngine) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM metadata.catalog \
             WHERE schema_name = $1 AND table_name = $2 AND db_engine = $3",
        )
        .bind(schema)
        .bind(table)
        .bind(engine.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    /// Distinct connection strings known for one engine.
    pub async fn distinct_connections(
        &self,
        engine: DbEngine,
        active_only: bool,
    ) -> Result<Vec<String>> {
        let sql = if active_only {
            "SELECT DISTINCT connection_string FROM metadata.catalog \
             WHERE db_engine = $1 AND active = true"
        } else {
            "SELECT DISTINCT connection_string FROM metadata.catalog WHERE db_engine = $1"
        };
        let rows = sqlx::query(sql)
            .bind(engine.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
    }

    /// All catalog rows tied to one connection.
    pub async fn list_by_connection(
        &self,
        engine: DbEngine,
        connection_string: &str,
    ) -> Result<Vec<SchemaTable>> {
        let rows = sqlx::query(
            "SELECT schema_name, table_name FROM metadata.catalog \
             WHERE db_engine = $1 AND connection_string = $2",
        )
        .bind(engine.as_str())
        .bind(connection_string)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows
            .into_iter()
            .map(|r| SchemaTable::new(r.get::<String, _>(0), r.get::<String, _>(1)))
            .collect())
    }

    /// Planner row estimate for the mirrored table, for scheduling order.
    pub async fn table_size_estimate(&self, target_schema: &str, table: &str) -> Result<i64> {
        let estimate: Option<i64> = sqlx::query_scalar(
            "SELECT COALESCE(reltuples::bigint, 0) FROM pg_class \
             WHERE relname = $1 AND relnamespace = \
             (SELECT oid FROM pg_namespace WHERE nspname = $2)",
        )
        .bind(table.to_lowercase())
        .bind(target_schema.to_lowercase())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(estimate.unwrap_or(0).max(0))
    }

    /// Remove malformed rows and repair the strategy/progress invariant:
    /// - empty/missing connection strings, unknown engines, empty names
    ///   are deleted;
    /// - a populated progress field that contradicts the strategy is
    ///   nulled, not deleted.
    pub async fn cleanup(&self) -> Result<()> {
        let orphans = sqlx::query(
            "DELETE FROM metadata.catalog \
             WHERE connection_string IS NULL OR connection_string = '' \
             OR db_engine NOT IN ('MariaDB', 'MSSQL', 'MongoDB', 'PostgreSQL') \
             OR schema_name IS NULL OR schema_name = '' \
             OR table_name IS NULL OR table_name = ''",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        if orphans.rows_affected() > 0 {
            info!(
                subsystem = "catalog",
                component = "store",
                op = "cleanup",
                row_count = orphans.rows_affected(),
                "Removed orphaned catalog rows"
            );
        }

        let bad_offsets = sqlx::query(
            "UPDATE metadata.catalog SET last_offset = NULL \
             WHERE pk_strategy IN ('PK', 'TEMPORAL_PK') AND last_offset IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        let bad_cursors = sqlx::query(
            "UPDATE metadata.catalog SET last_processed_pk = NULL \
             WHERE pk_strategy = 'OFFSET' AND last_processed_pk IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        if bad_offsets.rows_affected() > 0 || bad_cursors.rows_affected() > 0 {
            warn!(
                subsystem = "catalog",
                component = "store",
                op = "cleanup",
                cleared_offsets = bad_offsets.rows_affected(),
                cleared_cursors = bad_cursors.rows_affected(),
                "Repaired strategy/progress invariant violations"
            );
        }
        Ok(())
    }

    /// Deactivate NO_DATA rows and normalize inactive rows to SKIP with
    /// zeroed progress.
    pub async fn deactivate_no_data(&self) -> Result<()> {
        let deactivated = sqlx::query(
            "UPDATE metadata.catalog SET active = false \
             WHERE status = 'NO_DATA' AND active = true",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        if deactivated.rows_affected() > 0 {
            info!(
                subsystem = "catalog",
                component = "store",
                op = "deactivate_no_data",
                row_count = deactivated.rows_affected(),
                "Deactivated NO_DATA tables"
            );
        }

        let skipped = sqlx::query(
            "UPDATE metadata.catalog SET status = 'SKIP', \
             last_offset = CASE WHEN pk_strategy = 'OFFSET' THEN '0' ELSE NULL END, \
             last_processed_pk = NULL \
             WHERE active = false AND status NOT IN ('NO_DATA', 'SKIP')",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        if skipped.rows_affected() > 0 {
            info!(
                subsystem = "catalog",
                component = "store",
                op = "deactivate_no_data",
                row_count = skipped.rows_affected(),
                "Marked inactive tables as SKIP with reset progress"
            );
        }
        Ok(())
    }

    /// Connections whose rows still lack a cluster name.
    pub async fn list_missing_cluster(&self) -> Result<Vec<(String, DbEngine)>> {
        let rows = sqlx::query(
            "SELECT DISTINCT connection_string, db_engine FROM metadata.catalog \
             WHERE (cluster_name IS NULL OR cluster_name = '') AND active = true",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let conn: String = r.get(0);
                let engine: String = r.get(1);
                DbEngine::parse(&engine).map(|e| (conn, e))
            })
            .collect())
    }

    /// Stamp a cluster name across every row of one connection.
    pub async fn set_cluster_name(
        &self,
        connection_string: &str,
        engine: DbEngine,
        cluster_name: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE metadata.catalog SET cluster_name = $1 \
             WHERE connection_string = $2 AND db_engine = $3",
        )
        .bind(cluster_name)
        .bind(connection_string)
        .bind(engine.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_json_round_trip() {
        let columns = vec!["id".to_string(), "updated_at".to_string()];
        let json = columns_to_json(&columns);
        assert_eq!(json, "[\"id\",\"updated_at\"]");
        assert_eq!(parse_columns(Some(&json)), columns);
    }

    #[test]
    fn test_columns_json_empty() {
        assert_eq!(columns_to_json(&[]), "[]");
        assert!(parse_columns(Some("[]")).is_empty());
    }

    #[test]
    fn test_parse_columns_malformed() {
        assert!(parse_columns(Some("not json")).is_empty());
        assert!(parse_columns(Some("{\"a\":1}")).is_empty());
        assert!(parse_columns(None).is_empty());
    }

    #[test]
    fn test_quote_ident_lowered() {
        assert_eq!(quote_ident("Updated_At"), "\"updated_at\"");
    }
}
