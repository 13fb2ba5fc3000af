//! The PostgreSQL target writer.
//!
//! All mirrored data lands through this type: idempotent DDL, truncation,
//! bulk upsert/insert with sub-batch fault recovery, PK-set deletes, and
//! the row-level compare/update surface used by the incremental branch.
//!
//! Values are normalized and then bound with a per-column cast; they are
//! never concatenated into statement text. Identifier handling lives in
//! [`crate::sqlgen`].

use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, warn};

use tributary_core::defaults::{
    ABORT_RETRY_CAP, STATEMENT_TIMEOUT_SECS, SUB_BATCH_CAP, SYNTAX_RETRY_CAP,
};
use tributary_core::{normalize, Error, Normalized, PkTuple, Result};

use crate::errors::WriteErrorKind;
use crate::sqlgen::{
    conflict_clause, create_schema_sql, create_table_sql, drop_table_sql, insert_head, qualified,
    quote_ident, text_select_list, truncate_sql,
};

/// PostgreSQL keeps bind parameters in a u16; stay well under it.
const BIND_BUDGET: usize = 60_000;

/// Writer over the target pool.
#[derive(Clone)]
pub struct TargetWriter {
    pool: PgPool,
}

/// Append one row's normalized values to a statement being built.
fn push_row_values(
    separated: &mut sqlx::query_builder::Separated<'_, '_, Postgres, &'static str>,
    row: &[Option<String>],
    pg_types: &[String],
) {
    for (cell, ty) in row.iter().zip(pg_types.iter()) {
        match normalize(cell.as_deref(), ty) {
            Normalized::Text(text) => {
                separated.push_bind(text);
                separated.push_unseparated(format!("::{ty}"));
            }
            Normalized::Null => {
                separated.push("NULL");
            }
            Normalized::Default => {
                separated.push("DEFAULT");
            }
        }
    }
}

/// Build one INSERT/UPSERT statement for the given rows. Rows whose width
/// disagrees with the column list are dropped. Returns `None` when nothing
/// valid remains.
fn build_statement(
    head: &str,
    conflict: Option<&str>,
    rows: &[Vec<Option<String>>],
    pg_types: &[String],
) -> Option<QueryBuilder<'static, Postgres>> {
    let valid: Vec<&Vec<Option<String>>> = rows
        .iter()
        .filter(|row| row.len() == pg_types.len())
        .collect();
    if valid.is_empty() {
        return None;
    }

    let mut builder = QueryBuilder::new(head.to_string());
    builder.push_values(valid, |mut separated, row| {
        push_row_values(&mut separated, row, pg_types);
    });
    if let Some(clause) = conflict {
        builder.push(clause.to_string());
    }
    Some(builder)
}

/// Rows per statement: the sub-batch rule bounded by the bind budget.
fn rows_per_statement(chunk_size: u64, column_count: usize) -> usize {
    tributary_core::defaults::sub_batch_size(chunk_size)
        .min(BIND_BUDGET / column_count.max(1))
        .max(1)
}

impl TargetWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a write transaction with the statement timeout applied.
    async fn begin_write_tx(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        sqlx::query(&format!(
            "SET statement_timeout = '{STATEMENT_TIMEOUT_SECS}s'"
        ))
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        Ok(tx)
    }

    /// `CREATE SCHEMA IF NOT EXISTS`.
    pub async fn ensure_schema(&self, schema: &str) -> Result<()> {
        sqlx::query(&create_schema_sql(schema))
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// `CREATE TABLE IF NOT EXISTS` from the source column specs.
    pub async fn ensure_table(
        &self,
        schema: &str,
        table: &str,
        columns: &[tributary_core::ColumnSpec],
    ) -> Result<()> {
        if columns.is_empty() {
            return Err(Error::Schema(format!(
                "no columns described for {schema}.{table}"
            )));
        }
        sqlx::query(&create_table_sql(schema, table, columns))
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    pub async fn truncate(&self, schema: &str, table: &str) -> Result<()> {
        sqlx::query(&truncate_sql(schema, table))
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    pub async fn drop_table(&self, schema: &str, table: &str) -> Result<()> {
        sqlx::query(&drop_table_sql(schema, table))
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    pub async fn count(&self, schema: &str, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", qualified(schema, table));
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count.max(0) as u64)
    }

    /// Number of columns on the target table (schema-consistency checks).
    pub async fn column_count(&self, schema: &str, table: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(schema.to_lowercase())
        .bind(table.to_lowercase())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count.max(0) as u64)
    }

    /// The target table's actual PK columns, re-read from the catalog
    /// (never trusted from `metadata.catalog`).
    pub async fn primary_key_columns(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT kcu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
             ON tc.constraint_name = kcu.constraint_name \
             AND tc.table_schema = kcu.table_schema \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
             AND tc.table_schema = $1 AND tc.table_name = $2 \
             ORDER BY kcu.ordinal_position",
        )
        .bind(schema.to_lowercase())
        .bind(table.to_lowercase())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>(0))
            .collect())
    }

    /// Bulk upsert one chunk. Falls back to plain insert when the target
    /// table has no PK. Returns the number of rows applied.
    pub async fn bulk_upsert(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        pg_types: &[String],
        rows: &[Vec<Option<String>>],
        chunk_size: u64,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let pk = self.primary_key_columns(schema, table).await?;
        if pk.is_empty() {
            return self
                .bulk_insert(schema, table, columns, pg_types, rows, chunk_size)
                .await;
        }

        let head = insert_head(schema, table, columns);
        let conflict = conflict_clause(columns, &pk);
        self.write_rows(schema, table, &head, Some(&conflict), pg_types, rows, chunk_size)
            .await
    }

    /// Bulk insert one chunk (no conflict handling).
    pub async fn bulk_insert(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        pg_types: &[String],
        rows: &[Vec<Option<String>>],
        chunk_size: u64,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let head = insert_head(schema, table, columns);
        self.write_rows(schema, table, &head, None, pg_types, rows, chunk_size)
            .await
    }

    /// Sub-batched write with the fault-recovery protocol:
    /// - aborted transaction: roll back, retry rows in fresh transactions
    ///   (capped), continue on a new transaction;
    /// - data/syntax error: retry rows under savepoints in the same
    ///   transaction (capped), skipping offenders;
    /// - anything else: re-raise, aborting the cycle for this table.
    async fn write_rows(
        &self,
        schema: &str,
        table: &str,
        head: &str,
        conflict: Option<&str>,
        pg_types: &[String],
        rows: &[Vec<Option<String>>],
        chunk_size: u64,
    ) -> Result<u64> {
        let per_statement = rows_per_statement(chunk_size, pg_types.len());
        // Rows applied by committed transactions plus per-row recoveries;
        // `pending` tracks the open transaction and is only folded in when
        // that transaction commits.
        let mut applied = 0u64;
        let mut pending = 0u64;
        let mut tx = self.begin_write_tx().await?;

        for batch in rows.chunks(per_statement) {
            let Some(mut builder) = build_statement(head, conflict, batch, pg_types) else {
                continue;
            };

            sqlx::query("SAVEPOINT chunk_batch")
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;

            match builder.build().execute(&mut *tx).await {
                Ok(result) => pending += result.rows_affected(),
                Err(e) => {
                    let kind = WriteErrorKind::classify(&e);
                    warn!(
                        subsystem = "target",
                        component = "writer",
                        schema,
                        table,
                        kind = ?kind,
                        error = %e,
                        "Sub-batch write failed"
                    );
                    let recovered = sqlx::query("ROLLBACK TO SAVEPOINT chunk_batch")
                        .execute(&mut *tx)
                        .await
                        .is_ok();

                    match kind {
                        WriteErrorKind::AbortedTransaction => {
                            // Sub-batches already in this transaction roll
                            // back with it; the bulk loop reconverges next
                            // cycle because upserts are idempotent.
                            let _ = tx.rollback().await;
                            pending = 0;
                            applied += self
                                .retry_rows_fresh(head, conflict, batch, pg_types, ABORT_RETRY_CAP)
                                .await;
                            tx = self.begin_write_tx().await?;
                        }
                        WriteErrorKind::DataSyntax if recovered => {
                            pending += Self::retry_rows_in_tx(
                                &mut tx,
                                head,
                                conflict,
                                batch,
                                pg_types,
                                SYNTAX_RETRY_CAP,
                            )
                            .await?;
                        }
                        WriteErrorKind::DataSyntax => {
                            // The transaction is beyond savepoint recovery;
                            // fall back to fresh per-row transactions.
                            let _ = tx.rollback().await;
                            pending = 0;
                            applied += self
                                .retry_rows_fresh(head, conflict, batch, pg_types, SYNTAX_RETRY_CAP)
                                .await;
                            tx = self.begin_write_tx().await?;
                        }
                        _ => {
                            let _ = tx.rollback().await;
                            return Err(Error::Database(e));
                        }
                    }
                }
            }
        }

        match tx.commit().await {
            Ok(()) => applied += pending,
            Err(e) if WriteErrorKind::classify(&e).commit_swallowable() => {
                warn!(
                    subsystem = "target",
                    component = "writer",
                    schema,
                    table,
                    error = %e,
                    "Skipping commit for aborted transaction"
                );
            }
            Err(e) => return Err(Error::Database(e)),
        }

        Ok(applied)
    }

    /// Per-row retry inside the surviving transaction, each row under its
    /// own savepoint so a failure only skips that row.
    async fn retry_rows_in_tx(
        tx: &mut Transaction<'static, Postgres>,
        head: &str,
        conflict: Option<&str>,
        rows: &[Vec<Option<String>>],
        pg_types: &[String],
        cap: usize,
    ) -> Result<u64> {
        let mut applied = 0u64;
        for (processed, row) in rows.iter().enumerate() {
            if processed >= cap {
                warn!(
                    subsystem = "target",
                    component = "writer",
                    cap,
                    "Hit per-row retry cap for sub-batch; stopping row recovery"
                );
                break;
            }
            let Some(mut builder) =
                build_statement(head, conflict, std::slice::from_ref(row), pg_types)
            else {
                continue;
            };
            sqlx::query("SAVEPOINT row_retry")
                .execute(&mut **tx)
                .await
                .map_err(Error::Database)?;
            match builder.build().execute(&mut **tx).await {
                Ok(result) => applied += result.rows_affected(),
                Err(e) => {
                    debug!(
                        subsystem = "target",
                        component = "writer",
                        error = %e,
                        "Skipping problematic row"
                    );
                    sqlx::query("ROLLBACK TO SAVEPOINT row_retry")
                        .execute(&mut **tx)
                        .await
                        .map_err(Error::Database)?;
                }
            }
        }
        Ok(applied)
    }

    /// Per-row retry in fresh transactions, for when the outer transaction
    /// was aborted. Failures skip the row.
    async fn retry_rows_fresh(
        &self,
        head: &str,
        conflict: Option<&str>,
        rows: &[Vec<Option<String>>],
        pg_types: &[String],
        cap: usize,
    ) -> u64 {
        let mut applied = 0u64;
        for (processed, row) in rows.iter().enumerate() {
            if processed >= cap {
                warn!(
                    subsystem = "target",
                    component = "writer",
                    cap,
                    "Hit per-row retry cap for sub-batch; stopping row recovery"
                );
                break;
            }
            let Some(mut builder) =
                build_statement(head, conflict, std::slice::from_ref(row), pg_types)
            else {
                continue;
            };
            let Ok(mut tx) = self.begin_write_tx().await else {
                break;
            };
            match builder.build().execute(&mut *tx).await {
                Ok(result) => {
                    if tx.commit().await.is_ok() {
                        applied += result.rows_affected();
                    }
                }
                Err(e) => {
                    debug!(
                        subsystem = "target",
                        component = "writer",
                        error = %e,
                        "Skipping problematic row"
                    );
                    let _ = tx.rollback().await;
                }
            }
        }
        applied
    }

    /// Delete target rows by PK tuple, in statements of at most 500 tuples.
    /// Returns the summed affected-row count.
    pub async fn bulk_delete(
        &self,
        schema: &str,
        table: &str,
        pk_columns: &[String],
        keys: &[PkTuple],
    ) -> Result<u64> {
        if keys.is_empty() || pk_columns.is_empty() {
            return Ok(0);
        }

        let mut total = 0u64;
        for batch in keys.chunks(SUB_BATCH_CAP as usize) {
            let mut builder =
                QueryBuilder::<Postgres>::new(format!("DELETE FROM {} WHERE ", qualified(schema, table)));
            for (i, key) in batch.iter().enumerate() {
                if i > 0 {
                    builder.push(" OR ");
                }
                builder.push("(");
                push_pk_predicate(&mut builder, pk_columns, key);
                builder.push(")");
            }
            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            total += result.rows_affected();
        }
        Ok(total)
    }

    /// Page the target's PK values: `LIMIT chunk_size OFFSET page * chunk_size`.
    pub async fn pk_page(
        &self,
        schema: &str,
        table: &str,
        pk_columns: &[String],
        page: u64,
        chunk_size: u64,
    ) -> Result<Vec<PkTuple>> {
        let sql = format!(
            "SELECT {} FROM {} LIMIT {chunk_size} OFFSET {}",
            text_select_list(pk_columns),
            qualified(schema, table),
            page * chunk_size
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            let mut key = Vec::with_capacity(pk_columns.len());
            for i in 0..pk_columns.len() {
                key.push(row.try_get::<Option<String>, _>(i).map_err(Error::Database)?);
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// Fetch one row by PK, all columns rendered as text.
    pub async fn fetch_row_by_pk(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        pk_columns: &[String],
        key: &PkTuple,
    ) -> Result<Option<Vec<Option<String>>>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM {} WHERE ",
            text_select_list(columns),
            qualified(schema, table)
        ));
        push_pk_predicate(&mut builder, pk_columns, key);

        let row = builder
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut cells = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            cells.push(row.try_get::<Option<String>, _>(i).map_err(Error::Database)?);
        }
        Ok(Some(cells))
    }

    /// Update the given columns of one row identified by PK. Runs as its
    /// own transaction. Returns the affected-row count.
    pub async fn update_row_by_pk(
        &self,
        schema: &str,
        table: &str,
        assignments: &[(String, Normalized, String)],
        pk_columns: &[String],
        key: &PkTuple,
    ) -> Result<u64> {
        if assignments.is_empty() {
            return Ok(0);
        }

        let mut builder =
            QueryBuilder::<Postgres>::new(format!("UPDATE {} SET ", qualified(schema, table)));
        for (i, (column, value, pg_type)) in assignments.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(format!("{} = ", quote_ident(column)));
            match value {
                Normalized::Text(text) => {
                    builder.push_bind(text.clone());
                    builder.push(format!("::{pg_type}"));
                }
                Normalized::Null => {
                    builder.push("NULL");
                }
                Normalized::Default => {
                    builder.push("DEFAULT");
                }
            }
        }
        builder.push(" WHERE ");
        push_pk_predicate(&mut builder, pk_columns, key);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}

/// Push a `("k1"::text = $n AND "k2" IS NULL AND …)` predicate body for one
/// PK tuple. Text comparison keeps tuple members aligned with the target's
/// text-rendered PK pages.
fn push_pk_predicate(
    builder: &mut QueryBuilder<'static, Postgres>,
    pk_columns: &[String],
    key: &PkTuple,
) {
    for (i, (column, component)) in pk_columns.iter().zip(key.iter()).enumerate() {
        if i > 0 {
            builder.push(" AND ");
        }
        match component {
            Some(value) => {
                builder.push(format!("{}::text = ", quote_ident(column)));
                builder.push_bind(value.clone());
            }
            None => {
                builder.push(format!("{} IS NULL", quote_ident(column)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_per_statement_follows_sub_batch_rule() {
        assert_eq!(rows_per_statement(25_000, 3), 500);
        assert_eq!(rows_per_statement(100, 3), 50);
        // The bind budget bounds very wide tables.
        assert_eq!(rows_per_statement(25_000, 200), 300);
        assert_eq!(rows_per_statement(2, 1), 1);
    }

    #[test]
    fn test_build_statement_drops_misshapen_rows() {
        let types = vec!["INTEGER".to_string(), "TEXT".to_string()];
        let rows = vec![
            vec![Some("1".to_string())], // too narrow
            vec![Some("2".to_string()), Some("b".to_string())],
        ];
        let builder = build_statement("INSERT INTO \"s\".\"t\" (\"a\", \"b\") VALUES ", None, &rows, &types);
        let sql = builder.expect("one valid row").sql().to_string();
        // Exactly one tuple of two placeholders.
        assert_eq!(sql.matches('$').count(), 2);
    }

    #[test]
    fn test_build_statement_empty_when_no_valid_rows() {
        let types = vec!["INTEGER".to_string()];
        let rows = vec![vec![Some("1".to_string()), Some("extra".to_string())]];
        assert!(build_statement("INSERT … VALUES ", None, &rows, &types).is_none());
    }

    #[test]
    fn test_build_statement_null_and_default_inline() {
        let types = vec!["TEXT".to_string(), "VARCHAR(5)".to_string()];
        let rows = vec![vec![None, None]];
        let sql = build_statement("INSERT INTO \"s\".\"t\" (\"a\", \"b\") VALUES ", None, &rows, &types)
            .unwrap()
            .sql()
            .to_string();
        // TEXT nulls to NULL, VARCHAR defers to DEFAULT; no binds at all.
        assert!(sql.contains("NULL"));
        assert!(sql.contains("DEFAULT"));
        assert_eq!(sql.matches('$').count(), 0);
    }

    #[test]
    fn test_build_statement_casts_bound_values() {
        let types = vec!["INTEGER".to_string()];
        let rows = vec![vec![Some("5".to_string())]];
        let sql = build_statement("INSERT INTO \"s\".\"t\" (\"a\") VALUES ", None, &rows, &types)
            .unwrap()
            .sql()
            .to_string();
        assert!(sql.contains("$1::INTEGER"), "sql was: {sql}");
    }
}
