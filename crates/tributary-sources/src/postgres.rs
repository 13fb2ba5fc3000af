//! PostgreSQL source adapter (PostgreSQL-to-PostgreSQL replication).
//!
//! Every select list casts to `::text` so cells surface with the same
//! text-protocol semantics as the other adapters. Cursor comparisons splice
//! quoted literals (single quotes doubled) so the untyped literal coerces
//! to the cursor column's type server-side.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{Connection, PgConnection, Row};
use tracing::debug;

use tributary_core::defaults::SOURCE_SESSION_TIMEOUT_SECS;
use tributary_core::{
    ChunkCursor, ColumnSpec, DbEngine, Error, PkTuple, Result, RowChunk, SchemaTable,
};

use crate::adapter::{sub_batch_size, SourceAdapter};

/// One PostgreSQL source session.
pub struct PostgresSource {
    conn: PgConnection,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn src_err(e: sqlx::Error) -> Error {
    let code = e
        .as_database_error()
        .and_then(|d| d.code())
        .map(|c| c.to_string());
    match code {
        Some(code) => Error::source_with_code(DbEngine::Postgres, code, e.to_string()),
        None => Error::source(DbEngine::Postgres, e.to_string()),
    }
}

fn rows_to_chunk(columns: Vec<String>, rows: Vec<sqlx::postgres::PgRow>) -> Result<RowChunk> {
    let width = columns.len();
    let mut chunk = RowChunk::new(columns);
    for row in rows {
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            let cell: Option<String> = row.try_get(i).map_err(src_err)?;
            cells.push(cell);
        }
        chunk.rows.push(cells);
    }
    Ok(chunk)
}

impl PostgresSource {
    /// Connect and apply statement/lock timeouts.
    pub async fn open(connection_string: &str) -> Result<Self> {
        let mut conn = PgConnection::connect(connection_string)
            .await
            .map_err(|e| Error::connection(DbEngine::Postgres, e.to_string()))?;

        let t = SOURCE_SESSION_TIMEOUT_SECS;
        sqlx::query(&format!("SET statement_timeout = '{t}s'"))
            .execute(&mut conn)
            .await
            .map_err(src_err)?;
        sqlx::query(&format!("SET lock_timeout = '{t}s'"))
            .execute(&mut conn)
            .await
            .map_err(src_err)?;

        Ok(Self { conn })
    }

    async fn fetch_texts(&mut self, sql: String, columns: Vec<String>) -> Result<RowChunk> {
        let rows = sqlx::query(&sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(src_err)?;
        rows_to_chunk(columns, rows)
    }
}

#[async_trait]
impl SourceAdapter for PostgresSource {
    fn engine(&self) -> DbEngine {
        DbEngine::Postgres
    }

    async fn list_tables(&mut self) -> Result<Vec<SchemaTable>> {
        let rows = sqlx::query(
            "SELECT table_schema, table_name FROM information_schema.tables \
             WHERE table_schema NOT IN ('information_schema', 'pg_catalog') \
             AND table_type = 'BASE TABLE' \
             ORDER BY table_schema, table_name",
        )
        .fetch_all(&mut self.conn)
        .await
        .map_err(src_err)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                SchemaTable::new(
                    row.get::<String, _>(0),
                    row.get::<String, _>(1),
                )
            })
            .collect())
    }

    async fn describe_columns(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnSpec>> {
        let pk: HashSet<String> = self
            .primary_key(schema, table)
            .await?
            .into_iter()
            .collect();

        let rows = sqlx::query(
            "SELECT column_name, data_type, is_nullable, \
             character_maximum_length, numeric_precision::int4, numeric_scale::int4, \
             is_identity, column_default \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&mut self.conn)
        .await
        .map_err(src_err)?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0).map_err(src_err)?;
            let data_type: String = row.try_get(1).map_err(src_err)?;
            let nullable: String = row.try_get(2).map_err(src_err)?;
            let max_length: Option<i32> = row.try_get(3).map_err(src_err)?;
            let precision: Option<i32> = row.try_get(4).map_err(src_err)?;
            let scale: Option<i32> = row.try_get(5).map_err(src_err)?;
            let is_identity: Option<String> = row.try_get(6).map_err(src_err)?;
            let column_default: Option<String> = row.try_get(7).map_err(src_err)?;

            let serial = is_identity.as_deref() == Some("YES")
                || column_default
                    .as_deref()
                    .is_some_and(|d| d.starts_with("nextval"));
            let key = if pk.contains(&name) { "PRI" } else { "" };
            columns.push(ColumnSpec {
                key: key.to_string(),
                extra: if serial {
                    "identity".to_string()
                } else {
                    String::new()
                },
                name,
                data_type,
                nullable: nullable == "YES",
                max_length: max_length.and_then(|n| u32::try_from(n).ok()),
                numeric_precision: precision.and_then(|n| u32::try_from(n).ok()),
                numeric_scale: scale.and_then(|n| u32::try_from(n).ok()),
            });
        }
        Ok(columns)
    }

    async fn primary_key(&mut self, schema: &str, table: &str) -> Result<Vec<String>> {
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
        .bind(schema)
        .bind(table)
        .fetch_all(&mut self.conn)
        .await
        .map_err(src_err)?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>(0))
            .collect())
    }

    async fn count(&mut self, schema: &str, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", qualified(schema, table));
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&mut self.conn)
            .await
            .map_err(src_err)?;
        Ok(count.max(0) as u64)
    }

    async fn read_chunk(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[ColumnSpec],
        cursor: &ChunkCursor,
        key_column: Option<&str>,
        chunk_size: u64,
    ) -> Result<RowChunk> {
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let select_list = names
            .iter()
            .map(|n| format!("{}::text", quote_ident(n)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {select_list} FROM {}", qualified(schema, table));

        match cursor {
            ChunkCursor::Pk(last) | ChunkCursor::Temporal(last) => {
                let key = key_column.ok_or_else(|| {
                    Error::Internal("cursor pagination requires a key column".into())
                })?;
                if let Some(last) = last {
                    sql.push_str(&format!(
                        " WHERE {} > {}",
                        quote_ident(key),
                        quote_literal(last)
                    ));
                }
                sql.push_str(&format!(" ORDER BY {} LIMIT {chunk_size}", quote_ident(key)));
            }
            ChunkCursor::Offset(offset) => {
                sql.push_str(&format!(" LIMIT {chunk_size} OFFSET {offset}"));
            }
        }

        debug!(
            subsystem = "sources",
            engine = "PostgreSQL",
            op = "read_chunk",
            schema,
            table,
            "Fetching chunk"
        );
        self.fetch_texts(sql, names).await
    }

    async fn rows_modified_since(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[ColumnSpec],
        time_column: &str,
        since: &str,
    ) -> Result<RowChunk> {
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let select_list = names
            .iter()
            .map(|n| format!("{}::text", quote_ident(n)))
            .collect::<Vec<_>>()
            .join(", ");
        let tc = quote_ident(time_column);
        let sql = format!(
            "SELECT {select_list} FROM {} WHERE {tc} > {} ORDER BY {tc}",
            qualified(schema, table),
            quote_literal(since)
        );
        self.fetch_texts(sql, names).await
    }

    async fn existing_keys(
        &mut self,
        schema: &str,
        table: &str,
        pk_columns: &[String],
        keys: &[PkTuple],
        chunk_size: u64,
    ) -> Result<HashSet<PkTuple>> {
        let mut existing = HashSet::new();
        if keys.is_empty() || pk_columns.is_empty() {
            return Ok(existing);
        }

        let key_list = pk_columns
            .iter()
            .map(|c| format!("{}::text", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");

        for batch in keys.chunks(sub_batch_size(chunk_size)) {
            let predicates = batch
                .iter()
                .map(|key| {
                    let tuple = pk_columns
                        .iter()
                        .zip(key.iter())
                        .map(|(col, component)| match component {
                            Some(v) => {
                                format!("{} = {}", quote_ident(col), quote_literal(v))
                            }
                            None => format!("{} IS NULL", quote_ident(col)),
                        })
                        .collect::<Vec<_>>()
                        .join(" AND ");
                    format!("({tuple})")
                })
                .collect::<Vec<_>>()
                .join(" OR ");
            let sql = format!(
                "SELECT {key_list} FROM {} WHERE {predicates}",
                qualified(schema, table)
            );
            let chunk = self.fetch_texts(sql, pk_columns.to_vec()).await?;
            existing.extend(chunk.rows);
        }

        Ok(existing)
    }

    async fn hostname(&mut self) -> Result<Option<String>> {
        let host: Option<String> = sqlx::query_scalar("SELECT inet_server_addr()::text")
            .fetch_one(&mut self.conn)
            .await
            .map_err(src_err)?;
        Ok(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_quote_literal_doubles_quotes() {
        assert_eq!(quote_literal("o'clock"), "'o''clock'");
        assert_eq!(quote_literal("plain"), "'plain'");
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(qualified("sales", "orders"), "\"sales\".\"orders\"");
    }
}
