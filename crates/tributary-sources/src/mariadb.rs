//! MariaDB/MySQL source adapter backed by `mysql_async`.

use std::collections::HashSet;

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, Params, Row, Value};
use tracing::{debug, warn};

use tributary_core::defaults::SOURCE_SESSION_TIMEOUT_SECS;
use tributary_core::{
    ChunkCursor, ColumnSpec, DbEngine, Error, PkTuple, Result, RowChunk, SchemaTable,
};

use crate::adapter::{sub_batch_size, SourceAdapter};

/// Schemas that are never replicated.
const SYSTEM_SCHEMAS: [&str; 4] = ["information_schema", "mysql", "performance_schema", "sys"];

/// One MariaDB session.
pub struct MariaDbSource {
    conn: Conn,
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn src_err(e: mysql_async::Error) -> Error {
    match &e {
        mysql_async::Error::Server(server) => Error::source_with_code(
            DbEngine::MariaDb,
            server.state.clone(),
            server.message.clone(),
        ),
        _ => Error::source(DbEngine::MariaDb, e.to_string()),
    }
}

/// Render a driver value as text, the way the text protocol would.
fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Int(n) => Some(n.to_string()),
        Value::UInt(n) => Some(n.to_string()),
        Value::Float(n) => Some(n.to_string()),
        Value::Double(n) => Some(n.to_string()),
        Value::Date(y, mo, d, h, mi, s, us) => {
            if h == 0 && mi == 0 && s == 0 && us == 0 {
                Some(format!("{y:04}-{mo:02}-{d:02}"))
            } else if us == 0 {
                Some(format!("{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}"))
            } else {
                Some(format!(
                    "{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}.{us:06}"
                ))
            }
        }
        Value::Time(neg, days, h, mi, s, us) => {
            let sign = if neg { "-" } else { "" };
            let hours = u32::from(h) + days * 24;
            if us == 0 {
                Some(format!("{sign}{hours:02}:{mi:02}:{s:02}"))
            } else {
                Some(format!("{sign}{hours:02}:{mi:02}:{s:02}.{us:06}"))
            }
        }
    }
}

fn rows_to_chunk(columns: Vec<String>, rows: Vec<Row>) -> RowChunk {
    let mut chunk = RowChunk::new(columns);
    for row in rows {
        chunk
            .rows
            .push(row.unwrap().into_iter().map(value_to_text).collect());
    }
    chunk
}

impl MariaDbSource {
    /// Connect and apply the session wait/lock/net timeouts.
    pub async fn open(connection_string: &str) -> Result<Self> {
        let opts = Opts::from_url(connection_string)
            .map_err(|e| Error::connection(DbEngine::MariaDb, e.to_string()))?;
        let mut conn = Conn::new(opts)
            .await
            .map_err(|e| Error::connection(DbEngine::MariaDb, e.to_string()))?;

        let t = SOURCE_SESSION_TIMEOUT_SECS;
        let timeouts = format!(
            "SET SESSION wait_timeout = {t}, interactive_timeout = {t}, \
             net_read_timeout = {t}, net_write_timeout = {t}, \
             innodb_lock_wait_timeout = {t}, lock_wait_timeout = {t}"
        );
        if let Err(e) = conn.query_drop(timeouts).await {
            warn!(
                subsystem = "sources",
                engine = "MariaDB",
                error = %e,
                "Could not apply session timeouts"
            );
        }

        Ok(Self { conn })
    }

    async fn select_texts(
        &mut self,
        sql: String,
        params: Vec<Value>,
        columns: Vec<String>,
    ) -> Result<RowChunk> {
        let rows: Vec<Row> = if params.is_empty() {
            self.conn.query(sql).await.map_err(src_err)?
        } else {
            self.conn
                .exec(sql, Params::Positional(params))
                .await
                .map_err(src_err)?
        };
        Ok(rows_to_chunk(columns, rows))
    }
}

#[async_trait]
impl SourceAdapter for MariaDbSource {
    fn engine(&self) -> DbEngine {
        DbEngine::MariaDb
    }

    async fn list_tables(&mut self) -> Result<Vec<SchemaTable>> {
        let excluded = SYSTEM_SCHEMAS
            .map(|s| format!("'{s}'"))
            .join(", ");
        let sql = format!(
            "SELECT table_schema, table_name FROM information_schema.tables \
             WHERE table_schema NOT IN ({excluded}) AND table_type = 'BASE TABLE' \
             ORDER BY table_schema, table_name"
        );
        let rows: Vec<(String, String)> = self.conn.query(sql).await.map_err(src_err)?;
        Ok(rows
            .into_iter()
            .map(|(schema, table)| SchemaTable::new(schema, table))
            .collect())
    }

    async fn describe_columns(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnSpec>> {
        type DescribeRow = (
            String,
            String,
            String,
            String,
            String,
            Option<u64>,
            Option<u64>,
            Option<u64>,
        );
        let rows: Vec<DescribeRow> = self
            .conn
            .exec(
                "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_KEY, EXTRA, \
                 CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, NUMERIC_SCALE \
                 FROM information_schema.columns \
                 WHERE table_schema = ? AND table_name = ? \
                 ORDER BY ORDINAL_POSITION",
                (schema, table),
            )
            .await
            .map_err(src_err)?;

        Ok(rows
            .into_iter()
            .map(
                |(name, data_type, nullable, key, extra, max_length, precision, scale)| {
                    ColumnSpec {
                        name,
                        data_type,
                        nullable: nullable == "YES",
                        key,
                        extra,
                        max_length: max_length.and_then(|n| u32::try_from(n).ok()),
                        numeric_precision: precision.and_then(|n| u32::try_from(n).ok()),
                        numeric_scale: scale.and_then(|n| u32::try_from(n).ok()),
                    }
                },
            )
            .collect())
    }

    async fn primary_key(&mut self, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows: Vec<String> = self
            .conn
            .exec(
                "SELECT COLUMN_NAME FROM information_schema.key_column_usage \
                 WHERE table_schema = ? AND table_name = ? \
                 AND constraint_name = 'PRIMARY' \
                 ORDER BY ordinal_position",
                (schema, table),
            )
            .await
            .map_err(src_err)?;
        Ok(rows)
    }

    async fn count(&mut self, schema: &str, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", qualified(schema, table));
        let count: Option<u64> = self.conn.query_first(sql).await.map_err(src_err)?;
        Ok(count.unwrap_or(0))
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
            .map(|n| quote_ident(n))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {select_list} FROM {}", qualified(schema, table));
        let mut params: Vec<Value> = Vec::new();

        match cursor {
            ChunkCursor::Pk(last) | ChunkCursor::Temporal(last) => {
                let key = key_column.ok_or_else(|| {
                    Error::Internal("cursor pagination requires a key column".into())
                })?;
                if let Some(last) = last {
                    sql.push_str(&format!(" WHERE {} > ?", quote_ident(key)));
                    params.push(Value::Bytes(last.clone().into_bytes()));
                }
                sql.push_str(&format!(" ORDER BY {} LIMIT {chunk_size}", quote_ident(key)));
            }
            ChunkCursor::Offset(offset) => {
                sql.push_str(&format!(" LIMIT {chunk_size} OFFSET {offset}"));
            }
        }

        debug!(
            subsystem = "sources",
            engine = "MariaDB",
            op = "read_chunk",
            schema,
            table,
            "Fetching chunk"
        );
        self.select_texts(sql, params, names).await
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
            .map(|n| quote_ident(n))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {select_list} FROM {} WHERE {tc} > ? ORDER BY {tc}",
            qualified(schema, table),
            tc = quote_ident(time_column),
        );
        self.select_texts(sql, vec![Value::Bytes(since.as_bytes().to_vec())], names)
            .await
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
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        for batch in keys.chunks(sub_batch_size(chunk_size)) {
            let mut predicates = Vec::with_capacity(batch.len());
            let mut params: Vec<Value> = Vec::new();
            for key in batch {
                let tuple = pk_columns
                    .iter()
                    .zip(key.iter())
                    .map(|(col, component)| {
                        // Null-safe equality keeps NULL key components matchable.
                        params.push(match component {
                            Some(v) => Value::Bytes(v.clone().into_bytes()),
                            None => Value::NULL,
                        });
                        format!("{} <=> ?", quote_ident(col))
                    })
                    .collect::<Vec<_>>()
                    .join(" AND ");
                predicates.push(format!("({tuple})"));
            }
            let sql = format!(
                "SELECT {key_list} FROM {} WHERE {}",
                qualified(schema, table),
                predicates.join(" OR ")
            );
            let chunk = self
                .select_texts(sql, params, pk_columns.to_vec())
                .await?;
            existing.extend(chunk.rows);
        }

        Ok(existing)
    }

    async fn hostname(&mut self) -> Result<Option<String>> {
        let host: Option<String> = self
            .conn
            .query_first("SELECT @@hostname")
            .await
            .map_err(src_err)?;
        Ok(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_backticks() {
        assert_eq!(quote_ident("plain"), "`plain`");
        assert_eq!(quote_ident("odd`name"), "`odd``name`");
    }

    #[test]
    fn test_value_to_text_scalars() {
        assert_eq!(value_to_text(Value::NULL), None);
        assert_eq!(value_to_text(Value::Int(-5)), Some("-5".into()));
        assert_eq!(value_to_text(Value::UInt(7)), Some("7".into()));
        assert_eq!(
            value_to_text(Value::Bytes(b"hello".to_vec())),
            Some("hello".into())
        );
        assert_eq!(value_to_text(Value::Double(1.5)), Some("1.5".into()));
    }

    #[test]
    fn test_value_to_text_dates() {
        assert_eq!(
            value_to_text(Value::Date(2024, 3, 1, 0, 0, 0, 0)),
            Some("2024-03-01".into())
        );
        assert_eq!(
            value_to_text(Value::Date(2024, 3, 1, 13, 5, 9, 0)),
            Some("2024-03-01 13:05:09".into())
        );
        assert_eq!(
            value_to_text(Value::Time(false, 0, 2, 3, 4, 0)),
            Some("02:03:04".into())
        );
        assert_eq!(
            value_to_text(Value::Time(true, 1, 1, 0, 0, 0)),
            Some("-25:00:00".into())
        );
    }
}
