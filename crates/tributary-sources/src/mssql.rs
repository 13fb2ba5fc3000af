//! Microsoft SQL Server source adapter backed by `tiberius`.
//!
//! All data reads cast to text in the select list, so every cell crosses
//! the wire with text-protocol semantics like the other adapters.

use std::collections::HashSet;

use async_trait::async_trait;
use tiberius::{Client, Config, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

use tributary_core::defaults::SOURCE_SESSION_TIMEOUT_SECS;
use tributary_core::{
    ChunkCursor, ColumnSpec, DbEngine, Error, PkTuple, Result, RowChunk, SchemaTable,
};

use crate::adapter::{sub_batch_size, SourceAdapter};

/// One SQL Server session.
pub struct MssqlSource {
    client: Client<Compat<TcpStream>>,
}

fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn src_err(e: tiberius::error::Error) -> Error {
    match &e {
        tiberius::error::Error::Server(token) => Error::source_with_code(
            DbEngine::Mssql,
            token.code().to_string(),
            token.message().to_string(),
        ),
        _ => Error::source(DbEngine::Mssql, e.to_string()),
    }
}

/// Text-cast expression for one column, by declared type. Temporal types use
/// ODBC canonical style 121, binary and money keep their precision via
/// style 2.
fn text_expr(col: &ColumnSpec) -> String {
    let ident = quote_ident(&col.name);
    match col.data_type.to_ascii_lowercase().as_str() {
        "datetime" | "datetime2" | "smalldatetime" | "date" | "time" | "datetimeoffset" => {
            format!("CONVERT(VARCHAR(40), {ident}, 121)")
        }
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => {
            format!("CONVERT(VARCHAR(MAX), {ident}, 2)")
        }
        "money" | "smallmoney" => format!("CONVERT(VARCHAR(50), {ident}, 2)"),
        "uniqueidentifier" => format!("CONVERT(VARCHAR(36), {ident})"),
        "xml" | "sql_variant" => format!("CONVERT(NVARCHAR(MAX), {ident})"),
        _ => format!("CAST({ident} AS NVARCHAR(MAX))"),
    }
}

fn rows_to_chunk(columns: Vec<String>, rows: Vec<tiberius::Row>) -> Result<RowChunk> {
    let width = columns.len();
    let mut chunk = RowChunk::new(columns);
    for row in rows {
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            let cell: Option<&str> = row.try_get(i).map_err(src_err)?;
            cells.push(cell.map(str::to_string));
        }
        chunk.rows.push(cells);
    }
    Ok(chunk)
}

impl MssqlSource {
    /// Connect via an ADO.NET-style connection string and apply the lock
    /// timeout.
    pub async fn open(connection_string: &str) -> Result<Self> {
        let config = Config::from_ado_string(connection_string)
            .map_err(|e| Error::connection(DbEngine::Mssql, e.to_string()))?;
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| Error::connection(DbEngine::Mssql, e.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|e| Error::connection(DbEngine::Mssql, e.to_string()))?;
        let mut client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| Error::connection(DbEngine::Mssql, e.to_string()))?;

        let timeout_ms = SOURCE_SESSION_TIMEOUT_SECS * 1000;
        if let Err(e) = client
            .execute(format!("SET LOCK_TIMEOUT {timeout_ms}"), &[])
            .await
        {
            warn!(
                subsystem = "sources",
                engine = "MSSQL",
                error = %e,
                "Could not apply lock timeout"
            );
        }

        Ok(Self { client })
    }

    async fn fetch_texts(
        &mut self,
        sql: String,
        params: &[&dyn ToSql],
        columns: Vec<String>,
    ) -> Result<RowChunk> {
        let rows = self
            .client
            .query(sql, params)
            .await
            .map_err(src_err)?
            .into_first_result()
            .await
            .map_err(src_err)?;
        rows_to_chunk(columns, rows)
    }
}

#[async_trait]
impl SourceAdapter for MssqlSource {
    fn engine(&self) -> DbEngine {
        DbEngine::Mssql
    }

    async fn list_tables(&mut self) -> Result<Vec<SchemaTable>> {
        let sql = "SELECT s.name, t.name \
                   FROM sys.tables t \
                   INNER JOIN sys.schemas s ON t.schema_id = s.schema_id \
                   WHERE s.name NOT IN ('INFORMATION_SCHEMA', 'sys', 'guest') \
                   AND t.name NOT LIKE 'spt_%' \
                   AND t.name NOT LIKE 'MS%' \
                   AND t.name NOT LIKE 'sp_%' \
                   AND t.name NOT LIKE 'fn_%' \
                   AND t.name NOT LIKE 'xp_%' \
                   AND t.name NOT LIKE 'dt_%' \
                   ORDER BY s.name, t.name";
        let rows = self
            .client
            .query(sql, &[])
            .await
            .map_err(src_err)?
            .into_first_result()
            .await
            .map_err(src_err)?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let schema: Option<&str> = row.try_get(0).map_err(src_err)?;
            let table: Option<&str> = row.try_get(1).map_err(src_err)?;
            if let (Some(schema), Some(table)) = (schema, table) {
                tables.push(SchemaTable::new(schema, table));
            }
        }
        Ok(tables)
    }

    async fn describe_columns(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnSpec>> {
        let pk: HashSet<String> = self
            .primary_key(schema, table)
            .await?
            .into_iter()
            .collect();

        let sql = "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, \
                   CAST(CHARACTER_MAXIMUM_LENGTH AS INT) AS max_length, \
                   CAST(NUMERIC_PRECISION AS INT) AS num_precision, \
                   CAST(NUMERIC_SCALE AS INT) AS num_scale, \
                   CAST(COLUMNPROPERTY(OBJECT_ID(QUOTENAME(TABLE_SCHEMA) + '.' + QUOTENAME(TABLE_NAME)), COLUMN_NAME, 'IsIdentity') AS INT) AS is_identity \
                   FROM INFORMATION_SCHEMA.COLUMNS \
                   WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2 \
                   ORDER BY ORDINAL_POSITION";
        let rows = self
            .client
            .query(sql, &[&schema, &table])
            .await
            .map_err(src_err)?
            .into_first_result()
            .await
            .map_err(src_err)?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: Option<&str> = row.try_get(0).map_err(src_err)?;
            let data_type: Option<&str> = row.try_get(1).map_err(src_err)?;
            let nullable: Option<&str> = row.try_get(2).map_err(src_err)?;
            let max_length: Option<i32> = row.try_get(3).map_err(src_err)?;
            let precision: Option<i32> = row.try_get(4).map_err(src_err)?;
            let scale: Option<i32> = row.try_get(5).map_err(src_err)?;
            let is_identity: Option<i32> = row.try_get(6).map_err(src_err)?;

            let name = match name {
                Some(n) => n.to_string(),
                None => continue,
            };
            let key = if pk.contains(&name) { "PRI" } else { "" };
            columns.push(ColumnSpec {
                key: key.to_string(),
                extra: if is_identity == Some(1) {
                    "identity".to_string()
                } else {
                    String::new()
                },
                name,
                data_type: data_type.unwrap_or("nvarchar").to_string(),
                nullable: nullable == Some("YES"),
                max_length: max_length.and_then(|n| u32::try_from(n).ok()),
                numeric_precision: precision.and_then(|n| u32::try_from(n).ok()),
                numeric_scale: scale.and_then(|n| u32::try_from(n).ok()),
            });
        }
        Ok(columns)
    }

    async fn primary_key(&mut self, schema: &str, table: &str) -> Result<Vec<String>> {
        let sql = "SELECT c.name \
                   FROM sys.columns c \
                   INNER JOIN sys.tables t ON c.object_id = t.object_id \
                   INNER JOIN sys.schemas s ON t.schema_id = s.schema_id \
                   INNER JOIN sys.index_columns ic ON c.object_id = ic.object_id AND c.column_id = ic.column_id \
                   INNER JOIN sys.indexes i ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
                   WHERE s.name = @P1 AND t.name = @P2 AND i.is_primary_key = 1 \
                   ORDER BY ic.key_ordinal";
        let rows = self
            .client
            .query(sql, &[&schema, &table])
            .await
            .map_err(src_err)?
            .into_first_result()
            .await
            .map_err(src_err)?;

        let mut pk = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(name) = row.try_get::<&str, usize>(0).map_err(src_err)? {
                pk.push(name.to_string());
            }
        }
        Ok(pk)
    }

    async fn count(&mut self, schema: &str, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT_BIG(*) FROM {}", qualified(schema, table));
        let row = self
            .client
            .query(sql, &[])
            .await
            .map_err(src_err)?
            .into_row()
            .await
            .map_err(src_err)?;
        let count = row
            .and_then(|r| r.try_get::<i64, usize>(0).ok().flatten())
            .unwrap_or(0);
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
        let select_list = columns
            .iter()
            .map(text_expr)
            .collect::<Vec<_>>()
            .join(", ");
        let from = qualified(schema, table);

        debug!(
            subsystem = "sources",
            engine = "MSSQL",
            op = "read_chunk",
            schema,
            table,
            "Fetching chunk"
        );

        match cursor {
            ChunkCursor::Pk(last) | ChunkCursor::Temporal(last) => {
                let key = key_column.ok_or_else(|| {
                    Error::Internal("cursor pagination requires a key column".into())
                })?;
                let key = quote_ident(key);
                match last {
                    Some(last) => {
                        let sql = format!(
                            "SELECT {select_list} FROM {from} WHERE {key} > @P1 \
                             ORDER BY {key} OFFSET 0 ROWS FETCH NEXT {chunk_size} ROWS ONLY"
                        );
                        self.fetch_texts(sql, &[&last.as_str()], names).await
                    }
                    None => {
                        let sql = format!(
                            "SELECT {select_list} FROM {from} \
                             ORDER BY {key} OFFSET 0 ROWS FETCH NEXT {chunk_size} ROWS ONLY"
                        );
                        self.fetch_texts(sql, &[], names).await
                    }
                }
            }
            ChunkCursor::Offset(offset) => {
                let sql = format!(
                    "SELECT {select_list} FROM {from} ORDER BY (SELECT NULL) \
                     OFFSET {offset} ROWS FETCH NEXT {chunk_size} ROWS ONLY"
                );
                self.fetch_texts(sql, &[], names).await
            }
        }
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
        let select_list = columns
            .iter()
            .map(text_expr)
            .collect::<Vec<_>>()
            .join(", ");
        let tc = quote_ident(time_column);
        let sql = format!(
            "SELECT {select_list} FROM {} WHERE {tc} > @P1 ORDER BY {tc}",
            qualified(schema, table)
        );
        self.fetch_texts(sql, &[&since], names).await
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
            .map(|c| text_expr_for_key(c))
            .collect::<Vec<_>>()
            .join(", ");

        for batch in keys.chunks(sub_batch_size(chunk_size)) {
            let mut predicates = Vec::with_capacity(batch.len());
            let mut owned: Vec<String> = Vec::new();
            for key in batch {
                let mut parts = Vec::with_capacity(pk_columns.len());
                for (col, component) in pk_columns.iter().zip(key.iter()) {
                    match component {
                        Some(v) => {
                            owned.push(v.clone());
                            parts.push(format!("{} = @P{}", quote_ident(col), owned.len()));
                        }
                        None => parts.push(format!("{} IS NULL", quote_ident(col))),
                    }
                }
                predicates.push(format!("({})", parts.join(" AND ")));
            }
            let sql = format!(
                "SELECT {key_list} FROM {} WHERE {}",
                qualified(schema, table),
                predicates.join(" OR ")
            );
            let params: Vec<&dyn ToSql> = owned.iter().map(|s| s as &dyn ToSql).collect();
            let chunk = self.fetch_texts(sql, &params, pk_columns.to_vec()).await?;
            existing.extend(chunk.rows);
        }

        Ok(existing)
    }

    async fn hostname(&mut self) -> Result<Option<String>> {
        let row = self
            .client
            .query(
                "SELECT CAST(SERVERPROPERTY('MachineName') AS VARCHAR(128))",
                &[],
            )
            .await
            .map_err(src_err)?
            .into_row()
            .await
            .map_err(src_err)?;
        let machine = row.and_then(|r| {
            r.try_get::<&str, usize>(0)
                .ok()
                .flatten()
                .map(str::to_string)
        });
        if machine.is_some() {
            return Ok(machine);
        }

        let row = self
            .client
            .query("SELECT CAST(@@SERVERNAME AS VARCHAR(128))", &[])
            .await
            .map_err(src_err)?
            .into_row()
            .await
            .map_err(src_err)?;
        Ok(row.and_then(|r| {
            r.try_get::<&str, usize>(0)
                .ok()
                .flatten()
                .map(str::to_string)
        }))
    }
}

/// Key columns also cross the wire as text so tuples compare against the
/// target's text representation.
fn text_expr_for_key(column: &str) -> String {
    format!("CAST({} AS NVARCHAR(MAX))", quote_ident(column))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str) -> ColumnSpec {
        ColumnSpec {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            key: String::new(),
            extra: String::new(),
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
        }
    }

    #[test]
    fn test_quote_ident_brackets() {
        assert_eq!(quote_ident("plain"), "[plain]");
        assert_eq!(quote_ident("odd]name"), "[odd]]name]");
    }

    #[test]
    fn test_text_expr_temporal_style() {
        assert_eq!(
            text_expr(&col("created", "datetime2")),
            "CONVERT(VARCHAR(40), [created], 121)"
        );
    }

    #[test]
    fn test_text_expr_binary_hex() {
        assert_eq!(
            text_expr(&col("payload", "varbinary")),
            "CONVERT(VARCHAR(MAX), [payload], 2)"
        );
    }

    #[test]
    fn test_text_expr_plain_cast() {
        assert_eq!(
            text_expr(&col("name", "nvarchar")),
            "CAST([name] AS NVARCHAR(MAX))"
        );
        assert_eq!(text_expr(&col("n", "int")), "CAST([n] AS NVARCHAR(MAX))");
    }
}
