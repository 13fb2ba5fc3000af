//! MongoDB source adapter.
//!
//! Databases map to schemas and collections to tables. Column topology is
//! sampled from the first document of a collection; `_id` is the primary
//! key. Documents and arrays flatten to relaxed extended JSON so they land
//! in JSONB target columns.

use std::collections::HashSet;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::Client;
use tracing::debug;

use tributary_core::{
    ChunkCursor, ColumnSpec, DbEngine, Error, PkTuple, Result, RowChunk, SchemaTable,
};

use crate::adapter::{sub_batch_size, SourceAdapter};

/// Databases that are never replicated.
const SYSTEM_DATABASES: [&str; 3] = ["admin", "local", "config"];

/// One MongoDB client session.
pub struct MongoSource {
    client: Client,
}

fn src_err(e: mongodb::error::Error) -> Error {
    Error::source(DbEngine::MongoDb, e.to_string())
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Declared-type name for a sampled BSON value, fed to the shared type map.
fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::String(_) => "string",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Double(_) => "double",
        Bson::Boolean(_) => "boolean",
        Bson::DateTime(_) => "datetime",
        Bson::ObjectId(_) => "objectid",
        Bson::Document(_) => "document",
        Bson::Array(_) => "array",
        Bson::Decimal128(_) => "decimal",
        Bson::Binary(_) => "binary",
        _ => "string",
    }
}

/// Render one BSON value as text, matching the other adapters' text
/// protocol semantics.
fn bson_to_text(value: &Bson) -> Option<String> {
    match value {
        Bson::Null | Bson::Undefined => None,
        Bson::String(s) => Some(s.clone()),
        Bson::Int32(n) => Some(n.to_string()),
        Bson::Int64(n) => Some(n.to_string()),
        Bson::Double(n) => Some(n.to_string()),
        Bson::Boolean(b) => Some(b.to_string()),
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::DateTime(dt) => Some(dt.to_chrono().format("%Y-%m-%d %H:%M:%S").to_string()),
        Bson::Decimal128(d) => Some(d.to_string()),
        Bson::Binary(bin) => Some(hex_string(&bin.bytes)),
        Bson::Document(_) | Bson::Array(_) => {
            serde_json::to_string(&value.clone().into_relaxed_extjson()).ok()
        }
        other => Some(other.to_string()),
    }
}

/// Interpret a stored cursor/key value for filtering: ObjectId hex when it
/// parses, a datetime when it looks like one, else the raw string.
fn filter_value(raw: &str) -> Bson {
    if let Ok(oid) = ObjectId::parse_str(raw) {
        return Bson::ObjectId(oid);
    }
    if let Ok(ts) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Bson::DateTime(bson::DateTime::from_chrono(ts.and_utc()));
    }
    Bson::String(raw.to_string())
}

fn docs_to_chunk(columns: Vec<String>, docs: Vec<Document>) -> RowChunk {
    let mut chunk = RowChunk::new(columns);
    for doc in docs {
        let cells = chunk
            .columns
            .iter()
            .map(|name| doc.get(name).and_then(bson_to_text))
            .collect();
        chunk.rows.push(cells);
    }
    chunk
}

impl MongoSource {
    /// Connect and confirm reachability with an `admin` ping.
    pub async fn open(connection_string: &str) -> Result<Self> {
        let options = mongodb::options::ClientOptions::parse(connection_string)
            .await
            .map_err(|e| Error::connection(DbEngine::MongoDb, e.to_string()))?;
        let client = Client::with_options(options)
            .map_err(|e| Error::connection(DbEngine::MongoDb, e.to_string()))?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| Error::connection(DbEngine::MongoDb, e.to_string()))?;
        Ok(Self { client })
    }

    fn collection(&self, schema: &str, table: &str) -> mongodb::Collection<Document> {
        self.client.database(schema).collection::<Document>(table)
    }
}

#[async_trait]
impl SourceAdapter for MongoSource {
    fn engine(&self) -> DbEngine {
        DbEngine::MongoDb
    }

    async fn list_tables(&mut self) -> Result<Vec<SchemaTable>> {
        let mut tables = Vec::new();
        let databases = self.client.list_database_names().await.map_err(src_err)?;
        for database in databases {
            if SYSTEM_DATABASES.contains(&database.as_str()) {
                continue;
            }
            let collections = self
                .client
                .database(&database)
                .list_collection_names()
                .await
                .map_err(src_err)?;
            for collection in collections {
                if collection.starts_with("system.") {
                    continue;
                }
                tables.push(SchemaTable::new(database.clone(), collection));
            }
        }
        tables.sort_by(|a, b| (&a.schema, &a.table).cmp(&(&b.schema, &b.table)));
        Ok(tables)
    }

    async fn describe_columns(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnSpec>> {
        let sample = self
            .collection(schema, table)
            .find_one(doc! {})
            .await
            .map_err(src_err)?;

        let Some(doc) = sample else {
            return Ok(Vec::new());
        };

        Ok(doc
            .iter()
            .map(|(name, value)| ColumnSpec {
                name: name.clone(),
                data_type: bson_type_name(value).to_string(),
                nullable: true,
                key: if name == "_id" { "PRI" } else { "" }.to_string(),
                extra: String::new(),
                max_length: None,
                numeric_precision: None,
                numeric_scale: None,
            })
            .collect())
    }

    async fn primary_key(&mut self, _schema: &str, _table: &str) -> Result<Vec<String>> {
        Ok(vec!["_id".to_string()])
    }

    async fn count(&mut self, schema: &str, table: &str) -> Result<u64> {
        self.collection(schema, table)
            .count_documents(doc! {})
            .await
            .map_err(src_err)
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
        let coll = self.collection(schema, table);

        debug!(
            subsystem = "sources",
            engine = "MongoDB",
            op = "read_chunk",
            schema,
            table,
            "Fetching chunk"
        );

        let find = match cursor {
            ChunkCursor::Pk(last) | ChunkCursor::Temporal(last) => {
                let key = key_column.unwrap_or("_id");
                let mut filter = Document::new();
                if let Some(last) = last {
                    filter.insert(key, doc! { "$gt": filter_value(last) });
                }
                let mut sort = Document::new();
                sort.insert(key, 1);
                coll.find(filter).sort(sort).limit(chunk_size as i64)
            }
            ChunkCursor::Offset(offset) => coll
                .find(doc! {})
                .skip(*offset)
                .limit(chunk_size as i64),
        };

        let docs: Vec<Document> = find.await.map_err(src_err)?.try_collect().await.map_err(src_err)?;
        Ok(docs_to_chunk(names, docs))
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
        let mut filter = Document::new();
        filter.insert(time_column, doc! { "$gt": filter_value(since) });
        let mut sort = Document::new();
        sort.insert(time_column, 1);
        let docs: Vec<Document> = self
            .collection(schema, table)
            .find(filter)
            .sort(sort)
            .await
            .map_err(src_err)?
            .try_collect()
            .await
            .map_err(src_err)?;
        Ok(docs_to_chunk(names, docs))
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

        for batch in keys.chunks(sub_batch_size(chunk_size)) {
            let alternatives: Vec<Document> = batch
                .iter()
                .map(|key| {
                    let mut clause = Document::new();
                    for (col, component) in pk_columns.iter().zip(key.iter()) {
                        let value = match component {
                            Some(v) => filter_value(v),
                            None => Bson::Null,
                        };
                        clause.insert(col.clone(), value);
                    }
                    clause
                })
                .collect();

            let docs: Vec<Document> = self
                .collection(schema, table)
                .find(doc! { "$or": alternatives })
                .await
                .map_err(src_err)?
                .try_collect()
                .await
                .map_err(src_err)?;

            for doc in docs {
                let tuple: PkTuple = pk_columns
                    .iter()
                    .map(|col| doc.get(col).and_then(bson_to_text))
                    .collect();
                existing.insert(tuple);
            }
        }

        Ok(existing)
    }

    async fn hostname(&mut self) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bson_to_text_scalars() {
        assert_eq!(bson_to_text(&Bson::Null), None);
        assert_eq!(bson_to_text(&Bson::Int32(3)), Some("3".into()));
        assert_eq!(bson_to_text(&Bson::Int64(-9)), Some("-9".into()));
        assert_eq!(bson_to_text(&Bson::Boolean(true)), Some("true".into()));
        assert_eq!(
            bson_to_text(&Bson::String("abc".into())),
            Some("abc".into())
        );
    }

    #[test]
    fn test_bson_to_text_object_id() {
        let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
        assert_eq!(
            bson_to_text(&Bson::ObjectId(oid)),
            Some("507f1f77bcf86cd799439011".into())
        );
    }

    #[test]
    fn test_bson_to_text_document_is_json() {
        let doc = doc! { "a": 1 };
        let text = bson_to_text(&Bson::Document(doc)).unwrap();
        assert!(text.contains("\"a\""));
    }

    #[test]
    fn test_bson_type_names() {
        assert_eq!(bson_type_name(&Bson::Int64(1)), "long");
        assert_eq!(bson_type_name(&Bson::Document(Document::new())), "document");
        assert_eq!(bson_type_name(&Bson::Boolean(false)), "boolean");
    }

    #[test]
    fn test_filter_value_object_id_round_trip() {
        let raw = "507f1f77bcf86cd799439011";
        match filter_value(raw) {
            Bson::ObjectId(oid) => assert_eq!(oid.to_hex(), raw),
            other => panic!("expected ObjectId, got {other:?}"),
        }
    }

    #[test]
    fn test_filter_value_datetime() {
        match filter_value("2024-03-01 10:00:00") {
            Bson::DateTime(_) => {}
            other => panic!("expected DateTime, got {other:?}"),
        }
    }

    #[test]
    fn test_filter_value_plain_string() {
        assert_eq!(filter_value("abc"), Bson::String("abc".into()));
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0xde, 0xad]), "dead");
    }
}
