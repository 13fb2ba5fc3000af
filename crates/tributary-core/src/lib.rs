//! # tributary-core
//!
//! Core types and pure logic for tributary, the heterogeneous-source
//! replication engine.
//!
//! This crate provides:
//! - The domain model: catalog rows, table statuses, PK strategies, cursors
//! - The value normalizer (source cell → PostgreSQL-safe value)
//! - The source → PostgreSQL type map
//! - Default constants and the structured-logging field schema
//!
//! Everything here is connection-free; the vendor adapters, target writer
//! and catalog store build on these types.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod typemap;

pub use error::{Error, Result};
pub use models::{
    CatalogRow, ChunkCursor, ColumnSpec, DbEngine, PkStrategy, PkTuple, RowChunk, SchemaTable,
    TableStatus,
};
pub use normalize::{normalize, normalize_row, Normalized};
pub use typemap::{pg_type_for, pg_type_for_column, pg_types_for_columns};
