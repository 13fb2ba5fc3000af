//! # tributary-target
//!
//! PostgreSQL-facing write layer for tributary.
//!
//! This crate provides:
//! - Connection pool management for the target database
//! - Idempotent schema/table DDL with the shared type map
//! - Bulk upsert/insert with sub-batch fault recovery
//! - PK-set deletes and the row compare/update surface
//! - Structured classification of write failures

pub mod errors;
pub mod pool;
pub mod sqlgen;
pub mod writer;

pub use errors::WriteErrorKind;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use sqlgen::{qualified, quote_ident};
pub use writer::TargetWriter;
