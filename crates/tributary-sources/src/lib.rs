//! # tributary-sources
//!
//! Read-only source adapters for tributary.
//!
//! One [`adapter::SourceAdapter`] implementation per supported engine:
//! - [`mariadb::MariaDbSource`] — MariaDB/MySQL via `mysql_async`
//! - [`mssql::MssqlSource`] — Microsoft SQL Server via `tiberius`
//! - [`mongodb::MongoSource`] — MongoDB via the official driver
//! - [`postgres::PostgresSource`] — PostgreSQL via `sqlx`
//!
//! All adapters surface cell values as text, which the core normalizer
//! then cleans before the target writer binds them.

pub mod adapter;
pub mod mariadb;
pub mod mongodb;
pub mod mssql;
pub mod postgres;

pub use adapter::{
    candidate_columns_from, open_source, pick_time_column, sub_batch_size, SourceAdapter,
    TIME_COLUMN_PRIORITY,
};
pub use mariadb::MariaDbSource;
pub use mongodb::MongoSource;
pub use mssql::MssqlSource;
pub use postgres::PostgresSource;
