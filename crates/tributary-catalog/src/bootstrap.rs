//! Metadata schema bootstrap.
//!
//! On restart, every table's state is derived entirely from
//! `metadata.catalog`; there are no local files. This module creates the
//! schema, the catalog and config tables, and the default config rows.

use sqlx::PgPool;
use tracing::info;

use tributary_core::defaults::{CHUNK_SIZE, SYNC_INTERVAL_SECS};
use tributary_core::{Error, Result};

const CREATE_CATALOG: &str = "\
CREATE TABLE IF NOT EXISTS metadata.catalog (
    schema_name        text      NOT NULL,
    table_name         text      NOT NULL,
    cluster_name       text,
    db_engine          text      NOT NULL
        CHECK (db_engine IN ('MariaDB', 'MSSQL', 'MongoDB', 'PostgreSQL')),
    connection_string  text      NOT NULL,
    last_sync_time     timestamp,
    last_sync_column   text,
    status             text      NOT NULL
        CHECK (status IN ('PENDING', 'FULL_LOAD', 'LISTENING_CHANGES',
                          'RESET', 'NO_DATA', 'ERROR', 'SKIP')),
    last_offset        text,
    last_processed_pk  text,
    pk_strategy        text      NOT NULL
        CHECK (pk_strategy IN ('PK', 'TEMPORAL_PK', 'OFFSET')),
    pk_columns         text,
    candidate_columns  text,
    has_pk             boolean   NOT NULL,
    table_size         bigint    NOT NULL DEFAULT 0,
    active             boolean   NOT NULL DEFAULT false,
    PRIMARY KEY (schema_name, table_name, db_engine)
)";

const CREATE_CONFIG: &str = "\
CREATE TABLE IF NOT EXISTS metadata.config (
    key    text NOT NULL PRIMARY KEY,
    value  text NOT NULL
)";

/// Create the metadata schema, tables, and default config rows.
pub async fn bootstrap(pool: &PgPool) -> Result<()> {
    sqlx::query("CREATE SCHEMA IF NOT EXISTS metadata")
        .execute(pool)
        .await
        .map_err(Error::Database)?;
    sqlx::query(CREATE_CATALOG)
        .execute(pool)
        .await
        .map_err(Error::Database)?;
    sqlx::query(CREATE_CONFIG)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

    let defaults: [(&str, String); 6] = [
        ("chunk_size", CHUNK_SIZE.to_string()),
        ("sync_interval", SYNC_INTERVAL_SECS.to_string()),
        ("debug_level", "INFO".to_string()),
        ("debug_show_timestamps", "true".to_string()),
        ("debug_show_thread_id", "false".to_string()),
        ("debug_show_file_line", "false".to_string()),
    ];
    for (key, value) in defaults {
        sqlx::query(
            "INSERT INTO metadata.config (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await
        .map_err(Error::Database)?;
    }

    info!(
        subsystem = "catalog",
        component = "bootstrap",
        "Metadata schema ready"
    );
    Ok(())
}
