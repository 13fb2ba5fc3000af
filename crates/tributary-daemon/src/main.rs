//! tributary — continuous heterogeneous-source replication into PostgreSQL.
//!
//! The daemon wires the pieces together: target pool, metadata bootstrap,
//! configuration, tracing, and the three long-running workers (catalog
//! sync, replication, maintenance). Shutdown is a ctrl-c that flips the
//! shared stop signal; in-flight chunks run to completion before workers
//! exit.

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use tributary_catalog::{normalize_level, SyncSettings};
use tributary_engine::{
    initialize, CatalogSyncWorker, EngineContext, MaintenanceWorker, ReplicationWorker,
};
use tributary_target::create_pool;

/// Target connection string: `DATABASE_URL`, or assembled from the
/// conventional `PG*` parts.
fn database_url() -> anyhow::Result<String> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        return Ok(url);
    }
    let host = std::env::var("PGHOST").context("set DATABASE_URL or PGHOST")?;
    let port = std::env::var("PGPORT").unwrap_or_else(|_| "5432".to_string());
    let database = std::env::var("PGDATABASE").context("set DATABASE_URL or PGDATABASE")?;
    let user = std::env::var("PGUSER").context("set DATABASE_URL or PGUSER")?;
    let password = std::env::var("PGPASSWORD").unwrap_or_default();
    Ok(format!(
        "postgres://{user}:{password}@{host}:{port}/{database}"
    ))
}

/// Install the global subscriber from the config snapshot. `RUST_LOG`
/// overrides the stored `debug_level`; `LOG_DIR` switches output to a
/// daily-rotated file.
fn init_tracing(settings: &SyncSettings) -> Option<WorkerGuard> {
    let level = normalize_level(&settings.debug_level).unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(settings.show_thread_id)
        .with_file(settings.show_file_line)
        .with_line_number(settings.show_file_line);

    match std::env::var("LOG_DIR").ok() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tributary.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let builder = builder.with_writer(writer).with_ansi(false);
            if settings.show_timestamps {
                builder.init();
            } else {
                builder.without_time().init();
            }
            Some(guard)
        }
        None => {
            if settings.show_timestamps {
                builder.init();
            } else {
                builder.without_time().init();
            }
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let url = database_url()?;
    let pool = create_pool(&url)
        .await
        .context("cannot open target database")?;

    let ctx = EngineContext::new(pool);
    initialize(&ctx)
        .await
        .context("metadata bootstrap failed")?;

    let _log_guard = init_tracing(&ctx.config.snapshot());
    info!(
        subsystem = "daemon",
        version = env!("CARGO_PKG_VERSION"),
        "tributary starting"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let catalog_worker = CatalogSyncWorker::new(ctx.clone(), stop_rx.clone()).start();
    let replication_worker = ReplicationWorker::new(ctx.clone(), stop_rx.clone()).start();
    let maintenance_worker = MaintenanceWorker::new(ctx, stop_rx).start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!(subsystem = "daemon", "Shutdown requested; stopping workers");
    let _ = stop_tx.send(true);

    let _ = catalog_worker.await;
    let _ = replication_worker.await;
    let _ = maintenance_worker.await;

    info!(subsystem = "daemon", "tributary stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_url_prefers_env_url() {
        std::env::set_var("DATABASE_URL", "postgres://u:p@h:5432/d");
        assert_eq!(database_url().unwrap(), "postgres://u:p@h:5432/d");
        std::env::remove_var("DATABASE_URL");
    }
}
