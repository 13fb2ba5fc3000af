//! Worker loops: replication, catalog sync, and maintenance.
//!
//! Each worker is a spawned task pacing itself with
//! `max(5, sync_interval / 4)` seconds between cycles and waking early on
//! the shared stop signal. Workers coordinate exclusively through the
//! catalog; none of them share connections.

use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

use tributary_catalog::{cycle_sleep_secs, CatalogStore, SharedConfig};
use tributary_core::{DbEngine, Result};
use tributary_target::TargetWriter;

use crate::catalog_sync::CatalogSynchronizer;
use crate::consistency::ConsistencyChecker;
use crate::table_sync::TableSynchronizer;

/// Shared handles threaded through every worker: the catalog store, the
/// target writer, and the process-wide configuration snapshot.
#[derive(Clone)]
pub struct EngineContext {
    pub store: CatalogStore,
    pub writer: TargetWriter,
    pub config: SharedConfig,
}

impl EngineContext {
    pub fn new(pool: PgPool) -> Self {
        Self {
            store: CatalogStore::new(pool.clone()),
            writer: TargetWriter::new(pool),
            config: SharedConfig::new(),
        }
    }
}

/// One-shot initialization: metadata bootstrap plus the first config load.
pub async fn initialize(ctx: &EngineContext) -> Result<()> {
    tributary_catalog::bootstrap(ctx.store.pool()).await?;
    ctx.config.refresh(ctx.store.pool()).await?;
    Ok(())
}

/// The replication worker: per cycle, enumerate each engine's active rows
/// (smallest first) and run the table synchronizer over them sequentially.
pub struct ReplicationWorker {
    ctx: EngineContext,
    stop: watch::Receiver<bool>,
}

impl ReplicationWorker {
    pub fn new(ctx: EngineContext, stop: watch::Receiver<bool>) -> Self {
        Self { ctx, stop }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(
            subsystem = "engine",
            component = "worker",
            op = "replication",
            "Replication worker started"
        );

        while !*self.stop.borrow() {
            let cycle_start = Instant::now();

            if let Err(e) = self.ctx.config.refresh(self.ctx.store.pool()).await {
                error!(
                    subsystem = "engine",
                    component = "worker",
                    error = %e,
                    "Could not refresh configuration; using current snapshot"
                );
            }

            for engine in DbEngine::ALL {
                if *self.stop.borrow() {
                    break;
                }

                let rows = match self.ctx.store.list_active_by_engine(engine).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        // Catalog unreachable is process-level: end the
                        // cycle and sleep.
                        error!(
                            subsystem = "engine",
                            component = "worker",
                            engine = %engine,
                            error = %e,
                            "Cannot read catalog; ending cycle"
                        );
                        break;
                    }
                };
                if rows.is_empty() {
                    continue;
                }

                info!(
                    subsystem = "engine",
                    component = "worker",
                    engine = %engine,
                    row_count = rows.len(),
                    "Starting transfer cycle"
                );

                let synchronizer = TableSynchronizer::new(
                    self.ctx.store.clone(),
                    self.ctx.writer.clone(),
                    self.ctx.config.clone(),
                    self.stop.clone(),
                );
                for row in rows {
                    if *self.stop.borrow() {
                        break;
                    }
                    // One table's failure never cascades.
                    if let Err(e) = synchronizer.sync_table(&row).await {
                        error!(
                            subsystem = "engine",
                            component = "worker",
                            engine = %engine,
                            schema = %row.schema_name,
                            table = %row.table_name,
                            error = %e,
                            "Table cycle failed"
                        );
                    }
                }
            }

            info!(
                subsystem = "engine",
                component = "worker",
                op = "replication",
                duration_ms = cycle_start.elapsed().as_millis() as u64,
                "Transfer cycle finished"
            );

            self.pause().await;
        }

        info!(
            subsystem = "engine",
            component = "worker",
            op = "replication",
            "Replication worker stopped"
        );
    }

    async fn pause(&mut self) {
        let secs = cycle_sleep_secs(self.ctx.config.sync_interval_secs());
        tokio::select! {
            _ = self.stop.changed() => {}
            _ = sleep(Duration::from_secs(secs)) => {}
        }
    }
}

/// The catalog-sync worker: discovery per engine, then cluster names.
pub struct CatalogSyncWorker {
    ctx: EngineContext,
    stop: watch::Receiver<bool>,
}

impl CatalogSyncWorker {
    pub fn new(ctx: EngineContext, stop: watch::Receiver<bool>) -> Self {
        Self { ctx, stop }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(
            subsystem = "engine",
            component = "worker",
            op = "catalog_sync",
            "Catalog sync worker started"
        );

        let synchronizer = CatalogSynchronizer::new(self.ctx.store.clone());
        while !*self.stop.borrow() {
            for engine in DbEngine::ALL {
                if *self.stop.borrow() {
                    break;
                }
                if let Err(e) = synchronizer.sync_engine(engine).await {
                    error!(
                        subsystem = "engine",
                        component = "worker",
                        engine = %engine,
                        error = %e,
                        "Catalog sync failed"
                    );
                }
            }
            if let Err(e) = synchronizer.refresh_cluster_names().await {
                error!(
                    subsystem = "engine",
                    component = "worker",
                    error = %e,
                    "Cluster name refresh failed"
                );
            }

            let secs = cycle_sleep_secs(self.ctx.config.sync_interval_secs());
            tokio::select! {
                _ = self.stop.changed() => {}
                _ = sleep(Duration::from_secs(secs)) => {}
            }
        }

        info!(
            subsystem = "engine",
            component = "worker",
            op = "catalog_sync",
            "Catalog sync worker stopped"
        );
    }
}

/// The maintenance worker: catalog cleanup, NO_DATA deactivation, schema
/// validation, and config reload, every cycle.
pub struct MaintenanceWorker {
    ctx: EngineContext,
    stop: watch::Receiver<bool>,
}

impl MaintenanceWorker {
    pub fn new(ctx: EngineContext, stop: watch::Receiver<bool>) -> Self {
        Self { ctx, stop }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(
            subsystem = "engine",
            component = "worker",
            op = "maintenance",
            "Maintenance worker started"
        );

        let checker = ConsistencyChecker::new(self.ctx.store.clone(), self.ctx.writer.clone());
        while !*self.stop.borrow() {
            tributary_target::log_pool_metrics(self.ctx.store.pool());

            if let Err(e) = self.ctx.config.refresh(self.ctx.store.pool()).await {
                error!(
                    subsystem = "engine",
                    component = "worker",
                    error = %e,
                    "Configuration reload failed"
                );
            }
            if let Err(e) = self.ctx.store.cleanup().await {
                error!(
                    subsystem = "engine",
                    component = "worker",
                    error = %e,
                    "Catalog cleanup failed"
                );
            }
            if let Err(e) = self.ctx.store.deactivate_no_data().await {
                error!(
                    subsystem = "engine",
                    component = "worker",
                    error = %e,
                    "NO_DATA deactivation failed"
                );
            }
            if let Err(e) = checker.validate().await {
                error!(
                    subsystem = "engine",
                    component = "worker",
                    error = %e,
                    "Schema validation failed"
                );
            }

            let secs = cycle_sleep_secs(self.ctx.config.sync_interval_secs());
            tokio::select! {
                _ = self.stop.changed() => {}
                _ = sleep(Duration::from_secs(secs)) => {}
            }
        }

        info!(
            subsystem = "engine",
            component = "worker",
            op = "maintenance",
            "Maintenance worker stopped"
        );
    }
}
