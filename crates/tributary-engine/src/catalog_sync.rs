//! Catalog discovery: one pass per engine over every known connection.
//!
//! New source tables become PENDING/inactive catalog rows; existing rows
//! get their key/time-column metadata refreshed (status and progress are
//! never touched); tables that vanished from the source are removed; and
//! rows without a cluster name get one derived from the live hostname or
//! the connection string.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use tributary_catalog::{resolve_cluster_name, CatalogStore, DiscoveredTable};
use tributary_core::{DbEngine, PkStrategy, Result, SchemaTable};
use tributary_sources::{candidate_columns_from, open_source, pick_time_column};

pub struct CatalogSynchronizer {
    store: CatalogStore,
}

impl CatalogSynchronizer {
    pub fn new(store: CatalogStore) -> Self {
        Self { store }
    }

    /// Discover tables on every active connection of one engine. A failed
    /// connection or listing fails catalog sync for that connection only.
    pub async fn sync_engine(&self, engine: DbEngine) -> Result<()> {
        let connections = self.store.distinct_connections(engine, true).await?;
        if connections.is_empty() {
            debug!(
                subsystem = "engine",
                component = "catalog_sync",
                engine = %engine,
                "No connections known for engine"
            );
            return Ok(());
        }

        info!(
            subsystem = "engine",
            component = "catalog_sync",
            engine = %engine,
            row_count = connections.len(),
            "Synchronizing catalog"
        );

        for connection in connections {
            if let Err(e) = self.sync_connection(engine, &connection).await {
                warn!(
                    subsystem = "engine",
                    component = "catalog_sync",
                    engine = %engine,
                    error = %e,
                    "Catalog sync failed for one connection"
                );
            }
        }
        Ok(())
    }

    async fn sync_connection(&self, engine: DbEngine, connection: &str) -> Result<()> {
        let mut source = open_source(engine, connection).await?;
        let tables = source.list_tables().await?;
        let live: HashSet<SchemaTable> = tables.iter().cloned().collect();

        for table in &tables {
            let columns = match source.describe_columns(&table.schema, &table.table).await {
                Ok(columns) if !columns.is_empty() => columns,
                Ok(_) => continue,
                Err(e) => {
                    warn!(
                        subsystem = "engine",
                        component = "catalog_sync",
                        engine = %engine,
                        schema = %table.schema,
                        table = %table.table,
                        error = %e,
                        "Could not describe table during discovery"
                    );
                    continue;
                }
            };

            let pk_columns: Vec<String> = match source.primary_key(&table.schema, &table.table).await
            {
                Ok(pk) => pk.iter().map(|c| c.to_lowercase()).collect(),
                Err(e) => {
                    warn!(
                        subsystem = "engine",
                        component = "catalog_sync",
                        schema = %table.schema,
                        table = %table.table,
                        error = %e,
                        "Primary key detection failed"
                    );
                    continue;
                }
            };
            let candidate_columns: Vec<String> = candidate_columns_from(&columns)
                .iter()
                .map(|c| c.to_lowercase())
                .collect();
            let time_column = pick_time_column(&columns);
            let pk_strategy = PkStrategy::classify(&pk_columns, &candidate_columns);
            let table_size = self
                .store
                .table_size_estimate(&table.schema.to_lowercase(), &table.table)
                .await
                .unwrap_or(0);

            let discovered = DiscoveredTable {
                schema: table.schema.clone(),
                table: table.table.clone(),
                engine,
                connection_string: connection.to_string(),
                time_column,
                has_pk: !pk_columns.is_empty(),
                pk_columns,
                candidate_columns,
                pk_strategy,
                table_size,
            };

            match self.store.get(&table.schema, &table.table, engine).await? {
                Some(_) => self.store.update_discovered(&discovered).await?,
                None => {
                    info!(
                        subsystem = "engine",
                        component = "catalog_sync",
                        engine = %engine,
                        schema = %table.schema,
                        table = %table.table,
                        strategy = %discovered.pk_strategy,
                        "Discovered new table"
                    );
                    self.store.insert_pending(&discovered).await?;
                }
            }
        }

        // Rows whose source table is gone come out of the catalog.
        for known in self.store.list_by_connection(engine, connection).await? {
            if !live.contains(&known) {
                info!(
                    subsystem = "engine",
                    component = "catalog_sync",
                    engine = %engine,
                    schema = %known.schema,
                    table = %known.table,
                    "Removing catalog row for table no longer on source"
                );
                self.store.remove(&known.schema, &known.table, engine).await?;
            }
        }

        Ok(())
    }

    /// Fill in missing cluster names: the server's own hostname when the
    /// engine can report one, else host-part parsing of the connection
    /// string.
    pub async fn refresh_cluster_names(&self) -> Result<()> {
        for (connection, engine) in self.store.list_missing_cluster().await? {
            let live_hostname = match open_source(engine, &connection).await {
                Ok(mut source) => source.hostname().await.ok().flatten(),
                Err(_) => None,
            };

            if let Some(name) = resolve_cluster_name(live_hostname.as_deref(), &connection) {
                let updated = self
                    .store
                    .set_cluster_name(&connection, engine, &name)
                    .await?;
                info!(
                    subsystem = "engine",
                    component = "catalog_sync",
                    engine = %engine,
                    cluster = %name,
                    row_count = updated,
                    "Assigned cluster name"
                );
            }
        }
        Ok(())
    }
}
