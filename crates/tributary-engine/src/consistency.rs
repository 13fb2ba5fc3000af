//! Schema-consistency validation.
//!
//! Column additions or removals on the source cannot be migrated in place;
//! a mismatch between the source and target column counts drops the target
//! table and resets the catalog row to a fresh FULL_LOAD.

use std::collections::HashMap;

use tracing::{info, warn};

use tributary_catalog::CatalogStore;
use tributary_core::{DbEngine, Result, TableStatus};
use tributary_sources::{open_source, SourceAdapter};
use tributary_target::TargetWriter;

pub struct ConsistencyChecker {
    store: CatalogStore,
    writer: TargetWriter,
}

impl ConsistencyChecker {
    pub fn new(store: CatalogStore, writer: TargetWriter) -> Self {
        Self { store, writer }
    }

    /// Compare column counts for every active loading/listening row; reset
    /// tables whose source shape drifted.
    pub async fn validate(&self) -> Result<()> {
        for engine in DbEngine::ALL {
            if let Err(e) = self.validate_engine(engine).await {
                warn!(
                    subsystem = "engine",
                    component = "consistency",
                    engine = %engine,
                    error = %e,
                    "Schema validation failed for engine"
                );
            }
        }
        Ok(())
    }

    async fn validate_engine(&self, engine: DbEngine) -> Result<()> {
        let rows = self.store.list_active_by_engine(engine).await?;
        let mut sources: HashMap<String, Box<dyn SourceAdapter>> = HashMap::new();

        for row in rows {
            if !matches!(
                row.status,
                TableStatus::FullLoad | TableStatus::ListeningChanges
            ) {
                continue;
            }

            if !sources.contains_key(&row.connection_string) {
                match open_source(engine, &row.connection_string).await {
                    Ok(source) => {
                        sources.insert(row.connection_string.clone(), source);
                    }
                    Err(e) => {
                        warn!(
                            subsystem = "engine",
                            component = "consistency",
                            engine = %engine,
                            error = %e,
                            "Source unreachable during schema validation"
                        );
                        continue;
                    }
                }
            }
            let source = sources
                .get_mut(&row.connection_string)
                .expect("source just inserted");

            let source_columns = match source
                .describe_columns(&row.schema_name, &row.table_name)
                .await
            {
                Ok(columns) => columns.len() as u64,
                Err(_) => continue,
            };
            let target_columns = self
                .writer
                .column_count(&row.target_schema(), &row.table_name)
                .await?;

            // A target that does not exist yet is the loader's business,
            // not a mismatch.
            if target_columns == 0 || source_columns == 0 {
                continue;
            }

            if source_columns != target_columns {
                warn!(
                    subsystem = "engine",
                    component = "consistency",
                    engine = %engine,
                    schema = %row.schema_name,
                    table = %row.table_name,
                    source_count = source_columns,
                    target_count = target_columns,
                    "Schema mismatch; dropping target and resetting to FULL_LOAD"
                );
                self.writer
                    .drop_table(&row.target_schema(), &row.table_name)
                    .await?;
                self.store
                    .set_status(
                        &row.schema_name,
                        &row.table_name,
                        row.db_engine,
                        TableStatus::FullLoad,
                    )
                    .await?;
                self.store
                    .reset_progress(&row.schema_name, &row.table_name, row.db_engine)
                    .await?;
            } else {
                info!(
                    subsystem = "engine",
                    component = "consistency",
                    schema = %row.schema_name,
                    table = %row.table_name,
                    row_count = source_columns,
                    "Schema validated"
                );
            }
        }
        Ok(())
    }
}
