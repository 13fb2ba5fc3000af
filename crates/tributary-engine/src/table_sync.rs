//! The per-table synchronizer: one state-machine pass per catalog row.
//!
//! A pass resolves the branch from the row's status and the source/target
//! counts, then drives the bulk-copy loop, the incremental-update loop, or
//! delete reconciliation, committing progress to the catalog after every
//! chunk so any interruption resumes at the stored cursor.

use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use tributary_catalog::{CatalogStore, SharedConfig};
use tributary_core::{
    normalize, pg_types_for_columns, CatalogRow, ChunkCursor, ColumnSpec, Error, Normalized,
    PkTuple, Result, TableStatus,
};
use tributary_sources::{open_source, SourceAdapter};
use tributary_target::TargetWriter;

use crate::plan::{
    advance_cursor, copy_complete, key_column_for, plan_counts, LimitHit, LoopGuard, SyncBranch,
};

/// Drives one table at a time; the replication worker dispatches rows
/// sequentially, which is what guarantees single-writer-per-table.
pub struct TableSynchronizer {
    store: CatalogStore,
    writer: TargetWriter,
    config: SharedConfig,
    stop: watch::Receiver<bool>,
}

impl TableSynchronizer {
    pub fn new(
        store: CatalogStore,
        writer: TargetWriter,
        config: SharedConfig,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            writer,
            config,
            stop,
        }
    }

    fn stopping(&self) -> bool {
        *self.stop.borrow()
    }

    /// Run one synchronization pass for a catalog row.
    ///
    /// Errors recover as locally as possible: connectivity failures leave
    /// the row untouched for the next cycle, schema problems mark the row,
    /// and only genuinely unexpected failures propagate to the worker.
    pub async fn sync_table(&self, row: &CatalogRow) -> Result<()> {
        let started = Instant::now();

        if row.connection_string.trim().is_empty() {
            return Err(Error::Config(format!(
                "catalog row {}.{} has no connection string",
                row.schema_name, row.table_name
            )));
        }

        let mut source = match open_source(row.db_engine, &row.connection_string).await {
            Ok(source) => source,
            Err(e) => {
                warn!(
                    subsystem = "engine",
                    component = "table_sync",
                    engine = %row.db_engine,
                    schema = %row.schema_name,
                    table = %row.table_name,
                    error = %e,
                    "Source unreachable; leaving status for retry next cycle"
                );
                return Ok(());
            }
        };

        let columns = match source
            .describe_columns(&row.schema_name, &row.table_name)
            .await
        {
            Ok(columns) => columns,
            Err(e) => {
                warn!(
                    subsystem = "engine",
                    component = "table_sync",
                    schema = %row.schema_name,
                    table = %row.table_name,
                    error = %e,
                    "Could not describe source columns; retrying next cycle"
                );
                return Ok(());
            }
        };
        if columns.is_empty() {
            error!(
                subsystem = "engine",
                component = "table_sync",
                schema = %row.schema_name,
                table = %row.table_name,
                "Source reports no columns; marking row as ERROR"
            );
            self.store
                .set_status(
                    &row.schema_name,
                    &row.table_name,
                    row.db_engine,
                    TableStatus::Error,
                )
                .await?;
            return Ok(());
        }

        let target_schema = row.target_schema();
        self.writer.ensure_schema(&target_schema).await?;
        self.writer
            .ensure_table(&target_schema, &row.table_name, &columns)
            .await?;

        let mut row = row.clone();

        // RESET: truncate, zero progress, continue into the FULL_LOAD arm.
        let mut truncated = false;
        if row.status == TableStatus::Reset {
            info!(
                subsystem = "engine",
                component = "table_sync",
                schema = %row.schema_name,
                table = %row.table_name,
                "RESET requested; truncating target and restarting full load"
            );
            self.writer.truncate(&target_schema, &row.table_name).await?;
            self.store
                .reset_progress(&row.schema_name, &row.table_name, row.db_engine)
                .await?;
            row.status = TableStatus::FullLoad;
            row.last_offset = Some(0);
            row.last_processed_pk = None;
            truncated = true;
        }

        // A FULL_LOAD with no stored progress is a fresh start; resumed
        // loads keep the target and continue from the cursor.
        if row.status == TableStatus::FullLoad && row.progress_is_zero() && !truncated {
            self.writer.truncate(&target_schema, &row.table_name).await?;
        }

        let source_count = match source.count(&row.schema_name, &row.table_name).await {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    subsystem = "engine",
                    component = "table_sync",
                    schema = %row.schema_name,
                    table = %row.table_name,
                    error = %e,
                    "Could not count source rows; retrying next cycle"
                );
                return Ok(());
            }
        };
        let target_count = self.writer.count(&target_schema, &row.table_name).await?;

        debug!(
            subsystem = "engine",
            component = "table_sync",
            schema = %row.schema_name,
            table = %row.table_name,
            source_count,
            target_count,
            status = %row.status,
            "Planning cycle"
        );

        match plan_counts(source_count, target_count) {
            SyncBranch::NoData => {
                info!(
                    subsystem = "engine",
                    component = "table_sync",
                    schema = %row.schema_name,
                    table = %row.table_name,
                    "Source and target both empty; NO_DATA"
                );
                self.store
                    .update_status(&row, TableStatus::NoData, 0)
                    .await?;
            }
            SyncBranch::KeepListening => {
                warn!(
                    subsystem = "engine",
                    component = "table_sync",
                    schema = %row.schema_name,
                    table = %row.table_name,
                    target_count,
                    "Source is empty but target has rows; keeping LISTENING_CHANGES"
                );
                self.store
                    .update_status(&row, TableStatus::ListeningChanges, 0)
                    .await?;
            }
            SyncBranch::Reconcile => {
                if let Err(e) = self
                    .incremental_updates(source.as_mut(), &row, &columns)
                    .await
                {
                    warn!(
                        subsystem = "engine",
                        component = "table_sync",
                        schema = %row.schema_name,
                        table = %row.table_name,
                        error = %e,
                        "Incremental update pass failed"
                    );
                }
                if let Err(e) = self.reconcile_deletes(source.as_mut(), &row).await {
                    warn!(
                        subsystem = "engine",
                        component = "table_sync",
                        schema = %row.schema_name,
                        table = %row.table_name,
                        error = %e,
                        "Delete reconciliation failed"
                    );
                }
                self.store
                    .update_status(&row, TableStatus::ListeningChanges, target_count)
                    .await?;
            }
            SyncBranch::DeleteThenCopy | SyncBranch::Copy => {
                let mut target_count = target_count;
                if source_count < target_count {
                    let deleted = self.reconcile_deletes(source.as_mut(), &row).await?;
                    target_count = self.writer.count(&target_schema, &row.table_name).await?;
                    info!(
                        subsystem = "engine",
                        component = "table_sync",
                        schema = %row.schema_name,
                        table = %row.table_name,
                        row_count = deleted,
                        source_count,
                        target_count,
                        "Delete reconciliation finished"
                    );
                }

                let (final_count, completed) = self
                    .bulk_copy(source.as_mut(), &row, &columns, source_count, target_count)
                    .await?;

                if completed && final_count > 0 {
                    self.store
                        .update_status(&row, TableStatus::ListeningChanges, final_count)
                        .await?;
                } else if !completed {
                    info!(
                        subsystem = "engine",
                        component = "table_sync",
                        schema = %row.schema_name,
                        table = %row.table_name,
                        "Bulk copy interrupted; cursor kept for resumption"
                    );
                }
            }
        }

        info!(
            subsystem = "engine",
            component = "table_sync",
            schema = %row.schema_name,
            table = %row.table_name,
            duration_ms = started.elapsed().as_millis() as u64,
            "Table pass finished"
        );
        Ok(())
    }

    /// Incremental updates: source rows past the high-water mark compared
    /// column by column against the target; only differing columns are
    /// updated, each row in its own transaction.
    async fn incremental_updates(
        &self,
        source: &mut dyn SourceAdapter,
        row: &CatalogRow,
        columns: &[ColumnSpec],
    ) -> Result<u64> {
        let time_column = match row.last_sync_column.as_deref() {
            Some(column) if !column.is_empty() => column,
            _ => return Ok(0),
        };
        let Some(since_ts) = row.last_sync_time else {
            return Ok(0);
        };
        if row.pk_columns.is_empty() {
            return Ok(0);
        }

        let since = since_ts.format("%Y-%m-%d %H:%M:%S").to_string();
        let modified = source
            .rows_modified_since(&row.schema_name, &row.table_name, columns, time_column, &since)
            .await?;
        if modified.is_empty() {
            return Ok(0);
        }

        let target_schema = row.target_schema();
        let target_columns: Vec<String> =
            columns.iter().map(|c| c.name.to_lowercase()).collect();
        let pg_types = pg_types_for_columns(columns);
        let pk_columns: Vec<String> = row.pk_columns.iter().map(|c| c.to_lowercase()).collect();

        let mut updated = 0u64;
        for cells in &modified.rows {
            if cells.len() != modified.columns.len() {
                continue;
            }

            // Reassemble the PK tuple by locating each PK column's index.
            let mut key: PkTuple = Vec::with_capacity(pk_columns.len());
            let mut key_complete = true;
            for pk in &pk_columns {
                match modified.column_index(pk) {
                    Some(idx) => key.push(cells[idx].clone()),
                    None => {
                        key_complete = false;
                        break;
                    }
                }
            }
            if !key_complete {
                continue;
            }

            // Missing target rows are the bulk branch's job.
            let Some(current) = self
                .writer
                .fetch_row_by_pk(&target_schema, &row.table_name, &target_columns, &pk_columns, &key)
                .await?
            else {
                continue;
            };

            let mut assignments: Vec<(String, Normalized, String)> = Vec::new();
            for (i, column) in target_columns.iter().enumerate() {
                if pk_columns.contains(column) {
                    continue;
                }
                let fresh = normalize(cells[i].as_deref(), &pg_types[i]);
                let differs = match &fresh {
                    Normalized::Text(text) => current[i].as_deref() != Some(text.as_str()),
                    Normalized::Null => current[i].is_some(),
                    Normalized::Default => false,
                };
                if differs {
                    assignments.push((column.clone(), fresh, pg_types[i].clone()));
                }
            }

            if !assignments.is_empty() {
                updated += self
                    .writer
                    .update_row_by_pk(&target_schema, &row.table_name, &assignments, &pk_columns, &key)
                    .await?;
            }
        }

        if updated > 0 {
            info!(
                subsystem = "engine",
                component = "table_sync",
                schema = %row.schema_name,
                table = %row.table_name,
                row_count = updated,
                "Applied incremental updates"
            );
        }
        Ok(updated)
    }

    /// Delete reconciliation: page the target's PK values, ask the source
    /// which still exist, delete the difference. Tables without a PK are
    /// skipped silently.
    async fn reconcile_deletes(
        &self,
        source: &mut dyn SourceAdapter,
        row: &CatalogRow,
    ) -> Result<u64> {
        if row.pk_columns.is_empty() {
            return Ok(0);
        }

        let chunk_size = self.config.chunk_size();
        let target_schema = row.target_schema();
        let pk_columns: Vec<String> = row.pk_columns.iter().map(|c| c.to_lowercase()).collect();

        let mut page = 0u64;
        let mut total_deleted = 0u64;
        loop {
            if self.stopping() {
                break;
            }
            let keys = self
                .writer
                .pk_page(&target_schema, &row.table_name, &pk_columns, page, chunk_size)
                .await?;
            if keys.is_empty() {
                break;
            }

            let existing = source
                .existing_keys(&row.schema_name, &row.table_name, &pk_columns, &keys, chunk_size)
                .await?;
            let missing: Vec<PkTuple> = keys
                .iter()
                .filter(|key| !existing.contains(*key))
                .cloned()
                .collect();

            if !missing.is_empty() {
                let deleted = self
                    .writer
                    .bulk_delete(&target_schema, &row.table_name, &pk_columns, &missing)
                    .await?;
                total_deleted += deleted;
                debug!(
                    subsystem = "engine",
                    component = "table_sync",
                    schema = %row.schema_name,
                    table = %row.table_name,
                    row_count = deleted,
                    "Deleted rows missing from source"
                );
            }

            if (keys.len() as u64) < chunk_size {
                break;
            }
            page += 1;
        }

        Ok(total_deleted)
    }

    /// The cursor-driven copy loop. Progress is committed to the catalog
    /// after every chunk; the cursor therefore survives any interruption.
    /// Returns the final target count and whether the copy ran to
    /// completion.
    async fn bulk_copy(
        &self,
        source: &mut dyn SourceAdapter,
        row: &CatalogRow,
        columns: &[ColumnSpec],
        source_count: u64,
        start_count: u64,
    ) -> Result<(u64, bool)> {
        let chunk_size = self.config.chunk_size();
        let target_schema = row.target_schema();
        let target_columns: Vec<String> =
            columns.iter().map(|c| c.name.to_lowercase()).collect();
        let pg_types = pg_types_for_columns(columns);

        let key_column = key_column_for(row);
        // A PK-shaped strategy with no usable key column degrades to
        // offset pagination rather than failing the table.
        let mut cursor = if key_column.is_none() && row.pk_strategy.uses_pk_progress() {
            ChunkCursor::Offset(start_count)
        } else {
            row.cursor()
        };

        let mut guard = LoopGuard::default();
        let mut target_count = start_count;
        let mut completed = false;

        loop {
            if self.stopping() {
                break;
            }
            if let Some(hit) = guard.note_chunk() {
                let reason = match hit {
                    LimitHit::Chunks => "chunk ceiling",
                    LimitHit::Time => "time ceiling",
                };
                error!(
                    subsystem = "engine",
                    component = "table_sync",
                    schema = %row.schema_name,
                    table = %row.table_name,
                    chunk_number = guard.chunks(),
                    "Per-table {reason} reached; stopping cleanly with cursor preserved"
                );
                break;
            }

            let chunk = match source
                .read_chunk(
                    &row.schema_name,
                    &row.table_name,
                    columns,
                    &cursor,
                    key_column.as_deref(),
                    chunk_size,
                )
                .await
            {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(
                        subsystem = "engine",
                        component = "table_sync",
                        schema = %row.schema_name,
                        table = %row.table_name,
                        error = %e,
                        "Chunk read failed; cycle ends, cursor preserved"
                    );
                    break;
                }
            };
            if chunk.is_empty() {
                completed = true;
                break;
            }

            let applied = match self
                .writer
                .bulk_upsert(
                    &target_schema,
                    &row.table_name,
                    &target_columns,
                    &pg_types,
                    &chunk.rows,
                    chunk_size,
                )
                .await
            {
                Ok(applied) => applied,
                Err(e) if e.ends_table_cycle() => {
                    error!(
                        subsystem = "engine",
                        component = "table_sync",
                        schema = %row.schema_name,
                        table = %row.table_name,
                        error = %e,
                        "Write failure ends this table's cycle; cursor preserved"
                    );
                    break;
                }
                Err(e) => return Err(e),
            };

            target_count += applied;
            cursor = advance_cursor(&cursor, &chunk, key_column.as_deref());

            // The catalog advancement is the commit point for the chunk.
            match &cursor {
                ChunkCursor::Pk(Some(last)) | ChunkCursor::Temporal(Some(last)) => {
                    self.store
                        .update_last_processed_pk(
                            &row.schema_name,
                            &row.table_name,
                            row.db_engine,
                            last,
                        )
                        .await?;
                }
                ChunkCursor::Offset(offset) => {
                    self.store
                        .update_last_offset(&row.schema_name, &row.table_name, row.db_engine, *offset)
                        .await?;
                }
                _ => {}
            }

            debug!(
                subsystem = "engine",
                component = "table_sync",
                schema = %row.schema_name,
                table = %row.table_name,
                chunk_number = guard.chunks(),
                row_count = applied,
                target_count,
                "Chunk applied"
            );

            if copy_complete(chunk.len(), chunk_size, target_count, source_count) {
                completed = true;
                break;
            }
        }

        Ok((target_count, completed))
    }
}
