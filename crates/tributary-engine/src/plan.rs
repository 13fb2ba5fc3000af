//! Pure decision logic for the table synchronizer.
//!
//! The state machine's branch choice, cursor advancement and loop
//! termination live here, connection-free, so the control flow that keeps
//! source and target convergent is directly testable.

use std::time::{Duration, Instant};

use tributary_core::defaults::{MAX_CHUNKS_PER_CYCLE, MAX_TABLE_SECS_PER_CYCLE};
use tributary_core::{CatalogRow, ChunkCursor, PkStrategy, RowChunk};

/// Which arm of the state machine a cycle takes, from the count
/// comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncBranch {
    /// Both sides empty: NO_DATA.
    NoData,
    /// Source empty but the target holds rows: keep listening, never
    /// truncate on transient source emptiness.
    KeepListening,
    /// Counts match: incremental updates plus delete reconciliation.
    Reconcile,
    /// Source shrank: reconcile deletes, then fall through to copy.
    DeleteThenCopy,
    /// Source grew: bulk copy from the stored cursor.
    Copy,
}

/// Decide the branch from the observed counts.
pub fn plan_counts(source_count: u64, target_count: u64) -> SyncBranch {
    if source_count == 0 && target_count == 0 {
        SyncBranch::NoData
    } else if source_count == 0 {
        SyncBranch::KeepListening
    } else if source_count == target_count {
        SyncBranch::Reconcile
    } else if source_count < target_count {
        SyncBranch::DeleteThenCopy
    } else {
        SyncBranch::Copy
    }
}

/// The cursor column for a row's strategy: first PK column, first
/// candidate column, or none for offset pagination.
pub fn key_column_for(row: &CatalogRow) -> Option<String> {
    match row.pk_strategy {
        PkStrategy::Pk => row.pk_columns.first().cloned(),
        PkStrategy::TemporalPk => row.candidate_columns.first().cloned(),
        PkStrategy::Offset => None,
    }
}

/// Advance a cursor past a fetched chunk. PK/temporal cursors take the
/// last row's key value (first key component only — composite PKs are
/// intentionally not split); the offset cursor grows by the chunk length.
/// An empty chunk, or a chunk whose last key is NULL, leaves the cursor
/// where it was.
pub fn advance_cursor(
    cursor: &ChunkCursor,
    chunk: &RowChunk,
    key_column: Option<&str>,
) -> ChunkCursor {
    match cursor {
        ChunkCursor::Pk(last) => {
            let next = key_column
                .and_then(|key| chunk.last_value_of(key))
                .or_else(|| last.clone());
            ChunkCursor::Pk(next)
        }
        ChunkCursor::Temporal(last) => {
            let next = key_column
                .and_then(|key| chunk.last_value_of(key))
                .or_else(|| last.clone());
            ChunkCursor::Temporal(next)
        }
        ChunkCursor::Offset(offset) => ChunkCursor::Offset(offset + chunk.len() as u64),
    }
}

/// Whether the copy loop is finished after a chunk: a short chunk means
/// the source is exhausted; catching up to the source count means there
/// is nothing left to copy.
pub fn copy_complete(chunk_len: usize, chunk_size: u64, target_count: u64, source_count: u64) -> bool {
    (chunk_len as u64) < chunk_size || target_count >= source_count
}

/// Why the chunk loop was stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitHit {
    /// Chunk-count ceiling reached.
    Chunks,
    /// Wall-clock ceiling reached.
    Time,
}

/// Runaway-loop guard: chunk-count and wall-clock ceilings per table per
/// cycle. Both force a clean stop with the cursor preserved.
#[derive(Debug)]
pub struct LoopGuard {
    started: Instant,
    max_duration: Duration,
    max_chunks: u64,
    chunks: u64,
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(
            MAX_CHUNKS_PER_CYCLE,
            Duration::from_secs(MAX_TABLE_SECS_PER_CYCLE),
        )
    }
}

impl LoopGuard {
    pub fn new(max_chunks: u64, max_duration: Duration) -> Self {
        Self {
            started: Instant::now(),
            max_duration,
            max_chunks,
            chunks: 0,
        }
    }

    /// Count one chunk; report which ceiling (if any) has been crossed.
    pub fn note_chunk(&mut self) -> Option<LimitHit> {
        self.chunks += 1;
        if self.chunks > self.max_chunks {
            return Some(LimitHit::Chunks);
        }
        if self.started.elapsed() > self.max_duration {
            return Some(LimitHit::Time);
        }
        None
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_core::{DbEngine, TableStatus};

    fn chunk_of(columns: &[&str], rows: Vec<Vec<Option<&str>>>) -> RowChunk {
        let mut chunk = RowChunk::new(columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            chunk
                .rows
                .push(row.into_iter().map(|c| c.map(str::to_string)).collect());
        }
        chunk
    }

    fn pk_row() -> CatalogRow {
        CatalogRow {
            schema_name: "s".into(),
            table_name: "t".into(),
            cluster_name: None,
            db_engine: DbEngine::MariaDb,
            connection_string: "mysql://sync@host/db".into(),
            last_sync_time: None,
            last_sync_column: Some("updated_at".into()),
            status: TableStatus::FullLoad,
            last_offset: None,
            last_processed_pk: None,
            pk_strategy: PkStrategy::Pk,
            pk_columns: vec!["id".into(), "region".into()],
            candidate_columns: vec![],
            has_pk: true,
            table_size: 0,
            active: true,
        }
    }

    #[test]
    fn test_plan_counts_branches() {
        assert_eq!(plan_counts(0, 0), SyncBranch::NoData);
        assert_eq!(plan_counts(0, 10), SyncBranch::KeepListening);
        assert_eq!(plan_counts(10, 10), SyncBranch::Reconcile);
        assert_eq!(plan_counts(5, 10), SyncBranch::DeleteThenCopy);
        assert_eq!(plan_counts(10, 5), SyncBranch::Copy);
    }

    #[test]
    fn test_key_column_per_strategy() {
        let mut row = pk_row();
        // Composite PK: only the first component drives the cursor.
        assert_eq!(key_column_for(&row), Some("id".into()));

        row.pk_strategy = PkStrategy::TemporalPk;
        row.pk_columns.clear();
        row.candidate_columns = vec!["updated_at".into()];
        assert_eq!(key_column_for(&row), Some("updated_at".into()));

        row.pk_strategy = PkStrategy::Offset;
        assert_eq!(key_column_for(&row), None);
    }

    #[test]
    fn test_advance_pk_cursor_uses_last_row() {
        let cursor = ChunkCursor::Pk(None);
        let chunk = chunk_of(
            &["id", "name"],
            vec![
                vec![Some("1"), Some("a")],
                vec![Some("2"), Some("b")],
            ],
        );
        assert_eq!(
            advance_cursor(&cursor, &chunk, Some("id")),
            ChunkCursor::Pk(Some("2".into()))
        );
    }

    #[test]
    fn test_advance_pk_cursor_keeps_position_on_empty_chunk() {
        let cursor = ChunkCursor::Pk(Some("7".into()));
        let chunk = chunk_of(&["id"], vec![]);
        assert_eq!(
            advance_cursor(&cursor, &chunk, Some("id")),
            ChunkCursor::Pk(Some("7".into()))
        );
    }

    #[test]
    fn test_advance_offset_cursor_accumulates() {
        // The OFFSET walk of the five-row table: 0 → 2 → 4 → 5.
        let two = chunk_of(&["name"], vec![vec![Some("a")], vec![Some("b")]]);
        let one = chunk_of(&["name"], vec![vec![Some("e")]]);

        let cursor = ChunkCursor::Offset(0);
        let cursor = advance_cursor(&cursor, &two, None);
        assert_eq!(cursor, ChunkCursor::Offset(2));
        let cursor = advance_cursor(&cursor, &two, None);
        assert_eq!(cursor, ChunkCursor::Offset(4));
        let cursor = advance_cursor(&cursor, &one, None);
        assert_eq!(cursor, ChunkCursor::Offset(5));
    }

    #[test]
    fn test_copy_complete_boundaries() {
        // A full chunk keeps the loop alive.
        assert!(!copy_complete(2, 2, 2, 3));
        // A short chunk terminates.
        assert!(copy_complete(1, 2, 5, 5));
        // Catching up with the source terminates.
        assert!(copy_complete(2, 2, 3, 3));
    }

    #[test]
    fn test_full_load_two_chunks_then_done() {
        // Three rows, chunk_size 2: first chunk full, second short.
        let chunk_size = 2;
        let first = chunk_of(&["id"], vec![vec![Some("1")], vec![Some("2")]]);
        let second = chunk_of(&["id"], vec![vec![Some("3")]]);

        let cursor = ChunkCursor::Pk(None);
        let cursor = advance_cursor(&cursor, &first, Some("id"));
        assert_eq!(cursor, ChunkCursor::Pk(Some("2".into())));
        assert!(!copy_complete(first.len(), chunk_size, 2, 3));

        let cursor = advance_cursor(&cursor, &second, Some("id"));
        assert_eq!(cursor, ChunkCursor::Pk(Some("3".into())));
        assert!(copy_complete(second.len(), chunk_size, 3, 3));
    }

    #[test]
    fn test_loop_guard_chunk_ceiling() {
        let mut guard = LoopGuard::new(2, Duration::from_secs(3600));
        assert_eq!(guard.note_chunk(), None);
        assert_eq!(guard.note_chunk(), None);
        assert_eq!(guard.note_chunk(), Some(LimitHit::Chunks));
        assert_eq!(guard.chunks(), 3);
    }

    #[test]
    fn test_loop_guard_time_ceiling() {
        let mut guard = LoopGuard::new(1000, Duration::from_secs(0));
        assert_eq!(guard.note_chunk(), Some(LimitHit::Time));
    }
}
