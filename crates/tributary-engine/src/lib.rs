//! # tributary-engine
//!
//! The synchronization engine: the per-table state machine, catalog
//! discovery, schema-consistency validation, and the worker loops that
//! pace them.
//!
//! Control flow that decides *what* a cycle does is pure and lives in
//! [`plan`]; everything that touches a connection lives in the
//! synchronizers and is written against the source-adapter trait.

pub mod catalog_sync;
pub mod consistency;
pub mod plan;
pub mod table_sync;
pub mod worker;

pub use catalog_sync::CatalogSynchronizer;
pub use consistency::ConsistencyChecker;
pub use plan::{advance_cursor, copy_complete, key_column_for, plan_counts, LoopGuard, SyncBranch};
pub use table_sync::TableSynchronizer;
pub use worker::{
    initialize, CatalogSyncWorker, EngineContext, MaintenanceWorker, ReplicationWorker,
};
