//! # tributary-catalog
//!
//! The `metadata` schema layer: the per-table catalog that drives
//! replication, the key/value configuration store, and cluster-name
//! derivation.
//!
//! The catalog is the only coordination medium between workers; every
//! mutation here preserves the strategy/progress invariant.

pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod store;

pub use bootstrap::bootstrap;
pub use cluster::{classify_hostname, extract_host, resolve_cluster_name};
pub use config::{cycle_sleep_secs, normalize_level, SharedConfig, SyncSettings};
pub use store::{columns_to_json, parse_columns, CatalogStore, DiscoveredTable};
