//! Target database connection pool.
//!
//! Every pooled session is primed for replication work at connect time:
//! `statement_timeout` and `lock_timeout` are applied before the connection
//! is handed out, so statements issued outside an explicit write
//! transaction (DDL, truncates, catalog reads) are bounded by the same
//! ceiling the writer re-asserts inside its transactions.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use tracing::{debug, info, warn};

use tributary_core::defaults::STATEMENT_TIMEOUT_SECS;
use tributary_core::{Error, Result};

/// Sizing and session settings for the target pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections to keep open.
    pub min_connections: u32,
    /// How long an acquire may wait before failing.
    pub acquire_timeout: Duration,
    /// Applied as `statement_timeout` and `lock_timeout` on every new
    /// session.
    pub session_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            session_timeout_secs: STATEMENT_TIMEOUT_SECS,
        }
    }
}

impl PoolConfig {
    /// Pool sizing from the environment (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TRIBUTARY_POOL_MAX_CONNECTIONS` | `10` | Pool upper bound |
    /// | `TRIBUTARY_POOL_MIN_CONNECTIONS` | `1` | Connections kept open |
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(max) = std::env::var("TRIBUTARY_POOL_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            config.max_connections = max.max(1);
        }
        if let Some(min) = std::env::var("TRIBUTARY_POOL_MIN_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            config.min_connections = min;
        }
        config.min_connections = config.min_connections.min(config.max_connections);
        config
    }

    /// The session-priming statement run on every fresh connection.
    fn session_setup(&self) -> String {
        format!(
            "SET statement_timeout = '{t}s'; SET lock_timeout = '{t}s'",
            t = self.session_timeout_secs
        )
    }
}

/// Open the target pool with environment-driven sizing.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::from_env()).await
}

/// Open the target pool with explicit configuration.
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    info!(
        subsystem = "target",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        session_timeout_secs = config.session_timeout_secs,
        "Opening target connection pool"
    );

    let setup = config.session_setup();
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .after_connect(move |conn, _meta| {
            let setup = setup.clone();
            Box::pin(async move {
                conn.execute(setup.as_str()).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "target",
        component = "pool",
        op = "established",
        pool_size = pool.size(),
        pool_idle = pool.num_idle(),
        "Target connection pool ready"
    );
    Ok(pool)
}

/// Emit pool utilization; the maintenance worker calls this once per
/// cycle. A fully-busy pool means chunk writes are queueing behind each
/// other.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();
    let busy = size as usize - idle.min(size as usize);

    debug!(
        subsystem = "target",
        component = "pool",
        op = "metrics",
        pool_size = size,
        pool_idle = idle,
        pool_busy = busy,
        "Pool utilization"
    );

    if size > 0 && idle == 0 {
        warn!(
            subsystem = "target",
            component = "pool",
            pool_size = size,
            "Target pool saturated; chunk writes are queueing"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sizing() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.session_timeout_secs, STATEMENT_TIMEOUT_SECS);
    }

    #[test]
    fn test_session_setup_applies_both_timeouts() {
        let config = PoolConfig::default();
        assert_eq!(
            config.session_setup(),
            "SET statement_timeout = '600s'; SET lock_timeout = '600s'"
        );

        let short = PoolConfig {
            session_timeout_secs: 30,
            ..PoolConfig::default()
        };
        assert!(short.session_setup().contains("'30s'"));
    }

    #[test]
    fn test_from_env_without_overrides_is_default() {
        // The variables are not set in the test environment.
        assert_eq!(PoolConfig::from_env(), PoolConfig::default());
    }
}
