//! Connection pool for the sealpost store.
//!
//! A delivery holds one connection for its whole transaction, so the pool
//! bounds how many composes can commit at once.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use sealpost_core::{Error, Result};

pub const ENV_MAX_CONNECTIONS: &str = "SEALPOST_DB_MAX_CONNECTIONS";
pub const ENV_MIN_CONNECTIONS: &str = "SEALPOST_DB_MIN_CONNECTIONS";
pub const ENV_ACQUIRE_TIMEOUT_SECS: &str = "SEALPOST_DB_ACQUIRE_TIMEOUT_SECS";
pub const ENV_IDLE_TIMEOUT_SECS: &str = "SEALPOST_DB_IDLE_TIMEOUT_SECS";

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Pool sizing and timeouts.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a caller waits for a free connection.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: Option<String>) -> Result<Option<T>> {
    match value.filter(|v| !v.trim().is_empty()) {
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", name, v))),
        None => Ok(None),
    }
}

impl PoolConfig {
    /// Read the `SEALPOST_DB_*` variables, keeping defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(n) = parse(ENV_MAX_CONNECTIONS, lookup(ENV_MAX_CONNECTIONS))? {
            config.max_connections = n;
        }
        if let Some(n) = parse(ENV_MIN_CONNECTIONS, lookup(ENV_MIN_CONNECTIONS))? {
            config.min_connections = n;
        }
        if let Some(secs) = parse(ENV_ACQUIRE_TIMEOUT_SECS, lookup(ENV_ACQUIRE_TIMEOUT_SECS))? {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(ENV_IDLE_TIMEOUT_SECS, lookup(ENV_IDLE_TIMEOUT_SECS))? {
            config.idle_timeout = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn with_min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::Config(
                "Pool needs at least one connection".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::Config(format!(
                "Pool minimum {} exceeds maximum {}",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    config.validate()?;
    let start = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "database",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Store connected"
    );
    Ok(pool)
}

/// Log pool occupancy. Warns when every connection is busy, which stalls
/// deliveries waiting to commit.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();

    debug!(
        subsystem = "database",
        component = "pool",
        op = "metrics",
        pool_size = size,
        pool_idle = idle,
        "Pool occupancy"
    );

    if idle == 0 && size > 0 {
        warn!(
            subsystem = "database",
            component = "pool",
            pool_size = size,
            "No idle connections"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = PoolConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn test_reads_overrides() {
        let config = PoolConfig::from_lookup(lookup(&[
            (ENV_MAX_CONNECTIONS, "25"),
            (ENV_MIN_CONNECTIONS, "5"),
            (ENV_ACQUIRE_TIMEOUT_SECS, " 3 "),
        ]))
        .unwrap();
        assert_eq!(config.max_connections, 25);
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.acquire_timeout, Duration::from_secs(3));
        assert_eq!(
            config.idle_timeout,
            Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(PoolConfig::from_lookup(lookup(&[(ENV_MAX_CONNECTIONS, "many")])).is_err());
        assert!(PoolConfig::from_lookup(lookup(&[(ENV_MAX_CONNECTIONS, "0")])).is_err());
        assert!(PoolConfig::from_lookup(lookup(&[
            (ENV_MAX_CONNECTIONS, "2"),
            (ENV_MIN_CONNECTIONS, "3"),
        ]))
        .is_err());
    }

    #[test]
    fn test_builders() {
        let config = PoolConfig::default()
            .with_max_connections(4)
            .with_min_connections(0)
            .with_acquire_timeout(Duration::from_secs(1))
            .with_idle_timeout(Duration::from_secs(2));
        assert!(config.validate().is_ok());
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.idle_timeout, Duration::from_secs(2));
    }
}
