//! Connection pool for PostgreSQL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use tenantry_core::{ConnectionSource, DbError, PoolSettings};
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

use crate::config::PgConfig;
use crate::connection::PgConnection;
use crate::error::{PgError, PgResult};

/// A connection pool for PostgreSQL.
///
/// Recycling does not reset session state; the router rebinds the search
/// path before every release and discards connections it cannot rebind.
#[derive(Clone)]
pub struct PgPool {
    inner: Pool,
    config: Arc<PgConfig>,
}

impl PgPool {
    /// Create a new connection pool from configuration.
    pub fn new(config: PgConfig) -> PgResult<Self> {
        Self::with_pool_config(config, PoolConfig::default())
    }

    /// Create a new connection pool with custom pool configuration.
    pub fn with_pool_config(config: PgConfig, pool_config: PoolConfig) -> PgResult<Self> {
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(config.to_pg_config(), NoTls, mgr_config);

        let pool = Pool::builder(mgr)
            .runtime(Runtime::Tokio1)
            .max_size(pool_config.max_connections)
            .wait_timeout(pool_config.connection_timeout)
            .create_timeout(pool_config.connection_timeout)
            .recycle_timeout(pool_config.recycle_timeout)
            .build()
            .map_err(|e| PgError::config(format!("failed to create pool: {e}")))?;

        info!(
            host = %config.host,
            port = %config.port,
            database = %config.database,
            max_connections = %pool_config.max_connections,
            "PostgreSQL connection pool created"
        );

        Ok(Self {
            inner: pool,
            config: Arc::new(config),
        })
    }

    /// Create a pool from a database URL and the `[database.pool]` settings.
    pub fn from_settings(url: &str, settings: &PoolSettings) -> PgResult<Self> {
        Self::builder()
            .url(url)
            .max_connections(settings.max_connections)
            .connection_timeout(settings.connection_timeout())
            .recycle_timeout(settings.idle_timeout())
            .build()
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> PgResult<PgConnection> {
        debug!("Acquiring connection from pool");
        let client = self.inner.get().await?;
        Ok(PgConnection::new(client, self.config.lock_namespace))
    }

    /// Get the current pool status.
    pub fn status(&self) -> PoolStatus {
        let status = self.inner.status();
        PoolStatus {
            available: status.available as usize,
            size: status.size as usize,
            max_size: status.max_size as usize,
            waiting: status.waiting as usize,
        }
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// Check if the pool is healthy by running a trivial query.
    pub async fn is_healthy(&self) -> bool {
        match self.get().await {
            Ok(conn) => conn.query_one("SELECT 1", &[]).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Close the pool and all connections.
    pub fn close(&self) {
        self.inner.close();
        info!("PostgreSQL connection pool closed");
    }

    /// Create a builder for configuring the pool.
    pub fn builder() -> PgPoolBuilder {
        PgPoolBuilder::new()
    }
}

#[async_trait]
impl ConnectionSource for PgPool {
    type Connection = PgConnection;

    async fn acquire(&self) -> Result<PgConnection, DbError> {
        Ok(self.get().await?)
    }

    fn release(&self, conn: PgConnection) {
        if conn.in_provisioning() {
            warn!("Connection released with a provisioning transaction open");
            self.discard(conn);
            return;
        }
        // dropping the object hands it back to deadpool
        drop(conn);
    }

    fn discard(&self, conn: PgConnection) {
        debug!("Discarding connection");
        drop(Object::take(conn.into_inner()));
    }
}

/// Pool status information.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    /// Number of available (idle) connections.
    pub available: usize,
    /// Current total size of the pool.
    pub size: usize,
    /// Maximum size of the pool.
    pub max_size: usize,
    /// Number of tasks waiting for a connection.
    pub waiting: usize,
}

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: usize,
    /// Maximum time to wait for, or to open, a connection.
    pub connection_timeout: Option<Duration>,
    /// Maximum time to check an idle connection before reuse.
    pub recycle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let settings = PoolSettings::default();
        Self {
            max_connections: settings.max_connections,
            connection_timeout: Some(settings.connection_timeout()),
            recycle_timeout: Some(settings.idle_timeout()),
        }
    }
}

/// Builder for creating a connection pool.
#[derive(Debug, Default)]
pub struct PgPoolBuilder {
    config: Option<PgConfig>,
    url: Option<String>,
    pool_config: PoolConfig,
}

impl PgPoolBuilder {
    /// Create a new pool builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: PgConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the maximum number of connections.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.pool_config.max_connections = n;
        self
    }

    /// Set the connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.connection_timeout = Some(timeout);
        self
    }

    /// Set the recycle timeout.
    pub fn recycle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.recycle_timeout = Some(timeout);
        self
    }

    /// Build the connection pool.
    pub fn build(self) -> PgResult<PgPool> {
        let config = if let Some(config) = self.config {
            config
        } else if let Some(url) = self.url {
            PgConfig::from_url(&url)?
        } else {
            return Err(PgError::config("no database URL or config provided"));
        };

        PgPool::with_pool_config(config, self.pool_config)
    }
}
