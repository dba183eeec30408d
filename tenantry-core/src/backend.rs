//! Database seams used by the router and the provisioner.
//!
//! [`ConnectionSource`] stands for the shared pool and [`SchemaConnection`]
//! for one pooled connection. `tenantry-postgres` implements both on top of
//! `deadpool-postgres`.

use async_trait::async_trait;
use tenantry_migrate::MigrationStore;
use thiserror::Error;

use crate::error::BoxError;
use crate::naming::SchemaName;

/// A failure reported by a database backend.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DbError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl DbError {
    /// Create an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping a cause.
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result of a schema existence lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    /// The schema is listed in the catalog.
    Present,
    /// The schema does not exist yet.
    Missing,
}

impl SchemaState {
    /// Map a boolean lookup result.
    pub fn from_exists(exists: bool) -> Self {
        if exists { Self::Present } else { Self::Missing }
    }
}

/// The shared connection pool.
#[async_trait]
pub trait ConnectionSource: Send + Sync + 'static {
    /// Connection type handed out by the pool.
    type Connection: SchemaConnection;

    /// Lease a connection.
    async fn acquire(&self) -> Result<Self::Connection, DbError>;

    /// Return a connection to the pool for reuse.
    fn release(&self, conn: Self::Connection);

    /// Close a connection instead of returning it to the pool.
    fn discard(&self, conn: Self::Connection);
}

/// Schema-level operations on one leased connection.
///
/// All schema names are passed unquoted; implementations quote them.
#[async_trait]
pub trait SchemaConnection: MigrationStore + Send + 'static {
    /// Look the schema up in the catalog.
    async fn schema_state(&mut self, schema: &SchemaName) -> Result<SchemaState, DbError>;

    /// Set the connection's search path to `schema`.
    async fn set_search_path(&mut self, schema: &SchemaName) -> Result<(), DbError>;

    /// Open the transaction a provisioning run executes in.
    ///
    /// Schema creation, the history table and every migration applied until
    /// [`commit_provisioning`](Self::commit_provisioning) stay invisible to
    /// other sessions, so nobody observes a schema that is only partly
    /// migrated.
    async fn begin_provisioning(&mut self, schema: &SchemaName) -> Result<(), DbError>;

    /// Publish everything done since [`begin_provisioning`](Self::begin_provisioning).
    async fn commit_provisioning(&mut self, schema: &SchemaName) -> Result<(), DbError>;

    /// Undo everything done since [`begin_provisioning`](Self::begin_provisioning).
    async fn rollback_provisioning(&mut self, schema: &SchemaName) -> Result<(), DbError>;

    /// Create the schema if it does not exist.
    async fn create_schema(&mut self, schema: &SchemaName) -> Result<(), DbError>;

    /// Drop the schema and everything in it, in one statement.
    async fn drop_schema(&mut self, schema: &SchemaName) -> Result<(), DbError>;

    /// Block until this session holds the exclusive lock for `schema`.
    async fn lock_schema(&mut self, schema: &SchemaName) -> Result<(), DbError>;

    /// Release the lock taken by [`lock_schema`](Self::lock_schema).
    async fn unlock_schema(&mut self, schema: &SchemaName) -> Result<(), DbError>;
}
