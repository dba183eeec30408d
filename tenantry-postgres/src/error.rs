//! Error types for PostgreSQL operations.

use tenantry_core::DbError;
use tenantry_migrate::MigrationError;
use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Pool(_) => true,
            Self::Postgres(e) => e.is_closed(),
            Self::Config(_) => false,
        }
    }

    /// SQLSTATE code reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Postgres(e) => e.code().map(|code| code.code()),
            _ => None,
        }
    }
}

impl From<PgError> for DbError {
    fn from(err: PgError) -> Self {
        let message = match (&err, err.sql_state()) {
            (PgError::Pool(_), _) => "connection pool error".to_string(),
            (_, Some(state)) => format!("database error (SQLSTATE {state})"),
            (PgError::Postgres(_), None) => "database error".to_string(),
            (PgError::Config(_), _) => "configuration error".to_string(),
        };
        DbError::with_source(message, err)
    }
}

impl From<PgError> for MigrationError {
    fn from(err: PgError) -> Self {
        MigrationError::database(err.to_string())
    }
}
