//! Error types for tenant routing and provisioning.
//!
//! Every failure the router or provisioner can surface is a [`TenancyError`].
//! Variants carry the schema involved and the underlying cause as their
//! `source`, and map to a stable [`ErrorCode`]:
//!
//! - 3xxx: connection errors
//! - 5xxx: catalog and session errors
//! - 7xxx: configuration errors
//! - 8xxx: provisioning errors
//! - 9xxx: tenant errors
//!
//! ```rust
//! use tenantry_core::{ErrorCode, TenancyError};
//!
//! let err = TenancyError::invalid_tenant("tenant identifier must not be empty");
//! assert_eq!(err.code(), ErrorCode::InvalidTenant);
//! assert!(!err.is_retryable());
//! ```

use std::fmt;

use thiserror::Error;

use crate::naming::SchemaName;

/// Boxed error used as the cause of a [`TenancyError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for tenancy operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The pool could not supply a connection (T3001).
    ConnectionAcquisition = 3001,
    /// Schema existence lookup failed (T5001).
    SchemaIntrospection = 5001,
    /// Binding a connection to a schema failed (T5002).
    SchemaBind = 5002,
    /// Rebinding a connection to the default schema failed (T5003).
    SchemaReset = 5003,
    /// Invalid configuration (T7001).
    InvalidConfiguration = 7001,
    /// Schema creation or migration failed (T8001).
    Provisioning = 8001,
    /// Dropping a tenant schema failed (T8002).
    Deprovision = 8002,
    /// Tenant identifier cannot be mapped to a schema (T9001).
    InvalidTenant = 9001,
    /// Tenant context written outside a unit of work (T9002).
    NoUnitOfWork = 9002,
}

impl ErrorCode {
    /// Numeric value of the code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.as_u16())
    }
}

/// Errors produced by the connection router and schema provisioner.
#[derive(Debug, Error)]
pub enum TenancyError {
    /// The shared pool could not supply a connection.
    #[error("failed to acquire a connection: {source}")]
    ConnectionAcquisition {
        /// Underlying pool error.
        #[source]
        source: BoxError,
    },

    /// Checking whether a schema exists failed.
    #[error("failed to look up schema '{schema}': {source}")]
    SchemaIntrospection {
        /// Schema being looked up.
        schema: SchemaName,
        /// Underlying database error.
        #[source]
        source: BoxError,
    },

    /// Binding a connection's search path failed.
    #[error("failed to bind connection to schema '{schema}': {source}")]
    SchemaBind {
        /// Schema being bound.
        schema: SchemaName,
        /// Underlying database error.
        #[source]
        source: BoxError,
    },

    /// Creating or migrating a tenant schema failed.
    #[error("failed to provision schema '{schema}': {source}")]
    Provisioning {
        /// Schema being provisioned.
        schema: SchemaName,
        /// Underlying database or migration error.
        #[source]
        source: BoxError,
    },

    /// Dropping a tenant schema failed.
    #[error("failed to deprovision schema '{schema}': {source}")]
    Deprovision {
        /// Schema being dropped.
        schema: SchemaName,
        /// Underlying database error.
        #[source]
        source: BoxError,
    },

    /// Rebinding a released connection to the default schema failed.
    #[error("failed to reset connection from schema '{schema}': {source}")]
    SchemaReset {
        /// Schema the connection was bound to.
        schema: SchemaName,
        /// Underlying database error.
        #[source]
        source: BoxError,
    },

    /// The tenant identifier cannot be used.
    #[error("invalid tenant: {0}")]
    InvalidTenant(String),

    /// The tenant context was written outside a unit of work.
    #[error("no unit of work is active; wrap the work in TenantScope::run or with_tenant")]
    NoUnitOfWork,

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl TenancyError {
    /// Create a connection acquisition error.
    pub fn acquisition(source: impl Into<BoxError>) -> Self {
        Self::ConnectionAcquisition {
            source: source.into(),
        }
    }

    /// Create a schema introspection error.
    pub fn introspection(schema: &SchemaName, source: impl Into<BoxError>) -> Self {
        Self::SchemaIntrospection {
            schema: schema.clone(),
            source: source.into(),
        }
    }

    /// Create a schema bind error.
    pub fn bind(schema: &SchemaName, source: impl Into<BoxError>) -> Self {
        Self::SchemaBind {
            schema: schema.clone(),
            source: source.into(),
        }
    }

    /// Create a provisioning error.
    pub fn provisioning(schema: &SchemaName, source: impl Into<BoxError>) -> Self {
        Self::Provisioning {
            schema: schema.clone(),
            source: source.into(),
        }
    }

    /// Create a deprovisioning error.
    pub fn deprovision(schema: &SchemaName, source: impl Into<BoxError>) -> Self {
        Self::Deprovision {
            schema: schema.clone(),
            source: source.into(),
        }
    }

    /// Create a schema reset error.
    pub fn reset(schema: &SchemaName, source: impl Into<BoxError>) -> Self {
        Self::SchemaReset {
            schema: schema.clone(),
            source: source.into(),
        }
    }

    /// Create an invalid tenant error.
    pub fn invalid_tenant(message: impl Into<String>) -> Self {
        Self::InvalidTenant(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConnectionAcquisition { .. } => ErrorCode::ConnectionAcquisition,
            Self::SchemaIntrospection { .. } => ErrorCode::SchemaIntrospection,
            Self::SchemaBind { .. } => ErrorCode::SchemaBind,
            Self::Provisioning { .. } => ErrorCode::Provisioning,
            Self::Deprovision { .. } => ErrorCode::Deprovision,
            Self::SchemaReset { .. } => ErrorCode::SchemaReset,
            Self::InvalidTenant(_) => ErrorCode::InvalidTenant,
            Self::NoUnitOfWork => ErrorCode::NoUnitOfWork,
            Self::Config(_) => ErrorCode::InvalidConfiguration,
        }
    }

    /// Schema the failure concerns, if any.
    pub fn schema(&self) -> Option<&SchemaName> {
        match self {
            Self::SchemaIntrospection { schema, .. }
            | Self::SchemaBind { schema, .. }
            | Self::Provisioning { schema, .. }
            | Self::Deprovision { schema, .. }
            | Self::SchemaReset { schema, .. } => Some(schema),
            _ => None,
        }
    }

    /// Whether repeating the operation may succeed.
    ///
    /// Provisioning steps are idempotent, so a failed provisioning run can be
    /// retried as is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionAcquisition { .. }
                | Self::SchemaIntrospection { .. }
                | Self::Provisioning { .. }
        )
    }
}
