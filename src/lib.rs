//! # Tenantry
//!
//! Schema-per-tenant isolation for PostgreSQL on one shared connection pool.
//!
//! Tenantry provides:
//! - Deterministic tenant to schema mapping (`acme-corp` lives in `tenant_acme_corp`)
//! - A per-unit-of-work tenant context
//! - Lazy provisioning: a tenant's schema is created and migrated on first use
//! - Connection routing that binds each lease to the tenant's schema and
//!   resets it before the connection returns to the pool
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tenantry::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), TenancyError> {
//!     tenantry::logging::init();
//!
//!     let config = TenancyConfig::from_file("tenantry.toml")?;
//!     let router = tenantry::connect(&config).await?;
//!
//!     with_tenant(TenantId::parse("acme-corp")?, async {
//!         let conn = router.get_connection().await?;
//!         conn.execute("INSERT INTO trips (name) VALUES ($1)", &[&"Lisbon"])
//!             .await
//!             .map_err(|e| TenancyError::config(e.to_string()))?;
//!         router.close_connection(conn).await;
//!         Ok(())
//!     })
//!     .await
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::Arc;

use tracing::info;

pub use tenantry_core::{
    ConnectionSource, CurrentTenant, DbError, ErrorCode, ReleaseOutcome, SchemaConnection,
    SchemaName, SchemaNaming, SchemaProvisioner, SchemaState, TenancyConfig, TenancyError,
    TenancyResult, TenantContext, TenantId, TenantLease, TenantRouter, TenantScope, desanitize,
    sanitize, with_tenant,
};

/// Logging setup.
pub mod logging {
    pub use tenantry_core::logging::*;
}

/// Migration runner.
pub mod migrate {
    pub use tenantry_migrate::*;
}

/// PostgreSQL backend.
pub mod postgres {
    pub use tenantry_postgres::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::postgres::{PgConnection, PgPool};
    pub use crate::{
        ReleaseOutcome, SchemaNaming, TenancyConfig, TenancyError, TenancyResult, TenantContext,
        TenantId, TenantLease, TenantRouter, TenantScope, with_tenant,
    };
}

/// Router over the PostgreSQL backend.
pub type PgTenantRouter = TenantRouter<tenantry_postgres::PgPool>;

/// Build a router from configuration.
///
/// Creates the connection pool and loads the tenant migrations. No
/// connection is opened and no schema is touched until the first request.
pub async fn connect(config: &TenancyConfig) -> TenancyResult<PgTenantRouter> {
    config.validate()?;
    let url = config
        .database_url()
        .ok_or_else(|| TenancyError::config("database.url is not set"))?;

    let pool = tenantry_postgres::PgPool::from_settings(url, &config.database.pool)
        .map_err(|e| TenancyError::config(e.to_string()))?;

    let migrator = tenantry_migrate::Migrator::load(config.migration_config())
        .await
        .map_err(|e| TenancyError::config(e.to_string()))?;

    let naming = config.schema_naming();
    info!(
        prefix = %naming.prefix(),
        default_schema = %naming.default_schema(),
        migrations = migrator.migrations().len(),
        "Tenant router ready"
    );

    Ok(TenantRouter::new(Arc::new(pool), naming, Arc::new(migrator)))
}
