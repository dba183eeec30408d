//! # tenantry-core
//!
//! Schema-per-tenant routing for a shared connection pool.
//!
//! This crate provides:
//! - Tenant identifier to schema name mapping (`sanitize`, `desanitize`, [`SchemaNaming`])
//! - A per-unit-of-work tenant context ([`TenantContext`], [`TenantScope`])
//! - Lazy, serialized provisioning of tenant schemas ([`SchemaProvisioner`])
//! - A connection router that binds and resets search paths ([`TenantRouter`])
//! - Configuration loading ([`TenancyConfig`]) and logging setup
//!
//! Database access goes through the [`ConnectionSource`] and
//! [`SchemaConnection`] traits; `tenantry-postgres` implements them for
//! PostgreSQL.
//!
//! ## Naming
//!
//! ```rust
//! use tenantry_core::{SchemaNaming, TenantId, sanitize};
//!
//! assert_eq!(sanitize("acme-corp"), "acme_corp");
//!
//! let naming = SchemaNaming::new();
//! let acme = TenantId::parse("acme-corp").unwrap();
//! assert_eq!(naming.schema_for(&acme).as_str(), "tenant_acme_corp");
//! assert_eq!(naming.schema_for(&TenantId::default_tenant()).as_str(), "public");
//! ```
//!
//! ## Context
//!
//! ```rust
//! use tenantry_core::{TenantContext, TenantId, TenantScope};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! TenantScope::run(async {
//!     assert!(TenantContext::get().is_default());
//!     TenantContext::set(TenantId::parse("acme").unwrap()).unwrap();
//!     assert_eq!(TenantContext::get().as_str(), "acme");
//!     TenantContext::clear().unwrap();
//!     assert!(TenantContext::get().is_default());
//! })
//! .await;
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod logging;
pub mod naming;
pub mod provisioner;
pub mod router;

pub use backend::{ConnectionSource, DbError, SchemaConnection, SchemaState};
pub use config::{DatabaseSettings, MigrationSettings, NamingConfig, PoolSettings, TenancyConfig};
pub use context::{CurrentTenant, DEFAULT_TENANT, SyncTenantGuard, TenantContext, TenantId, TenantScope, with_tenant};
pub use error::{BoxError, ErrorCode, TenancyError, TenancyResult};
pub use lock::{SchemaLockGuard, SchemaLocks};
pub use naming::{SchemaName, SchemaNaming, desanitize, sanitize};
pub use provisioner::SchemaProvisioner;
pub use router::{ReleaseOutcome, TenantLease, TenantRouter};
