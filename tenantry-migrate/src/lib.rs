//! # tenantry-migrate
//!
//! Versioned migration runner used to bring tenant schemas up to date.
//!
//! Migrations are plain SQL files discovered from one directory and applied
//! to a schema in ascending version order. Each schema records what it has
//! applied in its own history table, so tenants never share migration
//! metadata.
//!
//! ```text
//! db/migration/tenant/
//! ├── V1__create_users.sql
//! ├── V2__create_trips.sql
//! └── V10__add_trip_index.sql
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tenantry_migrate::{MigrationConfig, Migrator};
//!
//! let migrator = Migrator::load(MigrationConfig::new().migrations_dir("db/migration/tenant")).await?;
//!
//! // `conn` implements `MigrationStore`
//! let report = migrator.migrate(&mut conn, "tenant_acme_corp").await?;
//! println!("applied {} migrations", report.applied_count());
//! ```
//!
//! The runner does not lock. Callers that may migrate the same schema from
//! several tasks or processes must serialize those runs themselves.

pub mod engine;
pub mod error;
pub mod history;
pub mod migration;
pub mod source;

pub use engine::{MigrationConfig, MigrationReport, MigrationStatus, Migrator};
pub use error::{MigrateResult, MigrationError};
pub use history::{DEFAULT_HISTORY_TABLE, HistoryTable, MigrationRecord, MigrationStore, quote_ident};
pub use migration::{Migration, MigrationVersion, compute_checksum};
pub use source::MigrationSource;
