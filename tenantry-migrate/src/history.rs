//! Per-schema migration history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MigrateResult;
use crate::migration::Migration;

/// Default name of the history table created inside each schema.
pub const DEFAULT_HISTORY_TABLE: &str = "_tenantry_migrations";

/// A record of a migration applied to one schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Canonical version string.
    pub version: String,
    /// Description at the time it was applied.
    pub description: String,
    /// Checksum of the applied script.
    pub checksum: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
    /// Execution time in milliseconds.
    pub execution_ms: i64,
}

/// Location of a history table: the schema it lives in and its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTable {
    schema: String,
    table: String,
}

impl HistoryTable {
    /// Create a history table reference.
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Schema holding the table.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Unqualified table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Fully qualified, quoted table name.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// SQL creating the table if it is absent (PostgreSQL).
    pub fn create_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                version VARCHAR(64) PRIMARY KEY,\n    \
                description TEXT NOT NULL,\n    \
                checksum VARCHAR(64) NOT NULL,\n    \
                applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT clock_timestamp(),\n    \
                execution_ms BIGINT NOT NULL DEFAULT 0\n\
            )",
            self.qualified()
        )
    }

    /// SQL listing applied migrations.
    pub fn select_sql(&self) -> String {
        format!(
            "SELECT version, description, checksum, applied_at, execution_ms FROM {}",
            self.qualified()
        )
    }

    /// SQL recording an applied migration; binds version, description, checksum, execution_ms.
    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (version, description, checksum, execution_ms) \
             VALUES ($1, $2, $3, $4) RETURNING applied_at",
            self.qualified()
        )
    }
}

/// Quote an identifier for PostgreSQL, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Storage the migrator runs against.
///
/// Implemented by database connections. `apply` must run the script with the
/// history table's schema as the search path and record it atomically, so a
/// failed script leaves no history row behind.
#[async_trait::async_trait]
pub trait MigrationStore: Send {
    /// Create the history table if it does not exist.
    async fn ensure_history(&mut self, history: &HistoryTable) -> MigrateResult<()>;

    /// List migrations already applied.
    async fn applied(&mut self, history: &HistoryTable) -> MigrateResult<Vec<MigrationRecord>>;

    /// Execute a migration and record it.
    async fn apply(
        &mut self,
        history: &HistoryTable,
        migration: &Migration,
    ) -> MigrateResult<MigrationRecord>;
}
