//! Migration runner.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::{MigrateResult, MigrationError};
use crate::history::{DEFAULT_HISTORY_TABLE, HistoryTable, MigrationRecord, MigrationStore};
use crate::migration::Migration;
use crate::source::{MigrationSource, sort_and_check};

/// Configuration for the migration runner.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory holding `V<version>__<description>.sql` scripts.
    pub migrations_dir: PathBuf,
    /// History table created inside every migrated schema.
    pub history_table: String,
    /// Whether to fail when an applied script has changed on disk.
    pub validate_on_migrate: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("db/migration/tenant"),
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
            validate_on_migrate: true,
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the migrations directory.
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Set the history table name.
    pub fn history_table(mut self, table: impl Into<String>) -> Self {
        self.history_table = table.into();
        self
    }

    /// Set whether checksums of applied migrations are validated.
    pub fn validate_on_migrate(mut self, validate: bool) -> Self {
        self.validate_on_migrate = validate;
        self
    }
}

/// Outcome of migrating one schema.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    /// Schema that was migrated.
    pub schema: String,
    /// Versions applied by this run, in order.
    pub applied: Vec<String>,
    /// Total duration in milliseconds.
    pub duration_ms: i64,
}

impl MigrationReport {
    /// Number of migrations applied by this run.
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Whether the schema was already current.
    pub fn was_current(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Applied and pending migrations of one schema.
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Applied migrations as recorded in the schema.
    pub applied: Vec<MigrationRecord>,
    /// Versions not yet applied, ascending.
    pub pending: Vec<String>,
}

impl MigrationStatus {
    /// Whether nothing is pending.
    pub fn is_current(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Applies a fixed, ordered set of migrations to individual schemas.
///
/// The set is loaded once and shared; each `migrate` call brings one schema
/// up to date. Callers serialize concurrent runs against the same schema.
#[derive(Debug, Clone)]
pub struct Migrator {
    config: MigrationConfig,
    migrations: Arc<[Migration]>,
}

impl Migrator {
    /// Load migrations from the configured directory.
    pub async fn load(config: MigrationConfig) -> MigrateResult<Self> {
        let migrations = MigrationSource::new(&config.migrations_dir).load().await?;
        info!(
            dir = %config.migrations_dir.display(),
            count = migrations.len(),
            "Loaded tenant migrations"
        );
        Ok(Self {
            config,
            migrations: migrations.into(),
        })
    }

    /// Build a migrator from in-memory migrations.
    pub fn from_migrations(config: MigrationConfig, migrations: Vec<Migration>) -> MigrateResult<Self> {
        let migrations = sort_and_check(migrations)?;
        Ok(Self {
            config,
            migrations: migrations.into(),
        })
    }

    /// The ordered migration set.
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// The runner configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// History table location for a schema.
    pub fn history_for(&self, schema: &str) -> HistoryTable {
        HistoryTable::new(schema, &self.config.history_table)
    }

    /// Report applied and pending migrations without changing anything.
    pub async fn status<S>(&self, store: &mut S, schema: &str) -> MigrateResult<MigrationStatus>
    where
        S: MigrationStore + ?Sized,
    {
        let history = self.history_for(schema);
        store.ensure_history(&history).await?;
        let applied = store.applied(&history).await?;

        let pending = self
            .pending(schema, &applied)?
            .into_iter()
            .map(|m| m.version.to_string())
            .collect();

        Ok(MigrationStatus { applied, pending })
    }

    /// Apply every pending migration to `schema` in ascending version order.
    pub async fn migrate<S>(&self, store: &mut S, schema: &str) -> MigrateResult<MigrationReport>
    where
        S: MigrationStore + ?Sized,
    {
        let start = Instant::now();
        let history = self.history_for(schema);

        store.ensure_history(&history).await?;
        let applied = store.applied(&history).await?;
        let pending = self.pending(schema, &applied)?;

        let mut report = MigrationReport {
            schema: schema.to_string(),
            applied: Vec::with_capacity(pending.len()),
            duration_ms: 0,
        };

        for migration in pending {
            debug!(
                schema = %schema,
                version = %migration.version,
                description = %migration.description,
                "Applying migration"
            );
            let record = store.apply(&history, migration).await?;
            report.applied.push(record.version);
        }

        report.duration_ms = start.elapsed().as_millis() as i64;
        Ok(report)
    }

    /// Migrations missing from `applied`, validating checksums of the rest.
    fn pending<'a>(
        &'a self,
        schema: &str,
        applied: &[MigrationRecord],
    ) -> MigrateResult<Vec<&'a Migration>> {
        let recorded: HashMap<&str, &MigrationRecord> =
            applied.iter().map(|r| (r.version.as_str(), r)).collect();

        let mut pending = Vec::new();
        for migration in self.migrations.iter() {
            let version = migration.version.to_string();
            match recorded.get(version.as_str()) {
                None => pending.push(migration),
                Some(record) => {
                    if self.config.validate_on_migrate && record.checksum != migration.checksum {
                        return Err(MigrationError::ChecksumMismatch {
                            schema: schema.to_string(),
                            version,
                            recorded: record.checksum.clone(),
                            found: migration.checksum.clone(),
                        });
                    }
                }
            }
        }

        Ok(pending)
    }
}
