//! Configuration file parsing for `tenantry.toml`.
//!
//! ```toml
//! [naming]
//! schema_prefix = "tenant_"
//! default_schema = "public"
//!
//! [migrations]
//! directory = "db/migration/tenant"
//!
//! [database]
//! url = "${DATABASE_URL}"
//!
//! [database.pool]
//! max_connections = 20
//! ```
//!
//! Every section and key is optional. `${VAR}` references are replaced with
//! the environment variable's value before parsing; unset variables are left
//! as written.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tenantry_migrate::{DEFAULT_HISTORY_TABLE, MigrationConfig};

use crate::error::{TenancyError, TenancyResult};
use crate::naming::{DEFAULT_SCHEMA, DEFAULT_SCHEMA_PREFIX, MAX_IDENTIFIER_LEN, SchemaNaming};

/// Main configuration structure for `tenantry.toml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TenancyConfig {
    /// Schema naming rules.
    #[serde(default)]
    pub naming: NamingConfig,

    /// Tenant migration settings.
    #[serde(default)]
    pub migrations: MigrationSettings,

    /// Database connection settings.
    #[serde(default)]
    pub database: DatabaseSettings,
}

impl TenancyConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> TenancyResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TenancyError::config(format!("failed to read {}: {e}", path.display()))
        })?;

        content.parse()
    }

    /// The database URL, if configured.
    pub fn database_url(&self) -> Option<&str> {
        self.database.url.as_deref()
    }

    /// Naming rules described by the `[naming]` section.
    pub fn schema_naming(&self) -> SchemaNaming {
        SchemaNaming::new()
            .with_prefix(&self.naming.schema_prefix)
            .with_default_schema(&self.naming.default_schema)
    }

    /// Migration runner settings described by the `[migrations]` section.
    pub fn migration_config(&self) -> MigrationConfig {
        MigrationConfig::new()
            .migrations_dir(&self.migrations.directory)
            .history_table(&self.migrations.history_table)
            .validate_on_migrate(self.migrations.validate_on_migrate)
    }

    /// Check values serde cannot check on its own.
    pub fn validate(&self) -> TenancyResult<()> {
        if self.naming.default_schema.is_empty() {
            return Err(TenancyError::config("naming.default_schema must not be empty"));
        }
        if self.naming.default_schema.len() > MAX_IDENTIFIER_LEN {
            return Err(TenancyError::config(format!(
                "naming.default_schema exceeds {MAX_IDENTIFIER_LEN} bytes"
            )));
        }
        if self.naming.schema_prefix.is_empty() {
            return Err(TenancyError::config(
                "naming.schema_prefix must not be empty, tenant schemas would collide with other schemas",
            ));
        }
        if self.naming.default_schema.starts_with(&self.naming.schema_prefix) {
            return Err(TenancyError::config(format!(
                "naming.default_schema '{}' starts with schema_prefix '{}' and would be taken for a tenant schema",
                self.naming.default_schema, self.naming.schema_prefix
            )));
        }
        if self.migrations.history_table.is_empty() {
            return Err(TenancyError::config("migrations.history_table must not be empty"));
        }
        if self.database.pool.max_connections == 0 {
            return Err(TenancyError::config("database.pool.max_connections must be at least 1"));
        }
        Ok(())
    }
}

impl FromStr for TenancyConfig {
    type Err = TenancyError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let expanded = expand_env_vars(content)?;
        let config: Self = toml::from_str(&expanded)
            .map_err(|e| TenancyError::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

/// Schema naming configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NamingConfig {
    /// Prefix of every tenant schema.
    #[serde(default = "default_schema_prefix")]
    pub schema_prefix: String,

    /// Shared schema used when no tenant is active.
    #[serde(default = "default_schema")]
    pub default_schema: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            schema_prefix: default_schema_prefix(),
            default_schema: default_schema(),
        }
    }
}

fn default_schema_prefix() -> String {
    DEFAULT_SCHEMA_PREFIX.to_string()
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

/// Tenant migration configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationSettings {
    /// Directory holding `V<version>__<description>.sql` scripts.
    #[serde(default = "default_migrations_dir")]
    pub directory: PathBuf,

    /// History table created in every tenant schema.
    #[serde(default = "default_history_table")]
    pub history_table: String,

    /// Fail when an applied script changed after it was applied.
    #[serde(default = "default_true")]
    pub validate_on_migrate: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            directory: default_migrations_dir(),
            history_table: default_history_table(),
            validate_on_migrate: true,
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("db/migration/tenant")
}

fn default_history_table() -> String {
    DEFAULT_HISTORY_TABLE.to_string()
}

fn default_true() -> bool {
    true
}

/// Database connection configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSettings {
    /// Connection URL (supports `${ENV_VAR}` interpolation).
    pub url: Option<String>,

    /// Connection pool settings.
    #[serde(default)]
    pub pool: PoolSettings,
}

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSettings {
    /// Maximum number of pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// How long a request waits for a free connection, in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Upper bound for checking an idle connection before it is reused, in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connection_timeout_secs: default_connection_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl PoolSettings {
    /// Wait timeout for a free connection.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Timeout for checking an idle connection before reuse.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

fn default_max_connections() -> usize {
    10
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

/// Replace `${VAR}` with the value of environment variable `VAR`.
fn expand_env_vars(content: &str) -> TenancyResult<String> {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| TenancyError::config(e.to_string()))?;

    let mut result = content.to_string();
    for cap in re.captures_iter(content) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }
    Ok(result)
}
