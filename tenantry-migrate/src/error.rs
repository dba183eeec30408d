//! Error types for the migration runner.

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur while loading or applying migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// Invalid migration file or format.
    #[error("Invalid migration: {0}")]
    InvalidMigration(String),

    /// Two scripts declare the same version.
    #[error("Duplicate migration version {version}: '{first}' and '{second}'")]
    DuplicateVersion {
        /// Conflicting version.
        version: String,
        /// Description of the first script.
        first: String,
        /// Description of the second script.
        second: String,
    },

    /// An applied migration was modified afterwards.
    #[error(
        "Checksum mismatch for migration {version} in schema '{schema}': recorded {recorded}, found {found}"
    )]
    ChecksumMismatch {
        /// Schema whose history disagrees.
        schema: String,
        /// Migration version.
        version: String,
        /// Checksum stored in the history table.
        recorded: String,
        /// Checksum of the script on disk.
        found: String,
    },

    /// Executing a migration script failed.
    #[error("Migration {version} failed in schema '{schema}': {message}")]
    ScriptFailed {
        /// Schema being migrated.
        schema: String,
        /// Migration version.
        version: String,
        /// Underlying failure.
        message: String,
    },
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an invalid migration error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidMigration(msg.into())
    }

    /// Create a script failure error.
    pub fn script_failed(
        schema: impl Into<String>,
        version: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ScriptFailed {
            schema: schema.into(),
            version: version.into(),
            message: message.into(),
        }
    }

    /// Check if this error came from the migration source rather than the database.
    pub fn is_source_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::InvalidMigration(_) | Self::DuplicateVersion { .. }
        )
    }
}
