//! Migration discovery on the filesystem.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{MigrateResult, MigrationError};
use crate::migration::{Migration, MigrationVersion, compute_checksum, parse_file_name};

/// Reads versioned migration scripts from a directory.
#[derive(Debug, Clone)]
pub struct MigrationSource {
    dir: PathBuf,
}

impl MigrationSource {
    /// Create a source for the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the migrations directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every versioned script, sorted by ascending version.
    ///
    /// A missing directory yields an empty set.
    pub async fn load(&self) -> MigrateResult<Vec<Migration>> {
        if !tokio::fs::try_exists(&self.dir).await? {
            debug!(dir = %self.dir.display(), "Migration directory does not exist");
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut found: Vec<(MigrationVersion, String, PathBuf)> = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }

            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            match parse_file_name(file_name)? {
                Some((version, description)) => found.push((version, description, path)),
                None => debug!(file = %file_name, "Skipping non-versioned file"),
            }
        }

        let mut migrations = Vec::with_capacity(found.len());
        for (version, description, path) in found {
            let script = tokio::fs::read_to_string(&path).await?;
            migrations.push(Migration {
                checksum: compute_checksum(&script),
                version,
                description,
                script,
                path: Some(path),
            });
        }

        sort_and_check(migrations)
    }
}

/// Sort migrations by version and reject duplicates.
pub fn sort_and_check(migrations: Vec<Migration>) -> MigrateResult<Vec<Migration>> {
    let mut by_version: BTreeMap<MigrationVersion, Migration> = BTreeMap::new();

    for migration in migrations {
        if let Some(existing) = by_version.get(&migration.version) {
            return Err(MigrationError::DuplicateVersion {
                version: migration.version.to_string(),
                first: existing.description.clone(),
                second: migration.description,
            });
        }
        by_version.insert(migration.version.clone(), migration);
    }

    Ok(by_version.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn test_load_orders_by_numeric_version() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "V10__add_index.sql", "CREATE INDEX trips_idx ON trips (id);");
        write(dir.path(), "V2__create_trips.sql", "CREATE TABLE trips (id BIGINT);");
        write(dir.path(), "V1__create_users.sql", "CREATE TABLE users (id BIGINT);");
        write(dir.path(), "notes.txt", "not a migration");

        let migrations = MigrationSource::new(dir.path()).load().await.unwrap();
        let versions: Vec<String> = migrations.iter().map(|m| m.version.to_string()).collect();

        assert_eq!(versions, vec!["1", "2", "10"]);
        assert_eq!(migrations[1].description, "create trips");
        assert!(migrations[0].path.is_some());
    }

    #[tokio::test]
    async fn test_load_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = MigrationSource::new(dir.path().join("absent"));

        assert!(source.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_rejects_duplicate_versions() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "V1__create_users.sql", "CREATE TABLE users (id BIGINT);");
        write(dir.path(), "V1_0__create_people.sql", "CREATE TABLE people (id BIGINT);");
        write(dir.path(), "V1.0__again.sql", "SELECT 1;");

        let err = MigrationSource::new(dir.path()).load().await.unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateVersion { .. }));
    }

    #[tokio::test]
    async fn test_load_rejects_version_differing_by_trailing_zero() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "V1__create_users.sql", "CREATE TABLE users (id BIGINT);");
        write(dir.path(), "V1.0__create_people.sql", "CREATE TABLE people (id BIGINT);");

        let err = MigrationSource::new(dir.path()).load().await.unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateVersion { .. }));
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_name() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "V1_create_users.sql", "CREATE TABLE users (id BIGINT);");

        let err = MigrationSource::new(dir.path()).load().await.unwrap_err();
        assert!(err.is_source_error());
    }
}
