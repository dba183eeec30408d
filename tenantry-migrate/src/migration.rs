//! Versioned migration scripts.

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::{MigrateResult, MigrationError};

/// A migration version such as `1`, `1.2` or `2024_01_15`.
///
/// Segments are compared numerically, so `2` sorts before `10`. Dots and
/// underscores are interchangeable separators; the canonical rendering uses dots.
/// Trailing zero segments are dropped, so `1`, `1.0` and `1_0_0` are one version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MigrationVersion(Vec<u64>);

impl MigrationVersion {
    /// Parse a version string.
    pub fn parse(raw: &str) -> MigrateResult<Self> {
        if raw.is_empty() {
            return Err(MigrationError::invalid("empty migration version"));
        }

        let mut segments = raw
            .split(['.', '_'])
            .map(|segment| {
                segment.parse::<u64>().map_err(|_| {
                    MigrationError::invalid(format!("invalid version segment '{segment}' in '{raw}'"))
                })
            })
            .collect::<MigrateResult<Vec<_>>>()?;

        while segments.len() > 1 && segments.last() == Some(&0) {
            segments.pop();
        }

        Ok(Self(segments))
    }

    /// Numeric segments of this version.
    pub fn segments(&self) -> &[u64] {
        &self.0
    }
}

impl Ord for MigrationVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for MigrationVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for MigrationVersion {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A single versioned migration script.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version label.
    pub version: MigrationVersion,
    /// Human readable description.
    pub description: String,
    /// SQL to execute.
    pub script: String,
    /// SHA-256 of the script, hex encoded.
    pub checksum: String,
    /// File the script was read from, if any.
    pub path: Option<PathBuf>,
}

impl Migration {
    /// Create a migration from an in-memory script.
    pub fn new(
        version: &str,
        description: impl Into<String>,
        script: impl Into<String>,
    ) -> MigrateResult<Self> {
        let script = script.into();
        Ok(Self {
            version: MigrationVersion::parse(version)?,
            description: description.into(),
            checksum: compute_checksum(&script),
            script,
            path: None,
        })
    }

    /// Set the path this migration was loaded from.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Compute the checksum recorded for a script.
pub fn compute_checksum(script: &str) -> String {
    hex::encode(Sha256::digest(script.as_bytes()))
}

/// Parse a file name of the form `V<version>__<description>.sql`.
///
/// Returns `Ok(None)` for files that are not versioned migrations at all
/// (other extensions, repeatable `R__` scripts, notes).
pub fn parse_file_name(file_name: &str) -> MigrateResult<Option<(MigrationVersion, String)>> {
    let Some(stem) = file_name.strip_suffix(".sql") else {
        return Ok(None);
    };
    let Some(rest) = stem.strip_prefix('V') else {
        return Ok(None);
    };

    let (version, description) = rest.split_once("__").ok_or_else(|| {
        MigrationError::invalid(format!(
            "migration file '{file_name}' must be named V<version>__<description>.sql"
        ))
    })?;

    let version = MigrationVersion::parse(version)?;
    let description = description.replace('_', " ");

    Ok(Some((version, description)))
}
