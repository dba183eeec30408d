//! Mapping between tenant identifiers and schema names.
//!
//! A tenant `acme-corp` lives in schema `tenant_acme_corp`; the default tenant
//! lives in the shared default schema. The mapping is pure, so every process
//! and every component derives the same schema for the same tenant.
//!
//! The mapping is lossy: `acme-corp` and `acme_corp` both map to
//! `tenant_acme_corp`. [`SchemaNaming::find_collisions`] reports such groups
//! instead of silently merging them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tenantry_migrate::quote_ident;

use crate::context::TenantId;
use crate::error::{TenancyError, TenancyResult};

/// Character in tenant identifiers that is not allowed in schema names.
pub const SEPARATOR: char = '-';

/// Replacement used for [`SEPARATOR`].
pub const SUBSTITUTE: char = '_';

/// Default prefix of tenant schemas.
pub const DEFAULT_SCHEMA_PREFIX: &str = "tenant_";

/// Default shared schema.
pub const DEFAULT_SCHEMA: &str = "public";

/// Longest identifier PostgreSQL keeps without truncation, in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Map a tenant identifier to a schema-safe token.
pub fn sanitize(id: &str) -> String {
    id.replace(SEPARATOR, &SUBSTITUTE.to_string())
}

/// Reverse [`sanitize`].
///
/// Not an inverse for identifiers that already contained [`SUBSTITUTE`]:
/// `acme_corp` sanitizes to itself and desanitizes to `acme-corp`.
pub fn desanitize(token: &str) -> String {
    token.replace(SUBSTITUTE, &SEPARATOR.to_string())
}

/// A database schema name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaName(String);

impl SchemaName {
    /// Wrap a raw schema name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as a quoted SQL identifier.
    pub fn quoted(&self) -> String {
        quote_ident(&self.0)
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SchemaName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Naming rules shared by the router and the provisioner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNaming {
    prefix: String,
    default_schema: SchemaName,
}

impl Default for SchemaNaming {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_SCHEMA_PREFIX.to_string(),
            default_schema: SchemaName::new(DEFAULT_SCHEMA),
        }
    }
}

impl SchemaNaming {
    /// Create naming rules with the default prefix and default schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tenant schema prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the shared default schema.
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = SchemaName::new(schema);
        self
    }

    /// The tenant schema prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The shared default schema.
    pub fn default_schema(&self) -> &SchemaName {
        &self.default_schema
    }

    /// Derive the schema for a tenant.
    pub fn schema_for(&self, tenant: &TenantId) -> SchemaName {
        if tenant.is_default() {
            return self.default_schema.clone();
        }
        SchemaName(format!("{}{}", self.prefix, sanitize(tenant.as_str())))
    }

    /// Derive the schema for a tenant and check it is usable as an identifier.
    pub fn checked_schema_for(&self, tenant: &TenantId) -> TenancyResult<SchemaName> {
        let schema = self.schema_for(tenant);
        if schema.as_str().len() > MAX_IDENTIFIER_LEN {
            return Err(TenancyError::invalid_tenant(format!(
                "schema name for tenant '{tenant}' exceeds {MAX_IDENTIFIER_LEN} bytes"
            )));
        }
        Ok(schema)
    }

    /// Whether `schema` is the shared default schema.
    pub fn is_default(&self, schema: &SchemaName) -> bool {
        *schema == self.default_schema
    }

    /// Recover the tenant identifier for a tenant schema.
    ///
    /// Returns `None` for schemas outside the tenant prefix. Subject to the
    /// same loss as [`desanitize`].
    pub fn tenant_for(&self, schema: &SchemaName) -> Option<TenantId> {
        if self.is_default(schema) {
            return Some(TenantId::default_tenant());
        }
        let token = schema.as_str().strip_prefix(self.prefix.as_str())?;
        TenantId::parse(desanitize(token)).ok()
    }

    /// Group identifiers that map to the same schema.
    ///
    /// Only schemas claimed by two or more distinct identifiers are returned.
    pub fn find_collisions<'a, I>(&self, ids: I) -> Vec<(SchemaName, Vec<TenantId>)>
    where
        I: IntoIterator<Item = &'a TenantId>,
    {
        let mut by_schema: BTreeMap<SchemaName, Vec<TenantId>> = BTreeMap::new();
        for id in ids {
            let claimants = by_schema.entry(self.schema_for(id)).or_default();
            if !claimants.contains(id) {
                claimants.push(id.clone());
            }
        }

        by_schema
            .into_iter()
            .filter(|(_, claimants)| claimants.len() > 1)
            .collect()
    }
}
