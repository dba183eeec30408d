//! Lazy creation, migration and teardown of tenant schemas.

use std::sync::Arc;

use tenantry_migrate::{MigrationReport, MigrationStatus, Migrator};
use tracing::{debug, error, info, warn};

use crate::backend::{ConnectionSource, SchemaConnection, SchemaState};
use crate::context::TenantId;
use crate::error::{TenancyError, TenancyResult};
use crate::lock::SchemaLocks;
use crate::naming::{SchemaName, SchemaNaming};

/// Ensures tenant schemas exist and are migrated; drops them on request.
///
/// Concurrent calls for the same schema are serialized: an in-process lock
/// orders tasks of this process, and a database advisory lock held for the
/// whole run orders processes. A caller that waited observes the schema as
/// already current and applies nothing.
///
/// Each run executes in one provisioning transaction. Other sessions see the
/// schema only once it is fully migrated, and a failed run leaves the schema
/// as it was before the run.
pub struct SchemaProvisioner<S: ConnectionSource> {
    source: Arc<S>,
    naming: SchemaNaming,
    migrator: Arc<Migrator>,
    locks: SchemaLocks,
}

impl<S: ConnectionSource> Clone for SchemaProvisioner<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            naming: self.naming.clone(),
            migrator: self.migrator.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<S: ConnectionSource> SchemaProvisioner<S> {
    /// Create a provisioner over a connection source.
    pub fn new(source: Arc<S>, naming: SchemaNaming, migrator: Arc<Migrator>) -> Self {
        Self {
            source,
            naming,
            migrator,
            locks: SchemaLocks::new(),
        }
    }

    /// The naming rules in use.
    pub fn naming(&self) -> &SchemaNaming {
        &self.naming
    }

    /// The migration set applied to every tenant schema.
    pub fn migrator(&self) -> &Migrator {
        &self.migrator
    }

    /// Create the tenant's schema if needed and apply pending migrations.
    ///
    /// Returns the number of migrations applied by this call. Safe to retry
    /// after a failure: the failed run is rolled back, existing schemas and
    /// applied migrations are skipped.
    pub async fn ensure_provisioned(&self, tenant: &TenantId) -> TenancyResult<usize> {
        let schema = self.tenant_schema(tenant)?;
        info!(tenant = %tenant, schema = %schema, "Starting tenant provisioning");

        let _guard = self.locks.acquire(&schema).await;
        let mut conn = self.source.acquire().await.map_err(TenancyError::acquisition)?;

        if let Err(e) = conn.lock_schema(&schema).await {
            self.source.discard(conn);
            let err = TenancyError::provisioning(&schema, e);
            error!(tenant = %tenant, error = %err, "Failed to provision tenant");
            return Err(err);
        }

        let outcome = self.provision_locked(&mut conn, &schema).await;
        let unlocked = conn.unlock_schema(&schema).await;

        match (outcome, unlocked) {
            (Ok(report), Ok(())) => {
                self.source.release(conn);
                info!(
                    tenant = %tenant,
                    schema = %schema,
                    applied = report.applied_count(),
                    duration_ms = report.duration_ms,
                    "Tenant provisioning completed"
                );
                Ok(report.applied_count())
            }
            (Ok(report), Err(e)) => {
                // closing the session releases its advisory locks
                warn!(schema = %schema, error = %e, "Failed to release schema lock, discarding connection");
                self.source.discard(conn);
                Ok(report.applied_count())
            }
            (Err(err), _) => {
                self.source.discard(conn);
                error!(tenant = %tenant, error = %err, "Failed to provision tenant");
                Err(err)
            }
        }
    }

    /// Drop the tenant's schema and every object in it.
    ///
    /// Returns `false` when the schema did not exist, which is not an error.
    pub async fn deprovision(&self, tenant: &TenantId) -> TenancyResult<bool> {
        let schema = self.tenant_schema(tenant)?;
        info!(tenant = %tenant, schema = %schema, "Starting tenant deletion");

        let _guard = self.locks.acquire(&schema).await;
        let mut conn = self.source.acquire().await.map_err(TenancyError::acquisition)?;

        match self.drop_if_present(&mut conn, &schema).await {
            Ok(dropped) => {
                self.source.release(conn);
                if dropped {
                    info!(schema = %schema, "Schema and all its objects have been dropped");
                } else {
                    warn!(schema = %schema, "Schema does not exist, nothing to delete");
                }
                Ok(dropped)
            }
            Err(err) => {
                self.source.discard(conn);
                error!(tenant = %tenant, error = %err, "Failed to delete tenant");
                Err(err)
            }
        }
    }

    /// Applied and pending migrations of a tenant schema. Everything is
    /// pending while the schema does not exist.
    pub async fn migration_status(&self, tenant: &TenantId) -> TenancyResult<MigrationStatus> {
        let schema = self.tenant_schema(tenant)?;
        let mut conn = self.source.acquire().await.map_err(TenancyError::acquisition)?;

        let state = match conn.schema_state(&schema).await {
            Ok(state) => state,
            Err(e) => {
                self.source.discard(conn);
                return Err(TenancyError::introspection(&schema, e));
            }
        };

        if state == SchemaState::Missing {
            self.source.release(conn);
            return Ok(MigrationStatus {
                applied: Vec::new(),
                pending: self
                    .migrator
                    .migrations()
                    .iter()
                    .map(|m| m.version.to_string())
                    .collect(),
            });
        }

        match self.migrator.status(&mut conn, schema.as_str()).await {
            Ok(status) => {
                self.source.release(conn);
                Ok(status)
            }
            Err(e) => {
                self.source.discard(conn);
                Err(TenancyError::provisioning(&schema, e))
            }
        }
    }

    /// Whether a task of this process is provisioning or dropping `schema`.
    pub fn is_busy(&self, schema: &SchemaName) -> bool {
        self.locks.is_locked(schema)
    }

    /// Wait until no task of this process is provisioning or dropping `schema`.
    pub async fn wait_idle(&self, schema: &SchemaName) {
        self.locks.wait_unlocked(schema).await;
    }

    async fn provision_locked(
        &self,
        conn: &mut S::Connection,
        schema: &SchemaName,
    ) -> TenancyResult<MigrationReport> {
        conn.begin_provisioning(schema)
            .await
            .map_err(|e| TenancyError::provisioning(schema, e))?;

        match self.create_and_migrate(conn, schema).await {
            Ok(report) => {
                conn.commit_provisioning(schema)
                    .await
                    .map_err(|e| TenancyError::provisioning(schema, e))?;
                Ok(report)
            }
            Err(err) => {
                if let Err(e) = conn.rollback_provisioning(schema).await {
                    warn!(schema = %schema, error = %e, "Failed to roll back provisioning");
                }
                Err(err)
            }
        }
    }

    async fn create_and_migrate(
        &self,
        conn: &mut S::Connection,
        schema: &SchemaName,
    ) -> TenancyResult<MigrationReport> {
        conn.create_schema(schema)
            .await
            .map_err(|e| TenancyError::provisioning(schema, e))?;
        debug!(schema = %schema, "Schema created or already exists");

        self.migrator
            .migrate(conn, schema.as_str())
            .await
            .map_err(|e| TenancyError::provisioning(schema, e))
    }

    async fn drop_if_present(
        &self,
        conn: &mut S::Connection,
        schema: &SchemaName,
    ) -> TenancyResult<bool> {
        let state = conn
            .schema_state(schema)
            .await
            .map_err(|e| TenancyError::deprovision(schema, e))?;
        if state == SchemaState::Missing {
            return Ok(false);
        }

        conn.lock_schema(schema)
            .await
            .map_err(|e| TenancyError::deprovision(schema, e))?;
        let dropped = conn.drop_schema(schema).await;
        let unlocked = conn.unlock_schema(schema).await;

        dropped.map_err(|e| TenancyError::deprovision(schema, e))?;
        unlocked.map_err(|e| TenancyError::deprovision(schema, e))?;
        Ok(true)
    }

    fn tenant_schema(&self, tenant: &TenantId) -> TenancyResult<SchemaName> {
        let schema = self.naming.checked_schema_for(tenant)?;
        if self.naming.is_default(&schema) {
            return Err(TenancyError::provisioning(
                &schema,
                "the default schema is shared and is never provisioned per tenant",
            ));
        }
        Ok(schema)
    }
}

impl<S: ConnectionSource> std::fmt::Debug for SchemaProvisioner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaProvisioner")
            .field("naming", &self.naming)
            .field("migrations", &self.migrator.migrations().len())
            .finish()
    }
}
