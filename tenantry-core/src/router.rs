//! Tenant-aware connection routing.
//!
//! The router resolves the active tenant to a schema, provisions the schema on
//! first use, and hands out a [`TenantLease`] whose search path is bound to it.
//! Every lease must go back through [`TenantRouter::close_connection`], which
//! rebinds the connection to the default schema before the pool sees it again.
//!
//! ```rust,ignore
//! let router = TenantRouter::new(pool, SchemaNaming::new(), migrator);
//!
//! with_tenant(TenantId::parse("acme-corp")?, async {
//!     let mut conn = router.get_connection().await?;
//!     conn.execute("INSERT INTO trips (name) VALUES ($1)", &[&"Lisbon"]).await?;
//!     router.close_connection(conn).await;
//!     Ok(())
//! })
//! .await?;
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use futures::future::BoxFuture;
use tenantry_migrate::Migrator;
use tracing::{debug, info, warn};

use crate::backend::{ConnectionSource, SchemaConnection, SchemaState};
use crate::context::{CurrentTenant, TenantContext, TenantId};
use crate::error::{TenancyError, TenancyResult};
use crate::naming::{SchemaName, SchemaNaming};
use crate::provisioner::SchemaProvisioner;

/// What happened to a connection handed back to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Rebound to the default schema and returned to the pool.
    Released,
    /// Closed because it could not be rebound.
    Discarded,
}

impl ReleaseOutcome {
    /// Whether the connection went back to the pool.
    pub fn is_released(self) -> bool {
        self == Self::Released
    }
}

/// Routes connection requests to tenant schemas.
pub struct TenantRouter<S: ConnectionSource> {
    source: Arc<S>,
    naming: SchemaNaming,
    provisioner: SchemaProvisioner<S>,
    current: Arc<dyn CurrentTenant>,
}

impl<S: ConnectionSource> Clone for TenantRouter<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            naming: self.naming.clone(),
            provisioner: self.provisioner.clone(),
            current: self.current.clone(),
        }
    }
}

impl<S: ConnectionSource> TenantRouter<S> {
    /// Create a router that reads the active tenant from [`TenantContext`].
    pub fn new(source: Arc<S>, naming: SchemaNaming, migrator: Arc<Migrator>) -> Self {
        let provisioner = SchemaProvisioner::new(source.clone(), naming.clone(), migrator);
        Self {
            source,
            naming,
            provisioner,
            current: Arc::new(TenantContext),
        }
    }

    /// Resolve the active tenant with `resolver` instead of [`TenantContext`].
    pub fn with_current_tenant(mut self, resolver: impl CurrentTenant + 'static) -> Self {
        self.current = Arc::new(resolver);
        self
    }

    /// The naming rules in use.
    pub fn naming(&self) -> &SchemaNaming {
        &self.naming
    }

    /// The provisioner used for missing schemas.
    pub fn provisioner(&self) -> &SchemaProvisioner<S> {
        &self.provisioner
    }

    /// The underlying connection source.
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Connections are held for the whole unit of work, never released
    /// between statements.
    pub fn supports_aggressive_release(&self) -> bool {
        false
    }

    /// Lease a connection bound to the active tenant's schema.
    pub async fn get_connection(&self) -> TenancyResult<TenantLease<S>> {
        let tenant = self.current.current_tenant();
        self.get_connection_for(&tenant).await
    }

    /// Lease a connection bound to `tenant`'s schema, provisioning it first
    /// if it does not exist yet.
    ///
    /// A schema this process is still provisioning is waited for, so the
    /// lease always sees the schema fully migrated.
    pub async fn get_connection_for(&self, tenant: &TenantId) -> TenancyResult<TenantLease<S>> {
        let schema = self.naming.checked_schema_for(tenant)?;
        info!(tenant = %tenant, schema = %schema, "Selecting schema for tenant");

        if self.naming.is_default(&schema) {
            let conn = self.acquire().await?;
            return self.bind(conn, schema, tenant.clone()).await;
        }

        let mut conn = self.acquire().await?;
        let mut state = self.inspect(&mut conn, &schema).await;

        if matches!(state, Ok(SchemaState::Present)) && self.provisioner.is_busy(&schema) {
            // migrations may still be running against it in this process
            self.source.release(conn);
            debug!(tenant = %tenant, schema = %schema, "Waiting for schema provisioning to finish");
            self.provisioner.wait_idle(&schema).await;
            conn = self.acquire().await?;
            state = self.inspect(&mut conn, &schema).await;
        }

        let state = match state {
            Ok(state) => state,
            Err(err) => {
                self.source.discard(conn);
                return Err(err);
            }
        };

        let conn = match state {
            SchemaState::Present => conn,
            SchemaState::Missing => {
                // provisioning takes its own connection
                self.source.release(conn);
                info!(tenant = %tenant, schema = %schema, "Schema missing, provisioning tenant");
                self.provisioner.ensure_provisioned(tenant).await?;
                self.acquire().await?
            }
        };

        self.bind(conn, schema, tenant.clone()).await
    }

    /// Rebind a lease to the default schema and return it to the pool.
    ///
    /// Never fails: if the rebind fails, the error is logged and the
    /// connection is closed instead of being pooled.
    pub async fn close_connection(&self, mut lease: TenantLease<S>) -> ReleaseOutcome {
        let default = self.naming.default_schema();
        let reset = match lease.conn.as_mut() {
            Some(conn) => conn.set_search_path(default).await,
            None => return ReleaseOutcome::Discarded,
        };

        let Some(conn) = lease.conn.take() else {
            return ReleaseOutcome::Discarded;
        };

        match reset {
            Ok(()) => {
                debug!(
                    tenant = %lease.tenant,
                    schema = %default,
                    "Connection reset to default schema and released"
                );
                self.source.release(conn);
                ReleaseOutcome::Released
            }
            Err(e) => {
                let err = TenancyError::reset(&lease.schema, e);
                warn!(
                    tenant = %lease.tenant,
                    error = %err,
                    "Failed to reset schema when closing connection, discarding it"
                );
                self.source.discard(conn);
                ReleaseOutcome::Discarded
            }
        }
    }

    /// Run `f` on a lease for the active tenant and close the lease afterwards,
    /// whether `f` succeeded or not.
    pub async fn with_connection<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut S::Connection) -> BoxFuture<'c, Result<T, E>>,
        E: From<TenancyError>,
    {
        let mut lease = self.get_connection().await?;
        let result = f(&mut *lease).await;
        self.close_connection(lease).await;
        result
    }

    async fn inspect(
        &self,
        conn: &mut S::Connection,
        schema: &SchemaName,
    ) -> TenancyResult<SchemaState> {
        conn.schema_state(schema)
            .await
            .map_err(|e| TenancyError::introspection(schema, e))
    }

    async fn acquire(&self) -> TenancyResult<S::Connection> {
        self.source.acquire().await.map_err(TenancyError::acquisition)
    }

    async fn bind(
        &self,
        mut conn: S::Connection,
        schema: SchemaName,
        tenant: TenantId,
    ) -> TenancyResult<TenantLease<S>> {
        if let Err(e) = conn.set_search_path(&schema).await {
            self.source.discard(conn);
            return Err(TenancyError::bind(&schema, e));
        }
        debug!(tenant = %tenant, schema = %schema, "Connection bound to schema");

        Ok(TenantLease {
            conn: Some(conn),
            schema,
            tenant,
            source: self.source.clone(),
        })
    }
}

impl<S: ConnectionSource> fmt::Debug for TenantRouter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantRouter")
            .field("naming", &self.naming)
            .field("provisioner", &self.provisioner)
            .finish()
    }
}

/// A pooled connection bound to one tenant schema.
///
/// Dereferences to the backend connection. A lease dropped without
/// [`TenantRouter::close_connection`] is closed rather than pooled, since its
/// search path still points at the tenant schema.
pub struct TenantLease<S: ConnectionSource> {
    conn: Option<S::Connection>,
    schema: SchemaName,
    tenant: TenantId,
    source: Arc<S>,
}

impl<S: ConnectionSource> TenantLease<S> {
    /// The schema this lease is bound to.
    pub fn schema(&self) -> &SchemaName {
        &self.schema
    }

    /// The tenant this lease was requested for.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }
}

impl<S: ConnectionSource> Deref for TenantLease<S> {
    type Target = S::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("lease used after close")
    }
}

impl<S: ConnectionSource> DerefMut for TenantLease<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("lease used after close")
    }
}

impl<S: ConnectionSource> Drop for TenantLease<S> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(
                tenant = %self.tenant,
                schema = %self.schema,
                "Lease dropped without close_connection, discarding connection"
            );
            self.source.discard(conn);
        }
    }
}

impl<S: ConnectionSource> fmt::Debug for TenantLease<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantLease")
            .field("tenant", &self.tenant)
            .field("schema", &self.schema)
            .field("open", &self.conn.is_some())
            .finish()
    }
}
