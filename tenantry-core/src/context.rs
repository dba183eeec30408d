//! Tenant context for tracking the active tenant of a unit of work.
//!
//! Async code opens a unit of work with [`TenantScope::run`] (or
//! [`with_tenant`]). The scope owns a task-local slot that starts empty and is
//! destroyed when the future completes or is dropped, so a tenant can never
//! leak into the next unit of work scheduled on the same worker.
//!
//! ```rust,ignore
//! use tenantry_core::{TenantContext, TenantId, TenantScope};
//!
//! TenantScope::run(async {
//!     TenantContext::set(TenantId::parse("acme-corp")?)?;
//!     let conn = router.get_connection().await?;
//!     // ...
//!     router.close_connection(conn).await;
//!     Ok(())
//! })
//! .await?;
//! ```
//!
//! [`TenantContext::set`] and [`TenantContext::clear`] only write the scope's
//! slot and fail outside one. Synchronous code uses
//! [`TenantContext::set_sync`] instead, a guard over a thread-local slot that
//! must not be held across an `.await`.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::str::FromStr;

use crate::error::{TenancyError, TenancyResult};

/// Identifier of the reserved default tenant.
pub const DEFAULT_TENANT: &str = "public";

tokio::task_local! {
    static UNIT_OF_WORK: RefCell<Option<TenantId>>;
}

thread_local! {
    static SYNC_TENANT: RefCell<Option<TenantId>> = const { RefCell::new(None) };
}

/// A non-empty tenant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(String);

impl TenantId {
    /// Parse a tenant identifier, rejecting empty input.
    pub fn parse(id: impl Into<String>) -> TenancyResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(TenancyError::invalid_tenant(
                "tenant identifier must not be empty",
            ));
        }
        Ok(Self(id))
    }

    /// The reserved default tenant.
    pub fn default_tenant() -> Self {
        Self(DEFAULT_TENANT.to_string())
    }

    /// Whether this is the default tenant.
    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_TENANT
    }

    /// Get the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::default_tenant()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for TenantId {
    type Error = TenancyError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenancyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

/// Access to the active tenant of the current unit of work.
///
/// Inside a [`TenantScope`] the task-local slot is used. Outside one, reads
/// see the calling thread's [`set_sync`](Self::set_sync) value.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantContext;

impl TenantContext {
    /// Mark `id` as the active tenant of the current unit of work.
    ///
    /// Fails with [`TenancyError::NoUnitOfWork`] outside a [`TenantScope`].
    pub fn set(id: TenantId) -> TenancyResult<()> {
        Self::with_task_slot(|slot| *slot = Some(id))
    }

    /// The active tenant, or the default tenant if none is set.
    pub fn get() -> TenantId {
        Self::active().unwrap_or_default()
    }

    /// The active tenant, if one was set.
    pub fn active() -> Option<TenantId> {
        match UNIT_OF_WORK.try_with(|cell| cell.borrow().clone()) {
            Ok(id) => id,
            Err(_) => SYNC_TENANT.with(|cell| cell.borrow().clone()),
        }
    }

    /// Remove the active tenant, restoring the default.
    ///
    /// Fails with [`TenancyError::NoUnitOfWork`] outside a [`TenantScope`].
    pub fn clear() -> TenancyResult<()> {
        Self::with_task_slot(|slot| *slot = None)
    }

    /// Set the calling thread's tenant for synchronous code until the guard
    /// is dropped.
    ///
    /// The previous value is restored on drop, including during unwinding.
    /// Every task polled on this thread sees the value while the guard lives,
    /// so never hold the guard across an `.await`.
    pub fn set_sync(id: TenantId) -> SyncTenantGuard {
        let previous = SYNC_TENANT.with(|cell| cell.borrow_mut().replace(id));
        SyncTenantGuard { previous }
    }

    /// Whether the caller runs inside a [`TenantScope`].
    pub fn in_scope() -> bool {
        UNIT_OF_WORK.try_with(|_| ()).is_ok()
    }

    fn with_task_slot<R>(f: impl FnOnce(&mut Option<TenantId>) -> R) -> TenancyResult<R> {
        UNIT_OF_WORK
            .try_with(|cell| f(&mut cell.borrow_mut()))
            .map_err(|_| TenancyError::NoUnitOfWork)
    }
}

/// Guard returned by [`TenantContext::set_sync`].
#[must_use = "the tenant is cleared as soon as the guard is dropped"]
pub struct SyncTenantGuard {
    previous: Option<TenantId>,
}

impl Drop for SyncTenantGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        SYNC_TENANT.with(|cell| *cell.borrow_mut() = previous);
    }
}

/// A unit of work with its own tenant slot.
#[derive(Debug, Clone, Default)]
pub struct TenantScope {
    initial: Option<TenantId>,
}

impl TenantScope {
    /// A scope that starts with no tenant set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope that starts with `id` active.
    pub fn for_tenant(id: TenantId) -> Self {
        Self { initial: Some(id) }
    }

    /// Run `f` as one unit of work with an empty tenant slot.
    pub async fn run<F, T>(f: F) -> T
    where
        F: Future<Output = T>,
    {
        Self::new().enter(f).await
    }

    /// Run `f` inside this scope.
    ///
    /// The slot is torn down when `f` completes, fails, or is dropped.
    pub async fn enter<F, T>(self, f: F) -> T
    where
        F: Future<Output = T>,
    {
        UNIT_OF_WORK.scope(RefCell::new(self.initial), f).await
    }
}

/// Run `f` with `id` as the active tenant.
pub async fn with_tenant<F, T>(id: TenantId, f: F) -> T
where
    F: Future<Output = T>,
{
    TenantScope::for_tenant(id).enter(f).await
}

/// Resolves the tenant a connection request is made for.
pub trait CurrentTenant: Send + Sync {
    /// The tenant of the caller's unit of work.
    fn current_tenant(&self) -> TenantId;
}

impl CurrentTenant for TenantContext {
    fn current_tenant(&self) -> TenantId {
        TenantContext::get()
    }
}

impl<F> CurrentTenant for F
where
    F: Fn() -> TenantId + Send + Sync,
{
    fn current_tenant(&self) -> TenantId {
        self()
    }
}
