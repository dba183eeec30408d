//! Integration tests for tenant connection routing.
//!
//! These run the router against the in-memory backend in `common` and check
//! schema binding, lazy provisioning and reset-on-release.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use tenantry_core::{
    ErrorCode, ReleaseOutcome, TenancyError, TenantContext, TenantId, TenantScope, with_tenant,
};

use common::{Faults, MemoryPool, PoolStats, older_router, router};

fn tenant(id: &str) -> TenantId {
    TenantId::parse(id).unwrap()
}

/// An unset tenant binds the default schema and never provisions.
#[tokio::test]
async fn test_unset_tenant_binds_default_schema() {
    let pool = MemoryPool::new();
    let router = router(&pool);

    TenantScope::run(async {
        let lease = router.get_connection().await.unwrap();
        assert_eq!(lease.schema().as_str(), "public");
        assert_eq!(lease.search_path(), "public");
        assert!(lease.tenant().is_default());
        assert_eq!(router.close_connection(lease).await, ReleaseOutcome::Released);
    })
    .await;

    assert!(pool.schemas().is_empty());
    assert!(pool.executed("public").is_empty());
}

/// The explicit default tenant behaves like an unset one.
#[tokio::test]
async fn test_default_tenant_never_provisions() {
    let pool = MemoryPool::new();
    let router = router(&pool);

    let lease = router
        .get_connection_for(&TenantId::default_tenant())
        .await
        .unwrap();

    assert_eq!(lease.search_path(), "public");
    router.close_connection(lease).await;
    assert!(pool.schemas().is_empty());
}

/// First request for "acme-corp" creates and migrates its schema; the second
/// binds directly.
#[tokio::test]
async fn test_acme_corp_end_to_end() {
    let pool = MemoryPool::new();
    let router = router(&pool);

    with_tenant(tenant("acme-corp"), async {
        let lease = router.get_connection().await.unwrap();
        assert_eq!(lease.schema().as_str(), "tenant_acme_corp");
        assert_eq!(lease.search_path(), "tenant_acme_corp");
        assert_eq!(lease.resolve("trips"), "tenant_acme_corp.trips");
        assert_eq!(router.close_connection(lease).await, ReleaseOutcome::Released);
    })
    .await;

    assert!(pool.schema_exists("tenant_acme_corp"));
    assert_eq!(pool.executed("tenant_acme_corp"), vec!["1", "2", "10"]);

    with_tenant(tenant("acme-corp"), async {
        let lease = router.get_connection().await.unwrap();
        assert_eq!(lease.search_path(), "tenant_acme_corp");
        router.close_connection(lease).await;
    })
    .await;

    assert_eq!(pool.executed("tenant_acme_corp").len(), 3);
    assert_eq!(pool.applied_versions("tenant_acme_corp"), vec!["1", "2", "10"]);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.idle_search_paths(), vec!["public"]);
}

/// Concurrent first requests for one tenant apply each migration once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_requests_provision_once() {
    let pool = MemoryPool::new();
    pool.slow_migrations(Duration::from_millis(5));
    let router = router(&pool);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let router = router.clone();
        let pool = pool.clone();
        handles.push(tokio::spawn(with_tenant(tenant("acme"), async move {
            let lease = router.get_connection().await?;
            let bound = lease.search_path().to_string();
            let applied = pool.applied_versions("tenant_acme");
            router.close_connection(lease).await;
            Ok::<_, TenancyError>((bound, applied))
        })));
    }

    for handle in handles {
        let (bound, applied) = handle.await.unwrap().unwrap();
        assert_eq!(bound, "tenant_acme");
        assert_eq!(applied, vec!["1", "2", "10"]);
    }

    assert_eq!(pool.executed("tenant_acme"), vec!["1", "2", "10"]);
    assert_eq!(pool.outstanding(), 0);
}

/// The schema becomes visible only once fully migrated, and a request that
/// finds it then binds to the complete schema.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_schema_visible_only_when_fully_migrated() {
    let pool = MemoryPool::new();
    pool.slow_migrations(Duration::from_millis(50));
    let router = router(&pool);

    let first = tokio::spawn({
        let router = router.clone();
        async move {
            let lease = router.get_connection_for(&tenant("acme")).await?;
            router.close_connection(lease).await;
            Ok::<_, TenancyError>(())
        }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while !pool.schema_exists("tenant_acme") {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(pool.applied_versions("tenant_acme"), vec!["1", "2", "10"]);

    let lease = router.get_connection_for(&tenant("acme")).await.unwrap();
    assert_eq!(lease.search_path(), "tenant_acme");
    assert_eq!(pool.applied_versions("tenant_acme"), vec!["1", "2", "10"]);
    router.close_connection(lease).await;

    first.await.unwrap().unwrap();
    assert_eq!(pool.executed("tenant_acme"), vec!["1", "2", "10"]);
}

/// A request for a schema this process is still upgrading waits for the
/// upgrade instead of binding to the older version.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_request_waits_for_running_upgrade() {
    let pool = MemoryPool::new();
    let old = older_router(&pool, 2);
    let lease = old.get_connection_for(&tenant("acme")).await.unwrap();
    old.close_connection(lease).await;
    assert_eq!(pool.applied_versions("tenant_acme"), vec!["1", "2"]);

    pool.slow_migrations(Duration::from_millis(50));
    let router = router(&pool);
    let schema = router.naming().schema_for(&tenant("acme"));

    let upgrade = tokio::spawn({
        let router = router.clone();
        async move { router.provisioner().ensure_provisioned(&tenant("acme")).await }
    });
    while !router.provisioner().is_busy(&schema) {
        tokio::task::yield_now().await;
    }

    let lease = router.get_connection_for(&tenant("acme")).await.unwrap();
    assert_eq!(pool.applied_versions("tenant_acme"), vec!["1", "2", "10"]);
    router.close_connection(lease).await;

    assert_eq!(upgrade.await.unwrap().unwrap(), 1);
    assert_eq!(pool.outstanding(), 0);
}

/// Two routers over one database stand in for two processes; the advisory
/// lock keeps them from migrating the same schema twice.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_separate_routers_serialize_on_database_lock() {
    let pool = MemoryPool::new();
    pool.slow_migrations(Duration::from_millis(5));
    let first = router(&pool);
    let second = router(&pool);

    let a = tokio::spawn(with_tenant(tenant("globex"), async move {
        let lease = first.get_connection().await?;
        first.close_connection(lease).await;
        Ok::<_, TenancyError>(())
    }));
    let b = tokio::spawn(with_tenant(tenant("globex"), async move {
        let lease = second.get_connection().await?;
        second.close_connection(lease).await;
        Ok::<_, TenancyError>(())
    }));

    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(pool.executed("tenant_globex"), vec!["1", "2", "10"]);
}

/// Different tenants get different schemas from the same pool.
#[tokio::test]
async fn test_tenants_are_isolated() {
    let pool = MemoryPool::new();
    let router = router(&pool);

    let acme = router.get_connection_for(&tenant("acme")).await.unwrap();
    let globex = router.get_connection_for(&tenant("globex")).await.unwrap();

    assert_eq!(acme.resolve("users"), "tenant_acme.users");
    assert_eq!(globex.resolve("users"), "tenant_globex.users");
    assert_ne!(acme.id(), globex.id());

    router.close_connection(acme).await;
    router.close_connection(globex).await;
    assert_eq!(pool.schemas(), vec!["tenant_acme", "tenant_globex"]);
}

/// A pooled connection never carries a tenant binding into the next lease.
#[tokio::test]
async fn test_released_connection_is_reset_before_reuse() {
    let pool = MemoryPool::new();
    let router = router(&pool);

    let lease = router.get_connection_for(&tenant("acme")).await.unwrap();
    let id = lease.id();
    router.close_connection(lease).await;

    let next = router
        .get_connection_for(&TenantId::default_tenant())
        .await
        .unwrap();
    assert_eq!(next.id(), id);
    assert_eq!(next.resolve("users"), "public.users");
    router.close_connection(next).await;
}

/// `with_connection` closes the lease even when the work fails.
#[tokio::test]
async fn test_close_after_failed_work() {
    let pool = MemoryPool::new();
    let router = router(&pool);

    let result: Result<(), TenancyError> = with_tenant(tenant("acme"), async {
        router
            .with_connection(|conn| {
                Box::pin(async move {
                    assert_eq!(conn.search_path(), "tenant_acme");
                    Err::<(), _>(TenancyError::config("unit of work failed"))
                })
            })
            .await
    })
    .await;

    assert!(result.is_err());
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.idle_search_paths(), vec!["public"]);
}

/// A connection whose reset fails is discarded, not pooled.
#[tokio::test]
async fn test_reset_failure_discards_connection() {
    let pool = MemoryPool::new();
    let router = router(&pool);

    let lease = router.get_connection_for(&tenant("acme")).await.unwrap();
    let before = pool.stats();
    Faults::set(&pool.faults().reset, true);

    let outcome = router.close_connection(lease).await;

    assert_eq!(outcome, ReleaseOutcome::Discarded);
    assert!(!outcome.is_released());
    assert_eq!(
        pool.stats(),
        PoolStats {
            discarded: before.discarded + 1,
            ..before
        }
    );
    assert!(!pool.idle_search_paths().contains(&"tenant_acme".to_string()));
}

/// A lease dropped without being closed is discarded.
#[tokio::test]
async fn test_dropped_lease_is_discarded() {
    let pool = MemoryPool::new();
    let router = router(&pool);

    let lease = router.get_connection_for(&tenant("acme")).await.unwrap();
    drop(lease);

    assert_eq!(pool.stats().discarded, 1);
    assert_eq!(pool.outstanding(), 0);
    assert!(pool.idle_search_paths().iter().all(|path| path == "public"));
}

#[tokio::test]
async fn test_acquisition_failure() {
    let pool = MemoryPool::new();
    let router = router(&pool);
    Faults::set(&pool.faults().acquire, true);

    let err = router.get_connection_for(&tenant("acme")).await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::ConnectionAcquisition);
    assert!(err.is_retryable());
    assert!(!pool.schema_exists("tenant_acme"));
}

#[tokio::test]
async fn test_introspection_failure_discards_connection() {
    let pool = MemoryPool::new();
    let router = router(&pool);
    Faults::set(&pool.faults().introspection, true);

    let err = router.get_connection_for(&tenant("acme")).await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::SchemaIntrospection);
    assert_eq!(err.schema().map(|s| s.as_str()), Some("tenant_acme"));
    assert_eq!(pool.stats().discarded, 1);
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn test_bind_failure_discards_connection() {
    let pool = MemoryPool::new();
    pool.add_schema("tenant_acme");
    let router = router(&pool);
    Faults::set(&pool.faults().bind, true);

    let err = router.get_connection_for(&tenant("acme")).await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::SchemaBind);
    assert_eq!(pool.stats().discarded, 1);
    assert_eq!(pool.outstanding(), 0);
}

/// A failed provisioning run surfaces unchanged and leaves no schema behind,
/// so the next request provisions from scratch.
#[tokio::test]
async fn test_provisioning_failure_then_retry() {
    let pool = MemoryPool::new();
    let router = router(&pool);
    pool.fail_migration(Some("2"));

    let err = router.get_connection_for(&tenant("acme")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Provisioning);
    assert!(err.is_retryable());
    assert!(!pool.schema_exists("tenant_acme"));
    assert!(pool.applied_versions("tenant_acme").is_empty());
    assert_eq!(pool.outstanding(), 0);

    pool.fail_migration(None);
    let lease = router.get_connection_for(&tenant("acme")).await.unwrap();
    assert_eq!(lease.search_path(), "tenant_acme");
    router.close_connection(lease).await;

    assert_eq!(pool.executed("tenant_acme"), vec!["1", "2", "10"]);
}

#[tokio::test]
async fn test_overlong_tenant_rejected_before_acquiring() {
    let pool = MemoryPool::new();
    let router = router(&pool);

    let err = router
        .get_connection_for(&tenant(&"a".repeat(64)))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::InvalidTenant);
    assert_eq!(pool.stats().acquired, 0);
}

#[tokio::test]
async fn test_custom_tenant_resolver() {
    let pool = MemoryPool::new();
    let router = router(&pool).with_current_tenant(|| TenantId::parse("initech").unwrap());

    let lease = router.get_connection().await.unwrap();
    assert_eq!(lease.schema().as_str(), "tenant_initech");
    router.close_connection(lease).await;
}

#[tokio::test]
async fn test_context_cleared_after_unit_of_work() {
    let pool = MemoryPool::new();
    let router = router(&pool);

    with_tenant(tenant("acme"), async {
        let lease = router.get_connection().await.unwrap();
        router.close_connection(lease).await;
    })
    .await;

    TenantScope::run(async {
        assert!(TenantContext::active().is_none());
        let lease = router.get_connection().await.unwrap();
        assert_eq!(lease.search_path(), "public");
        router.close_connection(lease).await;
    })
    .await;
}

#[test]
fn test_no_aggressive_release() {
    let pool = MemoryPool::new();
    assert!(!router(&pool).supports_aggressive_release());
}
