//! In-memory database backend for router and provisioner tests.
//!
//! Models a catalog of schemas, per-schema migration history, per-connection
//! search paths, session advisory locks and an idle pool that hands released
//! connections back out as they are, search path included. Provisioning
//! transactions stage their changes on the connection; other connections see
//! them only after commit.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use tenantry_core::{
    ConnectionSource, DbError, SchemaConnection, SchemaName, SchemaNaming, SchemaState,
    TenantRouter,
};
use tenantry_migrate::{
    HistoryTable, MigrateResult, Migration, MigrationConfig, MigrationError, MigrationRecord,
    MigrationStore, Migrator,
};

pub const DEFAULT_SCHEMA: &str = "public";

/// Failure switches, all off by default.
#[derive(Default)]
pub struct Faults {
    pub acquire: AtomicBool,
    pub introspection: AtomicBool,
    pub bind: AtomicBool,
    pub reset: AtomicBool,
    pub create_schema: AtomicBool,
    pub migration_version: Mutex<Option<String>>,
    pub apply_delay: Mutex<Option<Duration>>,
}

impl Faults {
    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    fn on(flag: &AtomicBool) -> bool {
        flag.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Catalog {
    schemas: HashSet<String>,
    history: HashMap<String, Vec<MigrationRecord>>,
    executed: Vec<(String, String)>,
    drops: usize,
}

/// Changes of an open provisioning transaction.
#[derive(Default)]
struct Staged {
    schemas: HashSet<String>,
    history: HashMap<String, Vec<MigrationRecord>>,
    executed: Vec<(String, String)>,
}

#[derive(Default)]
struct Shared {
    catalog: Mutex<Catalog>,
    idle: Mutex<Vec<MemoryConnection>>,
    advisory: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    faults: Faults,
    next_id: AtomicUsize,
    acquired: AtomicUsize,
    released: AtomicUsize,
    discarded: AtomicUsize,
}

/// Counters of pool traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: usize,
    pub released: usize,
    pub discarded: usize,
}

/// A pool of in-memory connections over one shared catalog.
#[derive(Clone, Default)]
pub struct MemoryPool {
    shared: Arc<Shared>,
}

impl MemoryPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn faults(&self) -> &Faults {
        &self.shared.faults
    }

    pub fn fail_migration(&self, version: Option<&str>) {
        *self.shared.faults.migration_version.lock() = version.map(str::to_string);
    }

    pub fn slow_migrations(&self, delay: Duration) {
        *self.shared.faults.apply_delay.lock() = Some(delay);
    }

    pub fn schema_exists(&self, schema: &str) -> bool {
        self.shared.catalog.lock().schemas.contains(schema)
    }

    pub fn add_schema(&self, schema: &str) {
        self.shared.catalog.lock().schemas.insert(schema.to_string());
    }

    pub fn schemas(&self) -> Vec<String> {
        let mut schemas: Vec<String> = self.shared.catalog.lock().schemas.iter().cloned().collect();
        schemas.sort();
        schemas
    }

    /// Versions recorded in a schema's history table.
    pub fn applied_versions(&self, schema: &str) -> Vec<String> {
        self.shared
            .catalog
            .lock()
            .history
            .get(schema)
            .map(|records| records.iter().map(|r| r.version.clone()).collect())
            .unwrap_or_default()
    }

    /// Every script run against `schema`, in execution order.
    pub fn executed(&self, schema: &str) -> Vec<String> {
        self.shared
            .catalog
            .lock()
            .executed
            .iter()
            .filter(|(s, _)| s == schema)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn drops(&self) -> usize {
        self.shared.catalog.lock().drops
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.shared.acquired.load(Ordering::SeqCst),
            released: self.shared.released.load(Ordering::SeqCst),
            discarded: self.shared.discarded.load(Ordering::SeqCst),
        }
    }

    /// Search paths of the connections waiting in the pool.
    pub fn idle_search_paths(&self) -> Vec<String> {
        self.shared
            .idle
            .lock()
            .iter()
            .map(|c| c.search_path.clone())
            .collect()
    }

    /// Connections leased and not yet returned or discarded.
    pub fn outstanding(&self) -> usize {
        let stats = self.stats();
        stats.acquired - stats.released - stats.discarded
    }
}

#[async_trait]
impl ConnectionSource for MemoryPool {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> Result<MemoryConnection, DbError> {
        if Faults::on(&self.shared.faults.acquire) {
            return Err(DbError::new("timed out waiting for a connection"));
        }
        self.shared.acquired.fetch_add(1, Ordering::SeqCst);

        if let Some(conn) = self.shared.idle.lock().pop() {
            return Ok(conn);
        }
        Ok(MemoryConnection {
            id: self.shared.next_id.fetch_add(1, Ordering::SeqCst),
            search_path: DEFAULT_SCHEMA.to_string(),
            shared: self.shared.clone(),
            held: HashMap::new(),
            txn: None,
        })
    }

    fn release(&self, conn: MemoryConnection) {
        self.shared.released.fetch_add(1, Ordering::SeqCst);
        self.shared.idle.lock().push(conn);
    }

    fn discard(&self, conn: MemoryConnection) {
        self.shared.discarded.fetch_add(1, Ordering::SeqCst);
        drop(conn);
    }
}

/// One session against the in-memory catalog.
pub struct MemoryConnection {
    id: usize,
    search_path: String,
    shared: Arc<Shared>,
    held: HashMap<String, OwnedMutexGuard<()>>,
    txn: Option<Staged>,
}

impl MemoryConnection {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn search_path(&self) -> &str {
        &self.search_path
    }

    /// Resolve an unqualified table name the way the server would.
    pub fn resolve(&self, table: &str) -> String {
        format!("{}.{}", self.search_path, table)
    }

    /// Whether this session sees `schema`, its own uncommitted work included.
    fn sees_schema(&self, catalog: &Catalog, schema: &str) -> bool {
        catalog.schemas.contains(schema)
            || self.txn.as_ref().is_some_and(|txn| txn.schemas.contains(schema))
    }
}

#[async_trait]
impl MigrationStore for MemoryConnection {
    async fn ensure_history(&mut self, history: &HistoryTable) -> MigrateResult<()> {
        let mut catalog = self.shared.catalog.lock();
        if !self.sees_schema(&catalog, history.schema()) {
            return Err(MigrationError::database(format!(
                "schema \"{}\" does not exist",
                history.schema()
            )));
        }
        match self.txn.as_mut() {
            Some(txn) => {
                txn.history.entry(history.schema().to_string()).or_default();
            }
            None => {
                catalog.history.entry(history.schema().to_string()).or_default();
            }
        }
        Ok(())
    }

    async fn applied(&mut self, history: &HistoryTable) -> MigrateResult<Vec<MigrationRecord>> {
        let mut records = self
            .shared
            .catalog
            .lock()
            .history
            .get(history.schema())
            .cloned()
            .unwrap_or_default();
        if let Some(staged) = self.txn.as_ref().and_then(|txn| txn.history.get(history.schema())) {
            records.extend(staged.iter().cloned());
        }
        Ok(records)
    }

    async fn apply(
        &mut self,
        history: &HistoryTable,
        migration: &Migration,
    ) -> MigrateResult<MigrationRecord> {
        let delay = *self.shared.faults.apply_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let version = migration.version.to_string();
        let failing = self.shared.faults.migration_version.lock().clone();
        if failing.as_deref() == Some(version.as_str()) {
            return Err(MigrationError::script_failed(
                history.schema(),
                version,
                "syntax error at or near \"TABLE\"",
            ));
        }

        let record = MigrationRecord {
            version: version.clone(),
            description: migration.description.clone(),
            checksum: migration.checksum.clone(),
            applied_at: Utc::now(),
            execution_ms: 0,
        };

        let schema = history.schema().to_string();
        match self.txn.as_mut() {
            Some(txn) => {
                txn.executed.push((schema.clone(), version));
                txn.history.entry(schema).or_default().push(record.clone());
            }
            None => {
                let mut catalog = self.shared.catalog.lock();
                catalog.executed.push((schema.clone(), version));
                catalog.history.entry(schema).or_default().push(record.clone());
            }
        }
        Ok(record)
    }
}

#[async_trait]
impl SchemaConnection for MemoryConnection {
    async fn schema_state(&mut self, schema: &SchemaName) -> Result<SchemaState, DbError> {
        if Faults::on(&self.shared.faults.introspection) {
            return Err(DbError::new("permission denied for information_schema"));
        }
        let exists = self.sees_schema(&self.shared.catalog.lock(), schema.as_str());
        Ok(SchemaState::from_exists(exists))
    }

    async fn set_search_path(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        let is_default = schema.as_str() == DEFAULT_SCHEMA;
        if is_default && Faults::on(&self.shared.faults.reset) {
            return Err(DbError::new("connection closed"));
        }
        if !is_default && Faults::on(&self.shared.faults.bind) {
            return Err(DbError::new("connection closed"));
        }
        self.search_path = schema.as_str().to_string();
        Ok(())
    }

    async fn create_schema(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        if Faults::on(&self.shared.faults.create_schema) {
            return Err(DbError::new("permission denied for database"));
        }
        let mut catalog = self.shared.catalog.lock();
        if catalog.schemas.contains(schema.as_str()) {
            return Ok(());
        }
        match self.txn.as_mut() {
            Some(txn) => {
                txn.schemas.insert(schema.as_str().to_string());
            }
            None => {
                catalog.schemas.insert(schema.as_str().to_string());
            }
        }
        Ok(())
    }

    async fn begin_provisioning(&mut self, _schema: &SchemaName) -> Result<(), DbError> {
        if self.txn.is_some() {
            return Err(DbError::new("there is already a transaction in progress"));
        }
        self.txn = Some(Staged::default());
        Ok(())
    }

    async fn commit_provisioning(&mut self, _schema: &SchemaName) -> Result<(), DbError> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| DbError::new("there is no transaction in progress"))?;

        let mut catalog = self.shared.catalog.lock();
        for schema in txn.schemas {
            catalog.history.entry(schema.clone()).or_default();
            catalog.schemas.insert(schema);
        }
        for (schema, records) in txn.history {
            catalog.history.entry(schema).or_default().extend(records);
        }
        catalog.executed.extend(txn.executed);
        Ok(())
    }

    async fn rollback_provisioning(&mut self, _schema: &SchemaName) -> Result<(), DbError> {
        self.txn = None;
        Ok(())
    }

    async fn drop_schema(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        let mut catalog = self.shared.catalog.lock();
        catalog.schemas.remove(schema.as_str());
        catalog.history.remove(schema.as_str());
        catalog.drops += 1;
        Ok(())
    }

    async fn lock_schema(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        let lock = self
            .shared
            .advisory
            .lock()
            .entry(schema.as_str().to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        self.held.insert(schema.as_str().to_string(), guard);
        Ok(())
    }

    async fn unlock_schema(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        self.held.remove(schema.as_str());
        Ok(())
    }
}

/// Three tenant migrations; version 10 sorts after 2.
pub fn migrations() -> Vec<Migration> {
    vec![
        Migration::new("1", "create users", "CREATE TABLE users (id BIGSERIAL PRIMARY KEY);").unwrap(),
        Migration::new("2", "create trips", "CREATE TABLE trips (id BIGSERIAL PRIMARY KEY);").unwrap(),
        Migration::new("10", "add trip index", "CREATE INDEX trips_id ON trips (id);").unwrap(),
    ]
}

pub fn migrator() -> Arc<Migrator> {
    migrator_with(migrations())
}

/// A migrator over the first `count` migrations, as an older release shipped.
pub fn older_migrator(count: usize) -> Arc<Migrator> {
    migrator_with(migrations()[..count].to_vec())
}

fn migrator_with(migrations: Vec<Migration>) -> Arc<Migrator> {
    Arc::new(Migrator::from_migrations(MigrationConfig::default(), migrations).unwrap())
}

pub fn router(pool: &Arc<MemoryPool>) -> TenantRouter<MemoryPool> {
    TenantRouter::new(pool.clone(), SchemaNaming::new(), migrator())
}

pub fn older_router(pool: &Arc<MemoryPool>, count: usize) -> TenantRouter<MemoryPool> {
    TenantRouter::new(pool.clone(), SchemaNaming::new(), older_migrator(count))
}
