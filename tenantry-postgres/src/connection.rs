//! PostgreSQL connection wrapper.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Object;
use tenantry_core::{DbError, SchemaConnection, SchemaName, SchemaState};
use tenantry_migrate::{
    HistoryTable, MigrateResult, Migration, MigrationError, MigrationRecord, MigrationStore,
    quote_ident,
};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;
use tracing::{debug, warn};

use crate::error::PgResult;

const SCHEMA_EXISTS_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)";
const LOCK_SQL: &str = "SELECT pg_advisory_lock($1, hashtext($2))";
const UNLOCK_SQL: &str = "SELECT pg_advisory_unlock($1, hashtext($2))";
const BEGIN_SQL: &str = "BEGIN";
const COMMIT_SQL: &str = "COMMIT";
const ROLLBACK_SQL: &str = "ROLLBACK";

pub(crate) fn set_search_path_sql(schema: &str) -> String {
    format!("SET search_path TO {}", quote_ident(schema))
}

pub(crate) fn set_local_search_path_sql(schema: &str) -> String {
    format!("SET LOCAL search_path TO {}", quote_ident(schema))
}

pub(crate) fn create_schema_sql(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
}

pub(crate) fn drop_schema_sql(schema: &str) -> String {
    format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(schema))
}

/// A pooled PostgreSQL connection.
///
/// Statements go through deadpool's per-connection prepared statement cache.
pub struct PgConnection {
    client: Object,
    lock_namespace: i32,
    /// Set between `begin_provisioning` and its commit or rollback.
    provisioning: bool,
}

impl PgConnection {
    pub(crate) fn new(client: Object, lock_namespace: i32) -> Self {
        Self {
            client,
            lock_namespace,
            provisioning: false,
        }
    }

    /// Execute a query and return all rows.
    pub async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<Vec<Row>> {
        debug!(sql = %sql, "Executing query");
        let stmt = self.client.prepare_cached(sql).await?;
        Ok(self.client.query(&stmt, params).await?)
    }

    /// Execute a query and return exactly one row.
    pub async fn query_one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<Row> {
        debug!(sql = %sql, "Executing query_one");
        let stmt = self.client.prepare_cached(sql).await?;
        Ok(self.client.query_one(&stmt, params).await?)
    }

    /// Execute a query and return zero or one row.
    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> PgResult<Option<Row>> {
        debug!(sql = %sql, "Executing query_opt");
        let stmt = self.client.prepare_cached(sql).await?;
        Ok(self.client.query_opt(&stmt, params).await?)
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<u64> {
        debug!(sql = %sql, "Executing statement");
        let stmt = self.client.prepare_cached(sql).await?;
        Ok(self.client.execute(&stmt, params).await?)
    }

    /// Execute a batch of statements in a single round-trip.
    pub async fn batch_execute(&self, sql: &str) -> PgResult<()> {
        debug!(sql = %sql, "Executing batch");
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    /// The schema unqualified names currently resolve against.
    pub async fn current_schema(&self) -> PgResult<Option<String>> {
        let row = self.client.query_one("SELECT current_schema()", &[]).await?;
        Ok(row.get(0))
    }

    /// Get the underlying pooled client.
    pub fn inner(&self) -> &Object {
        &self.client
    }

    pub(crate) fn into_inner(self) -> Object {
        self.client
    }

    /// Whether a provisioning transaction is still open on this session.
    pub(crate) fn in_provisioning(&self) -> bool {
        self.provisioning
    }

    async fn apply_in_transaction(
        &mut self,
        history: &HistoryTable,
        migration: &Migration,
    ) -> PgResult<DateTime<Utc>> {
        if self.provisioning {
            return self.apply_in_open_transaction(history, migration).await;
        }

        let started = Instant::now();
        let txn = self.client.transaction().await?;

        txn.batch_execute(&set_local_search_path_sql(history.schema())).await?;
        txn.batch_execute(&migration.script).await?;

        let version = migration.version.to_string();
        let execution_ms = started.elapsed().as_millis() as i64;
        let row = txn
            .query_one(
                &history.insert_sql(),
                &[&version, &migration.description, &migration.checksum, &execution_ms],
            )
            .await?;
        let applied_at: DateTime<Utc> = row.get(0);

        txn.commit().await?;
        Ok(applied_at)
    }

    /// Runs a migration inside the provisioning transaction. A failure
    /// aborts that transaction; the provisioner rolls it back.
    async fn apply_in_open_transaction(
        &mut self,
        history: &HistoryTable,
        migration: &Migration,
    ) -> PgResult<DateTime<Utc>> {
        let started = Instant::now();
        self.client
            .batch_execute(&set_local_search_path_sql(history.schema()))
            .await?;
        self.client.batch_execute(&migration.script).await?;

        let version = migration.version.to_string();
        let execution_ms = started.elapsed().as_millis() as i64;
        let row = self
            .client
            .query_one(
                &history.insert_sql(),
                &[&version, &migration.description, &migration.checksum, &execution_ms],
            )
            .await?;
        Ok(row.get(0))
    }
}

#[async_trait]
impl SchemaConnection for PgConnection {
    async fn schema_state(&mut self, schema: &SchemaName) -> Result<SchemaState, DbError> {
        let row = self.query_one(SCHEMA_EXISTS_SQL, &[&schema.as_str()]).await?;
        Ok(SchemaState::from_exists(row.get(0)))
    }

    async fn set_search_path(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        self.batch_execute(&set_search_path_sql(schema.as_str())).await?;
        Ok(())
    }

    async fn create_schema(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        self.batch_execute(&create_schema_sql(schema.as_str())).await?;
        Ok(())
    }

    async fn drop_schema(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        self.batch_execute(&drop_schema_sql(schema.as_str())).await?;
        Ok(())
    }

    async fn begin_provisioning(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        debug!(schema = %schema, "Opening provisioning transaction");
        self.batch_execute(BEGIN_SQL).await?;
        self.provisioning = true;
        Ok(())
    }

    async fn commit_provisioning(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        self.provisioning = false;
        self.batch_execute(COMMIT_SQL).await?;
        debug!(schema = %schema, "Provisioning transaction committed");
        Ok(())
    }

    async fn rollback_provisioning(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        self.provisioning = false;
        self.batch_execute(ROLLBACK_SQL).await?;
        debug!(schema = %schema, "Provisioning transaction rolled back");
        Ok(())
    }

    async fn lock_schema(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        debug!(schema = %schema, "Waiting for schema lock");
        self.execute(LOCK_SQL, &[&self.lock_namespace, &schema.as_str()])
            .await?;
        Ok(())
    }

    async fn unlock_schema(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        let row = self
            .query_one(UNLOCK_SQL, &[&self.lock_namespace, &schema.as_str()])
            .await?;
        let released: bool = row.get(0);
        if !released {
            warn!(schema = %schema, "Schema lock was not held by this session");
        }
        Ok(())
    }
}

#[async_trait]
impl MigrationStore for PgConnection {
    async fn ensure_history(&mut self, history: &HistoryTable) -> MigrateResult<()> {
        self.batch_execute(&history.create_sql()).await?;
        Ok(())
    }

    async fn applied(&mut self, history: &HistoryTable) -> MigrateResult<Vec<MigrationRecord>> {
        let rows = self.query(&history.select_sql(), &[]).await?;
        let mut records: Vec<MigrationRecord> = rows
            .iter()
            .map(|row| MigrationRecord {
                version: row.get("version"),
                description: row.get("description"),
                checksum: row.get("checksum"),
                applied_at: row.get("applied_at"),
                execution_ms: row.get("execution_ms"),
            })
            .collect();
        records.sort_by(|a, b| a.applied_at.cmp(&b.applied_at));
        Ok(records)
    }

    async fn apply(
        &mut self,
        history: &HistoryTable,
        migration: &Migration,
    ) -> MigrateResult<MigrationRecord> {
        let version = migration.version.to_string();
        let started = Instant::now();

        let applied_at = self
            .apply_in_transaction(history, migration)
            .await
            .map_err(|e| MigrationError::script_failed(history.schema(), &version, e.to_string()))?;

        Ok(MigrationRecord {
            version,
            description: migration.description.clone(),
            checksum: migration.checksum.clone(),
            applied_at,
            execution_ms: started.elapsed().as_millis() as i64,
        })
    }
}
