//! PostgreSQL connection configuration.

use std::time::Duration;

use crate::error::{PgError, PgResult};

/// Advisory lock namespace used for schema provisioning locks.
///
/// Passed as the first key of the two-key `pg_advisory_lock` form so tenant
/// locks do not clash with application locks.
pub const DEFAULT_LOCK_NAMESPACE: i32 = 0x7465_6e61;

/// PostgreSQL connection configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Host (extracted from URL or explicit).
    pub host: String,
    /// Port (default: 5432).
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Username.
    pub user: String,
    /// Password.
    pub password: Option<String>,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Server-side statement timeout, bounding migrations and lock waits.
    pub statement_timeout: Option<Duration>,
    /// Application name (shown in pg_stat_activity).
    pub application_name: String,
    /// First key of the provisioning advisory locks.
    pub lock_namespace: i32,
}

impl PgConfig {
    /// Create a configuration for `database` on localhost.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: database.into(),
            user: "postgres".to_string(),
            password: None,
            connect_timeout: Duration::from_secs(30),
            statement_timeout: None,
            application_name: "tenantry".to_string(),
            lock_namespace: DEFAULT_LOCK_NAMESPACE,
        }
    }

    /// Create a configuration from a database URL.
    ///
    /// Recognized query parameters: `connect_timeout` (seconds),
    /// `statement_timeout` (milliseconds) and `application_name`.
    pub fn from_url(url: &str) -> PgResult<Self> {
        let parsed =
            url::Url::parse(url).map_err(|e| PgError::config(format!("invalid database URL: {e}")))?;

        if parsed.scheme() != "postgresql" && parsed.scheme() != "postgres" {
            return Err(PgError::config(format!(
                "invalid scheme: expected 'postgresql' or 'postgres', got '{}'",
                parsed.scheme()
            )));
        }

        let database = parsed.path().trim_start_matches('/');
        if database.is_empty() {
            return Err(PgError::config("missing database name in URL"));
        }

        let mut config = Self::new(database);
        config.host = parsed
            .host_str()
            .ok_or_else(|| PgError::config("missing host in URL"))?
            .to_string();
        config.port = parsed.port().unwrap_or(5432);
        if !parsed.username().is_empty() {
            config.user = parsed.username().to_string();
        }
        config.password = parsed.password().map(String::from);

        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "connect_timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| PgError::config("invalid connect_timeout"))?;
                    config.connect_timeout = Duration::from_secs(secs);
                }
                "statement_timeout" => {
                    let ms: u64 = value
                        .parse()
                        .map_err(|_| PgError::config("invalid statement_timeout"))?;
                    config.statement_timeout = Some(Duration::from_millis(ms));
                }
                "application_name" => config.application_name = value.into_owned(),
                "sslmode" if value == "disable" => {}
                "sslmode" => {
                    return Err(PgError::config(format!(
                        "sslmode '{value}' is not supported, connections are made without TLS"
                    )));
                }
                other => {
                    return Err(PgError::config(format!("unknown connection parameter '{other}'")));
                }
            }
        }

        Ok(config)
    }

    /// Set the statement timeout.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Set the application name.
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the advisory lock namespace.
    pub fn with_lock_namespace(mut self, namespace: i32) -> Self {
        self.lock_namespace = namespace;
        self
    }

    /// Convert to tokio-postgres config.
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.dbname(&self.database);
        config.user(&self.user);
        config.application_name(&self.application_name);
        config.connect_timeout(self.connect_timeout);

        if let Some(ref password) = self.password {
            config.password(password);
        }
        if let Some(timeout) = self.statement_timeout {
            config.options(&format!("-c statement_timeout={}", timeout.as_millis()));
        }

        config
    }
}
