//! Logging setup.
//!
//! The library emits `tracing` events and never installs a subscriber on its
//! own. Applications either bring their own subscriber or call [`init`],
//! available with the `tracing-subscriber` feature.
//!
//! # Environment Variables
//!
//! - `TENANTRY_LOG_LEVEL=trace|debug|info|warn|error` - Set the log level (default: info)
//! - `TENANTRY_LOG_FORMAT=json|pretty|compact` - Set output format (default: json)
//!
//! # Events
//!
//! ```rust,ignore
//! info!(tenant = %tenant, schema = %schema, "Starting tenant provisioning");
//! debug!(tenant = %tenant, schema = %schema, "Connection bound to schema");
//! warn!(tenant = %tenant, error = %err, "Failed to reset schema when closing connection, discarding it");
//! error!(tenant = %tenant, error = %err, "Failed to provision tenant");
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

/// Get the configured log level from `TENANTRY_LOG_LEVEL`.
pub fn get_log_level() -> &'static str {
    env::var("TENANTRY_LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "warn" => "warn",
            "error" => "error",
            _ => "info",
        })
        .unwrap_or("info")
}

/// Get the configured log format from `TENANTRY_LOG_FORMAT`.
pub fn get_log_format() -> &'static str {
    env::var("TENANTRY_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Install a global subscriber for the tenantry crates.
///
/// Call once at startup; later calls are no-ops. Without the
/// `tracing-subscriber` feature this does nothing.
pub fn init() {
    INIT.call_once(|| {
        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = get_log_level();
            let filter = EnvFilter::try_new(format!(
                "tenantry={level},tenantry_core={level},tenantry_migrate={level},tenantry_postgres={level}"
            ))
            .unwrap_or_else(|_| EnvFilter::new("info"));

            let registry = tracing_subscriber::registry().with(filter);
            let installed = match get_log_format() {
                "compact" => registry.with(fmt::layer().compact()).try_init(),
                "pretty" => registry.with(fmt::layer().pretty()).try_init(),
                _ => registry.with(fmt::layer().json()).try_init(),
            };

            if installed.is_ok() {
                tracing::info!(level = level, format = get_log_format(), "Tenantry logging initialized");
            }
        }
    });
}
