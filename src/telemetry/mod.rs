//! Structured logging for the provenance ledger
//!
//! One `tracing` subscriber per process: an `EnvFilter` plus a fmt layer,
//! human-readable by default and JSON when `LOG_JSON` is set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Enable JSON logging format
    pub json_format: bool,
    /// Log level filter (directive syntax, e.g. `info,sqlx=warn`)
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "provenance-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            json_format: false,
            log_level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: std::env::var("LEDGER_SERVICE_NAME").unwrap_or(defaults.service_name),
            service_version: defaults.service_version,
            json_format: std::env::var("LOG_JSON")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            log_level: std::env::var("LOG_LEVEL")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or(defaults.log_level),
        }
    }

    /// Same as the default but quieter, for command-line tools.
    pub fn for_cli() -> Self {
        Self {
            service_name: "ledger-admin".to_string(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "warn".to_string()),
            ..Self::default()
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(config));

    if config.json_format {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()?;
    }

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        json = config.json_format,
        "Logging initialized"
    );
    Ok(())
}
