//! Process configuration
//!
//! Everything is read from the environment. The retry ceiling and the
//! staleness threshold have no defaults: a deployment must choose them.

use std::net::SocketAddr;
use std::time::Duration;

use crate::anchor::{AnchorClientConfig, WorkerConfig};
use crate::audit::AuditConfig;
use crate::infra::{ProvenanceError, Result, RetryConfig};

const DEFAULT_DATABASE_URL: &str = "sqlite://provenance.db";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Ledger configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL.
    pub database_url: String,
    /// REST listen address.
    pub listen_addr: SocketAddr,
    /// Calendar server base URL; `None` runs with the in-process calendar.
    pub calendar_url: Option<String>,
    pub anchor: AnchorClientConfig,
    pub worker: WorkerConfig,
    pub audit: AuditConfig,
    /// Intake workers for bulk submissions
    pub intake_workers: usize,
    /// Comma-separated CORS origins, or `*`; no CORS layer when unset
    pub cors_allow_origins: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("LEDGER_DATABASE_URL")
            .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let listen_addr = std::env::var("LEDGER_LISTEN_ADDR")
            .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr: SocketAddr = listen_addr.parse().map_err(|e| {
            ProvenanceError::Configuration(format!("LEDGER_LISTEN_ADDR {listen_addr:?}: {e}"))
        })?;

        let calendar_url = std::env::var("ANCHOR_CALENDAR_URL")
            .ok()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        let refresh_timeout =
            optional_secs("ANCHOR_REFRESH_TIMEOUT_SECS")?.unwrap_or(Duration::from_secs(30));

        let intake_workers = optional_parse::<usize>("LEDGER_INTAKE_WORKERS")?
            .filter(|n| *n > 0)
            .unwrap_or(4);

        Ok(Self {
            database_url,
            listen_addr,
            calendar_url,
            anchor: AnchorClientConfig {
                submit_retry: RetryConfig::default(),
                refresh_timeout,
            },
            worker: WorkerConfig::from_env()?,
            audit: AuditConfig::from_env()?,
            intake_workers,
            cors_allow_origins: std::env::var("CORS_ALLOW_ORIGINS")
                .ok()
                .filter(|origins| !origins.trim().is_empty()),
        })
    }
}

fn optional_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ProvenanceError::Configuration(format!("{name} {raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn optional_secs(name: &str) -> Result<Option<Duration>> {
    Ok(optional_parse::<u64>(name)?.map(Duration::from_secs))
}
