//! HTTP server bootstrap for the provenance ledger.
//!
//! This module wires together:
//! - configuration and logging
//! - the SQLite proof store and mapping index
//! - the anchor client and its confirmation worker
//! - the Axum router

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tokio::signal;
use tokio::sync::mpsc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::anchor::{
    spawn_confirmation_worker, AnchorClient, AnchorClientConfig, HttpCalendar, MemoryCalendar,
    TimestampAuthority, WorkerMessage,
};
use crate::audit::AuditEngine;
use crate::config::Config;
use crate::infra::{MappingIndex, ProofStore, Result, SqliteMappingIndex, SqliteProofStore};
use crate::service::{IntakeQueue, ProvenanceService};
use crate::telemetry::{init_tracing, TelemetryConfig};

/// Intake queue depth per worker
const INTAKE_QUEUE_DEPTH: usize = 64;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ProvenanceService>,
    pub intake: Arc<IntakeQueue>,
    pub audit: Arc<AuditEngine>,
    /// Control channel of the confirmation worker, when one runs
    pub worker: Option<mpsc::Sender<WorkerMessage>>,
}

/// Timestamping authority for a calendar URL.
///
/// Without a calendar URL the ledger runs offline: submissions get handles
/// from an in-process calendar and stay `pending` until imported receipts
/// confirm them. No confirmation worker runs in that mode.
pub fn build_authority(
    calendar_url: Option<&str>,
    timeout: Duration,
) -> Result<Arc<dyn TimestampAuthority>> {
    match calendar_url {
        Some(url) => {
            let calendar = HttpCalendar::new(url, timeout)?;
            info!(calendar = calendar.base_url(), "Using calendar server");
            Ok(Arc::new(calendar))
        }
        None => {
            warn!("ANCHOR_CALENDAR_URL not set; running offline with the in-process calendar");
            Ok(Arc::new(MemoryCalendar::new()))
        }
    }
}

/// Open the database and assemble the submission pipeline.
pub async fn open_service(
    database_url: &str,
    calendar_url: Option<&str>,
    anchor_config: AnchorClientConfig,
) -> Result<Arc<ProvenanceService>> {
    info!(database = %database_url, "Opening proof store");
    let sqlite = Arc::new(SqliteProofStore::connect(database_url).await?);
    let mapping: Arc<dyn MappingIndex> = Arc::new(SqliteMappingIndex::new(sqlite.clone()));
    let store: Arc<dyn ProofStore> = sqlite;

    let authority = build_authority(calendar_url, anchor_config.refresh_timeout)?;
    let anchor = Arc::new(AnchorClient::new(authority, anchor_config));

    let service = Arc::new(ProvenanceService::new(store, mapping, anchor));
    service.resume().await?;
    Ok(service)
}

/// Start the HTTP server.
pub async fn run() -> anyhow::Result<()> {
    init_tracing(&TelemetryConfig::from_env())?;

    info!("Starting provenance ledger v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        listen_addr = %config.listen_addr,
        poll_interval_secs = config.worker.poll_interval.as_secs(),
        retry_ceiling = config.worker.retry_ceiling,
        staleness_secs = config.audit.staleness_threshold.as_secs(),
        "Configuration loaded"
    );

    let service = open_service(
        &config.database_url,
        config.calendar_url.as_deref(),
        config.anchor.clone(),
    )
    .await?;

    let worker = if config.calendar_url.is_some() {
        Some(spawn_confirmation_worker(
            config.worker.clone(),
            service.store().clone(),
            service.anchor().clone(),
        ))
    } else {
        info!("Offline mode: confirmation worker not started");
        None
    };

    let intake = Arc::new(IntakeQueue::spawn(
        service.clone(),
        config.intake_workers,
        config.intake_workers * INTAKE_QUEUE_DEPTH,
    ));

    let state = AppState {
        audit: Arc::new(AuditEngine::new(
            service.store().clone(),
            config.audit.clone(),
        )),
        service,
        intake: intake.clone(),
        worker: worker.as_ref().map(|(_, tx)| tx.clone()),
    };

    let mut app = build_router().with_state(state);
    if let Some(origins) = config.cors_allow_origins.as_deref() {
        app = app.layer(cors_layer(origins)?);
    }

    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    info!("Provenance ledger is ready to accept connections");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped; draining background work");
    if let Some((worker_handle, worker_tx)) = worker {
        if worker_tx.send(WorkerMessage::Shutdown).await.is_err() {
            warn!("Confirmation worker already stopped");
        }
        if let Err(e) = worker_handle.await {
            warn!(error = %e, "Confirmation worker panicked");
        }
    }
    match Arc::try_unwrap(intake) {
        Ok(intake) => intake.shutdown().await,
        Err(_) => warn!("Intake queue still referenced at shutdown"),
    }

    info!("Provenance ledger stopped");
    Ok(())
}

/// Router with the `/api` routes, health checks and request tracing.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api", crate::api::router())
        .route("/health", get(crate::api::handlers::health_check))
        .route("/ready", get(crate::api::handlers::readiness_check))
        .layer(TraceLayer::new_for_http())
}

/// CORS layer for a comma-separated origin list, or `*` for any origin.
pub fn cors_layer(origins: &str) -> anyhow::Result<CorsLayer> {
    let origins = origins.trim();
    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin {s:?}: {e}"))
            })
            .collect::<anyhow::Result<_>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE]))
}

/// Completes on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
