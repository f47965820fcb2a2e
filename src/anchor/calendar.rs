//! HTTP calendar client
//!
//! Protocol:
//! - `POST {base}/digest` with `{"hash": "<hex>"}` answers `{"id": "..."}`
//! - `GET {base}/proof/{id}` answers `{"status": "pending" | "confirmed" | "failed",
//!   "receipt": {...}, "reason": "..."}`
//!
//! Connection failures, timeouts, 429 and 5xx are transient; other 4xx
//! answers are terminal.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{AnchorHandle, AnchorReceipt, Fingerprint};
use crate::infra::{ProvenanceError, Result};

use super::{parse_woleet_receipt, AnchorStatus, TimestampAuthority};

#[derive(Debug, Serialize)]
struct DigestRequest<'a> {
    hash: &'a str,
}

#[derive(Debug, Deserialize)]
struct DigestResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum CalendarState {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Deserialize)]
struct ProofResponse {
    status: CalendarState,
    #[serde(default)]
    receipt: Option<Value>,
    #[serde(default)]
    reason: Option<String>,
}

/// Client for a calendar server speaking the digest/proof protocol
pub struct HttpCalendar {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCalendar {
    /// Create a client; `timeout` bounds every request.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProvenanceError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn transport_error(err: reqwest::Error) -> ProvenanceError {
    if err.is_decode() {
        return ProvenanceError::InvalidReceipt(format!("calendar response: {err}"));
    }
    ProvenanceError::AnchorAuthorityUnavailable(err.to_string())
}

fn status_error(status: StatusCode, body: &str) -> ProvenanceError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ProvenanceError::AnchorAuthorityUnavailable(format!("calendar returned {status}"))
    } else {
        ProvenanceError::AnchorFailed(format!("calendar returned {status}: {body}"))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(%status, "Calendar request rejected");
    Err(status_error(status, &body))
}

#[async_trait]
impl TimestampAuthority for HttpCalendar {
    fn authority_id(&self) -> String {
        self.base_url.clone()
    }

    async fn submit(&self, digest: &Fingerprint) -> Result<AnchorHandle> {
        let hash = digest.to_hex();
        let response = self
            .client
            .post(format!("{}/digest", self.base_url))
            .json(&DigestRequest { hash: &hash })
            .send()
            .await
            .map_err(transport_error)?;

        let body: DigestResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;

        debug!(fingerprint = %digest.short(), id = %body.id, "Calendar accepted digest");
        Ok(AnchorHandle::new(self.base_url.clone(), body.id))
    }

    async fn query(&self, handle: &AnchorHandle) -> Result<AnchorStatus> {
        let response = self
            .client
            .get(format!("{}/proof/{}", self.base_url, handle.id))
            .send()
            .await
            .map_err(transport_error)?;

        let body: ProofResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;

        match body.status {
            CalendarState::Pending => Ok(AnchorStatus::Pending),
            CalendarState::Failed => Ok(AnchorStatus::Failed {
                reason: body
                    .reason
                    .unwrap_or_else(|| "rejected by calendar".to_string()),
            }),
            CalendarState::Confirmed => {
                let raw = body.receipt.ok_or_else(|| {
                    ProvenanceError::InvalidReceipt(format!(
                        "confirmed proof {} without receipt",
                        handle.id
                    ))
                })?;
                // Native receipts first, Woleet/Chainpoint layout otherwise
                let receipt: AnchorReceipt = match serde_json::from_value(raw.clone()) {
                    Ok(receipt) => receipt,
                    Err(_) => parse_woleet_receipt(&raw)?,
                };
                let confirmed_at = receipt.confirmed_at().ok_or_else(|| {
                    ProvenanceError::InvalidReceipt(format!(
                        "confirmed proof {} has no anchor",
                        handle.id
                    ))
                })?;
                Ok(AnchorStatus::Confirmed {
                    confirmed_at,
                    receipt,
                })
            }
        }
    }
}
