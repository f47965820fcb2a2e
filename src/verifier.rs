//! Document verification
//!
//! Recomputes a document's fingerprint and checks it against a claimed proof.
//! Confirmed proofs are re-validated from their receipt, so a verdict never
//! rests on the ledger's stored status alone.

use tracing::debug;

use crate::anchor::verify_receipt;
use crate::crypto::{canonicalize, fingerprint};
use crate::domain::{DocumentFormat, Fingerprint, ProofRecord, ProofStatus, VerificationResult};
use crate::infra::{ProvenanceError, Result};

/// Verify `bytes` against `claimed`.
///
/// Only an unsupported or malformed format is an error; every other outcome
/// is reported as a [`VerificationResult`]. Content is compared first, so
/// altered bytes yield `ContentMismatch` whatever the anchor state.
pub fn verify(
    bytes: &[u8],
    format: DocumentFormat,
    claimed: &ProofRecord,
) -> Result<VerificationResult> {
    let canonical = canonicalize(bytes, format)?;
    let actual = fingerprint(&canonical);
    Ok(verify_fingerprint(&actual, claimed))
}

/// Verify an already computed fingerprint against `claimed`.
pub fn verify_fingerprint(actual: &Fingerprint, claimed: &ProofRecord) -> VerificationResult {
    if *actual != claimed.fingerprint {
        debug!(
            expected = %claimed.fingerprint.short(),
            actual = %actual.short(),
            "Content mismatch"
        );
        return VerificationResult::ContentMismatch {
            expected: claimed.fingerprint,
            actual: *actual,
        };
    }

    match claimed.status {
        ProofStatus::Pending => VerificationResult::Unconfirmed,
        ProofStatus::Failed => VerificationResult::AnchorFailed {
            reason: claimed
                .failure
                .clone()
                .unwrap_or_else(|| "anchor failed".to_string()),
        },
        ProofStatus::Confirmed => validate_confirmation(claimed),
    }
}

fn validate_confirmation(claimed: &ProofRecord) -> VerificationResult {
    let Some(receipt) = &claimed.receipt else {
        return tampered("confirmed proof carries no receipt".to_string());
    };

    let anchored_at = match verify_receipt(receipt, &claimed.fingerprint) {
        Ok(at) => at,
        Err(ProvenanceError::TamperedAnchor(reason)) => return tampered(reason),
        Err(other) => return tampered(other.to_string()),
    };

    match claimed.confirmed_at {
        Some(claimed_at) if claimed_at != anchored_at => tampered(format!(
            "claimed confirmation {} differs from anchored time {}",
            claimed_at.to_rfc3339(),
            anchored_at.to_rfc3339()
        )),
        _ => VerificationResult::Confirmed {
            confirmed_at: anchored_at,
        },
    }
}

fn tampered(reason: String) -> VerificationResult {
    VerificationResult::TamperedAnchor { reason }
}
