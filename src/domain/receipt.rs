//! Anchor handles and receipts
//!
//! A receipt is the evidence blob returned by a timestamping authority once a
//! digest is included in a blockchain transaction: a Merkle path from the
//! document fingerprint to a root, and the transactions that commit to that root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Fingerprint, Hash256};

/// Opaque handle returned by a timestamping authority on submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorHandle {
    /// Authority that issued the handle (e.g. a calendar URL or `memory`)
    pub authority: String,
    /// Authority-assigned identifier
    pub id: String,
}

impl AnchorHandle {
    pub fn new(authority: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for AnchorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.authority, self.id)
    }
}

/// One step of a Merkle path. The hash is the sibling; its side says where
/// it is concatenated relative to the running hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofStep {
    Left(#[serde(with = "super::hash256_hex")] Hash256),
    Right(#[serde(with = "super::hash256_hex")] Hash256),
}

/// A blockchain transaction committing to a receipt's Merkle root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorPoint {
    /// Network name, e.g. `bitcoin-mainnet`
    pub network: String,
    /// Transaction id (lowercase hex)
    pub tx_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    /// Block time asserted by the authority
    pub confirmed_at: DateTime<Utc>,
    /// OP_RETURN payload (hex) if the authority exposes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_return: Option<String>,
}

/// Verifiable evidence that a fingerprint was anchored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    /// Digest the receipt was issued for
    pub target_hash: Fingerprint,
    /// Merkle path from `target_hash` to `merkle_root`
    #[serde(default)]
    pub proof: Vec<ProofStep>,
    #[serde(with = "super::hash256_hex")]
    pub merkle_root: Hash256,
    pub anchors: Vec<AnchorPoint>,
    /// Authority-side proof id (Woleet proof id, calendar receipt id, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl AnchorReceipt {
    /// Earliest anchor time, the moment the document is proven to exist by.
    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.anchors.iter().map(|a| a.confirmed_at).min()
    }

    /// Transaction id of the earliest anchor.
    pub fn primary_tx_id(&self) -> Option<&str> {
        self.anchors
            .iter()
            .min_by_key(|a| a.confirmed_at)
            .map(|a| a.tx_id.as_str())
    }
}
