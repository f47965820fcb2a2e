//! Provenance Ledger Library
//!
//! Fingerprints documents, anchors the fingerprints with a blockchain
//! timestamping authority and keeps the proof index that lets anyone verify
//! a document existed, unaltered, at a given time.
//!
//! ## Modules
//!
//! - [`crypto`] - Canonicalization, fingerprints and Merkle helpers
//! - [`domain`] - Core domain types (fingerprints, proof records, mapping, audit events)
//! - [`anchor`] - Timestamping authority client and confirmation worker
//! - [`infra`] - Proof store and mapping index (memory, SQLite), exports, import
//! - [`verifier`] - Independent verification of a document against a proof
//! - [`audit`] - SeedCheck audit over the event log
//! - [`service`] - Submission pipeline and intake queue
//! - [`api`] - REST API routes
//! - [`telemetry`] - Logging setup

pub mod anchor;
pub mod api;
pub mod audit;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod migrations;
pub mod server;
pub mod service;
pub mod telemetry;
pub mod verifier;

// Re-export commonly used types
pub use domain::{
    AnchorReceipt, AuditEvent, DocumentFormat, DocumentIdentity, Finding, Fingerprint,
    MappingEntry, ProofRecord, ProofStatus, VerificationResult,
};

pub use infra::{MappingIndex, ProofStore, ProvenanceError, Result};
pub use service::{ProvenanceService, SubmitReceipt, SubmitRequest};
