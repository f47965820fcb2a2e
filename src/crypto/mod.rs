//! Cryptographic utilities for the provenance ledger
//!
//! Provides:
//! - Deterministic canonicalization of document bytes
//! - SHA-256 fingerprints
//! - Merkle paths in the Chainpoint receipt convention

mod canonical;
mod hash;

pub use canonical::*;
pub use hash::*;
