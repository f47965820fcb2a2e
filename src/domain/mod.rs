//! Domain models for the provenance ledger
//!
//! Fingerprints, proof records, mapping entries, audit events and findings.

mod audit_event;
mod finding;
mod mapping;
mod proof;
mod receipt;
mod types;

pub use audit_event::*;
pub use finding::*;
pub use mapping::*;
pub use proof::*;
pub use receipt::*;
pub use types::*;
