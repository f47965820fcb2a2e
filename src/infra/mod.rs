//! Infrastructure layer for the provenance ledger
//!
//! Contains trait definitions and implementations for:
//! - Proof record storage and the audit event log (memory, SQLite)
//! - Mapping index (memory, SQLite)
//! - Exports (mapping.csv, index.jsonl, per-version proof sets)
//! - Import of externally stamped receipts
//! - Retry with backoff

mod error;
pub mod export;
pub mod import;
mod locks;
mod memory;
mod retry;
pub mod sqlite;
mod traits;

pub use error::*;
pub use locks::FingerprintLocks;
pub use memory::{MemoryMappingIndex, MemoryProofStore};
pub use retry::{is_transient_db_error, Retried, Retry, RetryConfig};
pub use sqlite::{SqliteMappingIndex, SqliteProofStore};
pub use traits::*;
