//! Mapping entries: document identity -> ordered proof history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{DocumentIdentity, Fingerprint};

/// One version of a document as seen by the mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRef {
    pub fingerprint: Fingerprint,
    /// Submission time of the referenced proof record (ordering key)
    pub submitted_at: DateTime<Utc>,
    /// Where the raw bytes live (path, URI, object key)
    pub storage_location: String,
}

/// Index row linking a document identity to its proof history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub document: DocumentIdentity,
    /// Versions ordered by submission time, oldest first
    pub versions: Vec<VersionRef>,
    /// Fingerprints this identity shares with another identity on purpose
    #[serde(default)]
    pub intentional_duplicates: BTreeSet<Fingerprint>,
}

impl MappingEntry {
    pub fn new(document: DocumentIdentity) -> Self {
        Self {
            document,
            versions: Vec::new(),
            intentional_duplicates: BTreeSet::new(),
        }
    }

    /// Insert a version keeping submission-time order. Returns false if the
    /// fingerprint is already part of this history.
    pub fn insert_version(&mut self, version: VersionRef) -> bool {
        if self.contains(&version.fingerprint) {
            return false;
        }
        let key = (version.submitted_at, version.fingerprint);
        let pos = self
            .versions
            .partition_point(|v| (v.submitted_at, v.fingerprint) <= key);
        self.versions.insert(pos, version);
        true
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.versions.iter().any(|v| &v.fingerprint == fingerprint)
    }

    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.versions.iter().map(|v| v.fingerprint).collect()
    }

    pub fn latest(&self) -> Option<&VersionRef> {
        self.versions.last()
    }

    /// 1-based position of a fingerprint in the history.
    pub fn revision_of(&self, fingerprint: &Fingerprint) -> Option<usize> {
        self.versions
            .iter()
            .position(|v| &v.fingerprint == fingerprint)
            .map(|i| i + 1)
    }
}
