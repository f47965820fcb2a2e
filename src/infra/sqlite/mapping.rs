//! SQLite mapping index

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::FromRow;
use tracing::debug;

use crate::domain::{AuditEventKind, DocumentIdentity, Fingerprint, MappingEntry, VersionRef};
use crate::infra::{MappingIndex, ProofStore, ProvenanceError, Result};

use super::{format_timestamp, parse_timestamp, SqliteProofStore};

const MAPPING_COLUMNS: &str =
    "document, fingerprint, submitted_at, storage_location, registered_seq, intentional_duplicate";

/// Mapping index sharing the proof store's database and append path
pub struct SqliteMappingIndex {
    store: Arc<SqliteProofStore>,
}

impl SqliteMappingIndex {
    pub fn new(store: Arc<SqliteProofStore>) -> Self {
        Self { store }
    }

    async fn fetch(&self, filter: &str, bind: Option<String>) -> Result<Vec<MappingRow>> {
        let sql = format!(
            "SELECT {MAPPING_COLUMNS} FROM mapping_versions {filter} ORDER BY document, registered_seq"
        );
        let mut query = sqlx::query_as::<_, MappingRow>(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        Ok(query.fetch_all(self.store.pool()).await?)
    }
}

fn build_entries(rows: Vec<MappingRow>) -> Result<Vec<MappingEntry>> {
    let mut entries: BTreeMap<DocumentIdentity, MappingEntry> = BTreeMap::new();
    for row in rows {
        let document = DocumentIdentity::new(row.document);
        let fingerprint = Fingerprint::from_hex(&row.fingerprint)?;
        let entry = entries
            .entry(document.clone())
            .or_insert_with(|| MappingEntry::new(document));
        entry.insert_version(VersionRef {
            fingerprint,
            submitted_at: parse_timestamp(&row.submitted_at)?,
            storage_location: row.storage_location,
        });
        if row.intentional_duplicate != 0 {
            entry.intentional_duplicates.insert(fingerprint);
        }
    }
    Ok(entries.into_values().collect())
}

#[async_trait]
impl MappingIndex for SqliteMappingIndex {
    async fn register(
        &self,
        document: &DocumentIdentity,
        fingerprint: &Fingerprint,
        storage_location: &str,
    ) -> Result<bool> {
        let record = self
            .store
            .get(fingerprint)
            .await?
            .ok_or(ProvenanceError::DanglingFingerprint(*fingerprint))?;

        let mut txn = self.store.begin_append().await?;
        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT registered_seq FROM mapping_versions WHERE document = ? AND fingerprint = ?",
        )
        .bind(document.as_str())
        .bind(fingerprint.to_hex())
        .fetch_optional(&mut *txn.tx)
        .await?;
        if existing.is_some() {
            return Ok(false);
        }

        let event = txn
            .append(
                fingerprint,
                AuditEventKind::Registered {
                    document: document.clone(),
                    storage_location: storage_location.to_string(),
                },
            )
            .await?;

        sqlx::query(&format!(
            "INSERT INTO mapping_versions ({MAPPING_COLUMNS}) VALUES (?, ?, ?, ?, ?, 0)"
        ))
        .bind(document.as_str())
        .bind(fingerprint.to_hex())
        .bind(format_timestamp(&record.submitted_at))
        .bind(storage_location)
        .bind(event.sequence as i64)
        .execute(&mut *txn.tx)
        .await?;

        txn.commit().await?;
        debug!(
            document = %document,
            fingerprint = %fingerprint.short(),
            sequence = event.sequence,
            "Registered mapping"
        );
        Ok(true)
    }

    async fn lookup(&self, document: &DocumentIdentity) -> Result<Vec<Fingerprint>> {
        Ok(self
            .entry(document)
            .await?
            .map(|e| e.fingerprints())
            .unwrap_or_default())
    }

    async fn lookup_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<DocumentIdentity>> {
        Ok(self.owners(fingerprint).await?.into_iter().next())
    }

    async fn owners(&self, fingerprint: &Fingerprint) -> Result<Vec<DocumentIdentity>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT document FROM mapping_versions WHERE fingerprint = ? ORDER BY registered_seq",
        )
        .bind(fingerprint.to_hex())
        .fetch_all(self.store.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(doc,)| DocumentIdentity::new(doc))
            .collect())
    }

    async fn entry(&self, document: &DocumentIdentity) -> Result<Option<MappingEntry>> {
        let rows = self
            .fetch("WHERE document = ?", Some(document.as_str().to_string()))
            .await?;
        Ok(build_entries(rows)?.into_iter().next())
    }

    async fn entries(&self) -> Result<Vec<MappingEntry>> {
        build_entries(self.fetch("", None).await?)
    }

    async fn mark_intentional_duplicate(
        &self,
        document: &DocumentIdentity,
        fingerprint: &Fingerprint,
    ) -> Result<()> {
        let mut txn = self.store.begin_append().await?;
        let flag: Option<(i64,)> = sqlx::query_as(
            "SELECT intentional_duplicate FROM mapping_versions WHERE document = ? AND fingerprint = ?",
        )
        .bind(document.as_str())
        .bind(fingerprint.to_hex())
        .fetch_optional(&mut *txn.tx)
        .await?;

        match flag {
            None => {
                return Err(ProvenanceError::NotRegistered {
                    document: document.to_string(),
                    fingerprint: *fingerprint,
                })
            }
            Some((1,)) => return Ok(()),
            Some(_) => {}
        }

        txn.append(
            fingerprint,
            AuditEventKind::DuplicateAcknowledged {
                document: document.clone(),
            },
        )
        .await?;

        sqlx::query(
            "UPDATE mapping_versions SET intentional_duplicate = 1 WHERE document = ? AND fingerprint = ?",
        )
        .bind(document.as_str())
        .bind(fingerprint.to_hex())
        .execute(&mut *txn.tx)
        .await?;

        txn.commit().await?;
        Ok(())
    }
}

/// Raw row from mapping_versions
#[derive(Debug, FromRow)]
struct MappingRow {
    document: String,
    fingerprint: String,
    submitted_at: String,
    storage_location: String,
    #[allow(dead_code)]
    registered_seq: i64,
    intentional_duplicate: i64,
}
