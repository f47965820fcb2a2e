//! Exports for external audit tooling
//!
//! - `mapping.csv`: one row per (identity, version), RFC 4180 quoting
//! - `index.jsonl`: one audit event per line, in sequence order
//! - `by-doc/<slug>_<version>/proof.json` and `checksums.txt` per version,
//!   plus the stamped receipt annexes when the export knows where they are

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{
    AnchorReceipt, AuditEvent, DocumentIdentity, Fingerprint, MappingEntry, ProofRecord,
};

use super::{MappingIndex, ProofStore, Result};

pub const MAPPING_HEADER: [&str; 9] = [
    "document_identity",
    "version",
    "fingerprint",
    "status",
    "storage_location",
    "slug",
    "bitcoin_txid",
    "proof_id",
    "anchored_utc",
];

pub const PROOF_SCHEMA_VERSION: &str = "1.0";

/// One row of `mapping.csv`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRow {
    pub document_identity: String,
    /// 1-based position in the identity's history
    pub version: usize,
    pub fingerprint: Fingerprint,
    pub status: String,
    pub storage_location: String,
    pub slug: String,
    pub bitcoin_txid: String,
    pub proof_id: String,
    pub anchored_utc: String,
}

impl MappingRow {
    fn fields(&self) -> [String; 9] {
        [
            self.document_identity.clone(),
            self.version.to_string(),
            self.fingerprint.to_hex(),
            self.status.clone(),
            self.storage_location.clone(),
            self.slug.clone(),
            self.bitcoin_txid.clone(),
            self.proof_id.clone(),
            self.anchored_utc.clone(),
        ]
    }
}

/// `proof.json` of a per-version proof set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSet {
    pub schema_version: String,
    pub document: ProofSetDocument,
    pub anchoring: ProofSetAnchoring,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<AnchorReceipt>,
    pub dates: ProofSetDates,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSetDocument {
    pub identity: DocumentIdentity,
    pub slug: String,
    pub version: String,
    pub revision: usize,
    pub filename: String,
    pub mimetype: String,
    pub size_bytes: u64,
    pub sha256: Fingerprint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<Fingerprint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSetAnchoring {
    pub status: String,
    pub authority: String,
    pub handle: String,
    pub anchor_network: Option<String>,
    pub txid: Option<String>,
    pub block_height: Option<u64>,
    pub block_time_utc: Option<String>,
    pub op_return: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSetDates {
    pub submitted_utc: String,
    pub anchored_utc: Option<String>,
}

/// Counts of what an export wrote
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub mapping_rows: usize,
    pub events: usize,
    pub proof_sets: usize,
    /// Annex files copied or linked
    pub annexes: usize,
}

/// Files stored next to a stamped document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofAnnexes {
    /// Receipt JSON, written as `woleet_receipt.json`
    pub receipt: PathBuf,
    /// Attestation PDF, written as `woleet_receipt.pdf`
    pub attestation: Option<PathBuf>,
    /// Receipt screenshot, written under its own name
    pub screenshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnnexMode {
    #[default]
    Copy,
    /// Link to the stamped files instead of copying them (copies off unix)
    Symlink,
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Annexes keyed by storage location
    pub annexes: HashMap<String, ProofAnnexes>,
    pub annex_mode: AnnexMode,
}

/// Second-precision UTC, `2025-03-01T12:00:00Z`
pub fn utc_seconds(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Directory name of a version's proof set. Later revisions of a name that
/// carries a single version token are suffixed `-rN`.
pub fn proof_set_dir(document: &DocumentIdentity, revision: usize) -> String {
    let version = if revision <= 1 {
        document.version_label()
    } else {
        format!("{}-r{revision}", document.version_label())
    };
    format!("{}_{version}", document.base_slug())
}

/// Proof-set directory of every version, parallel to `entries` and their
/// versions. A name already taken gets the fingerprint prefix appended.
pub fn assign_proof_set_dirs(entries: &[MappingEntry]) -> Vec<Vec<String>> {
    let mut taken = HashSet::new();
    entries
        .iter()
        .map(|entry| {
            entry
                .versions
                .iter()
                .enumerate()
                .map(|(index, version)| {
                    let mut dir = proof_set_dir(&entry.document, index + 1);
                    if !taken.insert(dir.clone()) {
                        dir = format!("{dir}-{}", &version.fingerprint.to_hex()[..8]);
                        taken.insert(dir.clone());
                    }
                    dir
                })
                .collect()
        })
        .collect()
}

fn row_for(
    entry: &MappingEntry,
    revision: usize,
    dir: &str,
    record: Option<&ProofRecord>,
) -> Option<MappingRow> {
    let version = entry.versions.get(revision - 1)?;
    let receipt = record.and_then(|r| r.receipt.as_ref());

    Some(MappingRow {
        document_identity: entry.document.to_string(),
        version: revision,
        fingerprint: version.fingerprint,
        status: record
            .map(|r| r.status.to_string())
            .unwrap_or_else(|| "missing".to_string()),
        storage_location: version.storage_location.clone(),
        slug: dir.to_string(),
        bitcoin_txid: receipt
            .and_then(|r| r.primary_tx_id())
            .unwrap_or_default()
            .to_string(),
        proof_id: receipt
            .and_then(|r| r.proof_id.clone())
            .unwrap_or_default(),
        anchored_utc: record
            .and_then(|r| r.confirmed_at)
            .map(utc_seconds)
            .unwrap_or_default(),
    })
}

/// Build mapping rows: identities in name order, versions oldest first.
pub async fn mapping_rows(
    entries: &[MappingEntry],
    dirs: &[Vec<String>],
    store: &dyn ProofStore,
) -> Result<Vec<MappingRow>> {
    let mut rows = Vec::new();
    for (entry, dirs) in entries.iter().zip(dirs) {
        for (index, dir) in dirs.iter().enumerate() {
            let record = store.get(&entry.versions[index].fingerprint).await?;
            rows.extend(row_for(entry, index + 1, dir, record.as_ref()));
        }
    }
    Ok(rows)
}

/// Quote a CSV field per RFC 4180 when it holds a delimiter, quote or line break.
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Write `mapping.csv` with CRLF record separators.
pub fn write_mapping_csv<W: Write>(rows: &[MappingRow], mut out: W) -> Result<()> {
    out.write_all(MAPPING_HEADER.join(",").as_bytes())?;
    out.write_all(b"\r\n")?;
    for row in rows {
        let line: Vec<String> = row.fields().iter().map(|f| csv_field(f)).collect();
        out.write_all(line.join(",").as_bytes())?;
        out.write_all(b"\r\n")?;
    }
    Ok(())
}

/// Write `index.jsonl`, one event per line.
pub fn write_index_jsonl<W: Write>(events: &[AuditEvent], mut out: W) -> Result<()> {
    for event in events {
        serde_json::to_writer(&mut out, event)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// Assemble `proof.json` for one version of a document stored in `dir`.
pub fn proof_set(
    entry: &MappingEntry,
    revision: usize,
    dir: &str,
    record: &ProofRecord,
) -> ProofSet {
    let storage_location = entry
        .versions
        .get(revision.saturating_sub(1))
        .map(|v| v.storage_location.clone())
        .unwrap_or_default();
    let anchor = record
        .receipt
        .as_ref()
        .and_then(|r| r.anchors.iter().min_by_key(|a| a.confirmed_at));
    let version = dir
        .split_once('_')
        .map(|(_, v)| v.to_string())
        .unwrap_or_else(|| entry.document.version_label());

    ProofSet {
        schema_version: PROOF_SCHEMA_VERSION.to_string(),
        document: ProofSetDocument {
            identity: entry.document.clone(),
            slug: entry.document.base_slug(),
            version,
            revision,
            filename: storage_location,
            mimetype: record.format.mime_type().to_string(),
            size_bytes: record.size_bytes,
            sha256: record.fingerprint,
            supersedes: record.supersedes,
        },
        anchoring: ProofSetAnchoring {
            status: record.status.to_string(),
            authority: record.anchor.authority.clone(),
            handle: record.anchor.id.clone(),
            anchor_network: anchor.map(|a| a.network.clone()),
            txid: anchor.map(|a| a.tx_id.clone()),
            block_height: anchor.and_then(|a| a.block_height),
            block_time_utc: anchor.map(|a| utc_seconds(a.confirmed_at)),
            op_return: anchor.and_then(|a| a.op_return.clone()),
            failure: record.failure.clone(),
        },
        receipt: record.receipt.clone(),
        dates: ProofSetDates {
            submitted_utc: utc_seconds(record.submitted_at),
            anchored_utc: record.confirmed_at.map(utc_seconds),
        },
    }
}

/// `checksums.txt` line: `SHA256  <hex>  <location>`
pub fn checksum_line(fingerprint: &Fingerprint, location: &str) -> String {
    format!("SHA256  {}  {}\n", fingerprint.to_hex(), location.replace('\\', "/"))
}

/// Write every export under `out_dir`, replacing earlier files.
pub async fn export_all(
    store: &dyn ProofStore,
    mapping: &dyn MappingIndex,
    out_dir: &Path,
) -> Result<ExportSummary> {
    export_with(store, mapping, out_dir, &ExportOptions::default()).await
}

async fn place_annex(source: &Path, target: &Path, mode: AnnexMode) -> Result<()> {
    match tokio::fs::remove_file(target).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    match mode {
        #[cfg(unix)]
        AnnexMode::Symlink => {
            let source = tokio::fs::canonicalize(source).await?;
            tokio::fs::symlink(source, target).await?;
        }
        _ => {
            tokio::fs::copy(source, target).await?;
        }
    }
    Ok(())
}

/// Receipt, attestation and screenshot next to `proof.json`; returns the
/// number of files placed.
pub async fn write_annexes(
    dir: &Path,
    annexes: &ProofAnnexes,
    mode: AnnexMode,
) -> Result<usize> {
    let mut placed = vec![(annexes.receipt.clone(), dir.join("woleet_receipt.json"))];
    if let Some(attestation) = &annexes.attestation {
        placed.push((attestation.clone(), dir.join("woleet_receipt.pdf")));
    }
    if let Some(screenshot) = &annexes.screenshot {
        if let Some(name) = screenshot.file_name() {
            placed.push((screenshot.clone(), dir.join(name)));
        }
    }

    for (source, target) in &placed {
        place_annex(source, target, mode).await?;
    }
    Ok(placed.len())
}

/// Write every export under `out_dir` with annexes from `options`.
pub async fn export_with(
    store: &dyn ProofStore,
    mapping: &dyn MappingIndex,
    out_dir: &Path,
    options: &ExportOptions,
) -> Result<ExportSummary> {
    let by_doc = out_dir.join("by-doc");
    tokio::fs::create_dir_all(&by_doc).await?;

    let entries = mapping.entries().await?;
    let dirs = assign_proof_set_dirs(&entries);

    let rows = mapping_rows(&entries, &dirs, store).await?;
    let mut csv = Vec::new();
    write_mapping_csv(&rows, &mut csv)?;
    tokio::fs::write(out_dir.join("mapping.csv"), csv).await?;

    let events = store.events_since(0).await?;
    let mut jsonl = Vec::new();
    write_index_jsonl(&events, &mut jsonl)?;
    tokio::fs::write(out_dir.join("index.jsonl"), jsonl).await?;

    let mut summary = ExportSummary {
        mapping_rows: rows.len(),
        events: events.len(),
        ..ExportSummary::default()
    };
    for (entry, dirs) in entries.iter().zip(&dirs) {
        for (index, (version, name)) in entry.versions.iter().zip(dirs).enumerate() {
            let Some(record) = store.get(&version.fingerprint).await? else {
                continue;
            };
            let dir: PathBuf = by_doc.join(name);
            tokio::fs::create_dir_all(&dir).await?;

            let set = proof_set(entry, index + 1, name, &record);
            tokio::fs::write(dir.join("proof.json"), serde_json::to_vec_pretty(&set)?).await?;
            tokio::fs::write(
                dir.join("checksums.txt"),
                checksum_line(&record.fingerprint, &version.storage_location),
            )
            .await?;
            if let Some(annexes) = options.annexes.get(&version.storage_location) {
                summary.annexes += write_annexes(&dir, annexes, options.annex_mode).await?;
            }
            debug!(dir = %dir.display(), "Wrote proof set");
            summary.proof_sets += 1;
        }
    }

    info!(
        out_dir = %out_dir.display(),
        rows = summary.mapping_rows,
        events = summary.events,
        proof_sets = summary.proof_sets,
        annexes = summary.annexes,
        "Export complete"
    );
    Ok(summary)
}
