//! Import of externally stamped documents
//!
//! Layout: `stamped/<folder>/` holds one or more documents plus receipt
//! `*.json` files issued by a timestamping service. Each receipt is paired
//! with a document by base name (ignoring `_attestation` / `_receipt`
//! suffixes), falling back to the receipt's target hash. Attestation PDFs
//! and receipt screenshots in the folder travel with the pairing as annexes.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::anchor::parse_woleet_receipt;
use crate::crypto::sha256_reader;
use crate::domain::{
    parse_version_label, without_version, AnchorReceipt, DocumentFormat, DocumentIdentity,
    Fingerprint, DEFAULT_VERSION_LABEL,
};

use super::export::ProofAnnexes;
use super::Result;

/// A document paired with its receipt, ready to be submitted.
#[derive(Debug, Clone)]
pub struct StampedDocument {
    pub folder: String,
    pub identity: DocumentIdentity,
    pub document_path: PathBuf,
    /// Path relative to the import root, `/`-separated
    pub storage_location: String,
    pub format: DocumentFormat,
    /// SHA-256 of the raw file
    pub file_hash: Fingerprint,
    pub receipt_path: PathBuf,
    pub receipt: AnchorReceipt,
    pub attestation_path: Option<PathBuf>,
    pub screenshot_path: Option<PathBuf>,
}

impl StampedDocument {
    /// Files copied next to the document's proof set on export
    pub fn annexes(&self) -> ProofAnnexes {
        ProofAnnexes {
            receipt: self.receipt_path.clone(),
            attestation: self.attestation_path.clone(),
            screenshot: self.screenshot_path.clone(),
        }
    }
}

/// Result of scanning a stamped tree
#[derive(Debug, Default)]
pub struct StampedScan {
    pub documents: Vec<StampedDocument>,
    pub warnings: Vec<String>,
}

impl StampedScan {
    /// Annexes keyed by the document's storage location
    pub fn annexes(&self) -> HashMap<String, ProofAnnexes> {
        self.documents
            .iter()
            .map(|doc| (doc.storage_location.clone(), doc.annexes()))
            .collect()
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

/// Strip the `attestation` / `receipt` suffix used for receipt companions.
pub fn base_of(stem: &str) -> String {
    let lower = stem.to_lowercase();
    for suffix in ["attestation", "receipt"] {
        if let Some(rest) = lower.strip_suffix(suffix) {
            return rest.strip_suffix('_').unwrap_or(rest).to_string();
        }
    }
    lower
}

fn is_companion(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("receipt") || lower.contains("attestation")
}

fn is_screenshot(name: &str) -> bool {
    is_companion(name) || name.to_lowercase().contains("woleet")
}

fn hash_file(path: &Path) -> std::io::Result<Fingerprint> {
    Ok(Fingerprint(sha256_reader(File::open(path)?)?))
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn relative_location(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Identity for an imported document: folder name without its version,
/// followed by the document's version (file name first, then folder).
pub fn imported_identity(folder: &str, document_stem: &str) -> DocumentIdentity {
    let label = parse_version_label(document_stem)
        .or_else(|| parse_version_label(folder))
        .unwrap_or_else(|| DEFAULT_VERSION_LABEL.to_string());
    let base = without_version(folder);
    DocumentIdentity::new(format!("{} {}", base, label.replace('-', ".")))
}

#[derive(Default)]
struct FolderContents {
    receipts: Vec<PathBuf>,
    documents: Vec<PathBuf>,
    attestations: Vec<PathBuf>,
    screenshots: Vec<PathBuf>,
}

impl FolderContents {
    /// Attestation naming the document, else the folder's first one
    fn attestation_for(&self, document: &Path) -> Option<PathBuf> {
        let base = base_of(&stem(document));
        self.attestations
            .iter()
            .find(|a| base_of(&stem(a)) == base)
            .or_else(|| self.attestations.first())
            .cloned()
    }
}

fn collect_folder(folder: &Path) -> std::io::Result<FolderContents> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut contents = FolderContents::default();
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "json" => contents.receipts.push(path),
            "pdf" if is_companion(&name) => contents.attestations.push(path),
            "pdf" | "txt" | "md" if !is_companion(&name) => contents.documents.push(path),
            "png" | "jpg" | "jpeg" if is_screenshot(&name) => contents.screenshots.push(path),
            _ => {}
        }
    }
    Ok(contents)
}

/// Scan `root/stamped/*/` and pair receipts with documents.
///
/// Unreadable receipts and receipts without a matching document are skipped
/// with a warning; the scan itself only fails if `stamped/` is unreadable.
pub fn scan_stamped(root: &Path) -> Result<StampedScan> {
    let stamped = root.join("stamped");
    let mut folders: Vec<PathBuf> = std::fs::read_dir(&stamped)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    folders.sort_by_key(|p| p.to_string_lossy().to_lowercase());

    let mut scan = StampedScan::default();
    if folders.is_empty() {
        scan.warn(format!("no folders under {}", stamped.display()));
    }

    for folder in folders {
        scan_folder(root, &folder, &mut scan)?;
    }
    Ok(scan)
}

fn scan_folder(root: &Path, folder: &Path, scan: &mut StampedScan) -> Result<()> {
    let label = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let contents = collect_folder(folder)?;
    debug!(
        folder = %label,
        receipts = contents.receipts.len(),
        documents = contents.documents.len(),
        "Scanning stamped folder"
    );

    if contents.receipts.is_empty() {
        scan.warn(format!("no receipt in {}", folder.display()));
        return Ok(());
    }
    if contents.documents.is_empty() {
        scan.warn(format!("no document in {}", folder.display()));
        return Ok(());
    }

    let mut by_hash: HashMap<Fingerprint, PathBuf> = HashMap::new();
    let mut hashes: HashMap<PathBuf, Fingerprint> = HashMap::new();
    let mut by_base: HashMap<String, Vec<PathBuf>> = HashMap::new();
    for doc in &contents.documents {
        match hash_file(doc) {
            Ok(hash) => {
                by_hash.entry(hash).or_insert_with(|| doc.clone());
                hashes.insert(doc.clone(), hash);
            }
            Err(e) => {
                scan.warn(format!("cannot hash {}: {e}", doc.display()));
                continue;
            }
        }
        by_base.entry(base_of(&stem(doc))).or_default().push(doc.clone());
    }

    for receipt_path in &contents.receipts {
        let raw: Value = match std::fs::read(receipt_path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()))
        {
            Ok(value) => value,
            Err(e) => {
                scan.warn(format!("unreadable receipt {}: {e}", receipt_path.display()));
                continue;
            }
        };
        let receipt = match parse_woleet_receipt(&raw) {
            Ok(receipt) => receipt,
            Err(e) => {
                scan.warn(format!("invalid receipt {}: {e}", receipt_path.display()));
                continue;
            }
        };
        let target = receipt.target_hash;

        let candidates = by_base
            .get(&base_of(&stem(receipt_path)))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let matched = match candidates {
            [] => by_hash.get(&target).cloned(),
            [only] => Some(only.clone()),
            many => many
                .iter()
                .find(|c| hashes.get(*c) == Some(&target))
                .or_else(|| many.first())
                .cloned(),
        };
        let Some(document_path) = matched else {
            scan.warn(format!(
                "no document matches receipt {} (hash {})",
                receipt_path.display(),
                target.short()
            ));
            continue;
        };
        let Some(file_hash) = hashes.get(&document_path).copied() else {
            continue;
        };
        if file_hash != target {
            scan.warn(format!(
                "{} hashes to {} but receipt targets {}",
                document_path.display(),
                file_hash.short(),
                target.short()
            ));
        }

        let ext = document_path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let format = DocumentFormat::from_extension(&ext)?;

        scan.documents.push(StampedDocument {
            folder: label.clone(),
            identity: imported_identity(&label, &stem(&document_path)),
            storage_location: relative_location(root, &document_path),
            attestation_path: contents.attestation_for(&document_path),
            screenshot_path: contents.screenshots.first().cloned(),
            document_path,
            format,
            file_hash,
            receipt_path: receipt_path.clone(),
            receipt,
        });
    }
    Ok(())
}
