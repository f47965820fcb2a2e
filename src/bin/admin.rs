use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use provenance_ledger::anchor::{AnchorClientConfig, ConfirmationWorker, WorkerConfig};
use provenance_ledger::audit::{AuditConfig, AuditEngine};
use provenance_ledger::domain::{
    DocumentFormat, DocumentIdentity, Fingerprint, ProofRecord, VerificationResult,
};
use provenance_ledger::infra::export::{export_with, AnnexMode, ExportOptions};
use provenance_ledger::infra::{ProofStore, SqliteProofStore};
use provenance_ledger::server::open_service;
use provenance_ledger::service::{ProvenanceService, SubmitRequest};
use provenance_ledger::telemetry::{init_tracing, TelemetryConfig};

fn print_help() {
    eprintln!(
        "\
ledger-admin

USAGE:
  ledger-admin <command> [options]

COMMANDS:
  migrate                         Create or upgrade the ledger database
  submit                          Fingerprint, anchor and register a document
  poll                            Run one confirmation pass over pending proofs
  verify                          Verify a document against its proof
  history                         Show the version history of a document
  audit                           Run the SeedCheck audit and print findings
  export                          Write mapping.csv, index.jsonl and by-doc proof sets
  import-stamped                  Import documents and receipts from stamped/
  mark-duplicate                  Acknowledge an intentional shared fingerprint

COMMON OPTIONS:
  --database-url <sqlite_url>     (defaults to env LEDGER_DATABASE_URL)

submit OPTIONS:
  --file <path>                   (required) Document to submit
  --identity <name>               (default: file stem)
  --format <pdf|txt|md|json|bin>  (default: from extension)
  --storage-location <loc>        (default: the file path)

verify OPTIONS:
  --file <path>                   (required) Document to verify
  --format <tag>                  (default: from extension)
  --proof <path>                  (optional) Proof record JSON; otherwise the ledger's own

history OPTIONS:
  --identity <name>               (required)

audit OPTIONS:
  --staleness-secs <n>            (defaults to env ANCHOR_STALENESS_SECS)

export OPTIONS:
  --out <dir>                     (required) Output directory
  --root <dir>                    (optional) Stamped tree to take receipt annexes from
  --symlink                       Link annexes instead of copying them

import-stamped OPTIONS:
  --root <dir>                    (required) Directory containing stamped/
  --out <dir>                     (optional) Export proof sets with annexes afterwards
  --symlink                       Link annexes instead of copying them
  --dry-run                       Report what would be imported; write nothing

mark-duplicate OPTIONS:
  --identity <name>               (required)
  --fingerprint <hex>             (required)

ENV:
  ANCHOR_CALENDAR_URL             Calendar server (offline in-process calendar if unset)
  ANCHOR_RETRY_CEILING            Required by poll
  ANCHOR_STALENESS_SECS           Required by audit unless --staleness-secs is given
"
    );
}

/// Options shared by every command, plus the command's own flags.
#[derive(Debug, Default)]
struct Options {
    database_url: Option<String>,
    file: Option<PathBuf>,
    identity: Option<String>,
    format: Option<String>,
    storage_location: Option<String>,
    proof: Option<PathBuf>,
    out: Option<PathBuf>,
    root: Option<PathBuf>,
    fingerprint: Option<String>,
    staleness_secs: Option<u64>,
    symlink: bool,
    dry_run: bool,
    help: bool,
}

fn value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn parse_options(mut args: VecDeque<String>) -> anyhow::Result<Options> {
    let mut opts = Options::default();
    while let Some(arg) = args.pop_front() {
        match arg.as_str() {
            "--database-url" => opts.database_url = Some(value(&mut args, &arg)?),
            "--file" => opts.file = Some(value(&mut args, &arg)?.into()),
            "--identity" => opts.identity = Some(value(&mut args, &arg)?),
            "--format" => opts.format = Some(value(&mut args, &arg)?),
            "--storage-location" => opts.storage_location = Some(value(&mut args, &arg)?),
            "--proof" => opts.proof = Some(value(&mut args, &arg)?.into()),
            "--out" => opts.out = Some(value(&mut args, &arg)?.into()),
            "--root" => opts.root = Some(value(&mut args, &arg)?.into()),
            "--fingerprint" => opts.fingerprint = Some(value(&mut args, &arg)?),
            "--staleness-secs" => {
                let raw = value(&mut args, &arg)?;
                opts.staleness_secs = Some(
                    raw.parse()
                        .map_err(|e| anyhow::anyhow!("invalid --staleness-secs {raw:?}: {e}"))?,
                );
            }
            "--symlink" => opts.symlink = true,
            "--dry-run" => opts.dry_run = true,
            "-h" | "--help" => opts.help = true,
            other => anyhow::bail!("unexpected argument: {other}"),
        }
    }
    Ok(opts)
}

fn database_url(opts: &Options) -> String {
    opts.database_url
        .clone()
        .or_else(|| std::env::var("LEDGER_DATABASE_URL").ok())
        .unwrap_or_else(|| "sqlite://provenance.db".to_string())
}

async fn open(opts: &Options) -> anyhow::Result<Arc<ProvenanceService>> {
    let calendar_url = std::env::var("ANCHOR_CALENDAR_URL")
        .ok()
        .filter(|url| !url.trim().is_empty());
    let anchor = AnchorClientConfig {
        refresh_timeout: std::env::var("ANCHOR_REFRESH_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30)),
        ..AnchorClientConfig::default()
    };
    Ok(open_service(&database_url(opts), calendar_url.as_deref(), anchor).await?)
}

fn require<'a, T>(value: &'a Option<T>, flag: &str) -> anyhow::Result<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("{flag} is required"))
}

fn format_for(path: &Path, explicit: Option<&str>) -> anyhow::Result<DocumentFormat> {
    let tag = match explicit {
        Some(tag) => tag.to_string(),
        None => path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                anyhow::anyhow!("cannot infer format of {}; pass --format", path.display())
            })?,
    };
    Ok(DocumentFormat::from_tag(&tag)?)
}

async fn export(
    service: &ProvenanceService,
    opts: &Options,
    out: &Path,
) -> anyhow::Result<()> {
    let options = ExportOptions {
        annexes: match &opts.root {
            Some(root) => service.stamped_annexes(root).await?,
            None => Default::default(),
        },
        annex_mode: if opts.symlink {
            AnnexMode::Symlink
        } else {
            AnnexMode::Copy
        },
    };
    let summary = export_with(
        service.store().as_ref(),
        service.mapping().as_ref(),
        out,
        &options,
    )
    .await?;
    println!(
        "ok: {} mapping row(s), {} event(s), {} proof set(s), {} annex(es) written to {}",
        summary.mapping_rows,
        summary.events,
        summary.proof_sets,
        summary.annexes,
        out.display()
    );
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    let opts = parse_options(args)?;
    if opts.help {
        print_help();
        return Ok(());
    }

    init_tracing(&TelemetryConfig::for_cli())?;

    match command.as_str() {
        "migrate" => {
            let store = SqliteProofStore::connect(&database_url(&opts)).await?;
            let head = store.head_sequence().await?;
            println!("ok: migrations applied (head sequence {head})");
            Ok(())
        }
        "submit" => {
            let file = require(&opts.file, "--file")?;
            let format = format_for(file, opts.format.as_deref())?;
            let identity = match &opts.identity {
                Some(name) => name.clone(),
                None => file
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("cannot derive identity; pass --identity"))?,
            };
            let storage_location = opts
                .storage_location
                .clone()
                .unwrap_or_else(|| file.to_string_lossy().replace('\\', "/"));

            let bytes = tokio::fs::read(file).await?;
            let service = open(&opts).await?;
            let receipt = service
                .submit(SubmitRequest {
                    identity: DocumentIdentity::new(identity),
                    bytes,
                    format,
                    storage_location,
                })
                .await?;
            print_json(&receipt)
        }
        "poll" => {
            let service = open(&opts).await?;
            let worker = ConfirmationWorker::new(
                WorkerConfig::from_env()?,
                service.store().clone(),
                service.anchor().clone(),
            );
            let summary = worker.poll_once().await?;
            println!(
                "polled={} confirmed={} still_pending={} failed={} deferred={} \
                 other_authority={} transient_errors={}",
                summary.polled,
                summary.confirmed,
                summary.still_pending,
                summary.failed,
                summary.deferred,
                summary.other_authority,
                summary.transient_errors
            );
            Ok(())
        }
        "verify" => {
            let file = require(&opts.file, "--file")?;
            let format = format_for(file, opts.format.as_deref())?;
            let claimed: Option<ProofRecord> = match &opts.proof {
                Some(path) => Some(serde_json::from_slice(&tokio::fs::read(path).await?)?),
                None => None,
            };

            let bytes = tokio::fs::read(file).await?;
            let service = open(&opts).await?;
            let result = service.verify_document(&bytes, format, claimed).await?;
            print_json(&result)?;
            match result {
                VerificationResult::ContentMismatch { .. }
                | VerificationResult::TamperedAnchor { .. } => {
                    anyhow::bail!("verification failed: {result}")
                }
                _ => Ok(()),
            }
        }
        "history" => {
            let identity = DocumentIdentity::new(require(&opts.identity, "--identity")?.as_str());
            let service = open(&opts).await?;
            let records = service.history(&identity).await?;
            if records.is_empty() {
                anyhow::bail!("no history for {identity}");
            }
            print_json(&records)
        }
        "audit" => {
            let config = match opts.staleness_secs {
                Some(secs) => AuditConfig::new(Duration::from_secs(secs)),
                None => AuditConfig::from_env()?,
            };
            let store = Arc::new(SqliteProofStore::connect(&database_url(&opts)).await?);
            let findings = AuditEngine::new(store, config).run_audit().await?;
            for finding in &findings {
                println!("{}", serde_json::to_string(finding)?);
            }
            eprintln!("{} finding(s) at {}", findings.len(), Utc::now().to_rfc3339());
            Ok(())
        }
        "export" => {
            let out = require(&opts.out, "--out")?;
            let service = open(&opts).await?;
            export(&service, &opts, out).await
        }
        "import-stamped" => {
            let root = require(&opts.root, "--root")?;
            let service = open(&opts).await?;
            let report = if opts.dry_run {
                service.preview_stamped(root).await?
            } else {
                service.import_stamped(root).await?
            };
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
            println!(
                "{}: imported={} confirmed={} failed={}",
                if opts.dry_run { "dry-run" } else { "ok" },
                report.imported,
                report.confirmed,
                report.failed
            );
            match (&opts.out, opts.dry_run) {
                (Some(out), false) => export(&service, &opts, out).await,
                (Some(out), true) => {
                    println!("dry-run: proof sets not written to {}", out.display());
                    Ok(())
                }
                (None, _) => Ok(()),
            }
        }
        "mark-duplicate" => {
            let identity = DocumentIdentity::new(require(&opts.identity, "--identity")?.as_str());
            let fingerprint = Fingerprint::from_hex(require(&opts.fingerprint, "--fingerprint")?)?;
            let service = open(&opts).await?;
            service
                .mapping()
                .mark_intentional_duplicate(&identity, &fingerprint)
                .await?;
            println!("ok: {identity} acknowledges {fingerprint}");
            Ok(())
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}")
        }
    }
}
