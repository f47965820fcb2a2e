//! SQLite proof store
//!
//! One transaction per write: the record change and its audit event commit
//! together or not at all.

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqlitePool};
use sqlx::{FromRow, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::domain::{
    check_transition, AnchorHandle, AuditEvent, AuditEventKind, DocumentFormat, DocumentIdentity,
    Fingerprint, ProofRecord, ProofStatus, StatusEvidence,
};
use crate::infra::locks::FingerprintLocks;
use crate::infra::{ProofStore, ProvenanceError, Result};

use super::{format_timestamp, parse_timestamp};

const RECORD_COLUMNS: &str = r#"
    fingerprint, document, format, size_bytes, submitted_at,
    anchor_authority, anchor_id, status, confirmed_at, receipt, failure, supersedes
"#;

/// SQLite-backed proof store
pub struct SqliteProofStore {
    pool: SqlitePool,
    locks: FingerprintLocks,
    /// Append lock guarding the last committed sequence number
    head: Mutex<u64>,
}

/// Open write transaction holding the append lock.
///
/// Sequence numbers handed out here become visible only on commit; a dropped
/// transaction rolls back without consuming any.
pub(crate) struct AppendTxn<'a> {
    head: MutexGuard<'a, u64>,
    last: u64,
    pub(crate) tx: Transaction<'static, Sqlite>,
}

impl AppendTxn<'_> {
    /// Insert the next audit event inside this transaction.
    pub(crate) async fn append(
        &mut self,
        fingerprint: &Fingerprint,
        kind: AuditEventKind,
    ) -> Result<AuditEvent> {
        let event = AuditEvent::new(self.last + 1, *fingerprint, kind);
        let details = serde_json::to_string(&event.kind)?;

        sqlx::query(
            r#"
            INSERT INTO audit_events (sequence, recorded_at, fingerprint, kind, details)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.sequence as i64)
        .bind(format_timestamp(&event.recorded_at))
        .bind(fingerprint.to_hex())
        .bind(event.kind.name())
        .bind(&details)
        .execute(&mut *self.tx)
        .await?;

        self.last = event.sequence;
        Ok(event)
    }

    pub(crate) async fn commit(self) -> Result<()> {
        let AppendTxn { mut head, last, tx } = self;
        tx.commit().await?;
        *head = last;
        Ok(())
    }
}

impl SqliteProofStore {
    /// Wrap a pool, running migrations and loading the log head.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        crate::migrations::run_sqlite(&pool).await?;

        let (head,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) FROM audit_events")
            .fetch_one(&pool)
            .await?;

        info!(head_sequence = head, "Opened SQLite proof store");
        Ok(Self {
            pool,
            locks: FingerprintLocks::new(),
            head: Mutex::new(head as u64),
        })
    }

    /// Open a database by URL
    pub async fn connect(url: &str) -> Result<Self> {
        Self::new(super::connect_pool(url).await?).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) async fn begin_append(&self) -> Result<AppendTxn<'_>> {
        let head = self.head.lock().await;
        let last = *head;
        let tx = self.pool.begin().await?;
        Ok(AppendTxn { head, last, tx })
    }

    async fn fetch_record(
        tx: &mut Transaction<'static, Sqlite>,
        fingerprint: &Fingerprint,
    ) -> Result<Option<ProofRecord>> {
        let row = sqlx::query_as::<_, ProofRecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM proof_records WHERE fingerprint = ?"
        ))
        .bind(fingerprint.to_hex())
        .fetch_optional(&mut **tx)
        .await?;

        row.map(ProofRecord::try_from).transpose()
    }
}

#[async_trait]
impl ProofStore for SqliteProofStore {
    async fn put(&self, record: ProofRecord) -> Result<AuditEvent> {
        let fingerprint = record.fingerprint;
        let _writer = self.locks.acquire(&fingerprint).await;

        if record.status != ProofStatus::Pending {
            return Err(ProvenanceError::InvalidStateTransition {
                fingerprint,
                from: "none".to_string(),
                to: record.status.to_string(),
            });
        }

        let mut txn = self.begin_append().await?;
        if Self::fetch_record(&mut txn.tx, &fingerprint).await?.is_some() {
            return Err(ProvenanceError::DuplicateRecord(fingerprint));
        }

        sqlx::query(&format!(
            "INSERT INTO proof_records ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, ?)"
        ))
        .bind(fingerprint.to_hex())
        .bind(record.document.as_str())
        .bind(record.format.as_str())
        .bind(record.size_bytes as i64)
        .bind(format_timestamp(&record.submitted_at))
        .bind(&record.anchor.authority)
        .bind(&record.anchor.id)
        .bind(record.status.as_str())
        .bind(record.supersedes.map(|fp| fp.to_hex()))
        .execute(&mut *txn.tx)
        .await?;

        let event = txn
            .append(&fingerprint, AuditEventKind::submitted(&record))
            .await?;
        txn.commit().await?;

        debug!(
            fingerprint = %fingerprint.short(),
            sequence = event.sequence,
            "Stored pending proof record"
        );
        Ok(event)
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<ProofRecord>> {
        let row = sqlx::query_as::<_, ProofRecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM proof_records WHERE fingerprint = ?"
        ))
        .bind(fingerprint.to_hex())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProofRecord::try_from).transpose()
    }

    async fn update_status(
        &self,
        fingerprint: &Fingerprint,
        status: ProofStatus,
        evidence: StatusEvidence,
    ) -> Result<ProofRecord> {
        let _writer = self.locks.acquire(fingerprint).await;

        let mut txn = self.begin_append().await?;
        let mut record = Self::fetch_record(&mut txn.tx, fingerprint)
            .await?
            .ok_or(ProvenanceError::RecordNotFound(*fingerprint))?;

        if !check_transition(&record, status, &evidence)? {
            return Ok(record);
        }
        let kind = AuditEventKind::from_evidence(&evidence).ok_or_else(|| {
            ProvenanceError::Internal(format!("no event for transition to {status}"))
        })?;
        record.apply(status, &evidence);

        let receipt_json = record
            .receipt
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE proof_records
            SET status = ?, confirmed_at = ?, receipt = ?, failure = ?
            WHERE fingerprint = ? AND status = 'pending'
            "#,
        )
        .bind(record.status.as_str())
        .bind(record.confirmed_at.as_ref().map(format_timestamp))
        .bind(receipt_json)
        .bind(record.failure.as_deref())
        .bind(fingerprint.to_hex())
        .execute(&mut *txn.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(ProvenanceError::Internal(format!(
                "status update for {fingerprint} touched {} rows",
                result.rows_affected()
            )));
        }

        txn.append(fingerprint, kind).await?;
        txn.commit().await?;
        Ok(record)
    }

    async fn list_by_status(&self, status: ProofStatus) -> Result<Vec<ProofRecord>> {
        let rows = sqlx::query_as::<_, ProofRecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM proof_records WHERE status = ?"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        collect_sorted(rows)
    }

    async fn list_all(&self) -> Result<Vec<ProofRecord>> {
        let rows = sqlx::query_as::<_, ProofRecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM proof_records"
        ))
        .fetch_all(&self.pool)
        .await?;

        collect_sorted(rows)
    }

    async fn append_event(
        &self,
        fingerprint: &Fingerprint,
        kind: AuditEventKind,
    ) -> Result<AuditEvent> {
        let _writer = self.locks.acquire(fingerprint).await;

        let mut txn = self.begin_append().await?;
        if Self::fetch_record(&mut txn.tx, fingerprint).await?.is_none() {
            return Err(ProvenanceError::RecordNotFound(*fingerprint));
        }
        let event = txn.append(fingerprint, kind).await?;
        txn.commit().await?;
        Ok(event)
    }

    async fn events_since(&self, after: u64) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            r#"
            SELECT sequence, recorded_at, fingerprint, details
            FROM audit_events
            WHERE sequence > ?
            ORDER BY sequence ASC
            "#,
        )
        .bind(after as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditEvent::try_from).collect()
    }

    async fn events_page(&self, after: u64, limit: usize) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            r#"
            SELECT sequence, recorded_at, fingerprint, details
            FROM audit_events
            WHERE sequence > ?
            ORDER BY sequence ASC
            LIMIT ?
            "#,
        )
        .bind(after as i64)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditEvent::try_from).collect()
    }

    async fn head_sequence(&self) -> Result<u64> {
        let (head,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) FROM audit_events")
                .fetch_one(&self.pool)
                .await?;
        Ok(head as u64)
    }
}

fn collect_sorted(rows: Vec<ProofRecordRow>) -> Result<Vec<ProofRecord>> {
    let mut records = rows
        .into_iter()
        .map(ProofRecord::try_from)
        .collect::<Result<Vec<_>>>()?;
    records.sort_by(|a, b| (a.submitted_at, a.fingerprint).cmp(&(b.submitted_at, b.fingerprint)));
    Ok(records)
}

/// Raw row from proof_records
#[derive(Debug, FromRow)]
struct ProofRecordRow {
    fingerprint: String,
    document: String,
    format: String,
    size_bytes: i64,
    submitted_at: String,
    anchor_authority: String,
    anchor_id: String,
    status: String,
    confirmed_at: Option<String>,
    receipt: Option<String>,
    failure: Option<String>,
    supersedes: Option<String>,
}

impl TryFrom<ProofRecordRow> for ProofRecord {
    type Error = ProvenanceError;

    fn try_from(row: ProofRecordRow) -> Result<Self> {
        Ok(ProofRecord {
            fingerprint: Fingerprint::from_hex(&row.fingerprint)?,
            document: DocumentIdentity::new(row.document),
            format: DocumentFormat::from_tag(&row.format)?,
            size_bytes: row.size_bytes as u64,
            submitted_at: parse_timestamp(&row.submitted_at)?,
            anchor: AnchorHandle::new(row.anchor_authority, row.anchor_id),
            status: row.status.parse()?,
            confirmed_at: row.confirmed_at.as_deref().map(parse_timestamp).transpose()?,
            receipt: row
                .receipt
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            failure: row.failure,
            supersedes: row
                .supersedes
                .as_deref()
                .map(Fingerprint::from_hex)
                .transpose()?,
        })
    }
}

/// Raw row from audit_events
#[derive(Debug, FromRow)]
struct AuditEventRow {
    sequence: i64,
    recorded_at: String,
    fingerprint: String,
    details: String,
}

impl TryFrom<AuditEventRow> for AuditEvent {
    type Error = ProvenanceError;

    fn try_from(row: AuditEventRow) -> Result<Self> {
        Ok(AuditEvent {
            sequence: row.sequence as u64,
            recorded_at: parse_timestamp(&row.recorded_at)?,
            fingerprint: Fingerprint::from_hex(&row.fingerprint)?,
            kind: serde_json::from_str(&row.details)?,
        })
    }
}
