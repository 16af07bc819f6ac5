//! The secure write/read facade.
//!
//! [`Vault`] is the only way records get into a collection file. A secure
//! write:
//! 1. Serializes the record to canonical JSON and encrypts it
//! 2. Appends the encrypted entry to the collection file
//! 3. Appends a ledger entry carrying the exact same ciphertext
//!
//! Steps 2 and 3 run while holding the collection's queue slot and then the
//! ledger's slot. Lock order is always collection, then ledger, so
//! per-collection file order equals ledger order and ledger timestamps never
//! go backwards.
//!
//! Steps 2 and 3 run on a spawned task. Dropping the `secure_write` future
//! does not stop them, so a record never lands without its ledger entry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::audit::{
    timestamp_now, AuditLedger, AuditMeta, AuditQuery, AuditSink, AuditTrailEntry, LedgerStatus,
};
use crate::cipher::{Cipher, EncryptedPayload};
use crate::config::VaultConfig;
use crate::error::{PhivaultError, Result};
use crate::json_store::JsonStore;
use crate::queue::{self, PathQueue};
use crate::store::{self, EncryptedRecordEntry};

/// A record that could not be returned by a best-effort read.
#[derive(Debug)]
pub struct RecordFailure {
    /// Position in the collection file.
    pub index: usize,
    pub id: String,
    pub error: PhivaultError,
}

/// Outcome of [`Vault::secure_read_report`].
#[derive(Debug)]
pub struct ReadReport<T> {
    /// Records that decrypted and parsed, in file order.
    pub records: Vec<T>,
    /// Records that did not. Never substituted with placeholder data.
    pub failures: Vec<RecordFailure>,
}

impl<T> ReadReport<T> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Encrypted collections plus the shared ledger.
#[derive(Debug)]
pub struct Vault {
    cipher: Arc<Cipher>,
    ledger: Arc<AuditLedger>,
    queue: Arc<PathQueue>,
}

impl Vault {
    pub fn new(cipher: Arc<Cipher>, ledger_path: impl Into<PathBuf>) -> Self {
        Self::with_queue(cipher, ledger_path, Arc::new(PathQueue::new()))
    }

    /// Build a vault on an existing queue, e.g. one shared with
    /// [`JsonStore`]s elsewhere in the process.
    pub fn with_queue(
        cipher: Arc<Cipher>,
        ledger_path: impl Into<PathBuf>,
        queue: Arc<PathQueue>,
    ) -> Self {
        let ledger = Arc::new(AuditLedger::new(ledger_path, Arc::clone(&queue)));
        Self {
            cipher,
            ledger,
            queue,
        }
    }

    /// Load the master key and wire up a vault from configuration.
    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        let cipher = config.key.cipher()?;
        tracing::info!(
            ledger = %config.ledger_path.display(),
            key_source = ?cipher.key_source(),
            "vault ready"
        );
        Ok(Self::new(Arc::new(cipher), &config.ledger_path))
    }

    pub fn cipher(&self) -> &Arc<Cipher> {
        &self.cipher
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    pub fn queue(&self) -> &Arc<PathQueue> {
        &self.queue
    }

    /// Forward a redacted copy of every future ledger entry to `sink`.
    pub fn add_audit_sink(&self, sink: Box<dyn AuditSink>) {
        self.ledger.add_forward_sink(sink);
    }

    /// Encrypt `record`, append it to `path` and chain it into the ledger.
    ///
    /// Returns the stored entry. On error nothing stays behind: a failed
    /// ledger append rolls the collection file back, and if even that fails
    /// the caller gets [`PhivaultError::OrphanedRecord`]. Once the record is
    /// encrypted the commit finishes even if this future is dropped.
    pub async fn secure_write<R>(
        &self,
        path: impl AsRef<Path>,
        record: &R,
        meta: &AuditMeta,
    ) -> Result<EncryptedRecordEntry>
    where
        R: Serialize + ?Sized,
    {
        let path = path.as_ref();
        self.check_collection_path(path)?;

        // serde_json::Map is ordered by key, which makes this canonical.
        let value = serde_json::to_value(record)?;
        let plaintext = serde_json::to_string(&value)?;
        let pending = PendingRecord {
            id: record_id(&value),
            payload: self.cipher.encrypt(&plaintext)?,
            meta: meta.clone(),
        };

        let handle = tokio::spawn(commit(
            Arc::clone(&self.ledger),
            Arc::clone(&self.queue),
            path.to_path_buf(),
            pending,
        ));
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(PhivaultError::WriteAborted {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Decrypt every record in `path`, in file order.
    ///
    /// Stops at the first record that fails to decrypt or parse.
    pub async fn secure_read_all<T: DeserializeOwned>(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Vec<T>> {
        let path = path.as_ref();
        let entries = self.encrypted_entries(path).await?;

        let mut records = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            match self.open_entry(index, entry) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        collection = %path.display(),
                        index,
                        id = %entry.id,
                        code = e.code(),
                        "record unreadable"
                    );
                    return Err(e);
                }
            }
        }
        Ok(records)
    }

    /// Best-effort read: every readable record, plus a list of the ones that
    /// were skipped and why.
    pub async fn secure_read_report<T: DeserializeOwned>(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<ReadReport<T>> {
        let path = path.as_ref();
        let entries = self.encrypted_entries(path).await?;

        let mut report = ReadReport {
            records: Vec::with_capacity(entries.len()),
            failures: Vec::new(),
        };
        for (index, entry) in entries.iter().enumerate() {
            match self.open_entry(index, entry) {
                Ok(record) => report.records.push(record),
                Err(error) => {
                    tracing::warn!(
                        collection = %path.display(),
                        index,
                        id = %entry.id,
                        code = error.code(),
                        "skipping unreadable record"
                    );
                    report.failures.push(RecordFailure {
                        index,
                        id: entry.id.clone(),
                        error,
                    });
                }
            }
        }
        Ok(report)
    }

    /// [`Vault::secure_read_all`] keeping only records that match `predicate`.
    pub async fn secure_read<T, F>(&self, path: impl AsRef<Path>, predicate: F) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let all = self.secure_read_all(path).await?;
        Ok(all.into_iter().filter(|r| predicate(r)).collect())
    }

    /// Raw encrypted entries of a collection, as persisted.
    pub async fn encrypted_entries(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Vec<EncryptedRecordEntry>> {
        let path = path.as_ref();
        self.check_collection_path(path)?;
        let _turn = self.queue.acquire(path).await;
        store::read_all(path).await
    }

    pub async fn verify_ledger(&self) -> Result<bool> {
        self.ledger.verify().await
    }

    pub async fn ledger_status(&self) -> Result<LedgerStatus> {
        self.ledger.verify_report().await
    }

    pub async fn audit_trail(&self, query: &AuditQuery) -> Result<Vec<AuditTrailEntry>> {
        self.ledger.audit_trail(query).await
    }

    /// A self-healing JSON store for non-audit data, serialized through this
    /// vault's queue. The ledger file is refused.
    pub fn json_store<T>(&self, path: impl Into<PathBuf>, default: T) -> Result<JsonStore<T>> {
        let path = path.into();
        self.check_collection_path(&path)?;
        Ok(JsonStore::new(path, default, Arc::clone(&self.queue)))
    }

    fn open_entry<T: DeserializeOwned>(
        &self,
        index: usize,
        entry: &EncryptedRecordEntry,
    ) -> Result<T> {
        let plaintext = self.cipher.decrypt(&entry.payload)?;
        serde_json::from_str(&plaintext)
            .map_err(|source| PhivaultError::RecordParse { index, source })
    }

    fn check_collection_path(&self, path: &Path) -> Result<()> {
        if queue::normalize(path) == queue::normalize(self.ledger.path()) {
            return Err(PhivaultError::InvalidPath {
                path: path.to_path_buf(),
                reason: "the audit ledger is not a collection",
            });
        }
        Ok(())
    }
}

/// An encrypted record waiting for its turn on disk.
struct PendingRecord {
    id: String,
    payload: EncryptedPayload,
    meta: AuditMeta,
}

/// Append `pending` to the collection and the ledger, holding both slots.
async fn commit(
    ledger: Arc<AuditLedger>,
    queue: Arc<PathQueue>,
    path: PathBuf,
    pending: PendingRecord,
) -> Result<EncryptedRecordEntry> {
    let _collection_turn = queue.acquire(&path).await;
    let ledger_turn = ledger.turn().await;

    let entry = EncryptedRecordEntry {
        id: pending.id,
        payload: pending.payload,
        created_at: timestamp_now(),
        meta: pending.meta,
    };
    let index = store::append(&path, &entry).await?;

    let appended = ledger
        .append_in_turn(
            &ledger_turn,
            &entry.meta,
            &entry.payload.ciphertext,
            &entry.created_at,
        )
        .await;
    if let Err(ledger_err) = appended {
        return Err(roll_back(&path, index, &entry.id, ledger_err).await);
    }

    tracing::debug!(
        collection = %path.display(),
        id = %entry.id,
        index,
        action = %entry.meta.action,
        "secure write committed"
    );
    Ok(entry)
}

/// Undo the collection append at `index` after a ledger failure. Still
/// inside the collection slot, so no reader has seen the entry.
async fn roll_back(path: &Path, index: usize, id: &str, cause: PhivaultError) -> PhivaultError {
    match store::truncate(path, index).await {
        Ok(()) => {
            tracing::warn!(
                collection = %path.display(),
                code = cause.code(),
                "ledger append failed; record rolled back"
            );
            cause
        }
        Err(rollback_err) => {
            tracing::error!(
                collection = %path.display(),
                id,
                cause = %cause,
                rollback = %rollback_err,
                "ledger append failed and record could not be rolled back"
            );
            PhivaultError::OrphanedRecord {
                id: id.to_string(),
                path: path.to_path_buf(),
            }
        }
    }
}

/// `record.id` when it is a non-empty string or a number, otherwise the
/// current time in epoch milliseconds.
fn record_id(value: &serde_json::Value) -> String {
    match value.get("id") {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => Utc::now().timestamp_millis().to_string(),
    }
}
