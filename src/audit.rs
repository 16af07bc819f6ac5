//! Hash-chained audit ledger.
//!
//! One JSON array file shared by every collection. Each secure write adds
//! one [`LedgerEntry`] whose `hash` commits to the previous entry's hash,
//! the record ciphertext, the timestamp, the action and the resource id:
//!
//! ```text
//! hash[i] = SHA-256(hash[i-1] || ciphertext[i] || ts[i] || action[i] || resourceId[i])
//! hash[-1] = ""
//! ```
//!
//! Entries are only ever appended. Reporting surfaces get
//! [`AuditTrailEntry`] values, which carry no ciphertext.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cipher::hash_link;
use crate::error::Result;
use crate::queue::{PathGuard, PathQueue};
use crate::store;

/// How many entries [`AuditQuery`] returns when no limit is set.
pub const DEFAULT_TRAIL_LIMIT: usize = 50;

/// Who did what to which resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMeta {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_role: Option<String>,
    pub resource_type: String,
    pub resource_id: String,
}

impl AuditMeta {
    pub fn new(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            actor_user_id: None,
            actor_role: None,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    pub fn actor(mut self, user_id: impl Into<String>, role: impl Into<String>) -> Self {
        self.actor_user_id = Some(user_id.into());
        self.actor_role = Some(role.into());
        self
    }
}

/// One persisted link of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub ts: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_role: Option<String>,
    pub resource_type: String,
    pub resource_id: String,
    pub hash: String,
    pub prev_hash: String,
    /// Same base64 ciphertext as the matching collection record.
    pub ciphertext: String,
}

impl LedgerEntry {
    /// Hash this entry should carry if it follows `prev_hash`.
    pub fn expected_hash(&self, prev_hash: &str) -> String {
        hash_link(
            prev_hash,
            &self.ciphertext,
            &self.ts,
            &self.action,
            &self.resource_id,
        )
    }

    /// Metadata-only view for reporting.
    pub fn redacted(&self) -> AuditTrailEntry {
        AuditTrailEntry {
            ts: self.ts.clone(),
            action: self.action.clone(),
            actor_user_id: self.actor_user_id.clone(),
            actor_role: self.actor_role.clone(),
            resource_type: self.resource_type.clone(),
            resource_id: self.resource_id.clone(),
            hash: self.hash.clone(),
            prev_hash: self.prev_hash.clone(),
        }
    }
}

/// A ledger entry with the ciphertext removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditTrailEntry {
    pub ts: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_role: Option<String>,
    pub resource_type: String,
    pub resource_id: String,
    pub hash: String,
    pub prev_hash: String,
}

/// Result of a full verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStatus {
    pub ok: bool,
    pub count: usize,
    pub last_hash: Option<String>,
    /// Index of the first entry that fails to chain.
    pub first_invalid: Option<usize>,
    pub checked_at: String,
}

/// Walk the chain once from an empty `prevHash`.
///
/// Returns the index of the first entry whose `prevHash` does not match the
/// running hash or whose `hash` does not match its recomputed value.
pub fn first_broken_link(entries: &[LedgerEntry]) -> Option<usize> {
    let mut running = "";
    for (i, entry) in entries.iter().enumerate() {
        if entry.prev_hash != running || entry.hash != entry.expected_hash(running) {
            return Some(i);
        }
        running = &entry.hash;
    }
    None
}

/// Current time as ISO-8601 UTC with millisecond precision, e.g.
/// `2026-03-01T09:30:00.000Z`.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Filter for metadata-only ledger reads.
///
/// Matches are returned in ledger order, keeping only the most recent
/// `limit` of them.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub resource_types: Option<BTreeSet<String>>,
    pub action: Option<String>,
    pub actor_user_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            resource_types: None,
            action: None,
            actor_user_id: None,
            since: None,
            limit: DEFAULT_TRAIL_LIMIT,
        }
    }
}

impl AuditQuery {
    pub fn resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn actor(mut self, user_id: impl Into<String>) -> Self {
        self.actor_user_id = Some(user_id.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(types) = &self.resource_types {
            if !types.contains(&entry.resource_type) {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &entry.action != action {
                return false;
            }
        }
        if let Some(user) = &self.actor_user_id {
            if entry.actor_user_id.as_ref() != Some(user) {
                return false;
            }
        }
        if let Some(since) = self.since {
            // Unparseable timestamps never satisfy a time filter.
            match DateTime::parse_from_rfc3339(&entry.ts) {
                Ok(ts) if ts.with_timezone(&Utc) >= since => {}
                _ => return false,
            }
        }
        true
    }

    /// Apply the filter and the tail limit, redacting as it goes.
    pub fn apply(&self, entries: &[LedgerEntry]) -> Vec<AuditTrailEntry> {
        let matched: Vec<&LedgerEntry> = entries.iter().filter(|e| self.matches(e)).collect();
        let skip = matched.len().saturating_sub(self.limit);
        matched[skip..].iter().map(|e| e.redacted()).collect()
    }
}

/// A sink that receives a redacted copy of every appended entry. Implement
/// this to forward the audit trail to a SIEM, a file, or another store.
pub trait AuditSink: Send {
    /// Called once per ledger append, in ledger order.
    fn append(&mut self, entry: &AuditTrailEntry) -> io::Result<()>;
}

/// The persisted ledger plus any forward sinks.
pub struct AuditLedger {
    path: PathBuf,
    queue: Arc<PathQueue>,
    forward_sinks: Mutex<Vec<Box<dyn AuditSink>>>,
}

impl std::fmt::Debug for AuditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLedger")
            .field("path", &self.path)
            .field("forward_sinks", &self.forward_sinks.lock().len())
            .finish()
    }
}

impl AuditLedger {
    pub fn new(path: impl Into<PathBuf>, queue: Arc<PathQueue>) -> Self {
        Self {
            path: path.into(),
            queue,
            forward_sinks: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a sink to receive a redacted copy of every new entry.
    pub fn add_forward_sink(&self, sink: Box<dyn AuditSink>) {
        self.forward_sinks.lock().push(sink);
    }

    /// Chain a new entry onto the ledger and persist it.
    pub async fn append(
        &self,
        meta: &AuditMeta,
        ciphertext: &str,
        ts: &str,
    ) -> Result<LedgerEntry> {
        let turn = self.turn().await;
        self.append_in_turn(&turn, meta, ciphertext, ts).await
    }

    /// Wait for the ledger's queue slot.
    pub(crate) async fn turn(&self) -> PathGuard {
        self.queue.acquire(&self.path).await
    }

    /// [`AuditLedger::append`] for a caller already holding the ledger slot.
    pub(crate) async fn append_in_turn(
        &self,
        _turn: &PathGuard,
        meta: &AuditMeta,
        ciphertext: &str,
        ts: &str,
    ) -> Result<LedgerEntry> {
        let entries: Vec<LedgerEntry> = store::read_all(&self.path).await?;
        let prev_hash = entries.last().map(|e| e.hash.clone()).unwrap_or_default();
        let hash = hash_link(&prev_hash, ciphertext, ts, &meta.action, &meta.resource_id);

        let entry = LedgerEntry {
            ts: ts.to_string(),
            action: meta.action.clone(),
            actor_user_id: meta.actor_user_id.clone(),
            actor_role: meta.actor_role.clone(),
            resource_type: meta.resource_type.clone(),
            resource_id: meta.resource_id.clone(),
            hash,
            prev_hash,
            ciphertext: ciphertext.to_string(),
        };
        let index = store::append(&self.path, &entry).await?;
        tracing::debug!(
            index,
            action = %entry.action,
            resource_type = %entry.resource_type,
            "ledger entry appended"
        );

        self.forward(&entry);
        Ok(entry)
    }

    /// Every entry, ciphertext included, in ledger order.
    pub async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let _turn = self.queue.acquire(&self.path).await;
        store::read_all(&self.path).await
    }

    /// `true` iff every entry chains correctly from an empty `prevHash`.
    pub async fn verify(&self) -> Result<bool> {
        Ok(self.verify_report().await?.ok)
    }

    /// Full verification result for status pages and compliance reports.
    pub async fn verify_report(&self) -> Result<LedgerStatus> {
        let entries = self.entries().await?;
        let first_invalid = first_broken_link(&entries);
        let status = LedgerStatus {
            ok: first_invalid.is_none(),
            count: entries.len(),
            last_hash: entries.last().map(|e| e.hash.clone()),
            first_invalid,
            checked_at: timestamp_now(),
        };

        if status.ok {
            tracing::info!(count = status.count, "ledger verified");
        } else {
            tracing::warn!(
                count = status.count,
                first_invalid = ?status.first_invalid,
                "ledger chain broken"
            );
        }
        Ok(status)
    }

    /// Metadata-only entries matching `query`.
    pub async fn audit_trail(&self, query: &AuditQuery) -> Result<Vec<AuditTrailEntry>> {
        let entries = self.entries().await?;
        Ok(query.apply(&entries))
    }

    fn forward(&self, entry: &LedgerEntry) {
        let mut sinks = self.forward_sinks.lock();
        if sinks.is_empty() {
            return;
        }
        let redacted = entry.redacted();
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.append(&redacted) {
                tracing::warn!(error = %e, "audit forward sink failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in sink: file
// ---------------------------------------------------------------------------

/// Writes redacted entries as JSON lines (one per entry) to a file.
/// Creates the file if it doesn't exist; appends if it does.
pub struct FileAuditSink {
    file: File,
}

impl FileAuditSink {
    /// Open or create a file for append-only audit forwarding.
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl AuditSink for FileAuditSink {
    fn append(&mut self, entry: &AuditTrailEntry) -> io::Result<()> {
        let line = serde_json::to_string(entry)?;
        writeln!(self.file, "{line}")?;
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> Vec<LedgerEntry> {
        let mut out: Vec<LedgerEntry> = Vec::new();
        for i in 0..n {
            let prev_hash = out.last().map(|e| e.hash.clone()).unwrap_or_default();
            let mut entry = LedgerEntry {
                ts: format!("2026-01-01T00:00:0{i}.000Z"),
                action: "diary.create".into(),
                actor_user_id: Some(format!("u{i}")),
                actor_role: Some("patient".into()),
                resource_type: if i % 2 == 0 { "Observation" } else { "Consent" }.into(),
                resource_id: format!("r{i}"),
                hash: String::new(),
                prev_hash,
                ciphertext: format!("Y3Q{i}"),
            };
            entry.hash = entry.expected_hash(&entry.prev_hash);
            out.push(entry);
        }
        out
    }

    #[test]
    fn test_empty_and_valid_chains_pass() {
        assert_eq!(first_broken_link(&[]), None);
        assert_eq!(first_broken_link(&chain(5)), None);
    }

    #[test]
    fn test_overwritten_hash_is_detected_at_its_index() {
        let mut entries = chain(5);
        entries[2].hash = "f".repeat(64);
        assert_eq!(first_broken_link(&entries), Some(2));
    }

    #[test]
    fn test_rewritten_prev_hash_is_detected() {
        let mut entries = chain(3);
        entries[1].prev_hash = String::new();
        assert_eq!(first_broken_link(&entries), Some(1));
    }

    #[test]
    fn test_edited_field_breaks_chain() {
        let mut entries = chain(3);
        entries[0].action = "diary.delete".into();
        assert_eq!(first_broken_link(&entries), Some(0));
    }

    #[test]
    fn test_redacted_drops_ciphertext() {
        let entry = &chain(1)[0];
        let json = serde_json::to_value(entry.redacted()).unwrap();
        assert!(json.get("ciphertext").is_none());
        assert_eq!(json["resourceId"], "r0");
        assert_eq!(json["prevHash"], "");
    }

    #[test]
    fn test_query_filters_and_keeps_tail() {
        let entries = chain(6);
        let observations = AuditQuery::default()
            .resource_types(["Observation"])
            .apply(&entries);
        assert_eq!(observations.len(), 3);

        let last_two = AuditQuery::default().limit(2).apply(&entries);
        let ids: Vec<_> = last_two.iter().map(|e| e.resource_id.as_str()).collect();
        assert_eq!(ids, ["r4", "r5"]);

        let by_actor = AuditQuery::default().actor("u3").apply(&entries);
        assert_eq!(by_actor.len(), 1);

        let since = DateTime::parse_from_rfc3339("2026-01-01T00:00:04Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(AuditQuery::default().since(since).apply(&entries).len(), 2);
        assert!(AuditQuery::default().action("other").apply(&entries).is_empty());
    }

    #[test]
    fn test_optional_actor_fields_are_omitted() {
        let meta = AuditMeta::new("seed", "Observation", "r1");
        let json = serde_json::to_string(&meta).unwrap();
        assert!(!json.contains("actorUserId"));
        let back: AuditMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp_now();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2026-01-01T00:00:00.000Z".len());
    }
}
