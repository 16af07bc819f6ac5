//! Tests for forwarding redacted ledger entries to external sinks.

use std::io;
use std::sync::{Arc, Mutex};

use phivault::{AuditMeta, AuditSink, AuditTrailEntry, Cipher, FileAuditSink, MasterKey, Vault};
use serde_json::{json, Value};

/// A test sink that collects entries into a shared Vec.
struct SharedVecSink {
    entries: Arc<Mutex<Vec<AuditTrailEntry>>>,
}

impl AuditSink for SharedVecSink {
    fn append(&mut self, entry: &AuditTrailEntry) -> io::Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

struct BrokenSink;

impl AuditSink for BrokenSink {
    fn append(&mut self, _entry: &AuditTrailEntry) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "siem offline"))
    }
}

fn vault(dir: &std::path::Path) -> Vault {
    let cipher = Cipher::new(MasterKey::from_bytes([7u8; 32])).unwrap();
    Vault::new(Arc::new(cipher), dir.join("auditChain.json"))
}

#[tokio::test]
async fn test_forward_sink_receives_entries_in_ledger_order() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault(dir.path());

    let collected = Arc::new(Mutex::new(Vec::new()));
    vault.add_audit_sink(Box::new(SharedVecSink {
        entries: Arc::clone(&collected),
    }));

    let path = dir.path().join("consents.json");
    for id in ["c1", "c2"] {
        vault
            .secure_write(
                &path,
                &json!({"id": id}),
                &AuditMeta::new("consent.grant", "Consent", id).actor("u9", "patient"),
            )
            .await
            .unwrap();
    }

    let ledger = vault.ledger().entries().await.unwrap();
    let collected = collected.lock().unwrap();
    assert_eq!(collected.len(), 2);
    assert_eq!(collected[0], ledger[0].redacted());
    assert_eq!(collected[1].prev_hash, collected[0].hash);
    assert_eq!(collected[1].actor_role.as_deref(), Some("patient"));
}

#[tokio::test]
async fn test_file_sink_writes_jsonl_without_ciphertext() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault(dir.path());
    let sink_path = dir.path().join("audit-forward.jsonl");
    vault.add_audit_sink(Box::new(FileAuditSink::new(&sink_path).unwrap()));

    let path = dir.path().join("diary.json");
    for i in 0..3 {
        vault
            .secure_write(
                &path,
                &json!({"id": i, "notes": "private"}),
                &AuditMeta::new("diary.create", "Observation", i.to_string()),
            )
            .await
            .unwrap();
    }

    let contents = std::fs::read_to_string(&sink_path).unwrap();
    let lines: Vec<Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    for (i, line) in lines.iter().enumerate() {
        assert_eq!(line["resourceId"], i.to_string());
        assert!(line.get("ciphertext").is_none());
    }
    assert!(!contents.contains("private"));
}

#[tokio::test]
async fn test_failing_sink_does_not_fail_the_write() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault(dir.path());
    vault.add_audit_sink(Box::new(BrokenSink));

    let path = dir.path().join("diary.json");
    vault
        .secure_write(
            &path,
            &json!({"id": "d1"}),
            &AuditMeta::new("diary.create", "Observation", "d1"),
        )
        .await
        .unwrap();

    assert_eq!(vault.ledger().entries().await.unwrap().len(), 1);
    assert!(vault.verify_ledger().await.unwrap());
}
