//! Minimal example: a clinic backend writing patient diary entries.
//!
//! Demonstrates encrypted writes, the shared audit ledger, redacted audit
//! forwarding and tamper detection.
//! Run with: `cargo run --example clinic_demo`
//!
//! Set `RUST_LOG=phivault=debug` to see every ledger append.

use std::sync::Arc;

use phivault::{AuditMeta, AuditQuery, FileAuditSink, KeyConfig, Vault, VaultConfig};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize)]
struct DiaryEntry {
    id: String,
    user_id: String,
    mood: u8,
    notes: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 1. Setup: a throwaway data dir and a development key unless one is set.
    let data_dir = std::env::temp_dir().join("phivault_demo");
    let _ = std::fs::remove_dir_all(&data_dir);
    let config = VaultConfig::default().data_dir(&data_dir).key(KeyConfig::from_env());
    let vault = Arc::new(Vault::from_config(&config)?);

    // Optional: forward a redacted audit trail to a file
    let forward_path = data_dir.join("audit-forward.jsonl");
    std::fs::create_dir_all(&data_dir)?;
    vault.add_audit_sink(Box::new(FileAuditSink::new(&forward_path)?));

    // 2. Two patients write diary entries concurrently
    let diary = config.collection_path("diary");
    let mut handles = Vec::new();
    for (i, user) in ["patient-a", "patient-b", "patient-a"].into_iter().enumerate() {
        let vault = Arc::clone(&vault);
        let diary = diary.clone();
        handles.push(tokio::spawn(async move {
            let entry = DiaryEntry {
                id: format!("d{i}"),
                user_id: user.to_string(),
                mood: 4 + i as u8,
                notes: format!("entry {i} from {user}"),
            };
            let meta = AuditMeta::new("diary.create", "Observation", entry.id.clone())
                .actor(user, "patient");
            vault.secure_write(&diary, &entry, &meta).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    // 3. Patient A reads back only their own entries
    let mine: Vec<DiaryEntry> = vault
        .secure_read(&diary, |e: &DiaryEntry| e.user_id == "patient-a")
        .await?;
    println!("patient-a has {} diary entries", mine.len());

    // 4. Compliance view: metadata only
    for entry in vault.audit_trail(&AuditQuery::default().resource_types(["Observation"])).await? {
        println!(
            "{} {} {} by {:?}",
            entry.ts, entry.action, entry.resource_id, entry.actor_user_id
        );
    }

    // 5. Verify, then tamper with the ledger and verify again
    let status = vault.ledger_status().await?;
    println!("ledger ok={} count={}", status.ok, status.count);

    let ledger_path = vault.ledger().path().to_path_buf();
    let mut raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&ledger_path)?)?;
    raw[1]["action"] = "diary.delete".into();
    std::fs::write(&ledger_path, serde_json::to_string_pretty(&raw)?)?;

    let status = vault.ledger_status().await?;
    println!("after tampering: ok={} first_invalid={:?}", status.ok, status.first_invalid);
    println!("redacted audit forward written to {}", forward_path.display());

    Ok(())
}
