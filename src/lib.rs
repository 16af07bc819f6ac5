//! # phivault
//!
//! Encrypted append-only record storage with a tamper-evident audit ledger.
//!
//! Every sensitive write is encrypted at rest with AES-256-GCM, appended to a
//! per-collection JSON array file, and chained into one process-wide
//! append-only hash ledger. The ledger can be verified on demand in a single
//! pass; any retroactive edit breaks the chain from that point on.
//!
//! ## Public API
//!
//! Route handlers and jobs talk to [`Vault`]:
//! - [`Vault::secure_write`]
//! - [`Vault::secure_read_all`], [`Vault::secure_read`], [`Vault::secure_read_report`]
//! - [`Vault::verify_ledger`], [`Vault::ledger_status`], [`Vault::audit_trail`]
//!
//! The composition root builds one [`Cipher`] (usually through
//! [`VaultConfig::from_env`]) and one `Vault`, then shares the vault behind
//! an `Arc`. Single process only: writes are serialized by an in-process
//! per-path queue, not by file locks.

pub mod audit;
pub mod cipher;
pub mod config;
pub(crate) mod crypto;
pub mod error;
pub mod json_store;
pub mod keys;
pub mod queue;
pub mod store;
pub mod vault;

pub use audit::{
    AuditLedger, AuditMeta, AuditQuery, AuditSink, AuditTrailEntry, FileAuditSink, LedgerEntry,
    LedgerStatus,
};
pub use cipher::{Cipher, EncryptedPayload};
pub use config::{KeyConfig, RuntimeMode, VaultConfig};
pub use error::{ErrorKind, PhivaultError, Result};
pub use json_store::{CorruptionPolicy, JsonStore};
pub use keys::{KeySource, MasterKey};
pub use store::EncryptedRecordEntry;
pub use vault::{ReadReport, RecordFailure, Vault};

/// Generate a cryptographically secure master key.
///
/// Meant for tests and key-provisioning tooling. Production deployments
/// supply the key through `APP_MASTER_KEY`.
pub fn generate_master_key() -> Result<MasterKey> {
    let bytes = crypto::generate_random_key()?;
    Ok(MasterKey::from_bytes(bytes))
}
