//! Append-only JSON array files.
//!
//! Each collection lives in one file holding a JSON array. These functions
//! are the audit-critical reader and writer: a missing or blank file is an
//! empty array, anything else that fails to parse is reported as
//! [`PhivaultError::CorruptStore`] and left untouched on disk. Nothing here
//! resets a file to recover from corruption.
//!
//! No locking happens at this level. Callers hold the path's
//! [`PathQueue`](crate::queue::PathQueue) slot around every call.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::audit::AuditMeta;
use crate::cipher::EncryptedPayload;
use crate::error::{PhivaultError, Result};

/// One encrypted record as persisted in a collection file.
///
/// The record's plaintext never appears here; only its AEAD output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedRecordEntry {
    /// Record id, unique within its collection.
    pub id: String,
    #[serde(flatten)]
    pub payload: EncryptedPayload,
    /// Write time, ISO-8601 UTC with milliseconds.
    pub created_at: String,
    /// Copy of the audit metadata. The ledger holds the authoritative one.
    pub meta: AuditMeta,
}

/// Read the whole array in file order.
pub async fn read_all<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PhivaultError::storage(path, e)),
    };

    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    serde_json::from_slice(&raw).map_err(|source| PhivaultError::CorruptStore {
        path: path.to_path_buf(),
        source,
    })
}

/// Append `entry` and rewrite the file. Returns the new entry's index.
///
/// Existing entries are written back exactly as they were read.
pub async fn append<T: Serialize>(path: &Path, entry: &T) -> Result<usize> {
    // Untyped read so fields this build does not know about survive the rewrite.
    let mut entries: Vec<serde_json::Value> = read_all(path).await?;
    entries.push(serde_json::to_value(entry)?);
    write_all(path, &entries).await?;
    Ok(entries.len() - 1)
}

/// Drop every entry at or after `len`.
///
/// Only used to undo an append that is still inside the caller's queue slot
/// and that no reader could have observed. Not part of the public surface:
/// committed history is never rewritten.
pub(crate) async fn truncate(path: &Path, len: usize) -> Result<()> {
    let mut entries: Vec<serde_json::Value> = read_all(path).await?;
    entries.truncate(len);
    write_all(path, &entries).await
}

/// Replace the file's contents with `entries`.
pub(crate) async fn write_all<T: Serialize>(path: &Path, entries: &[T]) -> Result<()> {
    write_json(path, entries).await
}

/// Write `value` as pretty JSON.
///
/// The body goes to a sibling temp file first and is renamed over the
/// target, so a crash mid-write leaves the previous contents in place.
pub(crate) async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PhivaultError::storage(parent, e))?;
    }

    let body = serde_json::to_vec_pretty(value)?;
    let temp = temp_path(path);
    tokio::fs::write(&temp, &body)
        .await
        .map_err(|e| PhivaultError::storage(&temp, e))?;
    tokio::fs::rename(&temp, path)
        .await
        .map_err(|e| PhivaultError::storage(path, e))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("store"));
    name.push(".tmp");
    path.with_file_name(name)
}
