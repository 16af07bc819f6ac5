//! Error types for phivault.
//!
//! Every variant is a distinct failure mode of the storage layer. Messages
//! say *what* failed without echoing record content, key material or
//! ciphertext. Callers that need to pick a response (500 vs 403 vs 409 at
//! the edge) should match on [`PhivaultError::kind`] rather than on the
//! message text.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The single error type for all phivault operations.
#[derive(Debug, Error)]
pub enum PhivaultError {
    /// No master key was configured and the process runs in production mode.
    #[error("master key missing: set APP_MASTER_KEY")]
    MissingKey,

    /// The configured master key does not decode to exactly 32 bytes.
    #[error("invalid master key: {0}")]
    InvalidKey(&'static str),

    /// A path was rejected before any I/O happened.
    #[error("invalid path {}: {reason}", .path.display())]
    InvalidPath {
        path: PathBuf,
        reason: &'static str,
    },

    /// Encryption failed inside `ring`.
    #[error("encryption failed")]
    EncryptionFailure,

    /// Decryption failed. This includes: wrong key, tampered ciphertext,
    /// tampered nonce or a corrupted GCM authentication tag.
    #[error("decryption failed")]
    DecryptionFailure,

    /// A stored payload could not even be decoded (bad base64, wrong nonce
    /// length). Treated as an integrity problem of that record.
    #[error("malformed encrypted payload: {0}")]
    MalformedPayload(&'static str),

    /// The system's random number generator failed to produce bytes.
    #[error("randomness source failed")]
    RandomnessFailure,

    /// Filesystem read or write failure.
    #[error("storage error at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A store file exists but does not hold a valid JSON array. Audit
    /// stores never reset themselves; this is surfaced as-is.
    #[error("corrupt store at {}: {source}", .path.display())]
    CorruptStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be serialized to JSON before encryption.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record decrypted correctly but its plaintext is not the expected JSON.
    #[error("record {index} could not be parsed: {source}")]
    RecordParse {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    /// The ledger append failed and the matching record could not be rolled
    /// back out of its collection file.
    #[error("record {id} in {} has no ledger entry", .path.display())]
    OrphanedRecord { id: String, path: PathBuf },

    /// The task committing a write was stopped by runtime shutdown before it
    /// finished. The collection and the ledger may disagree.
    #[error("write to {} was aborted before it completed", .path.display())]
    WriteAborted { path: PathBuf },
}

/// Coarse classification of [`PhivaultError`] for callers that translate
/// errors into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed configuration. Fatal, never retried.
    Configuration,
    /// Authentication tag failure or undecodable payload on one record.
    CryptographicIntegrity,
    /// Failure inside the crypto runtime itself (RNG, sealing).
    Crypto,
    /// Filesystem failure. Retrying is the caller's decision.
    StorageIo,
    /// A store file is not valid JSON.
    Corruption,
    /// Record (de)serialization failure.
    Data,
    /// The record store and the ledger disagree after a failed write.
    Consistency,
}

impl PhivaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingKey | Self::InvalidKey(_) | Self::InvalidPath { .. } => {
                ErrorKind::Configuration
            }
            Self::DecryptionFailure | Self::MalformedPayload(_) => {
                ErrorKind::CryptographicIntegrity
            }
            Self::EncryptionFailure | Self::RandomnessFailure => ErrorKind::Crypto,
            Self::Storage { .. } => ErrorKind::StorageIo,
            Self::CorruptStore { .. } => ErrorKind::Corruption,
            Self::Serialization(_) | Self::RecordParse { .. } => ErrorKind::Data,
            Self::OrphanedRecord { .. } | Self::WriteAborted { .. } => ErrorKind::Consistency,
        }
    }

    /// Stable machine-readable code, suitable for API error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingKey => "missing_key",
            Self::InvalidKey(_) => "invalid_key",
            Self::InvalidPath { .. } => "invalid_path",
            Self::EncryptionFailure => "encryption_failure",
            Self::DecryptionFailure => "decryption_failure",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::RandomnessFailure => "randomness_failure",
            Self::Storage { .. } => "storage_io",
            Self::CorruptStore { .. } => "corrupt_store",
            Self::Serialization(_) => "serialization",
            Self::RecordParse { .. } => "record_parse",
            Self::OrphanedRecord { .. } => "orphaned_record",
            Self::WriteAborted { .. } => "write_aborted",
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PhivaultError>;
