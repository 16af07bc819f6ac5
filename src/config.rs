//! Process configuration.
//!
//! ## Environment Variables
//!
//! - `APP_MASTER_KEY`: 32-byte master key, base64 or 64-char hex
//! - `APP_ENV`: `production` (or `prod`) makes a missing key fatal
//! - `APP_DATA_DIR`: directory holding collection files (default: `./data`)
//! - `APP_LEDGER_PATH`: audit ledger file (default: `<APP_DATA_DIR>/auditChain.json`)

use std::path::PathBuf;

use crate::cipher::Cipher;
use crate::error::{PhivaultError, Result};
use crate::keys::{KeySource, MasterKey};

pub const MASTER_KEY_VAR: &str = "APP_MASTER_KEY";
pub const ENV_VAR: &str = "APP_ENV";
pub const DATA_DIR_VAR: &str = "APP_DATA_DIR";
pub const LEDGER_PATH_VAR: &str = "APP_LEDGER_PATH";

/// File name of the shared ledger inside the data directory.
pub const LEDGER_FILE_NAME: &str = "auditChain.json";

/// How strict key loading is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeMode {
    /// Missing key falls back to the development key, with a warning.
    #[default]
    Development,
    /// Missing key is a fatal configuration error.
    Production,
}

impl RuntimeMode {
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "production" || v == "prod" => Self::Production,
            _ => Self::Development,
        }
    }
}

/// Unparsed key material plus the mode that decides what a missing key means.
#[derive(Clone, Default)]
pub struct KeyConfig {
    pub raw: Option<String>,
    pub mode: RuntimeMode,
}

impl std::fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyConfig")
            .field("raw", &self.raw.as_ref().map(|_| "<set>"))
            .field("mode", &self.mode)
            .finish()
    }
}

impl KeyConfig {
    pub fn from_env() -> Self {
        Self {
            raw: std::env::var(MASTER_KEY_VAR).ok().filter(|v| !v.trim().is_empty()),
            mode: RuntimeMode::from_env_value(std::env::var(ENV_VAR).ok().as_deref()),
        }
    }

    pub fn with_key(raw: impl Into<String>) -> Self {
        Self {
            raw: Some(raw.into()),
            mode: RuntimeMode::Production,
        }
    }

    /// Resolve the master key.
    ///
    /// A configured key always wins and must be valid. Without one,
    /// production fails and development uses the fixed fallback key.
    pub fn load(&self) -> Result<(MasterKey, KeySource)> {
        match (&self.raw, self.mode) {
            (Some(raw), _) => Ok((MasterKey::parse(raw)?, KeySource::Configured)),
            (None, RuntimeMode::Production) => Err(PhivaultError::MissingKey),
            (None, RuntimeMode::Development) => {
                tracing::warn!(
                    var = MASTER_KEY_VAR,
                    "master key missing; using development fallback key"
                );
                Ok((MasterKey::development_fallback(), KeySource::DevelopmentFallback))
            }
        }
    }

    /// Load the key and build the cipher in one step.
    pub fn cipher(&self) -> Result<Cipher> {
        let (master, source) = self.load()?;
        Cipher::with_source(master, source)
    }
}

/// Where the vault keeps its files and how it gets its key.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub data_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub key: KeyConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        Self {
            ledger_path: data_dir.join(LEDGER_FILE_NAME),
            data_dir,
            key: KeyConfig::default(),
        }
    }
}

impl VaultConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var(DATA_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let ledger_path = std::env::var(LEDGER_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join(LEDGER_FILE_NAME));

        Self {
            data_dir,
            ledger_path,
            key: KeyConfig::from_env(),
        }
    }

    /// Point both the data directory and the default ledger location at `dir`.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self.ledger_path = self.data_dir.join(LEDGER_FILE_NAME);
        self
    }

    pub fn ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = path.into();
        self
    }

    pub fn key(mut self, key: KeyConfig) -> Self {
        self.key = key;
        self
    }

    /// `<data_dir>/<name>.json`
    pub fn collection_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!(RuntimeMode::from_env_value(Some("Production")), RuntimeMode::Production);
        assert_eq!(RuntimeMode::from_env_value(Some("prod")), RuntimeMode::Production);
        assert_eq!(RuntimeMode::from_env_value(Some("test")), RuntimeMode::Development);
        assert_eq!(RuntimeMode::from_env_value(None), RuntimeMode::Development);
    }

    #[test]
    fn test_production_without_key_fails_fast() {
        let cfg = KeyConfig {
            raw: None,
            mode: RuntimeMode::Production,
        };
        assert!(matches!(cfg.load(), Err(PhivaultError::MissingKey)));
    }

    #[test]
    fn test_development_without_key_uses_fallback() {
        let (_, source) = KeyConfig::default().load().unwrap();
        assert_eq!(source, KeySource::DevelopmentFallback);
    }

    #[test]
    fn test_configured_key_wins_and_must_be_valid() {
        let good = KeyConfig {
            raw: Some("cd".repeat(32)),
            mode: RuntimeMode::Development,
        };
        assert_eq!(good.load().unwrap().1, KeySource::Configured);

        let bad = KeyConfig {
            raw: Some("short".into()),
            mode: RuntimeMode::Development,
        };
        assert!(matches!(bad.load(), Err(PhivaultError::InvalidKey(_))));
    }

    #[test]
    fn test_paths() {
        let cfg = VaultConfig::default().data_dir("/srv/phi");
        assert_eq!(cfg.ledger_path, PathBuf::from("/srv/phi/auditChain.json"));
        assert_eq!(cfg.collection_path("diary"), PathBuf::from("/srv/phi/diary.json"));

        let cfg = cfg.ledger_path("/var/audit/chain.json");
        assert_eq!(cfg.ledger_path, PathBuf::from("/var/audit/chain.json"));
    }

    #[test]
    fn test_debug_hides_key() {
        let cfg = KeyConfig::with_key("ab".repeat(32));
        assert!(!format!("{cfg:?}").contains("abab"));
    }
}
