//! Whole-file JSON values for non-audit data.
//!
//! Caches, preferences and notification state live here. Unlike the
//! audit-critical [`store`](crate::store) functions, a `JsonStore` may be
//! told to heal itself: with [`CorruptionPolicy::ResetToDefault`] a file
//! that no longer parses is overwritten with the default value. That choice
//! is made per store at construction; nothing on the audit path uses it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PhivaultError, Result};
use crate::queue::PathQueue;
use crate::store;

/// What [`JsonStore::read`] does with a file that is not valid JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorruptionPolicy {
    /// Overwrite the file with the default value and return it.
    #[default]
    ResetToDefault,
    /// Return [`PhivaultError::CorruptStore`] and leave the file alone.
    Fail,
}

/// A JSON value persisted in one file, serialized through a [`PathQueue`].
#[derive(Debug)]
pub struct JsonStore<T> {
    path: PathBuf,
    default: T,
    policy: CorruptionPolicy,
    queue: Arc<PathQueue>,
}

impl<T> JsonStore<T> {
    pub fn new(path: impl Into<PathBuf>, default: T, queue: Arc<PathQueue>) -> Self {
        Self {
            path: path.into(),
            default,
            policy: CorruptionPolicy::default(),
            queue,
        }
    }

    pub fn with_policy(mut self, policy: CorruptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Current value; the default if the file is missing or blank.
    pub async fn read(&self) -> Result<T> {
        let _turn = self.queue.acquire(&self.path).await;
        self.read_locked().await
    }

    /// Replace the stored value.
    pub async fn write(&self, value: T) -> Result<T> {
        let _turn = self.queue.acquire(&self.path).await;
        store::write_json(&self.path, &value).await?;
        Ok(value)
    }

    /// Read, modify and write back in one queue turn.
    pub async fn update<F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut T),
    {
        let _turn = self.queue.acquire(&self.path).await;
        let mut value = self.read_locked().await?;
        f(&mut value);
        store::write_json(&self.path, &value).await?;
        Ok(value)
    }

    async fn read_locked(&self) -> Result<T> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                store::write_json(&self.path, &self.default).await?;
                return Ok(self.default.clone());
            }
            Err(e) => return Err(PhivaultError::storage(&self.path, e)),
        };

        if raw.trim().is_empty() {
            return Ok(self.default.clone());
        }

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(value),
            Err(source) => match self.policy {
                CorruptionPolicy::Fail => Err(PhivaultError::CorruptStore {
                    path: self.path.clone(),
                    source,
                }),
                CorruptionPolicy::ResetToDefault => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %source,
                        "json store corrupt; resetting to default"
                    );
                    store::write_json(&self.path, &self.default).await?;
                    Ok(self.default.clone())
                }
            },
        }
    }
}
