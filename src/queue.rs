//! Per-path operation ordering.
//!
//! Every read-modify-write of a JSON file runs while holding that file's
//! slot. Slots are `tokio::sync::Mutex<()>` values, which hand out the lock
//! in the order it was requested, so operations on one path form a FIFO
//! queue. Distinct paths have distinct slots and proceed concurrently.
//!
//! A slot nobody holds or waits on is idle. Idle slots are dropped once the
//! registry has doubled since the last sweep, or on [`PathQueue::prune`].
//!
//! Cross-process access is not covered: two processes sharing a data
//! directory will race.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Holding a `PathGuard` means owning the head of that path's queue.
pub type PathGuard = OwnedMutexGuard<()>;

/// Registry size below which idle slots are never swept.
const PRUNE_FLOOR: usize = 256;

/// Registry of per-path FIFO slots.
#[derive(Debug, Default)]
pub struct PathQueue {
    slots: Mutex<Slots>,
}

#[derive(Debug)]
struct Slots {
    map: HashMap<PathBuf, Arc<AsyncMutex<()>>>,
    prune_at: usize,
}

impl Default for Slots {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            prune_at: PRUNE_FLOOR,
        }
    }
}

impl Slots {
    /// Drop every slot whose only reference is the registry's own. New
    /// references are only handed out under the registry lock, so an idle
    /// slot cannot be claimed while this runs.
    fn prune(&mut self) {
        self.map.retain(|_, slot| Arc::strong_count(slot) > 1);
        self.prune_at = (self.map.len() * 2).max(PRUNE_FLOOR);
    }
}

impl PathQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for this caller's turn on `path`.
    ///
    /// The turn is reserved when this future is first polled; later callers
    /// queue behind it. Dropping the guard passes the turn on.
    pub async fn acquire(&self, path: &Path) -> PathGuard {
        let slot = self.slot(path);
        slot.lock_owned().await
    }

    /// Number of slots currently tracked, idle ones included.
    pub fn len(&self) -> usize {
        self.slots.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().map.is_empty()
    }

    /// Forget every idle slot now.
    pub fn prune(&self) {
        self.slots.lock().prune();
    }

    fn slot(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        let key = normalize(path);
        let mut slots = self.slots.lock();
        if slots.map.len() >= slots.prune_at && !slots.map.contains_key(&key) {
            slots.prune();
        }
        Arc::clone(slots.map.entry(key).or_default())
    }
}

/// Absolute form of `path` so `a.json` and `./a.json` share one slot.
/// Purely lexical: the file does not need to exist.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_normalize_collapses_dots() {
        assert_eq!(
            normalize(Path::new("/data/./x/../diary.json")),
            PathBuf::from("/data/diary.json")
        );
        assert_eq!(normalize(Path::new("a.json")), normalize(Path::new("./a.json")));
    }

    #[tokio::test]
    async fn test_same_path_shares_slot() {
        let queue = PathQueue::new();
        let _held = queue.acquire(Path::new("/tmp/q/a.json")).await;
        let again = tokio::time::timeout(
            Duration::from_millis(50),
            queue.acquire(Path::new("/tmp/q/./a.json")),
        )
        .await;
        assert!(again.is_err(), "second acquire should wait");
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_paths_do_not_block() {
        let queue = PathQueue::new();
        let _a = queue.acquire(Path::new("/tmp/q/a.json")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(50),
            queue.acquire(Path::new("/tmp/q/b.json")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fifo_order_per_path() {
        let queue = Arc::new(PathQueue::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let path = PathBuf::from("/tmp/q/fifo.json");

        let first = queue.acquire(&path).await;
        let mut handles = Vec::new();
        for i in 0..8 {
            let queue = Arc::clone(&queue);
            let order = Arc::clone(&order);
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                let _turn = queue.acquire(&path).await;
                order.lock().push(i);
            }));
            // Let task `i` enqueue before task `i + 1` is spawned.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(first);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_prune_drops_only_idle_slots() {
        let queue = PathQueue::new();
        for i in 0..10 {
            let _turn = queue.acquire(&PathBuf::from(format!("/tmp/q/idle-{i}.json"))).await;
        }
        let held = queue.acquire(Path::new("/tmp/q/held.json")).await;
        assert_eq!(queue.len(), 11);

        queue.prune();
        assert_eq!(queue.len(), 1);

        // The held slot survived, so the same path still waits behind it.
        let again = tokio::time::timeout(
            Duration::from_millis(50),
            queue.acquire(Path::new("/tmp/q/held.json")),
        )
        .await;
        assert!(again.is_err());
        drop(held);
    }

    #[tokio::test]
    async fn test_registry_stays_bounded() {
        let queue = PathQueue::new();
        for i in 0..(PRUNE_FLOOR * 3) {
            let _turn = queue.acquire(&PathBuf::from(format!("/tmp/q/p{i}.json"))).await;
        }
        assert!(queue.len() <= PRUNE_FLOOR);
    }
}
