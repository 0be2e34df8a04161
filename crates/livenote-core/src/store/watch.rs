//! Watcher bookkeeping shared by the store adapters
//!
//! Adapters call [`Watchers::notify`] while still holding the lock that
//! serialises their commits, which is what makes feed frames come out in
//! commit order.

use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::{ChangeFeed, ChangeFrame, Snapshot, StoreResult, WatchTarget};

struct Watcher {
    target: WatchTarget,
    tx: mpsc::UnboundedSender<ChangeFrame>,
}

/// Registered change feeds plus the store's commit counter
#[derive(Default)]
pub(crate) struct Watchers {
    version: u64,
    entries: Vec<Watcher>,
}

impl Watchers {
    /// Register a feed and queue its initial snapshot at the current version
    pub fn register(&mut self, target: WatchTarget, initial: Snapshot) -> ChangeFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ChangeFrame {
            version: self.version,
            snapshot: initial,
        });
        self.entries.push(Watcher { target, tx });
        ChangeFeed::new(rx)
    }

    /// Record a commit to `collection/id` and push fresh snapshots
    ///
    /// Runs after the commit, so it never fails the write: a watcher whose
    /// snapshot cannot be built is skipped for this commit and the rest are
    /// still served. Feeds whose receiver was dropped are pruned here.
    pub fn notify<F>(&mut self, collection: &str, id: &str, mut snapshot_for: F)
    where
        F: FnMut(&WatchTarget) -> StoreResult<Snapshot>,
    {
        self.version += 1;
        let version = self.version;

        self.entries.retain(|watcher| !watcher.tx.is_closed());
        for watcher in &self.entries {
            if !watcher.target.is_affected_by(collection, id) {
                continue;
            }
            match snapshot_for(&watcher.target) {
                Ok(snapshot) => {
                    trace!(version, target = ?watcher.target, "Delivering change frame");
                    let _ = watcher.tx.send(ChangeFrame { version, snapshot });
                }
                Err(e) => {
                    warn!(version, target = ?watcher.target, "Skipping change frame: {}", e);
                }
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
