//! Subscription registry
//!
//! One entry per feed key. Each entry owns the task forwarding its store
//! feed into the engine's delivery channel, plus the newest commit version
//! delivered for that key.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::models::NoteId;
use crate::store::{ChangeFeed, ChangeFrame};

/// What a subscription is keyed on; at most one live subscription per key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedKey {
    /// The whole note collection
    Collection,
    /// One note
    Note(NoteId),
}

/// Token returned by a subscribe call, used to cancel it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    key: FeedKey,
    id: u64,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &FeedKey {
        &self.key
    }
}

/// Message from a forwarding task to the engine
#[derive(Debug)]
pub(crate) enum Delivery {
    Frame {
        key: FeedKey,
        id: u64,
        frame: ChangeFrame,
    },
    /// The store side of the feed closed
    Ended { key: FeedKey, id: u64 },
}

struct Entry {
    id: u64,
    task: JoinHandle<()>,
    last_version: Option<u64>,
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: HashMap<FeedKey, Entry>,
    next_id: u64,
}

impl Registry {
    /// Start forwarding `feed` under `key`, cancelling any existing
    /// subscription for the same key
    pub fn insert(
        &mut self,
        key: FeedKey,
        mut feed: ChangeFeed,
        tx: mpsc::UnboundedSender<Delivery>,
    ) -> SubscriptionHandle {
        self.cancel(&key);

        self.next_id += 1;
        let id = self.next_id;

        let task_key = key.clone();
        let task = tokio::spawn(async move {
            while let Some(frame) = feed.recv().await {
                let delivery = Delivery::Frame {
                    key: task_key.clone(),
                    id,
                    frame,
                };
                if tx.send(delivery).is_err() {
                    return;
                }
            }
            let _ = tx.send(Delivery::Ended { key: task_key, id });
        });

        self.entries.insert(
            key.clone(),
            Entry {
                id,
                task,
                last_version: None,
            },
        );
        SubscriptionHandle { key, id }
    }

    /// Cancel whatever subscription is active for `key`
    pub fn cancel(&mut self, key: &FeedKey) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                entry.task.abort();
                trace!(?key, id = entry.id, "Cancelled subscription");
                true
            }
            None => false,
        }
    }

    /// Cancel the subscription behind `handle` if it is still the active one
    pub fn remove(&mut self, handle: &SubscriptionHandle) -> bool {
        if self.is_current(&handle.key, handle.id) {
            self.cancel(&handle.key)
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.task.abort();
        }
    }

    pub fn is_current(&self, key: &FeedKey, id: u64) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.id == id)
    }

    /// Record `version` as delivered for the subscription `id` under `key`
    ///
    /// Returns false, recording nothing, when the subscription is no longer
    /// active or the version is not newer than the last one delivered.
    pub fn advance(&mut self, key: &FeedKey, id: u64, version: u64) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        if entry.id != id {
            return false;
        }
        if entry.last_version.is_some_and(|last| version <= last) {
            return false;
        }
        entry.last_version = Some(version);
        true
    }

    pub fn contains(&self, key: &FeedKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.clear();
    }
}
