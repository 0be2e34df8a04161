//! Live sync engine
//!
//! Turns store change feeds into [`LiveUpdate`]s and keeps the note list in
//! step with the collection feed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::note_list::NoteList;
use super::registry::{Delivery, FeedKey, Registry, SubscriptionHandle};
use crate::error::{NotesError, NotesResult};
use crate::models::{fields, Note, NoteId, NOTES_COLLECTION};
use crate::repository::{decode, decode_all};
use crate::store::{ChangeFrame, DocumentStore, Snapshot, WatchTarget};

/// An update delivered by [`LiveSync`]
#[derive(Debug, Clone, PartialEq)]
pub enum LiveUpdate {
    /// Full collection snapshot, newest first; the note list now equals it
    Collection(Vec<Note>),
    /// Current state of a watched note
    Note(Note),
    /// A watched note was deleted
    NoteRemoved(NoteId),
}

/// Live sync engine
///
/// Owns the subscription registry, the delivery channel and the user-visible
/// note list. Every method takes `&mut self`, so all of that state is only
/// touched from the task that owns the engine.
pub struct LiveSync {
    store: Arc<dyn DocumentStore>,
    registry: Registry,
    tx: mpsc::UnboundedSender<Delivery>,
    rx: mpsc::UnboundedReceiver<Delivery>,
    notes: NoteList,
}

impl LiveSync {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            store,
            registry: Registry::default(),
            tx,
            rx,
            notes: NoteList::default(),
        }
    }

    /// Watch the whole note collection, newest first
    ///
    /// Replaces any active collection subscription.
    pub async fn subscribe_collection(&mut self) -> NotesResult<SubscriptionHandle> {
        let feed = self
            .store
            .subscribe(WatchTarget::collection_desc(NOTES_COLLECTION, fields::DATE))
            .await?;
        debug!("Subscribed to note collection");
        Ok(self.registry.insert(FeedKey::Collection, feed, self.tx.clone()))
    }

    /// Watch a single note
    ///
    /// Replaces any active subscription to the same note.
    pub async fn subscribe_note(&mut self, note_id: &NoteId) -> NotesResult<SubscriptionHandle> {
        let feed = self
            .store
            .subscribe(WatchTarget::document(NOTES_COLLECTION, note_id.as_str()))
            .await
            .map_err(|e| NotesError::from_store(note_id, e))?;
        debug!(note = %note_id, "Subscribed to note");
        Ok(self
            .registry
            .insert(FeedKey::Note(note_id.clone()), feed, self.tx.clone()))
    }

    /// Cancel a subscription
    ///
    /// Nothing more is delivered for it once this returns. Unknown or
    /// superseded handles are ignored.
    pub fn unsubscribe(&mut self, handle: &SubscriptionHandle) {
        if self.registry.remove(handle) {
            debug!(key = ?handle.key(), "Unsubscribed");
        }
    }

    /// Cancel every subscription
    pub fn unsubscribe_all(&mut self) {
        self.registry.clear();
        debug!("Cancelled all subscriptions");
    }

    /// Whether a subscription is active for `key`
    pub fn is_subscribed(&self, key: &FeedKey) -> bool {
        self.registry.contains(key)
    }

    /// Notes currently known, newest first
    pub fn notes(&self) -> &[Note] {
        self.notes.as_slice()
    }

    /// Merge a page loaded through the repository into the note list
    ///
    /// Notes already in the list are kept as they are. Returns the number
    /// added.
    pub fn merge_page(&mut self, page: Vec<Note>) -> usize {
        self.notes.merge_page(page)
    }

    /// Drop a note from the list without waiting for the collection feed
    pub fn forget_note(&mut self, note_id: &NoteId) {
        self.notes.remove(note_id);
    }

    pub fn clear_notes(&mut self) {
        self.notes.clear();
    }

    /// Wait for the next update
    ///
    /// Returns `None` when there are no active subscriptions.
    pub async fn next_update(&mut self) -> Option<LiveUpdate> {
        loop {
            if self.registry.is_empty() {
                self.drain_stale();
                return None;
            }
            let delivery = self.rx.recv().await?;
            if let Some(update) = self.accept(delivery) {
                return Some(update);
            }
        }
    }

    /// Take the next update if one is already queued
    pub fn try_next_update(&mut self) -> Option<LiveUpdate> {
        while let Ok(delivery) = self.rx.try_recv() {
            if let Some(update) = self.accept(delivery) {
                return Some(update);
            }
        }
        None
    }

    fn drain_stale(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }

    fn accept(&mut self, delivery: Delivery) -> Option<LiveUpdate> {
        match delivery {
            Delivery::Frame { key, id, frame } => {
                if !self.registry.advance(&key, id, frame.version) {
                    trace!(?key, id, version = frame.version, "Dropped stale frame");
                    return None;
                }
                self.apply_frame(frame)
            }
            Delivery::Ended { key, id } => {
                if self.registry.is_current(&key, id) {
                    warn!(?key, "Store closed change feed");
                    self.registry.cancel(&key);
                }
                None
            }
        }
    }

    fn apply_frame(&mut self, frame: ChangeFrame) -> Option<LiveUpdate> {
        match frame.snapshot {
            Snapshot::Collection(docs) => {
                let notes = decode_all(&docs);
                self.notes.replace(notes);
                trace!(
                    version = frame.version,
                    count = self.notes.as_slice().len(),
                    "Collection updated"
                );
                Some(LiveUpdate::Collection(self.notes.as_slice().to_vec()))
            }
            Snapshot::Document {
                document: Some(doc),
                ..
            } => match decode(&doc) {
                Ok(note) => Some(LiveUpdate::Note(note)),
                Err(e) => {
                    warn!("Skipping note update: {}", e);
                    None
                }
            },
            Snapshot::Document { id, document: None } => {
                Some(LiveUpdate::NoteRemoved(NoteId::new(id)))
            }
        }
    }
}
