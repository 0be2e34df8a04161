//! Edit sessions
//!
//! An [`EditSession`] covers one user having one note open. Opening claims
//! the note's edit lock and subscribes to the note; if someone else holds the
//! lock the session starts read-only and keeps watching, taking over as soon
//! as the lock is freed. Edits are written straight through, there is no
//! separate save step.
//!
//! Closing always releases the lock, whether or not this session held it.
//! That keeps locks from being stranded, at the cost of a read-only viewer
//! being able to free a lock held by someone else; the holder's session
//! notices the lock went away and claims it again.

use tracing::{debug, info, warn};

use crate::error::{NotesError, NotesResult};
use crate::lock::{LockManager, LockOutcome};
use crate::models::{Note, NoteId, UserId};
use crate::repository::{EditOutcome, NoteRepository};
use crate::sync::{LiveSync, LiveUpdate, SubscriptionHandle};

/// Whether the local user may edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditMode {
    Editing,
    ReadOnly { holder: UserId },
}

impl EditMode {
    fn from_outcome(outcome: LockOutcome) -> Self {
        match outcome {
            LockOutcome::Acquired => EditMode::Editing,
            LockOutcome::HeldBy(holder) => EditMode::ReadOnly { holder },
        }
    }
}

/// Passive indicator of a session's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Edits are being saved
    Editing,
    /// Someone else is editing; local edits are ignored
    ReadOnly { holder: UserId },
    /// The note was deleted while open
    Removed,
}

/// One user's open note
pub struct EditSession {
    note: Note,
    user_id: UserId,
    repo: NoteRepository,
    locks: LockManager,
    mode: EditMode,
    removed: bool,
    subscription: Option<SubscriptionHandle>,
    released: bool,
}

impl EditSession {
    /// Open `note_id` for `user_id`
    ///
    /// Fails with `NotFound` if the note is gone. A lock held by someone else
    /// is not an error: the session opens read-only.
    pub async fn begin(
        note_id: &NoteId,
        user_id: UserId,
        repo: NoteRepository,
        locks: LockManager,
        sync: &mut LiveSync,
    ) -> NotesResult<Self> {
        let mut note = repo.get(note_id).await?;

        let mode = EditMode::from_outcome(locks.acquire(note_id, &user_id).await?);
        if mode == EditMode::Editing {
            note.locked_by = Some(user_id.clone());
        }

        let subscription = match sync.subscribe_note(note_id).await {
            Ok(handle) => handle,
            Err(e) => {
                if mode == EditMode::Editing {
                    if let Err(release_err) = locks.release(note_id).await {
                        warn!(note = %note_id, "Failed to release lock after subscribe error: {}", release_err);
                    }
                }
                return Err(e);
            }
        };

        info!(note = %note_id, user = %user_id, mode = ?mode, "Opened edit session");

        Ok(Self {
            note,
            user_id,
            repo,
            locks,
            mode,
            removed: false,
            subscription: Some(subscription),
            released: false,
        })
    }

    /// The local copy of the note
    pub fn note(&self) -> &Note {
        &self.note
    }

    pub fn note_id(&self) -> &NoteId {
        &self.note.id
    }

    pub fn mode(&self) -> &EditMode {
        &self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_none()
    }

    pub fn status(&self) -> SessionStatus {
        if self.removed {
            return SessionStatus::Removed;
        }
        match &self.mode {
            EditMode::Editing => SessionStatus::Editing,
            EditMode::ReadOnly { holder } => SessionStatus::ReadOnly {
                holder: holder.clone(),
            },
        }
    }

    /// Feed a live update into the session
    ///
    /// Updates for other notes are ignored. When the lock is seen to be free,
    /// the session tries to claim it; an error from that attempt leaves the
    /// mode unchanged.
    pub async fn apply_update(&mut self, update: &LiveUpdate) -> NotesResult<()> {
        if self.is_closed() || self.removed {
            return Ok(());
        }

        match update {
            LiveUpdate::Note(note) if note.id == self.note.id => {
                self.note = note.clone();
                match note.locked_by.clone() {
                    Some(holder) if holder == self.user_id => self.set_mode(EditMode::Editing),
                    Some(holder) => self.set_mode(EditMode::ReadOnly { holder }),
                    None => {
                        debug!(note = %self.note.id, "Lock is free, claiming it");
                        let outcome = self.locks.acquire(&self.note.id, &self.user_id).await?;
                        self.set_mode(EditMode::from_outcome(outcome));
                    }
                }
            }
            LiveUpdate::NoteRemoved(id) if *id == self.note.id => {
                info!(note = %id, "Note removed while open");
                self.removed = true;
            }
            _ => {}
        }
        Ok(())
    }

    /// Write a change to title and content
    ///
    /// Read-only and closed sessions send nothing and report
    /// `EditOutcome::Suppressed`.
    pub async fn edit(&mut self, title: &str, content: &str) -> NotesResult<EditOutcome> {
        if self.removed {
            return Err(NotesError::NotFound(self.note.id.clone()));
        }
        if self.is_closed() || self.mode != EditMode::Editing {
            return Ok(EditOutcome::Suppressed);
        }

        let result = self
            .repo
            .update_as(&self.note.id, &self.user_id, title, content)
            .await;

        match &result {
            Ok(EditOutcome::Saved(note)) => self.note = note.clone(),
            Ok(EditOutcome::Rejected { holder }) => self.set_mode(EditMode::ReadOnly {
                holder: holder.clone(),
            }),
            Ok(EditOutcome::Suppressed) => {}
            Err(NotesError::NotFound(_)) => self.removed = true,
            Err(e) => warn!(note = %self.note.id, "Edit not saved: {}", e),
        }
        result
    }

    /// End the session: stop watching the note and release its lock
    ///
    /// The lock is released even if this session never held it. Calling
    /// `close` again after it succeeded does nothing; after a failed release
    /// it retries the release.
    pub async fn close(&mut self, sync: &mut LiveSync) -> NotesResult<()> {
        if let Some(handle) = self.subscription.take() {
            sync.unsubscribe(&handle);
        }
        if !self.released {
            self.locks.release(&self.note.id).await?;
            self.released = true;
            info!(note = %self.note.id, user = %self.user_id, "Closed edit session");
        }
        Ok(())
    }

    fn set_mode(&mut self, mode: EditMode) {
        if self.mode != mode {
            info!(note = %self.note.id, from = ?self.mode, to = ?mode, "Edit mode changed");
            self.mode = mode;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockState;
    use crate::store::{DocumentStore, MemoryStore};
    use std::sync::Arc;
    use std::time::Duration;

    struct Client {
        user: UserId,
        repo: NoteRepository,
        locks: LockManager,
        sync: LiveSync,
    }

    impl Client {
        fn new(store: &Arc<MemoryStore>, user: &str) -> Self {
            let store: Arc<dyn DocumentStore> = store.clone();
            Self {
                user: UserId::from(user),
                repo: NoteRepository::new(store.clone()),
                locks: LockManager::new(store.clone()),
                sync: LiveSync::new(store),
            }
        }

        async fn open(&mut self, id: &NoteId) -> NotesResult<EditSession> {
            EditSession::begin(
                id,
                self.user.clone(),
                self.repo.clone(),
                self.locks.clone(),
                &mut self.sync,
            )
            .await
        }

        /// Apply every update that arrives until the feed goes quiet
        async fn pump(&mut self, session: &mut EditSession) {
            while let Ok(Some(update)) =
                tokio::time::timeout(Duration::from_millis(100), self.sync.next_update()).await
            {
                session.apply_update(&update).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_second_user_is_read_only_until_release() {
        let store = Arc::new(MemoryStore::new());
        let mut c1 = Client::new(&store, "u1");
        let mut c2 = Client::new(&store, "u2");
        let note = c1.repo.create("A", "x", &c1.user).await.unwrap();

        let mut s1 = c1.open(&note.id).await.unwrap();
        assert_eq!(s1.status(), SessionStatus::Editing);

        let mut s2 = c2.open(&note.id).await.unwrap();
        assert_eq!(
            s2.status(),
            SessionStatus::ReadOnly {
                holder: UserId::from("u1")
            }
        );

        // Read-only edits never reach the store
        assert_eq!(s2.edit("A", "ignored").await.unwrap(), EditOutcome::Suppressed);
        assert_eq!(c2.repo.get(&note.id).await.unwrap().content, "x");

        // Holder's edits show up on the viewer
        assert!(matches!(
            s1.edit("A", "hello").await.unwrap(),
            EditOutcome::Saved(_)
        ));
        c2.pump(&mut s2).await;
        assert_eq!(s2.note().content, "hello");
        assert!(matches!(s2.status(), SessionStatus::ReadOnly { .. }));

        // Holder leaves; the viewer takes over
        s1.close(&mut c1.sync).await.unwrap();
        c2.pump(&mut s2).await;
        assert_eq!(s2.status(), SessionStatus::Editing);
        assert_eq!(
            c2.locks.state(&note.id).await.unwrap(),
            LockState::LockedBy(UserId::from("u2"))
        );

        assert!(matches!(
            s2.edit("B", "mine now").await.unwrap(),
            EditOutcome::Saved(ref n) if n.content == "mine now"
        ));
    }

    #[tokio::test]
    async fn test_close_always_releases() {
        let store = Arc::new(MemoryStore::new());
        let mut c1 = Client::new(&store, "u1");
        let mut c2 = Client::new(&store, "u2");
        let note = c1.repo.create("A", "x", &c1.user).await.unwrap();

        let mut s1 = c1.open(&note.id).await.unwrap();
        let mut s2 = c2.open(&note.id).await.unwrap();

        // The read-only viewer closing frees the holder's lock too
        s2.close(&mut c2.sync).await.unwrap();
        assert_eq!(c1.locks.state(&note.id).await.unwrap(), LockState::Unlocked);
        assert!(s2.is_closed());
        s2.close(&mut c2.sync).await.unwrap();

        // The holder notices and claims it back
        c1.pump(&mut s1).await;
        assert_eq!(s1.status(), SessionStatus::Editing);
        assert_eq!(
            c1.locks.state(&note.id).await.unwrap(),
            LockState::LockedBy(UserId::from("u1"))
        );

        s1.close(&mut c1.sync).await.unwrap();
        assert_eq!(c1.locks.state(&note.id).await.unwrap(), LockState::Unlocked);
        assert_eq!(s1.edit("A", "late").await.unwrap(), EditOutcome::Suppressed);
    }

    #[tokio::test]
    async fn test_lock_taken_over_switches_to_read_only() {
        let store = Arc::new(MemoryStore::new());
        let mut c1 = Client::new(&store, "u1");
        let note = c1.repo.create("A", "x", &c1.user).await.unwrap();
        let mut s1 = c1.open(&note.id).await.unwrap();
        c1.pump(&mut s1).await;

        // Forced unlock followed by someone else's claim
        let other = LockManager::new(store.clone());
        other.release(&note.id).await.unwrap();
        other.acquire(&note.id, &UserId::from("u3")).await.unwrap();

        c1.pump(&mut s1).await;
        assert_eq!(
            s1.status(),
            SessionStatus::ReadOnly {
                holder: UserId::from("u3")
            }
        );
        assert_eq!(s1.edit("A", "blocked").await.unwrap(), EditOutcome::Suppressed);
    }

    #[tokio::test]
    async fn test_edit_rejected_when_lock_changed_unseen() {
        let store = Arc::new(MemoryStore::new());
        let mut c1 = Client::new(&store, "u1");
        let note = c1.repo.create("A", "x", &c1.user).await.unwrap();
        let mut s1 = c1.open(&note.id).await.unwrap();

        let other = LockManager::new(store.clone());
        other.release(&note.id).await.unwrap();
        other.acquire(&note.id, &UserId::from("u3")).await.unwrap();

        // Not pumped yet, so the session still thinks it is editing
        assert_eq!(
            s1.edit("A", "lost").await.unwrap(),
            EditOutcome::Rejected {
                holder: UserId::from("u3")
            }
        );
        assert!(matches!(s1.mode(), EditMode::ReadOnly { .. }));
        assert_eq!(c1.repo.get(&note.id).await.unwrap().content, "x");
    }

    #[tokio::test]
    async fn test_deleted_note_marks_session_removed() {
        let store = Arc::new(MemoryStore::new());
        let mut c1 = Client::new(&store, "u1");
        let note = c1.repo.create("A", "x", &c1.user).await.unwrap();
        let mut s1 = c1.open(&note.id).await.unwrap();

        c1.repo.delete(&note.id).await.unwrap();
        c1.pump(&mut s1).await;
        assert_eq!(s1.status(), SessionStatus::Removed);
        assert!(matches!(
            s1.edit("A", "x").await,
            Err(NotesError::NotFound(_))
        ));

        // Closing a removed note still works
        s1.close(&mut c1.sync).await.unwrap();
    }

    #[tokio::test]
    async fn test_begin_on_missing_note() {
        let store = Arc::new(MemoryStore::new());
        let mut c1 = Client::new(&store, "u1");
        let result = c1.open(&NoteId::from("missing")).await;
        assert!(matches!(result, Err(NotesError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_as_retryable() {
        let store = Arc::new(MemoryStore::new());
        let mut c1 = Client::new(&store, "u1");
        let note = c1.repo.create("A", "x", &c1.user).await.unwrap();
        let mut s1 = c1.open(&note.id).await.unwrap();

        store.set_offline(true);
        let err = s1.edit("A", "y").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.user_message().contains("offline"));
        assert_eq!(s1.status(), SessionStatus::Editing);

        // A failed release can be retried
        assert!(s1.close(&mut c1.sync).await.is_err());
        store.set_offline(false);
        s1.close(&mut c1.sync).await.unwrap();
        assert_eq!(c1.locks.state(&note.id).await.unwrap(), LockState::Unlocked);
    }
}
