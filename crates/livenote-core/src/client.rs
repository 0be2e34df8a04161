//! Client facade
//!
//! [`NotesClient`] bundles what one running client needs: the local
//! identity, the repository, the lock manager, the live sync engine and at
//! most one open edit session. It is driven from a single task; call
//! [`NotesClient::next_update`] in that task's loop to keep the note list and
//! the open session current.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::NotesResult;
use crate::identity::{Identity, IdentityProvider};
use crate::lock::LockManager;
use crate::models::{Note, NoteId, UserId};
use crate::repository::{EditOutcome, NoteRepository};
use crate::session::EditSession;
use crate::store::{DocumentStore, SqliteStore};
use crate::sync::{LiveSync, LiveUpdate, SubscriptionHandle};

/// One client's view of the shared notes
pub struct NotesClient {
    user_id: UserId,
    repo: NoteRepository,
    locks: LockManager,
    sync: LiveSync,
    collection: Option<SubscriptionHandle>,
    session: Option<EditSession>,
}

impl NotesClient {
    /// Open the SQLite store and installation identity under `config.data_dir`
    ///
    /// Live updates from a SQLite store are process-local: this client sees
    /// commits made through its own store handle, not those of other
    /// processes sharing the database file. Lock claims stay exclusive
    /// across processes either way.
    pub fn open(config: &Config) -> Result<Self> {
        config.ensure_data_dir()?;

        let db_path = config.database_path();
        let store = SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open note store at {:?}", db_path))?;
        let identity = Identity::load_or_create(config).context("Failed to load identity")?;

        info!(
            user = %identity.user_id(),
            new_identity = identity.is_new(),
            "Opened notes client"
        );
        Ok(Self::with_store(Arc::new(store), &identity, config))
    }

    /// Build a client over an existing store
    pub fn with_store(
        store: Arc<dyn DocumentStore>,
        identity: &dyn IdentityProvider,
        config: &Config,
    ) -> Self {
        Self {
            user_id: identity.user_id(),
            repo: NoteRepository::new(store.clone()).with_page_size(config.page_size),
            locks: LockManager::new(store.clone()).with_stale_after(config.lock_stale_after()),
            sync: LiveSync::new(store),
            collection: None,
            session: None,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Notes currently known, newest first
    pub fn notes(&self) -> &[Note] {
        self.sync.notes()
    }

    /// The open edit session, if any
    pub fn session(&self) -> Option<&EditSession> {
        self.session.as_ref()
    }

    /// Create a note owned by the local user
    pub async fn add_note(&mut self, title: &str, content: &str) -> NotesResult<Note> {
        let note = self.repo.create(title, content, &self.user_id).await?;
        self.sync.merge_page(vec![note.clone()]);
        Ok(note)
    }

    /// Delete a note for everyone
    ///
    /// Closes the open session first if it is on this note.
    pub async fn delete_note(&mut self, note_id: &NoteId) -> NotesResult<()> {
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.note_id() == note_id)
        {
            self.end_edit().await?;
        }
        self.repo.delete(note_id).await?;
        self.sync.forget_note(note_id);
        Ok(())
    }

    /// Load the next page of notes into the list
    ///
    /// Returns the number of notes added; zero once everything is loaded.
    pub async fn load_more(&mut self) -> NotesResult<usize> {
        let page = self.repo.load_next_page().await?;
        Ok(self.sync.merge_page(page))
    }

    /// Drop the list and the page cursor, then load the first page again
    pub async fn reload(&mut self) -> NotesResult<usize> {
        self.repo.reset_cursor();
        self.sync.clear_notes();
        self.load_more().await
    }

    /// Start following the whole note collection
    pub async fn listen_for_updates(&mut self) -> NotesResult<()> {
        let handle = self.sync.subscribe_collection().await?;
        self.collection = Some(handle);
        Ok(())
    }

    /// Stop following the note collection; an open session keeps its feed
    pub fn stop_listening(&mut self) {
        if let Some(handle) = self.collection.take() {
            self.sync.unsubscribe(&handle);
        }
    }

    /// Open `note_id` for editing, closing any session already open
    pub async fn begin_edit(&mut self, note_id: &NoteId) -> NotesResult<&EditSession> {
        self.end_edit().await?;

        let session = EditSession::begin(
            note_id,
            self.user_id.clone(),
            self.repo.clone(),
            self.locks.clone(),
            &mut self.sync,
        )
        .await?;
        Ok(self.session.insert(session))
    }

    /// Write to the open session; without one nothing is sent
    pub async fn edit(&mut self, title: &str, content: &str) -> NotesResult<EditOutcome> {
        match self.session.as_mut() {
            Some(session) => session.edit(title, content).await,
            None => Ok(EditOutcome::Suppressed),
        }
    }

    /// Close the open session, releasing its lock
    ///
    /// If the release fails the session stays open so the call can be
    /// retried.
    pub async fn end_edit(&mut self) -> NotesResult<()> {
        if let Some(session) = self.session.as_mut() {
            session.close(&mut self.sync).await?;
            self.session = None;
        }
        Ok(())
    }

    /// Wait for the next live update and apply it to the open session
    ///
    /// Returns `None` when nothing is subscribed.
    pub async fn next_update(&mut self) -> Option<LiveUpdate> {
        let update = self.sync.next_update().await?;
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.apply_update(&update).await {
                warn!(note = %session.note_id(), "Failed to apply update: {}", e);
            }
        }
        Some(update)
    }

    /// Close the session and cancel every subscription
    pub async fn shutdown(&mut self) -> NotesResult<()> {
        let result = self.end_edit().await;
        self.collection = None;
        self.sync.unsubscribe_all();
        info!(user = %self.user_id, "Notes client shut down");
        result
    }
}
