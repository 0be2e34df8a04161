//! Note repository
//!
//! CRUD over the `notes` collection plus paginated, recency-ordered listing.
//!
//! The repository never touches lock state except through `update_as`,
//! which refuses to write over someone else's lock. Plain `update` and
//! `delete` are last-write-wins and ignore the lock entirely; coordinating
//! them is the caller's job.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::{NotesError, NotesResult};
use crate::models::{
    fields, normalize_title, timestamp_value, Note, NoteId, NoteRecord, UserId, NOTES_COLLECTION,
};
use crate::store::{
    Document, DocumentStore, FieldPatch, ListQuery, StartAfter, StoreError, TxAction, TxResult,
};

/// Opaque position in the recency-ordered note listing
#[derive(Debug, Clone, PartialEq)]
pub struct PageCursor(StartAfter);

/// One page of notes
#[derive(Debug, Clone)]
pub struct Page {
    /// Notes on this page, newest first
    pub notes: Vec<Note>,
    /// Where the next page starts; `None` once the listing is exhausted
    pub next: Option<PageCursor>,
}

/// Result of a lock-aware edit
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    /// The edit was written; the note as stored
    Saved(Note),
    /// Someone else holds the lock; nothing was written
    Rejected { holder: UserId },
    /// The edit session is read-only; nothing was sent to the store
    Suppressed,
}

/// CRUD and listing for notes
#[derive(Clone)]
pub struct NoteRepository {
    store: Arc<dyn DocumentStore>,
    page_size: usize,
    cursor: Option<PageCursor>,
    exhausted: bool,
}

impl NoteRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            page_size: DEFAULT_PAGE_SIZE,
            cursor: None,
            exhausted: false,
        }
    }

    /// Override the page size (minimum 1)
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetch a single note
    pub async fn get(&self, id: &NoteId) -> NotesResult<Note> {
        let doc = self
            .store
            .get(NOTES_COLLECTION, id.as_str())
            .await
            .map_err(|e| NotesError::from_store(id, e))?
            .ok_or_else(|| NotesError::NotFound(id.clone()))?;
        decode(&doc)
    }

    /// Create a note owned by `owner`
    ///
    /// A blank title is replaced by the default placeholder.
    pub async fn create(&self, title: &str, content: &str, owner: &UserId) -> NotesResult<Note> {
        let title = normalize_title(title);
        let record = NoteRecord {
            title,
            content: content.to_string(),
            date: Utc::now(),
            user_id: owner.as_str().to_string(),
            locked_by: None,
            locked_at: None,
        };
        let fields = record
            .clone()
            .into_fields()
            .map_err(|e| NotesError::from(StoreError::from(e)))?;

        let id = NoteId::new(self.store.create(NOTES_COLLECTION, fields).await?);
        debug!(note = %id, owner = %owner, "Created note");

        Ok(Note {
            id,
            title: record.title,
            content: record.content,
            date: record.date,
            user_id: owner.clone(),
            locked_by: None,
        })
    }

    /// Overwrite title and content, refreshing the modified time
    ///
    /// Does not look at the lock.
    pub async fn update(&self, id: &NoteId, title: &str, content: &str) -> NotesResult<Note> {
        let patch = content_patch(title, content);
        self.store
            .update(NOTES_COLLECTION, id.as_str(), &patch)
            .await
            .map_err(|e| NotesError::from_store(id, e))?;
        self.get(id).await
    }

    /// Write title and content on behalf of `editor`, unless someone else
    /// holds the lock
    ///
    /// The check and the write happen in one transaction. When `editor` is
    /// the holder, the lock's claim time is refreshed as well.
    pub async fn update_as(
        &self,
        id: &NoteId,
        editor: &UserId,
        title: &str,
        content: &str,
    ) -> NotesResult<EditOutcome> {
        let mut holder: Option<UserId> = None;
        let mut body = |doc: Option<&Document>| {
            let Some(doc) = doc else {
                return TxAction::Abort;
            };
            holder = current_holder(doc);
            match &holder {
                Some(h) if h != editor => TxAction::Abort,
                Some(_) => TxAction::Commit(
                    content_patch(title, content)
                        .set(fields::LOCKED_AT, timestamp_value(Utc::now())),
                ),
                None => TxAction::Commit(content_patch(title, content)),
            }
        };

        let result = self
            .store
            .run_transaction(NOTES_COLLECTION, id.as_str(), &mut body)
            .await
            .map_err(|e| NotesError::from_store(id, e))?;

        match result {
            TxResult::Committed(doc) => Ok(EditOutcome::Saved(decode(&doc)?)),
            TxResult::Aborted(None) => Err(NotesError::NotFound(id.clone())),
            TxResult::Aborted(Some(_)) => match holder {
                Some(holder) => {
                    debug!(note = %id, holder = %holder, "Edit rejected, note locked");
                    Ok(EditOutcome::Rejected { holder })
                }
                None => Err(NotesError::NotFound(id.clone())),
            },
        }
    }

    /// Delete a note; deleting a missing note is not an error
    pub async fn delete(&self, id: &NoteId) -> NotesResult<()> {
        self.store
            .delete(NOTES_COLLECTION, id.as_str())
            .await
            .map_err(|e| NotesError::from_store(id, e))?;
        debug!(note = %id, "Deleted note");
        Ok(())
    }

    /// Load one page of notes, newest first, after `cursor`
    ///
    /// Documents that fail to decode are skipped but still advance the cursor.
    pub async fn load_page(&self, cursor: Option<&PageCursor>) -> NotesResult<Page> {
        let query = ListQuery::new(fields::DATE)
            .descending()
            .limit(self.page_size)
            .start_after(cursor.map(|c| c.0.clone()));
        let docs = self.store.list(NOTES_COLLECTION, &query).await?;

        let next = if docs.len() == self.page_size {
            docs.last()
                .map(|doc| PageCursor(StartAfter::from_document(doc, fields::DATE)))
        } else {
            None
        };

        let notes = decode_all(&docs);
        Ok(Page { notes, next })
    }

    /// Load the page after the retained cursor and advance it
    ///
    /// Returns an empty list once the listing is exhausted, until
    /// `reset_cursor` is called. The cursor is left untouched on error.
    pub async fn load_next_page(&mut self) -> NotesResult<Vec<Note>> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let page = self.load_page(self.cursor.as_ref()).await?;
        match page.next {
            Some(next) => self.cursor = Some(next),
            None => self.exhausted = true,
        }
        Ok(page.notes)
    }

    /// Start incremental loading again from the newest note
    pub fn reset_cursor(&mut self) {
        self.cursor = None;
        self.exhausted = false;
    }

    /// Whether incremental loading has reached the end of the listing
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

fn content_patch(title: &str, content: &str) -> FieldPatch {
    let title = normalize_title(title);
    FieldPatch::new()
        .set(fields::TITLE, title)
        .set(fields::CONTENT, content)
        .set(fields::DATE, timestamp_value(Utc::now()))
}

/// Lock holder recorded on a document; an empty string counts as unlocked
pub(crate) fn current_holder(doc: &Document) -> Option<UserId> {
    doc.get_str(fields::LOCKED_BY)
        .filter(|holder| !holder.is_empty())
        .map(UserId::from)
}

pub(crate) fn decode(doc: &Document) -> NotesResult<Note> {
    Note::from_document(doc).map_err(|source| NotesError::Malformed {
        id: NoteId::new(doc.id.clone()),
        source,
    })
}

/// Decode every document, dropping the ones that are not valid notes
pub(crate) fn decode_all(docs: &[Document]) -> Vec<Note> {
    docs.iter()
        .filter_map(|doc| match decode(doc) {
            Ok(note) => Some(note),
            Err(e) => {
                warn!("Skipping note document: {}", e);
                None
            }
        })
        .collect()
}
