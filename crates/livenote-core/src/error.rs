//! Errors surfaced by the note services
//!
//! Store failures are converted here, at the repository / lock manager /
//! live sync boundary, so callers only ever deal with [`NotesError`].
//! Transient store failures become `StoreUnavailable` and are worth retrying;
//! everything else becomes `StoreFault`.
//!
//! Lock conflicts are not errors; they come back as typed outcomes
//! (`LockOutcome::HeldBy`, `EditOutcome::Rejected`).

use thiserror::Error;

use crate::models::NoteId;
use crate::store::StoreError;

/// Errors that can occur while working with notes
#[derive(Error, Debug)]
pub enum NotesError {
    /// The referenced note has no backing document
    #[error("Note '{0}' not found")]
    NotFound(NoteId),

    /// The store could not complete the operation right now
    #[error("Note store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// The store failed in a way that retrying will not fix
    #[error("Note store error: {0}")]
    StoreFault(#[source] StoreError),

    /// A stored document does not decode as a note
    #[error("Note '{id}' is malformed: {source}")]
    Malformed {
        id: NoteId,
        #[source]
        source: serde_json::Error,
    },
}

impl NotesError {
    /// Convert a store error raised while working on `id`
    pub(crate) fn from_store(id: &NoteId, error: StoreError) -> Self {
        match error {
            StoreError::NotFound { .. } => NotesError::NotFound(id.clone()),
            other => other.into(),
        }
    }

    /// Check if retrying the operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotesError::StoreUnavailable(_))
    }

    /// Message suitable for showing to a user
    ///
    /// Never includes transport-level details; those stay in the error chain
    /// for logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            NotesError::NotFound(_) => "This note no longer exists.",
            NotesError::StoreUnavailable(_) => {
                "Couldn't reach the notes server. Your change was not saved; please try again."
            }
            NotesError::StoreFault(_) => {
                "Something went wrong with the note store. Your change was not saved."
            }
            NotesError::Malformed { .. } => "This note could not be read.",
        }
    }
}

impl From<StoreError> for NotesError {
    fn from(error: StoreError) -> Self {
        if error.is_transient() {
            NotesError::StoreUnavailable(error)
        } else {
            NotesError::StoreFault(error)
        }
    }
}

/// Result type for note operations
pub type NotesResult<T> = Result<T, NotesError>;
