//! Document store errors
//!
//! Typed errors raised by store adapters. Callers above the store boundary
//! (repository, lock manager, live sync) convert these into `NotesError`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during document store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// The referenced document does not exist
    #[error("Document '{collection}/{id}' not found")]
    NotFound { collection: String, id: String },

    /// The store cannot be reached right now
    #[error("Document store unavailable: {0}")]
    Unavailable(String),

    /// A transaction kept colliding with concurrent writers
    #[error("Transaction on '{collection}/{id}' gave up after {attempts} attempts")]
    Contention {
        collection: String,
        id: String,
        attempts: u32,
    },

    /// Failed to open the backing database
    #[error("Failed to open document store at {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored fields could not be encoded or decoded
    #[error("Invalid document fields: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A thread panicked while holding the store state
    #[error("Document store state is poisoned")]
    Poisoned,

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Check if retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Contention { .. } | StoreError::Io(_) => {
                true
            }
            StoreError::Database(err) => is_busy(err),
            _ => false,
        }
    }
}

/// Check if a SQLite error means another connection holds the write lock
pub(crate) fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
