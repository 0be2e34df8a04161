//! LiveNote Core Library
//!
//! Shared text notes with live updates and exclusive edit locks. Any client
//! can create, edit and delete notes; every connected client sees changes as
//! they are committed, and at most one client at a time may edit a note.
//!
//! # Architecture
//!
//! - **Document store**: the only shared state. Single-document transactions
//!   make lock claims race-free; change feeds drive live updates.
//! - **Edit locks** live inside the note documents and are claimed through a
//!   transaction, released unconditionally.
//! - **Live sync** forwards store feeds into one channel owned by the client
//!   task, so the note list and the open session are only touched from there.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let mut client = NotesClient::open(&config)?;
//!
//! client.listen_for_updates().await?;
//! let note = client.add_note("Groceries", "milk").await?;
//!
//! client.begin_edit(&note.id).await?;
//! client.edit("Groceries", "milk, eggs").await?;
//! client.end_edit().await?;
//!
//! while let Some(update) = client.next_update().await {
//!     // redraw from client.notes()
//! }
//! ```
//!
//! # Modules
//!
//! - `client`: Per-client facade (main entry point)
//! - `repository`: Note CRUD and paginated listing
//! - `lock`: Edit lock acquire/release
//! - `sync`: Live subscriptions and the note list
//! - `session`: Edit session for one open note
//! - `store`: Document store interface with memory and SQLite adapters
//! - `models`: Notes and identifiers
//! - `identity`: Persistent installation identity
//! - `config`: Application configuration
//! - `logging`: Log file setup

pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod lock;
pub mod logging;
pub mod models;
pub mod repository;
pub mod session;
pub mod store;
pub mod sync;

pub use client::NotesClient;
pub use config::Config;
pub use error::{NotesError, NotesResult};
pub use identity::{Identity, IdentityProvider};
pub use lock::{LockManager, LockOutcome, LockState};
pub use models::{Note, NoteId, UserId};
pub use repository::{EditOutcome, NoteRepository, Page, PageCursor};
pub use session::{EditMode, EditSession, SessionStatus};
pub use store::{DocumentStore, MemoryStore, SqliteStore, StoreError};
pub use sync::{FeedKey, LiveSync, LiveUpdate, SubscriptionHandle};
