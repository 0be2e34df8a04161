//! Edit locks
//!
//! A note's edit lock lives in the note document itself (`lockedBy`,
//! `lockedAt`). Claiming it is a single-document transaction, so two clients
//! racing for an unlocked note see exactly one winner. Releasing it is a plain
//! write with no holder check: any party may free a lock, which is what keeps
//! locks from being stranded by a client that went away.
//!
//! ```text
//! Unlocked ──acquire(h)──▶ LockedBy(h) ──acquire(h)──▶ LockedBy(h)
//!     ▲                        │
//!     └──────release()─────────┘        acquire(h2) on LockedBy(h1): HeldBy(h1)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{NotesError, NotesResult};
use crate::models::{fields, timestamp_from_value, timestamp_value, NoteId, UserId, NOTES_COLLECTION};
use crate::repository::current_holder;
use crate::store::{Document, DocumentStore, FieldPatch, StoreError, TxAction, TxResult};

/// Result of an acquire attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The caller now holds the lock
    Acquired,
    /// Someone else holds the lock; nothing was changed
    HeldBy(UserId),
}

/// Observed lock state of a note
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    LockedBy(UserId),
}

/// Decision taken inside the acquire transaction
#[derive(Debug, Clone, PartialEq, Eq)]
enum Claim {
    Take,
    Refuse(UserId),
}

/// Decide whether `claimant` may take the lock
///
/// `stale_after` lets a claimant take over a lock whose claim time is older
/// than the threshold; a lock with no claim time counts as stale.
fn decide_claim(
    holder: Option<&UserId>,
    locked_at: Option<DateTime<Utc>>,
    claimant: &UserId,
    now: DateTime<Utc>,
    stale_after: Option<Duration>,
) -> Claim {
    let Some(holder) = holder else {
        return Claim::Take;
    };
    if holder == claimant {
        return Claim::Take;
    }

    let stale = match (stale_after, locked_at) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(limit), Some(at)) => now
            .signed_duration_since(at)
            .to_std()
            .is_ok_and(|age| age > limit),
    };
    if stale {
        Claim::Take
    } else {
        Claim::Refuse(holder.clone())
    }
}

/// Acquire, release and inspect note edit locks
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn DocumentStore>,
    stale_after: Option<Duration>,
}

impl LockManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            stale_after: None,
        }
    }

    /// Allow taking over locks whose claim is older than `stale_after`
    pub fn with_stale_after(mut self, stale_after: Option<Duration>) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Claim the edit lock on `note_id` for `holder`
    ///
    /// Re-acquiring a lock already held by `holder` succeeds and refreshes its
    /// claim time. Store failures are errors, never a conflict.
    pub async fn acquire(&self, note_id: &NoteId, holder: &UserId) -> NotesResult<LockOutcome> {
        let now = Utc::now();
        let stale_after = self.stale_after;
        let mut claim = None;

        let mut body = |doc: Option<&Document>| {
            let Some(doc) = doc else {
                return TxAction::Abort;
            };
            let current = current_holder(doc);
            let locked_at = doc.get(fields::LOCKED_AT).and_then(timestamp_from_value);
            let decision = decide_claim(current.as_ref(), locked_at, holder, now, stale_after);
            let action = match &decision {
                Claim::Take => TxAction::Commit(
                    FieldPatch::new()
                        .set(fields::LOCKED_BY, holder.as_str())
                        .set(fields::LOCKED_AT, timestamp_value(now)),
                ),
                Claim::Refuse(_) => TxAction::Abort,
            };
            claim = Some(decision);
            action
        };

        let result = self
            .store
            .run_transaction(NOTES_COLLECTION, note_id.as_str(), &mut body)
            .await
            .map_err(|e| NotesError::from_store(note_id, e))?;

        match (result, claim) {
            (TxResult::Committed(_), _) => {
                info!(note = %note_id, holder = %holder, "Acquired edit lock");
                Ok(LockOutcome::Acquired)
            }
            (TxResult::Aborted(Some(_)), Some(Claim::Refuse(other))) => {
                debug!(note = %note_id, holder = %other, "Edit lock held by another user");
                Ok(LockOutcome::HeldBy(other))
            }
            (TxResult::Aborted(_), _) => Err(NotesError::NotFound(note_id.clone())),
        }
    }

    /// Free the edit lock on `note_id`, whoever holds it
    ///
    /// Releasing an unlocked or deleted note is a no-op.
    pub async fn release(&self, note_id: &NoteId) -> NotesResult<()> {
        let patch = FieldPatch::new()
            .remove(fields::LOCKED_BY)
            .remove(fields::LOCKED_AT);

        match self
            .store
            .update(NOTES_COLLECTION, note_id.as_str(), &patch)
            .await
        {
            Ok(()) => {
                info!(note = %note_id, "Released edit lock");
                Ok(())
            }
            Err(StoreError::NotFound { .. }) => {
                debug!(note = %note_id, "Release on missing note ignored");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Current lock state of `note_id`
    pub async fn state(&self, note_id: &NoteId) -> NotesResult<LockState> {
        let doc = self
            .store
            .get(NOTES_COLLECTION, note_id.as_str())
            .await
            .map_err(|e| NotesError::from_store(note_id, e))?
            .ok_or_else(|| NotesError::NotFound(note_id.clone()))?;

        Ok(match current_holder(&doc) {
            Some(holder) => LockState::LockedBy(holder),
            None => LockState::Unlocked,
        })
    }
}
