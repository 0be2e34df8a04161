//! Document store adapter
//!
//! A narrow interface over a document database offering single-document
//! transactions, ordered queries, and change subscriptions. Everything above
//! this module talks to the store only through [`DocumentStore`].
//!
//! ## Adapters
//!
//! - [`MemoryStore`]: process-local, used by tests and single-process setups
//! - [`SqliteStore`]: persistent, documents stored as JSON in SQLite
//!
//! ## Change feeds
//!
//! `subscribe` returns a [`ChangeFeed`] that yields the watched state
//! immediately and again after every commit touching it. Each frame carries
//! the store's commit version; frames for one feed are produced in commit
//! order.

use std::cmp::Ordering;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::stream::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

mod error;
mod memory;
mod schema;
mod sqlite;
mod watch;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteStore;

/// Field map of a stored document
pub type Fields = serde_json::Map<String, Value>;

/// A stored document: its store-assigned id plus its fields
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Get a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a string field, `None` if absent or not a string
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FieldChange {
    Set(Value),
    Remove,
}

/// A partial update: fields to set and fields to remove
///
/// Fields not named in the patch are left untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldPatch {
    changes: Vec<(String, FieldChange)>,
}

impl FieldPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `field` to `value`
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.changes
            .push((field.into(), FieldChange::Set(value.into())));
        self
    }

    /// Remove `field` from the document
    pub fn remove(mut self, field: impl Into<String>) -> Self {
        self.changes.push((field.into(), FieldChange::Remove));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Apply the patch in order; later changes to the same field win
    pub fn apply_to(&self, fields: &mut Fields) {
        for (field, change) in &self.changes {
            match change {
                FieldChange::Set(value) => {
                    fields.insert(field.clone(), value.clone());
                }
                FieldChange::Remove => {
                    fields.remove(field);
                }
            }
        }
    }
}

/// Query position: list results start strictly after this record
#[derive(Debug, Clone, PartialEq)]
pub struct StartAfter {
    /// Value of the ordering field on the last-seen record
    pub value: Value,
    /// Id of the last-seen record (tie breaker)
    pub id: String,
}

impl StartAfter {
    /// Position right after `doc` under an ordering on `order_by`
    pub fn from_document(doc: &Document, order_by: &str) -> Self {
        Self {
            value: doc.get(order_by).cloned().unwrap_or(Value::Null),
            id: doc.id.clone(),
        }
    }
}

/// Ordered, optionally paginated collection query
///
/// Results are ordered by `order_by`, then by document id in the same
/// direction so that positions are total.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub order_by: String,
    pub descending: bool,
    pub limit: Option<usize>,
    pub start_after: Option<StartAfter>,
}

impl ListQuery {
    /// Ascending query on `order_by` with no limit
    pub fn new(order_by: impl Into<String>) -> Self {
        Self {
            order_by: order_by.into(),
            descending: false,
            limit: None,
            start_after: None,
        }
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, position: Option<StartAfter>) -> Self {
        self.start_after = position;
        self
    }

    /// Compare two documents under this query's ordering
    pub(crate) fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let ord = compare_values(a.get(&self.order_by), b.get(&self.order_by))
            .then_with(|| a.id.cmp(&b.id));
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }

    /// Check if `doc` sorts strictly after the query's start position
    pub(crate) fn is_past_start(&self, doc: &Document) -> bool {
        let Some(start) = &self.start_after else {
            return true;
        };
        let ord = compare_values(doc.get(&self.order_by), Some(&start.value))
            .then_with(|| doc.id.as_str().cmp(start.id.as_str()));
        let ord = if self.descending { ord.reverse() } else { ord };
        ord == Ordering::Greater
    }

    /// Order, position and truncate an unordered set of documents
    pub(crate) fn apply(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut docs: Vec<Document> = docs
            .into_iter()
            .filter(|doc| self.is_past_start(doc))
            .collect();
        docs.sort_by(|a, b| self.compare(a, b));
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}

/// Rank JSON values the way SQLite ranks storage classes: null, numbers, text
fn value_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) | Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Array(_)) | Some(Value::Object(_)) => 3,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(0.0);
                let y = y.as_f64().unwrap_or(0.0);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => value_rank(a).cmp(&value_rank(b)),
    }
}

/// What a subscription watches
#[derive(Debug, Clone, PartialEq)]
pub enum WatchTarget {
    /// Every document of a collection, as one ordered snapshot
    Collection {
        collection: String,
        order_by: String,
        descending: bool,
    },
    /// A single document
    Document { collection: String, id: String },
}

impl WatchTarget {
    /// Watch a whole collection ordered by `order_by`, newest first
    pub fn collection_desc(collection: impl Into<String>, order_by: impl Into<String>) -> Self {
        WatchTarget::Collection {
            collection: collection.into(),
            order_by: order_by.into(),
            descending: true,
        }
    }

    pub fn document(collection: impl Into<String>, id: impl Into<String>) -> Self {
        WatchTarget::Document {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Check if a commit to `collection/id` changes what this target sees
    pub(crate) fn is_affected_by(&self, changed_collection: &str, changed_id: &str) -> bool {
        match self {
            WatchTarget::Collection { collection, .. } => collection == changed_collection,
            WatchTarget::Document { collection, id } => {
                collection == changed_collection && id == changed_id
            }
        }
    }
}

/// State delivered by a change feed
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// Full ordered contents of a watched collection
    Collection(Vec<Document>),
    /// Current state of a watched document; `None` once deleted
    Document {
        id: String,
        document: Option<Document>,
    },
}

/// One delivery from a change feed
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFrame {
    /// Store commit version this snapshot reflects
    pub version: u64,
    pub snapshot: Snapshot,
}

/// Live stream of snapshots for one [`WatchTarget`]
///
/// Dropping the feed cancels the subscription.
#[derive(Debug)]
pub struct ChangeFeed {
    rx: mpsc::UnboundedReceiver<ChangeFrame>,
}

impl ChangeFeed {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<ChangeFrame>) -> Self {
        Self { rx }
    }

    /// Wait for the next frame; `None` once the store side is gone
    pub async fn recv(&mut self) -> Option<ChangeFrame> {
        self.rx.recv().await
    }
}

impl Stream for ChangeFeed {
    type Item = ChangeFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Decision returned by a transaction body
#[derive(Debug, Clone, PartialEq)]
pub enum TxAction {
    /// Apply the patch to the document read by the transaction
    Commit(FieldPatch),
    /// Leave the document unchanged
    Abort,
}

/// Result of a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TxResult {
    /// The patch was applied; the document as committed
    Committed(Document),
    /// The body aborted; the document it last saw
    Aborted(Option<Document>),
}

/// Transaction body: sees the current document, decides what to write
///
/// The body may run more than once when the adapter retries after contention,
/// so it must not have side effects beyond its return value and captured
/// bookkeeping that the last run overwrites.
pub type TransactionBody<'a> = dyn FnMut(Option<&Document>) -> TxAction + Send + 'a;

/// Narrow interface over the external document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Ordered, optionally paginated listing of a collection
    async fn list(&self, collection: &str, query: &ListQuery) -> StoreResult<Vec<Document>>;

    /// Insert a new document, returning its store-assigned id
    async fn create(&self, collection: &str, fields: Fields) -> StoreResult<String>;

    /// Merge `patch` into an existing document
    ///
    /// Fails with [`StoreError::NotFound`] if the document does not exist.
    async fn update(&self, collection: &str, id: &str, patch: &FieldPatch) -> StoreResult<()>;

    /// Delete a document; deleting a missing document is a no-op
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;

    /// Atomic read-modify-write of a single document
    ///
    /// Committing against a missing document fails with
    /// [`StoreError::NotFound`].
    async fn run_transaction(
        &self,
        collection: &str,
        id: &str,
        body: &mut TransactionBody<'_>,
    ) -> StoreResult<TxResult>;

    /// Start watching `target`
    async fn subscribe(&self, target: WatchTarget) -> StoreResult<ChangeFeed>;
}

/// Generate a store-assigned document id
pub(crate) fn new_document_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
