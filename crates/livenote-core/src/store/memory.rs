//! In-memory document store
//!
//! All state sits behind one mutex, so every operation, transactions
//! included, is serialised and transactions never need a retry.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::watch::Watchers;
use super::{
    new_document_id, ChangeFeed, Document, DocumentStore, FieldPatch, Fields, ListQuery,
    Snapshot, StoreError, StoreResult, TransactionBody, TxAction, TxResult, WatchTarget,
};

type Collections = HashMap<String, BTreeMap<String, Fields>>;

#[derive(Default)]
struct MemoryState {
    collections: Collections,
    watchers: Watchers,
}

/// Process-local [`DocumentStore`]
///
/// Share it between clients with an `Arc` to simulate several devices
/// talking to the same backend.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the connection to the backend
    ///
    /// While offline every operation fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("backend is offline".to_string()));
        }
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn get_document(collections: &Collections, collection: &str, id: &str) -> Option<Document> {
    collections
        .get(collection)
        .and_then(|docs| docs.get(id))
        .map(|fields| Document::new(id, fields.clone()))
}

fn list_documents(collections: &Collections, collection: &str, query: &ListQuery) -> Vec<Document> {
    let Some(docs) = collections.get(collection) else {
        return Vec::new();
    };
    query.apply(
        docs.iter()
            .map(|(id, fields)| Document::new(id.clone(), fields.clone())),
    )
}

fn snapshot(collections: &Collections, target: &WatchTarget) -> Snapshot {
    match target {
        WatchTarget::Collection {
            collection,
            order_by,
            descending,
        } => {
            let query = ListQuery {
                order_by: order_by.clone(),
                descending: *descending,
                limit: None,
                start_after: None,
            };
            Snapshot::Collection(list_documents(collections, collection, &query))
        }
        WatchTarget::Document { collection, id } => Snapshot::Document {
            id: id.clone(),
            document: get_document(collections, collection, id),
        },
    }
}

/// Push snapshots for a commit while the state lock is still held
fn notify(state: &mut MemoryState, collection: &str, id: &str) {
    let MemoryState {
        collections,
        watchers,
    } = state;
    watchers.notify(collection, id, |target| Ok(snapshot(collections, target)))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let state = self.lock()?;
        Ok(get_document(&state.collections, collection, id))
    }

    async fn list(&self, collection: &str, query: &ListQuery) -> StoreResult<Vec<Document>> {
        let state = self.lock()?;
        Ok(list_documents(&state.collections, collection, query))
    }

    async fn create(&self, collection: &str, fields: Fields) -> StoreResult<String> {
        let mut state = self.lock()?;
        let id = new_document_id();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);
        debug!(collection, id = %id, "Created document");
        notify(&mut state, collection, &id);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, patch: &FieldPatch) -> StoreResult<()> {
        let mut state = self.lock()?;
        let fields = state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        patch.apply_to(fields);
        notify(&mut state, collection, id);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        let removed = state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            debug!(collection, id, "Deleted document");
            notify(&mut state, collection, id);
        }
        Ok(())
    }

    async fn run_transaction(
        &self,
        collection: &str,
        id: &str,
        body: &mut TransactionBody<'_>,
    ) -> StoreResult<TxResult> {
        let mut state = self.lock()?;
        let current = get_document(&state.collections, collection, id);

        match body(current.as_ref()) {
            TxAction::Abort => Ok(TxResult::Aborted(current)),
            TxAction::Commit(patch) => {
                let Some(mut doc) = current else {
                    return Err(StoreError::NotFound {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    });
                };
                patch.apply_to(&mut doc.fields);
                if let Some(docs) = state.collections.get_mut(collection) {
                    docs.insert(id.to_string(), doc.fields.clone());
                }
                notify(&mut state, collection, id);
                Ok(TxResult::Committed(doc))
            }
        }
    }

    async fn subscribe(&self, target: WatchTarget) -> StoreResult<ChangeFeed> {
        let mut state = self.lock()?;
        let initial = snapshot(&state.collections, &target);
        Ok(state.watchers.register(target, initial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn fields(title: &str, date: i64) -> Fields {
        let mut fields = Fields::new();
        fields.insert("title".to_string(), json!(title));
        fields.insert("date".to_string(), json!(date));
        fields
    }

    #[tokio::test]
    async fn test_create_get_update_delete() {
        let store = MemoryStore::new();

        let id = store.create("notes", fields("a", 1)).await.unwrap();
        assert!(!id.is_empty());

        store
            .update("notes", &id, &FieldPatch::new().set("title", "b"))
            .await
            .unwrap();
        let doc = store.get("notes", &id).await.unwrap().unwrap();
        assert_eq!(doc.get_str("title"), Some("b"));
        assert_eq!(doc.get("date"), Some(&json!(1)));

        store.delete("notes", &id).await.unwrap();
        assert!(store.get("notes", &id).await.unwrap().is_none());

        // Deleting again is fine
        store.delete("notes", &id).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update("notes", "missing", &FieldPatch::new().set("title", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_offline_fails_every_operation() {
        let store = MemoryStore::new();
        let id = store.create("notes", fields("a", 1)).await.unwrap();

        store.set_offline(true);
        assert!(matches!(
            store.get("notes", &id).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store
            .subscribe(WatchTarget::document("notes", id.clone()))
            .await
            .is_err());

        store.set_offline(false);
        assert!(store.get("notes", &id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_transaction_abort_leaves_document() {
        let store = MemoryStore::new();
        let id = store.create("notes", fields("a", 1)).await.unwrap();

        let result = store
            .run_transaction("notes", &id, &mut |_| TxAction::Abort)
            .await
            .unwrap();
        match result {
            TxResult::Aborted(Some(doc)) => assert_eq!(doc.get_str("title"), Some("a")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transaction_commit_on_missing_document() {
        let store = MemoryStore::new();
        let err = store
            .run_transaction("notes", "missing", &mut |_| {
                TxAction::Commit(FieldPatch::new().set("lockedBy", "u1"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_collection_feed_follows_commits() {
        let store = MemoryStore::new();
        store.create("notes", fields("old", 1)).await.unwrap();

        let mut feed = store
            .subscribe(WatchTarget::collection_desc("notes", "date"))
            .await
            .unwrap();

        let first = feed.recv().await.unwrap();
        assert!(matches!(&first.snapshot, Snapshot::Collection(docs) if docs.len() == 1));

        store.create("notes", fields("new", 2)).await.unwrap();
        let second = feed.recv().await.unwrap();
        assert!(second.version > first.version);
        match second.snapshot {
            Snapshot::Collection(docs) => {
                assert_eq!(docs.len(), 2);
                assert_eq!(docs[0].get_str("title"), Some("new"));
            }
            other => panic!("unexpected snapshot: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_document_feed_reports_deletion() {
        let store = MemoryStore::new();
        let id = store.create("notes", fields("a", 1)).await.unwrap();

        let mut feed = store
            .subscribe(WatchTarget::document("notes", id.clone()))
            .await
            .unwrap();
        feed.recv().await.unwrap();

        store.delete("notes", &id).await.unwrap();
        let frame = feed.recv().await.unwrap();
        assert_eq!(
            frame.snapshot,
            Snapshot::Document {
                id: id.clone(),
                document: None
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_transactions_are_serialised() {
        let store = Arc::new(MemoryStore::new());
        let mut initial = fields("counter", 1);
        initial.insert("count".to_string(), json!(0));
        let id = store.create("notes", initial).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .run_transaction("notes", &id, &mut |doc| {
                        let count = doc
                            .and_then(|d| d.get("count"))
                            .and_then(|v| v.as_i64())
                            .unwrap_or(0);
                        TxAction::Commit(FieldPatch::new().set("count", count + 1))
                    })
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let doc = store.get("notes", &id).await.unwrap().unwrap();
        assert_eq!(doc.get("count"), Some(&json!(16)));
    }
}
