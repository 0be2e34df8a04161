//! SQLite-backed document store
//!
//! Every document is one row in `documents` with its fields as a JSON
//! object. Writes go through `BEGIN IMMEDIATE` transactions so that several
//! connections to the same database file (one per client process) still get
//! exactly-one-winner semantics for read-modify-write.
//!
//! Rows whose fields are not a JSON object are left out of listings and
//! collection snapshots, so one foreign row cannot break the collection.
//!
//! Change feeds are process-local: a feed sees commits made through the same
//! `SqliteStore`. Share one store behind an `Arc` between the clients that
//! must observe each other live.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::is_busy;
use super::schema::{init_schema, needs_init};
use super::watch::Watchers;
use super::{
    new_document_id, ChangeFeed, Document, DocumentStore, FieldPatch, Fields, ListQuery,
    Snapshot, StoreError, StoreResult, TransactionBody, TxAction, TxResult, WatchTarget,
};

/// How long a connection waits for another writer before reporting busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts for a transaction that keeps hitting a busy database
const MAX_TX_ATTEMPTS: u32 = 5;

struct SqliteInner {
    conn: Connection,
    watchers: Watchers,
}

/// Persistent [`DocumentStore`] on a SQLite database
pub struct SqliteStore {
    inner: Mutex<SqliteInner>,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        Ok(Self {
            inner: Mutex::new(SqliteInner {
                conn,
                watchers: Watchers::default(),
            }),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, SqliteInner>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[cfg(test)]
impl SqliteStore {
    /// Run SQL straight against the connection, bypassing watchers
    pub(crate) fn execute_raw(&self, sql: &str) -> StoreResult<()> {
        let inner = self.lock()?;
        inner.conn.execute_batch(sql)?;
        Ok(())
    }
}

fn decode_fields(text: &str) -> StoreResult<Fields> {
    Ok(serde_json::from_str(text)?)
}

/// Convert a JSON value into something SQLite compares like `json_extract` output
fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn read_document(conn: &Connection, collection: &str, id: &str) -> StoreResult<Option<Document>> {
    let text: Option<String> = conn
        .query_row(
            "SELECT fields FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get(0),
        )
        .optional()?;

    match text {
        Some(text) => Ok(Some(Document::new(id, decode_fields(&text)?))),
        None => Ok(None),
    }
}

fn list_documents(
    conn: &Connection,
    collection: &str,
    query: &ListQuery,
) -> StoreResult<Vec<Document>> {
    let (cmp, dir) = if query.descending {
        ("<", "DESC")
    } else {
        (">", "ASC")
    };

    let mut sql = String::from(
        "SELECT id, fields FROM documents WHERE collection = ?1 AND json_type(fields) = 'object'",
    );
    let mut args: Vec<SqlValue> = vec![
        SqlValue::Text(collection.to_string()),
        SqlValue::Text(format!("$.{}", query.order_by)),
    ];

    if let Some(start) = &query.start_after {
        sql.push_str(&format!(
            " AND (json_extract(fields, ?2) {cmp} ?3 OR (json_extract(fields, ?2) = ?3 AND id {cmp} ?4))"
        ));
        args.push(sql_value(&start.value));
        args.push(SqlValue::Text(start.id.clone()));
    }

    sql.push_str(&format!(
        " ORDER BY json_extract(fields, ?2) {dir}, id {dir}"
    ));
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut docs = Vec::new();
    for row in rows {
        let (id, text) = row?;
        match decode_fields(&text) {
            Ok(fields) => docs.push(Document::new(id, fields)),
            Err(e) => warn!(collection, id = %id, "Skipping undecodable document: {}", e),
        }
    }
    Ok(docs)
}

fn snapshot(conn: &Connection, target: &WatchTarget) -> StoreResult<Snapshot> {
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
            Ok(Snapshot::Collection(list_documents(conn, collection, &query)?))
        }
        WatchTarget::Document { collection, id } => Ok(Snapshot::Document {
            id: id.clone(),
            document: read_document(conn, collection, id)?,
        }),
    }
}

/// Push snapshots for a committed write; never fails the write itself
fn notify(inner: &mut SqliteInner, collection: &str, id: &str) {
    let SqliteInner { conn, watchers } = inner;
    watchers.notify(collection, id, |target| snapshot(conn, target))
}

/// One attempt at an immediate read-modify-write transaction
fn try_transaction(
    conn: &mut Connection,
    collection: &str,
    id: &str,
    body: &mut TransactionBody<'_>,
) -> StoreResult<TxResult> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current = read_document(&tx, collection, id)?;

    match body(current.as_ref()) {
        TxAction::Abort => {
            tx.rollback()?;
            Ok(TxResult::Aborted(current))
        }
        TxAction::Commit(patch) => {
            let Some(mut doc) = current else {
                return Err(StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                });
            };
            patch.apply_to(&mut doc.fields);
            tx.execute(
                "UPDATE documents SET fields = ?3 WHERE collection = ?1 AND id = ?2",
                params![collection, id, serde_json::to_string(&doc.fields)?],
            )?;
            tx.commit()?;
            Ok(TxResult::Committed(doc))
        }
    }
}

/// Run a transaction, retrying while another connection holds the write lock
fn transact(
    conn: &mut Connection,
    collection: &str,
    id: &str,
    body: &mut TransactionBody<'_>,
) -> StoreResult<TxResult> {
    for attempt in 1..=MAX_TX_ATTEMPTS {
        match try_transaction(conn, collection, id, body) {
            Err(StoreError::Database(err)) if is_busy(&err) => {
                debug!(collection, id, attempt, "Database busy, retrying transaction");
            }
            result => return result,
        }
    }

    warn!(collection, id, "Transaction abandoned after repeated contention");
    Err(StoreError::Contention {
        collection: collection.to_string(),
        id: id.to_string(),
        attempts: MAX_TX_ATTEMPTS,
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let inner = self.lock()?;
        read_document(&inner.conn, collection, id)
    }

    async fn list(&self, collection: &str, query: &ListQuery) -> StoreResult<Vec<Document>> {
        let inner = self.lock()?;
        list_documents(&inner.conn, collection, query)
    }

    async fn create(&self, collection: &str, fields: Fields) -> StoreResult<String> {
        let mut inner = self.lock()?;
        let id = new_document_id();
        inner.conn.execute(
            "INSERT INTO documents (collection, id, fields) VALUES (?1, ?2, ?3)",
            params![collection, id, serde_json::to_string(&fields)?],
        )?;
        debug!(collection, id = %id, "Created document");
        notify(&mut inner, collection, &id);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, patch: &FieldPatch) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let mut body = |doc: Option<&Document>| match doc {
            Some(_) => TxAction::Commit(patch.clone()),
            None => TxAction::Abort,
        };
        match transact(&mut inner.conn, collection, id, &mut body)? {
            TxResult::Committed(_) => {
                notify(&mut inner, collection, id);
                Ok(())
            }
            TxResult::Aborted(_) => Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let removed = inner.conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        if removed > 0 {
            debug!(collection, id, "Deleted document");
            notify(&mut inner, collection, id);
        }
        Ok(())
    }

    async fn run_transaction(
        &self,
        collection: &str,
        id: &str,
        body: &mut TransactionBody<'_>,
    ) -> StoreResult<TxResult> {
        let mut inner = self.lock()?;
        let result = transact(&mut inner.conn, collection, id, body)?;
        if matches!(result, TxResult::Committed(_)) {
            notify(&mut inner, collection, id);
        }
        Ok(result)
    }

    async fn subscribe(&self, target: WatchTarget) -> StoreResult<ChangeFeed> {
        let mut inner = self.lock()?;
        let initial = snapshot(&inner.conn, &target)?;
        Ok(inner.watchers.register(target, initial))
    }
}
