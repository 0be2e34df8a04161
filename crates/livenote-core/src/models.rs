//! Data models for LiveNote
//!
//! Defines the note record, the opaque identifiers, and the mapping between
//! notes and the documents persisted in the `notes` collection.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{Document, Fields};

/// Collection holding note documents
pub const NOTES_COLLECTION: &str = "notes";

/// Title given to notes created or saved without one
pub const DEFAULT_TITLE: &str = "New Note";

/// Document field names of a persisted note
pub(crate) mod fields {
    pub const TITLE: &str = "title";
    pub const CONTENT: &str = "content";
    pub const DATE: &str = "date";
    pub const LOCKED_BY: &str = "lockedBy";
    pub const LOCKED_AT: &str = "lockedAt";
}

/// Store-assigned note identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NoteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NoteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque user identity, as issued by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A shared text note
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    /// Store-assigned identifier
    pub id: NoteId,
    /// Note title
    pub title: String,
    /// Note body content
    pub content: String,
    /// When this note was last created or updated
    pub date: DateTime<Utc>,
    /// Who created the note
    pub user_id: UserId,
    /// Who currently holds the edit lock, if anyone
    pub locked_by: Option<UserId>,
}

impl Note {
    /// Check if someone other than `user` holds the edit lock
    pub fn is_locked_for(&self, user: &UserId) -> bool {
        self.locked_by.as_ref().is_some_and(|holder| holder != user)
    }

    /// Decode a note from its stored document
    pub fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        let record: NoteRecord = serde_json::from_value(serde_json::Value::Object(doc.fields.clone()))?;
        Ok(Self {
            id: NoteId::new(doc.id.clone()),
            title: record.title,
            content: record.content,
            date: record.date,
            user_id: UserId::new(record.user_id),
            locked_by: record
                .locked_by
                .filter(|holder| !holder.is_empty())
                .map(UserId::new),
        })
    }
}

/// Persisted shape of a note document
///
/// `lockedBy`/`lockedAt` are absent while unlocked; unlocking removes them
/// instead of writing empty values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NoteRecord {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub date: DateTime<Utc>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_microseconds_option"
    )]
    pub locked_at: Option<DateTime<Utc>>,
}

impl NoteRecord {
    /// Serialize into document fields
    pub fn into_fields(self) -> Result<Fields, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => unreachable!("NoteRecord always serializes to an object"),
        }
    }
}

/// Encode a timestamp the way the `date` and `lockedAt` fields store it
pub(crate) fn timestamp_value(at: DateTime<Utc>) -> serde_json::Value {
    serde_json::Value::from(at.timestamp_micros())
}

/// Decode a stored timestamp field
pub(crate) fn timestamp_from_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    value.as_i64().and_then(DateTime::from_timestamp_micros)
}

/// Substitute the placeholder for a blank title
pub(crate) fn normalize_title(title: &str) -> String {
    if title.trim().is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        title.to_string()
    }
}
