//! Types for change-feed records

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque resume token assigned by the server
///
/// CouchDB 1.x uses integers and 2.x+ uses strings; both are held in their
/// textual form. No ordering is imposed on cursors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "String")]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Cursor> for String {
    fn from(cursor: Cursor) -> Self {
        cursor.0
    }
}

impl From<&str> for Cursor {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Cursor {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for Cursor {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl TryFrom<Value> for Cursor {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(Self(s)),
            Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(format!("sequence must be a string or number, got {}", other)),
        }
    }
}

/// A revision listed in a change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub rev: String,
}

/// One change delivered by the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Sequence of this change, the resume cursor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<Cursor>,

    /// Document ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Leaf revisions touched by the change
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<Revision>,

    /// Whether the document was deleted
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,

    /// Full document body, present with `include_docs=true`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,

    /// Any other field the server sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChangeRecord {
    /// Build a record from any decoded JSON object
    ///
    /// Known fields are lifted out when their type matches; a field of an
    /// unexpected type stays in `extra` untouched.
    pub fn from_object(mut object: Map<String, Value>) -> Self {
        Self {
            seq: take_field(&mut object, "seq"),
            id: take_field(&mut object, "id"),
            changes: take_field(&mut object, "changes").unwrap_or_default(),
            deleted: take_field(&mut object, "deleted").unwrap_or_default(),
            doc: take_field(&mut object, "doc"),
            extra: object,
        }
    }

    /// Get an extra field as a specific type
    pub fn get<T: DeserializeOwned>(&self, field: &str) -> Option<T> {
        self.extra
            .get(field)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get a top-level field of the attached document as a string
    pub fn doc_str(&self, field: &str) -> Option<&str> {
        self.doc.as_ref()?.get(field)?.as_str()
    }

    /// Revision strings in server order
    pub fn revs(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|r| r.rev.as_str())
    }
}

/// Remove `key` if it decodes as `T`; null counts as absent
fn take_field<T: DeserializeOwned>(object: &mut Map<String, Value>, key: &str) -> Option<T> {
    match object.get(key)? {
        Value::Null => {
            object.remove(key);
            None
        }
        value => {
            let decoded = T::deserialize(value).ok()?;
            object.remove(key);
            Some(decoded)
        }
    }
}

/// A complete line classified by what it means to the feed
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FeedRecord {
    /// A regular change
    Change(ChangeRecord),
    /// Terminator written when a feed times out; carries the resume point
    Checkpoint {
        last_seq: Cursor,
        pending: Option<u64>,
    },
    /// Server-reported failure to serve the feed
    Failure { error: String, reason: String },
}
