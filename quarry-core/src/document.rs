// quarry-core/src/document.rs
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

use crate::error::{QuarryError, Result};
use crate::value::{integral_i64, Map, Value};
use crate::value_utils::{get_path, remove_path, set_path};

/// Name of the identity field
pub const ID_FIELD: &str = "_id";

/// Largest integer identity (2^53)
pub const MAX_SAFE_ID: i64 = 1 << 53;

/// Document identity
///
/// Untagged, so it shows up as a plain value inside documents: `{"_id": 2}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentId {
    Int(i64),
    String(String),
}

impl DocumentId {
    /// Next auto-increment identity.
    ///
    /// Fails once the counter would pass 2^53, the largest integer a
    /// number value holds exactly.
    pub fn new_auto(last_id: i64) -> Result<Self> {
        let next = last_id + 1;
        if next > MAX_SAFE_ID {
            return Err(QuarryError::InvalidDocument(format!(
                "auto-increment identity {} exceeds {}",
                next, MAX_SAFE_ID
            )));
        }
        Ok(DocumentId::Int(next))
    }

    /// Random identity (UUID v4 string)
    pub fn new_uuid() -> Self {
        DocumentId::String(Uuid::new_v4().to_string())
    }

    /// Identity from a field value; only exact integers and strings qualify
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => integral_i64(*n).map(DocumentId::Int).ok_or_else(|| {
                QuarryError::InvalidDocument(format!("_id must be an exact integer, got {}", n))
            }),
            Value::String(s) => Ok(DocumentId::String(s.clone())),
            other => Err(QuarryError::InvalidDocument(format!(
                "_id must be an integer or a string, got {}",
                other.kind_name()
            ))),
        }
    }

    /// Field form of the identity; integer identities are exact up to
    /// [`MAX_SAFE_ID`], which `from_value` and `new_auto` enforce
    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Int(n) => Value::Number(*n as f64),
            DocumentId::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(n) => write!(f, "{}", n),
            DocumentId::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for DocumentId {
    fn from(n: i64) -> Self {
        DocumentId::Int(n)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId::String(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        DocumentId::String(s)
    }
}

/// A stored document: a field map whose first entry is always `_id`
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: DocumentId,
    fields: Map,
}

impl Document {
    /// Build a document; any `_id` already in `fields` is replaced by `id`
    pub fn new(id: DocumentId, mut fields: Map) -> Self {
        fields.shift_remove(ID_FIELD);
        let mut ordered = Map::with_capacity(fields.len() + 1);
        ordered.insert(ID_FIELD.to_string(), id.to_value());
        ordered.extend(fields);
        Document {
            id,
            fields: ordered,
        }
    }

    /// Document from a document-kind value carrying an `_id`
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Document(fields) => {
                let id_value = fields.get(ID_FIELD).ok_or_else(|| {
                    QuarryError::InvalidDocument("document has no _id".to_string())
                })?;
                let id = DocumentId::from_value(id_value)?;
                Ok(Document::new(id, fields))
            }
            other => Err(QuarryError::InvalidDocument(format!(
                "expected a document, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Document::from_value(value)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// All fields, `_id` first
    pub fn fields(&self) -> &Map {
        &self.fields
    }

    /// Field lookup with dot notation (includes `_id`)
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.fields, path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Set a field (dot notation). The identity field is immutable.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        Self::guard_identity(path)?;
        if set_path(&mut self.fields, path, value) {
            Ok(())
        } else {
            Err(QuarryError::InvalidUpdate(format!(
                "cannot set '{}': array index out of bounds",
                path
            )))
        }
    }

    /// Remove a field (dot notation). The identity field is immutable.
    pub fn remove(&mut self, path: &str) -> Result<Option<Value>> {
        Self::guard_identity(path)?;
        Ok(remove_path(&mut self.fields, path))
    }

    /// Field form of the identity; integer identities are exact up to
    /// [`MAX_SAFE_ID`], which `from_value` and `new_auto` enforce
    pub fn to_value(&self) -> Value {
        Value::Document(self.fields.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Document(self.fields)
    }

    fn guard_identity(path: &str) -> Result<()> {
        if path == ID_FIELD || path.starts_with("_id.") {
            return Err(QuarryError::InvalidUpdate(
                "the _id field is immutable".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        Value::Document(self.fields.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Document::from_value(value).map_err(serde::de::Error::custom)
    }
}
