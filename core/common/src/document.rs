//! Document model: semantic field maps with an explicit key-resolution rule.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Error, Result};

/// Field name holding the last-modification timestamp, in epoch milliseconds.
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Resolved identifying key of a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey(String);

impl DocumentKey {
    /// Create a key from a string.
    ///
    /// # Errors
    /// - Returns error if the key is empty
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::InvalidDocument(
                "document key cannot be empty".to_string(),
            ));
        }
        Ok(Self(key))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document as held by the remote store.
///
/// Documents are transient copies owned by the server; the client never
/// mutates a server copy in place, it only proposes new states via push.
/// Equality is structural over all fields, which is exactly what conflict
/// detection compares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Create a document from a field map.
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Decode a document from a JSON value.
    ///
    /// # Errors
    /// - Returns error if the value is not an object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(Error::InvalidDocument(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a field value.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Get the underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert back into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Resolve the identifying key: a field named `key` wins, then `id`.
    ///
    /// String and integer values are accepted. Anything else, or neither
    /// field being present, is an error rather than a silent coercion.
    pub fn key(&self) -> Result<DocumentKey> {
        for field in ["key", "id"] {
            match self.0.get(field) {
                None => continue,
                Some(Value::String(s)) => return DocumentKey::new(s.as_str()),
                Some(Value::Number(n)) if n.is_i64() || n.is_u64() => {
                    return DocumentKey::new(n.to_string());
                }
                Some(other) => {
                    return Err(Error::InvalidDocument(format!(
                        "field '{}' is not usable as a key: {}",
                        field, other
                    )));
                }
            }
        }
        Err(Error::InvalidDocument(
            "document has neither 'key' nor 'id'".to_string(),
        ))
    }

    /// Last-modification timestamp in epoch milliseconds.
    pub fn updated_at(&self) -> Result<i64> {
        match self.0.get(UPDATED_AT_FIELD) {
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                Error::InvalidDocument(format!("'{}' is not an integer: {}", UPDATED_AT_FIELD, n))
            }),
            Some(other) => Err(Error::InvalidDocument(format!(
                "'{}' is not a number: {}",
                UPDATED_AT_FIELD, other
            ))),
            None => Err(Error::InvalidDocument(format!(
                "document has no '{}'",
                UPDATED_AT_FIELD
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_key_prefers_key_over_id() {
        let doc = document(json!({"key": "k-1", "id": "i-1"}));
        assert_eq!(doc.key().unwrap().as_str(), "k-1");
    }

    #[test]
    fn test_key_falls_back_to_id() {
        let doc = document(json!({"id": "i-1"}));
        assert_eq!(doc.key().unwrap().as_str(), "i-1");
    }

    #[test]
    fn test_integer_keys_accepted() {
        let doc = document(json!({"id": 42}));
        assert_eq!(doc.key().unwrap().as_str(), "42");
    }

    #[test]
    fn test_missing_key_fails() {
        let doc = document(json!({"name": "unnamed"}));
        assert!(doc.key().is_err());
    }

    #[test]
    fn test_non_scalar_key_fails_instead_of_coercing() {
        let doc = document(json!({"key": {"nested": true}, "id": "fallback"}));
        // A malformed `key` field must not fall through to `id`.
        assert!(doc.key().is_err());
    }

    #[test]
    fn test_empty_string_key_fails() {
        let doc = document(json!({"key": ""}));
        assert!(doc.key().is_err());
    }

    #[test]
    fn test_updated_at() {
        let doc = document(json!({"id": "a", "updated_at": 1700000000000i64}));
        assert_eq!(doc.updated_at().unwrap(), 1700000000000);

        let missing = document(json!({"id": "a"}));
        assert!(missing.updated_at().is_err());

        let malformed = document(json!({"id": "a", "updated_at": "yesterday"}));
        assert!(malformed.updated_at().is_err());
    }

    #[test]
    fn test_structural_equality() {
        let a = document(json!({"id": "a", "count": 1, "tags": ["x"]}));
        let b = document(json!({"id": "a", "count": 1, "tags": ["x"]}));
        let c = document(json!({"id": "a", "count": 2, "tags": ["x"]}));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(Document::from_value(json!([1, 2])).is_err());
        assert!(Document::from_value(json!("plain")).is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let doc = document(json!({"id": "a", "nested": {"deep": [1, null, true]}}));
        let text = serde_json::to_string(&doc).unwrap();
        let restored: Document = serde_json::from_str(&text).unwrap();
        assert_eq!(restored, doc);
    }
}
