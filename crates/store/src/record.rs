//! Record primitives - Identity keys and materialized record cells
//!
//! Records are shared between the identity map, many-arrays, and application
//! code through [`RecordHandle`], a clonable handle over a single record cell.
//! All membership logic keys off [`RecordIdentity`] (type + id).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// Normalized type key (lower-cased, singular by convention)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeKey(String);

impl TypeKey {
    /// Normalize and validate a raw type name
    ///
    /// Keys are lower-cased; an empty name or one containing anything other
    /// than alphanumerics, `_` or `-` is rejected with `InvalidArgument`.
    pub fn new(raw: &str) -> StoreResult<Self> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(StoreError::InvalidArgument(
                "type key must be a non-empty string, e.g. has_many(Some(\"comment\"), ..)"
                    .to_string(),
            ));
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(StoreError::InvalidArgument(format!(
                "'{}' is not a valid type key; use a lower-case identifier such as 'comment'",
                raw
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Record id, normalized to its string form
///
/// Payload ids may arrive as JSON numbers or strings; both normalize to the
/// same key so identity comparisons stay exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract an id from a JSON scalar (string or number)
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The merge key of all relationship membership logic
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordIdentity {
    pub type_key: TypeKey,
    pub id: RecordId,
}

impl RecordIdentity {
    pub fn new(type_key: TypeKey, id: RecordId) -> Self {
        Self { type_key, id }
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_key, self.id)
    }
}

/// Materialized record state
#[derive(Debug)]
struct Record {
    identity: RecordIdentity,
    attributes: serde_json::Map<String, Value>,
    /// Local belongs-to values, keyed by field name
    belongs_to: HashMap<String, Option<RecordIdentity>>,
    is_loaded: bool,
    is_dirty: bool,
    is_new: bool,
}

/// Shared, clonable handle over one record cell
///
/// The identity map guarantees at most one cell per identity, so holders of a
/// handle observe in-place attribute updates from later pushes and fetches.
#[derive(Clone)]
pub struct RecordHandle {
    inner: Arc<RwLock<Record>>,
}

impl RecordHandle {
    /// A loaded record materialized from a payload
    pub(crate) fn new_loaded(
        identity: RecordIdentity,
        attributes: serde_json::Map<String, Value>,
    ) -> Self {
        Self::build(identity, attributes, true, false, false)
    }

    /// A freshly created, unsaved client record
    pub(crate) fn new_client(identity: RecordIdentity) -> Self {
        Self::build(identity, serde_json::Map::new(), true, true, true)
    }

    fn build(
        identity: RecordIdentity,
        attributes: serde_json::Map<String, Value>,
        is_loaded: bool,
        is_dirty: bool,
        is_new: bool,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Record {
                identity,
                attributes,
                belongs_to: HashMap::new(),
                is_loaded,
                is_dirty,
                is_new,
            })),
        }
    }

    pub fn identity(&self) -> RecordIdentity {
        self.read().identity.clone()
    }

    pub fn type_key(&self) -> TypeKey {
        self.read().identity.type_key.clone()
    }

    pub fn id(&self) -> RecordId {
        self.read().identity.id.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.read().is_loaded
    }

    pub fn is_dirty(&self) -> bool {
        self.read().is_dirty
    }

    pub fn is_new(&self) -> bool {
        self.read().is_new
    }

    pub fn mark_dirty(&self) {
        self.write().is_dirty = true;
    }

    /// Clear the dirty/new flags after a successful save
    pub fn mark_saved(&self) {
        let mut record = self.write();
        record.is_dirty = false;
        record.is_new = false;
    }

    /// A single attribute value, cloned out of the cell
    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.read().attributes.get(name).cloned()
    }

    /// Snapshot of all attributes
    pub fn attributes(&self) -> serde_json::Map<String, Value> {
        self.read().attributes.clone()
    }

    /// Replace attributes in place from newly arrived canonical data
    pub(crate) fn update_attributes(&self, attributes: serde_json::Map<String, Value>) {
        let mut record = self.write();
        record.attributes = attributes;
        record.is_loaded = true;
    }

    /// Current local value of a belongs-to field
    pub fn belongs_to(&self, field: &str) -> Option<RecordIdentity> {
        self.read().belongs_to.get(field).cloned().flatten()
    }

    /// Set a belongs-to value locally, without inverse mirroring
    pub(crate) fn set_belongs_to_local(&self, field: &str, value: Option<RecordIdentity>) {
        self.write().belongs_to.insert(field.to_string(), value);
    }

    /// True if both handles refer to the same record cell
    pub fn same_record(&self, other: &RecordHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Record> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Record> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for RecordHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.read();
        f.debug_struct("RecordHandle")
            .field("identity", &record.identity)
            .field("is_loaded", &record.is_loaded)
            .field("is_dirty", &record.is_dirty)
            .field("is_new", &record.is_new)
            .finish()
    }
}

impl PartialEq for RecordHandle {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_key_normalization() {
        assert_eq!(TypeKey::new("Comment").unwrap().as_str(), "comment");
        assert_eq!(TypeKey::new(" post ").unwrap().as_str(), "post");
    }

    #[test]
    fn test_type_key_rejects_malformed_names() {
        assert!(matches!(
            TypeKey::new(""),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            TypeKey::new("not a type"),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_record_id_normalizes_numbers_and_strings() {
        assert_eq!(RecordId::from_value(&json!(1)), Some(RecordId::from("1")));
        assert_eq!(
            RecordId::from_value(&json!("abc")),
            Some(RecordId::from("abc"))
        );
        assert_eq!(RecordId::from_value(&json!(null)), None);
    }

    #[test]
    fn test_client_record_flags() {
        let identity = RecordIdentity::new(TypeKey::new("post").unwrap(), RecordId::from("c-1"));
        let record = RecordHandle::new_client(identity);
        assert!(record.is_loaded());
        assert!(record.is_new());
        assert!(record.is_dirty());

        record.mark_saved();
        assert!(!record.is_dirty());
        assert!(!record.is_new());
    }

    #[test]
    fn test_update_attributes_in_place_shared_across_clones() {
        let identity = RecordIdentity::new(TypeKey::new("comment").unwrap(), RecordId::from("1"));
        let mut attributes = serde_json::Map::new();
        attributes.insert("body".to_string(), json!("First"));
        let record = RecordHandle::new_loaded(identity, attributes);
        let alias = record.clone();

        let mut updated = serde_json::Map::new();
        updated.insert("body".to_string(), json!("FirstUpdated"));
        record.update_attributes(updated);

        assert_eq!(alias.attribute("body"), Some(json!("FirstUpdated")));
        assert!(record.same_record(&alias));
    }

    #[test]
    fn test_belongs_to_local_value() {
        let identity = RecordIdentity::new(TypeKey::new("comment").unwrap(), RecordId::from("1"));
        let record = RecordHandle::new_client(identity);
        assert_eq!(record.belongs_to("post"), None);

        let post = RecordIdentity::new(TypeKey::new("post").unwrap(), RecordId::from("1"));
        record.set_belongs_to_local("post", Some(post.clone()));
        assert_eq!(record.belongs_to("post"), Some(post));

        record.set_belongs_to_local("post", None);
        assert_eq!(record.belongs_to("post"), None);
    }
}
