//! Identity Map - Shared type+id cache of materialized records
//!
//! The identity map is shared across all relationships and owners. It
//! registers newly materialized records and updates existing cells in place;
//! it never deletes records on behalf of a relationship (deletion is the
//! store's responsibility).

use std::collections::HashMap;

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::record::{RecordHandle, RecordId, RecordIdentity, TypeKey};

/// Shared identity map of materialized records
pub struct IdentityMap {
    records: DashMap<RecordIdentity, RecordHandle>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Look up a record cell by identity
    pub fn get(&self, identity: &RecordIdentity) -> Option<RecordHandle> {
        self.records.get(identity).map(|entry| entry.value().clone())
    }

    /// True if a loaded record exists for the identity
    pub fn is_loaded(&self, identity: &RecordIdentity) -> bool {
        self.get(identity).map(|r| r.is_loaded()).unwrap_or(false)
    }

    /// Materialize a raw payload into a record cell
    ///
    /// Existing cells are updated in place so every holder of the handle
    /// observes the new attributes; unseen identities register a new cell.
    pub fn materialize(&self, type_key: &TypeKey, payload: &Value) -> StoreResult<RecordHandle> {
        let attributes = match payload {
            Value::Object(map) => map.clone(),
            other => {
                return Err(StoreError::Configuration(format!(
                    "cannot materialize a '{}' record from non-object payload: {}",
                    type_key, other
                )))
            }
        };
        let id = attributes
            .get("id")
            .and_then(RecordId::from_value)
            .ok_or_else(|| {
                StoreError::Configuration(format!(
                    "payload for '{}' record is missing an 'id'",
                    type_key
                ))
            })?;
        let identity = RecordIdentity::new(type_key.clone(), id);

        if let Some(existing) = self.get(&identity) {
            existing.update_attributes(attributes);
            return Ok(existing);
        }

        let record = RecordHandle::new_loaded(identity.clone(), attributes);
        self.records.insert(identity, record.clone());
        Ok(record)
    }

    /// Register a new, unsaved client record with a generated client id
    pub fn create_record(&self, type_key: &TypeKey) -> RecordHandle {
        let id = RecordId::from(format!("new-{}", Uuid::new_v4()));
        let identity = RecordIdentity::new(type_key.clone(), id);
        let record = RecordHandle::new_client(identity.clone());
        self.records.insert(identity, record.clone());
        record
    }

    /// Remove a record cell; store-level operation only
    pub(crate) fn remove(&self, identity: &RecordIdentity) -> Option<RecordHandle> {
        self.records.remove(identity).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Current identity-map statistics
    pub fn stats(&self) -> IdentityMapStats {
        let mut records_per_type: HashMap<String, usize> = HashMap::new();
        let mut loaded_records = 0;
        for entry in self.records.iter() {
            *records_per_type
                .entry(entry.key().type_key.as_str().to_string())
                .or_insert(0) += 1;
            if entry.value().is_loaded() {
                loaded_records += 1;
            }
        }
        IdentityMapStats {
            total_records: self.records.len(),
            loaded_records,
            records_per_type,
        }
    }
}

impl Default for IdentityMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity-map statistics
#[derive(Debug, Clone)]
pub struct IdentityMapStats {
    pub total_records: usize,
    pub loaded_records: usize,
    pub records_per_type: HashMap<String, usize>,
}
