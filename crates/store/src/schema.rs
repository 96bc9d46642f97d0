//! Schema Registry - Explicit type registration and the subtype table
//!
//! Types are assembled as composable definitions and registered once; there
//! is no runtime mutation of already-registered types. Polymorphism is
//! expressed through an explicit parent link rather than class introspection.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{StoreError, StoreResult};
use crate::record::TypeKey;
use crate::relationships::metadata::RelationshipMeta;

/// A registered record type: name, optional parent, relationship fields
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    name: TypeKey,
    parent: Option<TypeKey>,
    relationships: Vec<Arc<RelationshipMeta>>,
}

impl TypeDefinition {
    pub fn new(name: &str) -> StoreResult<Self> {
        Ok(Self {
            name: TypeKey::new(name)?,
            parent: None,
            relationships: Vec::new(),
        })
    }

    /// Declare this type as a subtype of `parent`
    pub fn extends(mut self, parent: &str) -> StoreResult<Self> {
        self.parent = Some(TypeKey::new(parent)?);
        Ok(self)
    }

    /// Attach a relationship declaration under the given field key
    ///
    /// Binding happens here: the key becomes immutable, the target type is
    /// inferred from the key when absent, and reserved names are rejected.
    pub fn with_relationship(mut self, key: &str, meta: RelationshipMeta) -> StoreResult<Self> {
        meta.bind(key, &self.name)?;
        if self.relationships.iter().any(|existing| existing.key() == Some(key)) {
            return Err(StoreError::Configuration(format!(
                "type '{}' declares relationship '{}' twice",
                self.name, key
            )));
        }
        self.relationships.push(Arc::new(meta));
        Ok(self)
    }

    pub fn name(&self) -> &TypeKey {
        &self.name
    }

    pub fn parent(&self) -> Option<&TypeKey> {
        self.parent.as_ref()
    }

    /// Relationships declared directly on this type
    pub fn relationships(&self) -> &[Arc<RelationshipMeta>] {
        &self.relationships
    }

    /// A directly declared relationship by field key
    pub fn relationship(&self, key: &str) -> Option<&Arc<RelationshipMeta>> {
        self.relationships
            .iter()
            .find(|meta| meta.key() == Some(key))
    }
}

/// Thread-safe registry of type definitions
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    types: Arc<DashMap<TypeKey, Arc<TypeDefinition>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            types: Arc::new(DashMap::new()),
        }
    }

    /// Register a type definition; re-registration is a configuration error
    pub fn register(&self, definition: TypeDefinition) -> StoreResult<()> {
        let name = definition.name().clone();
        if self.types.contains_key(&name) {
            return Err(StoreError::Configuration(format!(
                "type '{}' is already registered",
                name
            )));
        }
        self.types.insert(name, Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, type_key: &TypeKey) -> Option<Arc<TypeDefinition>> {
        self.types.get(type_key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, type_key: &TypeKey) -> bool {
        self.types.contains_key(type_key)
    }

    /// The definition for a type, or a configuration error naming it
    pub fn expect_type(&self, type_key: &TypeKey) -> StoreResult<Arc<TypeDefinition>> {
        self.get(type_key).ok_or_else(|| {
            StoreError::Configuration(format!("type '{}' is not registered", type_key))
        })
    }

    /// True when `candidate` is `base` or a registered descendant of it
    pub fn is_subtype_of(&self, candidate: &TypeKey, base: &TypeKey) -> bool {
        let mut current = Some(candidate.clone());
        while let Some(type_key) = current {
            if &type_key == base {
                return true;
            }
            current = self
                .get(&type_key)
                .and_then(|definition| definition.parent().cloned());
        }
        false
    }

    /// Relationships visible on a type, including inherited ones
    ///
    /// A field declared on a subtype shadows the same field on an ancestor.
    pub fn relationships_of(&self, type_key: &TypeKey) -> Vec<Arc<RelationshipMeta>> {
        let mut seen: HashMap<String, Arc<RelationshipMeta>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut current = Some(type_key.clone());
        while let Some(key) = current {
            let Some(definition) = self.get(&key) else { break };
            for meta in definition.relationships() {
                if let Some(field) = meta.key() {
                    if !seen.contains_key(field) {
                        seen.insert(field.to_string(), Arc::clone(meta));
                        order.push(field.to_string());
                    }
                }
            }
            current = definition.parent().cloned();
        }
        order
            .into_iter()
            .filter_map(|field| seen.remove(&field))
            .collect()
    }

    /// A relationship by field key, searching the type and its ancestors
    pub fn relationship(
        &self,
        type_key: &TypeKey,
        field: &str,
    ) -> Option<Arc<RelationshipMeta>> {
        let mut current = Some(type_key.clone());
        while let Some(key) = current {
            let definition = self.get(&key)?;
            if let Some(meta) = definition.relationship(field) {
                return Some(Arc::clone(meta));
            }
            current = definition.parent().cloned();
        }
        None
    }

    /// Current registry statistics
    pub fn stats(&self) -> SchemaStats {
        let total_types = self.types.len();
        let mut total_relationships = 0;
        let mut polymorphic_relationships = 0;
        for entry in self.types.iter() {
            for meta in entry.value().relationships() {
                total_relationships += 1;
                if meta.is_polymorphic() {
                    polymorphic_relationships += 1;
                }
            }
        }
        SchemaStats {
            total_types,
            total_relationships,
            polymorphic_relationships,
        }
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the schema registry
#[derive(Debug, Clone)]
pub struct SchemaStats {
    pub total_types: usize,
    pub total_relationships: usize,
    pub polymorphic_relationships: usize,
}
