//! Relationship Metadata - Immutable descriptors for relationship fields
//!
//! A [`RelationshipMeta`] is produced by the declaration entry points and
//! bound to its field name at type-registration time. Once bound, the key is
//! immutable for the lifetime of the declaration.

use std::collections::HashSet;
use std::sync::OnceLock;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::record::TypeKey;

/// Field names that collide with internal record bookkeeping
static RESERVED_FIELDS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["identity", "record_data", "current_state"].into_iter().collect());

/// The kind of relationship a field declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// Ordered collection of related records
    HasMany,
    /// Single related record (the paired side of a has-many inverse)
    BelongsTo,
}

impl RelationshipKind {
    /// Returns true if this kind resolves to a collection
    pub fn is_collection(self) -> bool {
        matches!(self, Self::HasMany)
    }
}

/// Declaration options for a relationship field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipOptions {
    /// Whether missing members may be fetched through the adapter
    pub is_async: bool,
    /// Whether members may be any registered subtype of the target type
    pub polymorphic: bool,
    /// Explicit inverse field name on the target type; `None` means infer
    pub inverse: Option<String>,
}

impl Default for RelationshipOptions {
    fn default() -> Self {
        Self {
            is_async: true,
            polymorphic: false,
            inverse: None,
        }
    }
}

impl RelationshipOptions {
    /// Options for a sync relationship (resolved from local data only)
    pub fn sync() -> Self {
        Self {
            is_async: false,
            ..Self::default()
        }
    }

    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }

    pub fn with_inverse(mut self, inverse: &str) -> Self {
        self.inverse = Some(inverse.to_string());
        self
    }
}

/// Immutable descriptor attached to a relationship field
///
/// `key` and (when inferred) `target_type` are populated lazily the first
/// time the declaration is bound into a type definition.
#[derive(Debug)]
pub struct RelationshipMeta {
    kind: RelationshipKind,
    target_type: OnceLock<TypeKey>,
    options: RelationshipOptions,
    key: OnceLock<String>,
}

impl RelationshipMeta {
    pub(crate) fn new(
        kind: RelationshipKind,
        target_type: Option<TypeKey>,
        options: RelationshipOptions,
    ) -> Self {
        let target = OnceLock::new();
        if let Some(type_key) = target_type {
            let _ = target.set(type_key);
        }
        Self {
            kind,
            target_type: target,
            options,
            key: OnceLock::new(),
        }
    }

    /// Bind the descriptor to its field name on an owning type
    ///
    /// Checks the reserved-name guard, infers the target type from the
    /// singularized key when none was declared, and rejects rebinding under
    /// a different key.
    pub(crate) fn bind(&self, key: &str, owner_type: &TypeKey) -> StoreResult<()> {
        if RESERVED_FIELDS.contains(key) {
            return Err(StoreError::ReservedName {
                type_key: owner_type.as_str().to_string(),
                field: key.to_string(),
            });
        }
        if let Some(bound) = self.key.get() {
            if bound != key {
                return Err(StoreError::Configuration(format!(
                    "relationship already bound to '{}' cannot be rebound to '{}.{}'",
                    bound, owner_type, key
                )));
            }
            return Ok(());
        }
        if self.target_type.get().is_none() {
            let inferred = TypeKey::new(&singularize(key))?;
            let _ = self.target_type.set(inferred);
        }
        let _ = self.key.set(key.to_string());
        Ok(())
    }

    pub fn kind(&self) -> RelationshipKind {
        self.kind
    }

    /// Always true; present for introspection collaborators
    pub fn is_relationship(&self) -> bool {
        true
    }

    pub fn is_async(&self) -> bool {
        self.options.is_async
    }

    pub fn is_polymorphic(&self) -> bool {
        self.options.polymorphic
    }

    pub fn options(&self) -> &RelationshipOptions {
        &self.options
    }

    /// The bound field name, if binding has happened
    pub fn key(&self) -> Option<&str> {
        self.key.get().map(|s| s.as_str())
    }

    /// The bound field name; configuration error when unbound
    pub fn bound_key(&self) -> StoreResult<&str> {
        self.key().ok_or_else(|| {
            StoreError::Configuration("relationship accessed before binding to a field".to_string())
        })
    }

    /// The declared or inferred target type
    pub fn target_type(&self) -> Option<&TypeKey> {
        self.target_type.get()
    }

    pub fn bound_target(&self) -> StoreResult<&TypeKey> {
        self.target_type().ok_or_else(|| {
            StoreError::Configuration(
                "relationship target type not declared and not yet inferred".to_string(),
            )
        })
    }
}

impl Clone for RelationshipMeta {
    fn clone(&self) -> Self {
        let meta = Self::new(self.kind, self.target_type.get().cloned(), self.options.clone());
        if let Some(key) = self.key.get() {
            let _ = meta.key.set(key.clone());
        }
        meta
    }
}

/// Simple singularization (English-centric)
pub fn singularize(name: &str) -> String {
    if name.ends_with("ies") {
        format!("{}y", &name[..name.len() - 3])
    } else if name.ends_with("ses")
        || name.ends_with("ches")
        || name.ends_with("shes")
        || name.ends_with("xes")
        || name.ends_with("zes")
    {
        name[..name.len() - 2].to_string()
    } else if name.ends_with('s') && name.len() > 1 {
        name[..name.len() - 1].to_string()
    } else {
        name.to_string()
    }
}

/// Simple pluralization (English-centric)
pub fn pluralize(name: &str) -> String {
    if name.ends_with('y')
        && !name.ends_with("ay")
        && !name.ends_with("ey")
        && !name.ends_with("iy")
        && !name.ends_with("oy")
        && !name.ends_with("uy")
    {
        format!("{}ies", &name[..name.len() - 1])
    } else if name.ends_with('s')
        || name.ends_with("sh")
        || name.ends_with("ch")
        || name.ends_with('x')
        || name.ends_with('z')
    {
        format!("{}es", name)
    } else {
        format!("{}s", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_key(raw: &str) -> TypeKey {
        TypeKey::new(raw).unwrap()
    }

    #[test]
    fn test_options_defaults() {
        let options = RelationshipOptions::default();
        assert!(options.is_async);
        assert!(!options.polymorphic);
        assert_eq!(options.inverse, None);

        let options = RelationshipOptions::sync().polymorphic().with_inverse("user");
        assert!(!options.is_async);
        assert!(options.polymorphic);
        assert_eq!(options.inverse.as_deref(), Some("user"));
    }

    #[test]
    fn test_bind_populates_key_once() {
        let meta = RelationshipMeta::new(
            RelationshipKind::HasMany,
            Some(type_key("comment")),
            RelationshipOptions::default(),
        );
        assert_eq!(meta.key(), None);

        meta.bind("comments", &type_key("post")).unwrap();
        assert_eq!(meta.key(), Some("comments"));

        // Rebinding under the same key is a no-op
        meta.bind("comments", &type_key("post")).unwrap();

        let err = meta.bind("replies", &type_key("post")).unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
        assert_eq!(meta.key(), Some("comments"));
    }

    #[test]
    fn test_bind_infers_target_from_singularized_key() {
        let meta = RelationshipMeta::new(
            RelationshipKind::HasMany,
            None,
            RelationshipOptions::default(),
        );
        meta.bind("contacts", &type_key("user")).unwrap();
        assert_eq!(meta.target_type(), Some(&type_key("contact")));

        let meta = RelationshipMeta::new(
            RelationshipKind::HasMany,
            None,
            RelationshipOptions::default(),
        );
        meta.bind("categories", &type_key("post")).unwrap();
        assert_eq!(meta.target_type(), Some(&type_key("category")));
    }

    #[test]
    fn test_bind_rejects_reserved_field_names() {
        for reserved in ["identity", "record_data", "current_state"] {
            let meta = RelationshipMeta::new(
                RelationshipKind::HasMany,
                Some(type_key("comment")),
                RelationshipOptions::default(),
            );
            let err = meta.bind(reserved, &type_key("post")).unwrap_err();
            assert!(matches!(err, StoreError::ReservedName { .. }), "{}", reserved);
        }
    }

    #[test]
    fn test_singularize_and_pluralize() {
        assert_eq!(singularize("comments"), "comment");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(pluralize("comment"), "comments");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("box"), "boxes");
    }
}
