//! Polymorphic Type Guard - Membership validation for relationship mutations
//!
//! Monomorphic relationships require the exact declared type; polymorphic
//! relationships accept the declared base type or any registered subtype.
//! Failed checks leave relationship state untouched.

use crate::error::{StoreError, StoreResult};
use crate::record::TypeKey;
use crate::relationships::metadata::RelationshipMeta;
use crate::schema::SchemaRegistry;

/// Validate that a candidate type may become a member of the relationship
pub fn check_membership(
    schema: &SchemaRegistry,
    meta: &RelationshipMeta,
    candidate: &TypeKey,
) -> StoreResult<()> {
    let base = meta.bound_target()?;
    let accepted = if meta.is_polymorphic() {
        schema.is_subtype_of(candidate, base)
    } else {
        candidate == base
    };
    if accepted {
        Ok(())
    } else {
        Err(StoreError::TypeMismatch {
            relationship: meta.bound_key()?.to_string(),
            expected: base.as_str().to_string(),
            actual: candidate.as_str().to_string(),
        })
    }
}

/// Validate that a record may be created directly through the relationship
///
/// Polymorphic relationships have no single concrete type to instantiate.
pub fn check_create(meta: &RelationshipMeta) -> StoreResult<()> {
    if meta.is_polymorphic() {
        return Err(StoreError::AmbiguousCreate {
            relationship: meta.bound_key()?.to_string(),
            base_type: meta.bound_target()?.as_str().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationships::has_many::has_many;
    use crate::relationships::metadata::RelationshipOptions;
    use crate::schema::TypeDefinition;

    fn type_key(raw: &str) -> TypeKey {
        TypeKey::new(raw).unwrap()
    }

    fn message_schema() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry
            .register(TypeDefinition::new("message").unwrap())
            .unwrap();
        registry
            .register(TypeDefinition::new("post").unwrap().extends("message").unwrap())
            .unwrap();
        registry
            .register(TypeDefinition::new("comment").unwrap().extends("message").unwrap())
            .unwrap();
        registry
            .register(TypeDefinition::new("user").unwrap())
            .unwrap();
        registry
    }

    fn bound_meta(polymorphic: bool) -> RelationshipMeta {
        let options = if polymorphic {
            RelationshipOptions::default().polymorphic()
        } else {
            RelationshipOptions::default()
        };
        let meta = has_many(Some("message"), options).unwrap();
        meta.bind("messages", &type_key("user")).unwrap();
        meta
    }

    #[test]
    fn test_monomorphic_requires_exact_type() {
        let schema = message_schema();
        let meta = bound_meta(false);

        assert!(check_membership(&schema, &meta, &type_key("message")).is_ok());
        let err = check_membership(&schema, &meta, &type_key("post")).unwrap_err();
        assert_eq!(
            err,
            StoreError::TypeMismatch {
                relationship: "messages".to_string(),
                expected: "message".to_string(),
                actual: "post".to_string(),
            }
        );
    }

    #[test]
    fn test_polymorphic_accepts_subtypes() {
        let schema = message_schema();
        let meta = bound_meta(true);

        assert!(check_membership(&schema, &meta, &type_key("message")).is_ok());
        assert!(check_membership(&schema, &meta, &type_key("post")).is_ok());
        assert!(check_membership(&schema, &meta, &type_key("comment")).is_ok());

        let err = check_membership(&schema, &meta, &type_key("user")).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { actual, .. } if actual == "user"));
    }

    #[test]
    fn test_create_rejected_on_polymorphic() {
        let err = check_create(&bound_meta(true)).unwrap_err();
        assert_eq!(
            err,
            StoreError::AmbiguousCreate {
                relationship: "messages".to_string(),
                base_type: "message".to_string(),
            }
        );
        assert!(check_create(&bound_meta(false)).is_ok());
    }
}
