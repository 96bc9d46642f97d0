//! Inverse Relationship Tracking - Bidirectional consistency between paired fields
//!
//! Mutating one side of a relationship mirrors the change onto the paired
//! field of the related record. Resolution order: an explicit `inverse`
//! option on either side wins; otherwise exactly-one-candidate inference
//! across the target type's relationships pointing back at the owner's type.
//! Zero candidates is valid (no inverse); more than one is a configuration
//! error surfaced only when a mutation actually needs to sync.
//!
//! Mirrored mutations are applied locally, without re-entering inverse
//! syncing, so a single logical mutation never oscillates between the sides.

use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::notify::{ChangeEvent, ChangeNotifier};
use crate::record::{RecordHandle, TypeKey};
use crate::relationships::metadata::{RelationshipKind, RelationshipMeta};
use crate::relationships::resolver::RelationshipResolver;
use crate::schema::SchemaRegistry;

/// A resolved inverse field on the related type
#[derive(Debug, Clone)]
pub struct InverseField {
    pub key: String,
    pub meta: Arc<RelationshipMeta>,
}

/// Outcome of inverse resolution
#[derive(Debug, Clone)]
pub enum InverseResolution {
    /// The relationship has no inverse; mutations sync nothing
    None,
    /// The paired field to mirror mutations onto
    Field(InverseField),
    /// Multiple candidates and no disambiguation; an error once a mutation
    /// needs to pick one
    Ambiguous(Vec<String>),
}

/// Resolves and applies inverse mutations
pub struct InverseRelationshipTracker {
    schema: SchemaRegistry,
}

impl InverseRelationshipTracker {
    pub(crate) fn new(schema: SchemaRegistry) -> Self {
        Self { schema }
    }

    /// Resolve the inverse field for `meta` declared on `owner_type`
    pub fn resolve_inverse(
        &self,
        owner_type: &TypeKey,
        meta: &Arc<RelationshipMeta>,
    ) -> StoreResult<InverseResolution> {
        let target_type = meta.bound_target()?;

        // Explicit inverse on this side wins.
        if let Some(explicit) = &meta.options().inverse {
            let inverse_meta = self
                .schema
                .relationship(target_type, explicit)
                .ok_or_else(|| {
                    StoreError::Configuration(format!(
                        "explicit inverse '{}' does not exist on '{}'",
                        explicit, target_type
                    ))
                })?;
            return Ok(InverseResolution::Field(InverseField {
                key: explicit.clone(),
                meta: inverse_meta,
            }));
        }

        let own_key = meta.bound_key()?;
        let mut candidates: Vec<InverseField> = Vec::new();
        for candidate in self.schema.relationships_of(target_type) {
            // The declaration itself is never its own inverse.
            if Arc::ptr_eq(&candidate, meta) {
                continue;
            }
            let Some(candidate_target) = candidate.target_type() else {
                continue;
            };
            if !points_back(&self.schema, owner_type, candidate_target) {
                continue;
            }
            let Some(candidate_key) = candidate.key() else {
                continue;
            };
            // Explicit inverse on the candidate side wins, both ways: a
            // candidate naming this field is the inverse, a candidate naming
            // another field is excluded from inference.
            match &candidate.options().inverse {
                Some(named) if named == own_key => {
                    return Ok(InverseResolution::Field(InverseField {
                        key: candidate_key.to_string(),
                        meta: Arc::clone(&candidate),
                    }));
                }
                Some(_) => continue,
                None => candidates.push(InverseField {
                    key: candidate_key.to_string(),
                    meta: Arc::clone(&candidate),
                }),
            }
        }

        match candidates.len() {
            0 => Ok(InverseResolution::None),
            1 => Ok(InverseResolution::Field(candidates.remove(0))),
            _ => Ok(InverseResolution::Ambiguous(
                candidates.into_iter().map(|c| c.key).collect(),
            )),
        }
    }

    /// Mirror an add of `record` into `owner`'s relationship
    pub(crate) fn sync_add(
        &self,
        resolver: &RelationshipResolver,
        notifier: &Arc<ChangeNotifier>,
        owner: &RecordHandle,
        inverse: &InverseField,
        record: &RecordHandle,
    ) -> StoreResult<()> {
        match inverse.meta.kind() {
            RelationshipKind::BelongsTo => {
                record.set_belongs_to_local(&inverse.key, Some(owner.identity()));
                notifier.emit(&ChangeEvent::BelongsToChanged {
                    owner: record.identity(),
                    field: inverse.key.clone(),
                });
            }
            RelationshipKind::HasMany => {
                resolver.local_add(&record.identity(), &inverse.meta, notifier, owner)?;
            }
        }
        Ok(())
    }

    /// Mirror a remove of `record` from `owner`'s relationship
    pub(crate) fn sync_remove(
        &self,
        resolver: &RelationshipResolver,
        notifier: &Arc<ChangeNotifier>,
        owner: &RecordHandle,
        inverse: &InverseField,
        record: &RecordHandle,
    ) -> StoreResult<()> {
        match inverse.meta.kind() {
            RelationshipKind::BelongsTo => {
                if record.belongs_to(&inverse.key) == Some(owner.identity()) {
                    record.set_belongs_to_local(&inverse.key, None);
                    notifier.emit(&ChangeEvent::BelongsToChanged {
                        owner: record.identity(),
                        field: inverse.key.clone(),
                    });
                }
            }
            RelationshipKind::HasMany => {
                resolver.local_remove(&record.identity(), &inverse.meta, notifier, owner)?;
            }
        }
        Ok(())
    }
}

/// Does a relationship targeting `candidate_target` point back at `owner_type`?
///
/// Accepts the exact type and ancestors of the owner: a `message.user`
/// declaration pairs with `user.messages` even when the member is a concrete
/// `post` or `comment` subtype.
fn points_back(schema: &SchemaRegistry, owner_type: &TypeKey, candidate_target: &TypeKey) -> bool {
    owner_type == candidate_target || schema.is_subtype_of(owner_type, candidate_target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationships::has_many::{belongs_to, has_many};
    use crate::relationships::metadata::RelationshipOptions;
    use crate::schema::TypeDefinition;

    fn type_key(raw: &str) -> TypeKey {
        TypeKey::new(raw).unwrap()
    }

    fn message_schema() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry
            .register(
                TypeDefinition::new("user")
                    .unwrap()
                    .with_relationship(
                        "messages",
                        has_many(Some("message"), RelationshipOptions::sync().polymorphic())
                            .unwrap(),
                    )
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                TypeDefinition::new("message")
                    .unwrap()
                    .with_relationship(
                        "user",
                        belongs_to(Some("user"), RelationshipOptions::sync()).unwrap(),
                    )
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                TypeDefinition::new("post")
                    .unwrap()
                    .extends("message")
                    .unwrap()
                    .with_relationship(
                        "comments",
                        has_many(Some("comment"), RelationshipOptions::sync()).unwrap(),
                    )
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                TypeDefinition::new("comment")
                    .unwrap()
                    .extends("message")
                    .unwrap()
                    .with_relationship(
                        "message",
                        belongs_to(Some("post"), RelationshipOptions::sync().polymorphic())
                            .unwrap(),
                    )
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    fn tracker(schema: &SchemaRegistry) -> InverseRelationshipTracker {
        InverseRelationshipTracker::new(schema.clone())
    }

    #[test]
    fn test_unique_candidate_inferred() {
        let schema = message_schema();
        let meta = schema
            .relationship(&type_key("user"), "messages")
            .unwrap();

        let resolution = tracker(&schema)
            .resolve_inverse(&type_key("user"), &meta)
            .unwrap();
        match resolution {
            InverseResolution::Field(inverse) => assert_eq!(inverse.key, "user"),
            other => panic!("expected unique inverse, got {:?}", other),
        }
    }

    #[test]
    fn test_inherited_candidate_found_for_subtype_members() {
        let schema = message_schema();
        let meta = schema.relationship(&type_key("post"), "comments").unwrap();

        // comment declares `message` (belongs-to post) and inherits `user`;
        // only `message` points back at post.
        let resolution = tracker(&schema)
            .resolve_inverse(&type_key("post"), &meta)
            .unwrap();
        match resolution {
            InverseResolution::Field(inverse) => assert_eq!(inverse.key, "message"),
            other => panic!("expected unique inverse, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_candidates_is_valid() {
        let schema = SchemaRegistry::new();
        schema
            .register(
                TypeDefinition::new("post")
                    .unwrap()
                    .with_relationship(
                        "tags",
                        has_many(Some("tag"), RelationshipOptions::sync()).unwrap(),
                    )
                    .unwrap(),
            )
            .unwrap();
        schema
            .register(TypeDefinition::new("tag").unwrap())
            .unwrap();

        let meta = schema.relationship(&type_key("post"), "tags").unwrap();
        let resolution = tracker(&schema)
            .resolve_inverse(&type_key("post"), &meta)
            .unwrap();
        assert!(matches!(resolution, InverseResolution::None));
    }

    #[test]
    fn test_multiple_candidates_are_ambiguous() {
        let schema = SchemaRegistry::new();
        schema
            .register(
                TypeDefinition::new("post")
                    .unwrap()
                    .with_relationship(
                        "comments",
                        has_many(Some("comment"), RelationshipOptions::sync()).unwrap(),
                    )
                    .unwrap(),
            )
            .unwrap();
        schema
            .register(
                TypeDefinition::new("comment")
                    .unwrap()
                    .with_relationship(
                        "red_post",
                        belongs_to(Some("post"), RelationshipOptions::sync()).unwrap(),
                    )
                    .unwrap()
                    .with_relationship(
                        "blue_post",
                        belongs_to(Some("post"), RelationshipOptions::sync()).unwrap(),
                    )
                    .unwrap(),
            )
            .unwrap();

        let meta = schema.relationship(&type_key("post"), "comments").unwrap();
        let resolution = tracker(&schema)
            .resolve_inverse(&type_key("post"), &meta)
            .unwrap();
        match resolution {
            InverseResolution::Ambiguous(candidates) => {
                assert_eq!(candidates.len(), 2);
                assert!(candidates.contains(&"red_post".to_string()));
                assert!(candidates.contains(&"blue_post".to_string()));
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_explicit_inverse_disambiguates() {
        let schema = SchemaRegistry::new();
        schema
            .register(
                TypeDefinition::new("post")
                    .unwrap()
                    .with_relationship(
                        "comments",
                        has_many(
                            Some("comment"),
                            RelationshipOptions::sync().with_inverse("red_post"),
                        )
                        .unwrap(),
                    )
                    .unwrap(),
            )
            .unwrap();
        schema
            .register(
                TypeDefinition::new("comment")
                    .unwrap()
                    .with_relationship(
                        "red_post",
                        belongs_to(Some("post"), RelationshipOptions::sync()).unwrap(),
                    )
                    .unwrap()
                    .with_relationship(
                        "blue_post",
                        belongs_to(Some("post"), RelationshipOptions::sync()).unwrap(),
                    )
                    .unwrap(),
            )
            .unwrap();

        let meta = schema.relationship(&type_key("post"), "comments").unwrap();
        let resolution = tracker(&schema)
            .resolve_inverse(&type_key("post"), &meta)
            .unwrap();
        match resolution {
            InverseResolution::Field(inverse) => assert_eq!(inverse.key, "red_post"),
            other => panic!("expected explicit inverse, got {:?}", other),
        }
    }

    #[test]
    fn test_explicit_inverse_must_exist() {
        let schema = SchemaRegistry::new();
        schema
            .register(
                TypeDefinition::new("post")
                    .unwrap()
                    .with_relationship(
                        "comments",
                        has_many(
                            Some("comment"),
                            RelationshipOptions::sync().with_inverse("missing"),
                        )
                        .unwrap(),
                    )
                    .unwrap(),
            )
            .unwrap();
        schema
            .register(TypeDefinition::new("comment").unwrap())
            .unwrap();

        let meta = schema.relationship(&type_key("post"), "comments").unwrap();
        let err = tracker(&schema)
            .resolve_inverse(&type_key("post"), &meta)
            .unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
    }
}
