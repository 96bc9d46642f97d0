//! Relationship Declarations - `has_many` and `belongs_to` entry points
//!
//! `has_many` declares a One-To-Many or Many-To-Many association on a record
//! type. The returned descriptor is bound to its field name when attached to
//! a [`TypeDefinition`](crate::schema::TypeDefinition):
//!
//! ```
//! use nimbus_store::relationships::{has_many, RelationshipOptions};
//! use nimbus_store::schema::TypeDefinition;
//!
//! let post = TypeDefinition::new("post").unwrap()
//!     .with_relationship(
//!         "comments",
//!         has_many(Some("comment"), RelationshipOptions::default()).unwrap(),
//!     )
//!     .unwrap();
//! # let _ = post;
//! ```
//!
//! The target type may be omitted, in which case it is inferred by
//! singularizing the field key at bind time (`contacts` looks up `contact`).
//! The whole collection is read-only; membership changes go through the
//! resolved [`ManyArray`](crate::relationships::ManyArray)'s add/remove.

use crate::error::StoreResult;
use crate::record::TypeKey;
use crate::relationships::metadata::{RelationshipKind, RelationshipMeta, RelationshipOptions};

/// Declare a has-many relationship field
///
/// `target_type` must be a valid type key or `None` (inferred from the field
/// key); a malformed name fails with `InvalidArgument` before any
/// relationship logic runs.
pub fn has_many(
    target_type: Option<&str>,
    options: RelationshipOptions,
) -> StoreResult<RelationshipMeta> {
    declare(RelationshipKind::HasMany, target_type, options)
}

/// Declare a belongs-to relationship field
///
/// The single-record side of a has-many pair; its local value participates
/// in inverse syncing.
pub fn belongs_to(
    target_type: Option<&str>,
    options: RelationshipOptions,
) -> StoreResult<RelationshipMeta> {
    declare(RelationshipKind::BelongsTo, target_type, options)
}

fn declare(
    kind: RelationshipKind,
    target_type: Option<&str>,
    options: RelationshipOptions,
) -> StoreResult<RelationshipMeta> {
    let target = target_type.map(TypeKey::new).transpose()?;
    Ok(RelationshipMeta::new(kind, target, options))
}
