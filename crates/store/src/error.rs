//! Error types for the record store
//!
//! Provides error handling for record materialization, relationship
//! resolution, and schema configuration.

use std::fmt;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Error types for store operations
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Malformed declaration argument (e.g. an invalid type key)
    InvalidArgument(String),
    /// Relationship field name collides with internal record bookkeeping
    ReservedName { type_key: String, field: String },
    /// Sync relationship accessed while referenced records are unloaded
    UnloadedRecords {
        owner_type: String,
        owner_id: String,
        field: String,
        missing: Vec<String>,
    },
    /// Record of the wrong type added to a relationship
    TypeMismatch {
        relationship: String,
        expected: String,
        actual: String,
    },
    /// Record creation attempted directly through a polymorphic relationship
    AmbiguousCreate {
        relationship: String,
        base_type: String,
    },
    /// Multiple inverse candidates with no disambiguation
    InverseAmbiguity {
        owner_type: String,
        field: String,
        target_type: String,
        candidates: Vec<String>,
    },
    /// Whole-collection assignment to a has-many field
    ReadOnlyField { type_key: String, field: String },
    /// Network or bridge failure during fetch/reload
    Adapter(String),
    /// Schema or relationship configuration error
    Configuration(String),
    /// Record not found in the identity map or via the adapter
    NotFound { type_key: String, id: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            StoreError::ReservedName { type_key, field } => write!(
                f,
                "'{}' is a reserved field name on records. Please choose a different name for your relationship on '{}'",
                field, type_key
            ),
            StoreError::UnloadedRecords {
                owner_type,
                owner_id,
                field,
                missing,
            } => write!(
                f,
                "You looked up the '{}' relationship on a '{}' with id {} but some of the associated records were not loaded ({}). Either make sure they are all loaded together with the parent record, or declare the relationship as async",
                field,
                owner_type,
                owner_id,
                missing.join(", ")
            ),
            StoreError::TypeMismatch {
                relationship,
                expected,
                actual,
            } => write!(
                f,
                "You cannot add '{}' records to the '{}' relationship (expected '{}')",
                actual, relationship, expected
            ),
            StoreError::AmbiguousCreate {
                relationship,
                base_type,
            } => write!(
                f,
                "You cannot create '{}' records directly on the polymorphic relationship '{}'; create a record of a concrete type and add it instead",
                base_type, relationship
            ),
            StoreError::InverseAmbiguity {
                owner_type,
                field,
                target_type,
                candidates,
            } => write!(
                f,
                "Multiple possible inverses for '{}.{}' were found on '{}' ({}); specify the `inverse` option to disambiguate",
                owner_type,
                field,
                target_type,
                candidates.join(", ")
            ),
            StoreError::ReadOnlyField { type_key, field } => write!(
                f,
                "Cannot set read-only has-many field '{}' on '{}'; mutate the collection through add/remove instead",
                field, type_key
            ),
            StoreError::Adapter(msg) => write!(f, "Adapter error: {}", msg),
            StoreError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            StoreError::NotFound { type_key, id } => {
                write!(f, "Record '{}:{}' not found", type_key, id)
            }
        }
    }
}

impl std::error::Error for StoreError {}
