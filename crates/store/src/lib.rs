//! # nimbus-store: Client-Side Record Store
//!
//! In-memory record store for application front-ends: a shared identity map,
//! declarative relationship definitions, and a has-many relationship engine
//! with async fetching through a pluggable adapter bridge.
//!
//! Relationships are declared with [`has_many`](relationships::has_many()) and
//! [`belongs_to`](relationships::belongs_to()), registered on explicit type
//! definitions, and resolved per (owner, field): from local data for sync
//! relationships, or through [`AdapterBridge`](adapter::AdapterBridge) calls
//! by id list or opaque link for async ones. Collections keep pushed
//! canonical order, mirror mutations onto inverse fields, and enforce
//! polymorphic type membership.

pub mod adapter;
pub mod error;
pub mod identity_map;
pub mod notify;
pub mod record;
pub mod relationships;
pub mod schema;
pub mod store;

// Re-export core types
pub use adapter::*;
pub use error::*;
pub use identity_map::*;
pub use notify::*;
pub use record::*;
pub use schema::*;
pub use store::*;
