//! Store Facade - Canonical data entry and the relationship accessor surface
//!
//! The store owns the shared identity map, the schema registry, the
//! relationship resolver, and the adapter bridge. Canonical record data
//! enters through `push`; relationship fields are accessed through
//! `get_has_many` (sync) and `fetch_has_many` (async).

use serde_json::Value;
use std::sync::Arc;

use crate::adapter::AdapterBridge;
use crate::error::{StoreError, StoreResult};
use crate::identity_map::{IdentityMap, IdentityMapStats};
use crate::notify::{ChangeEvent, ChangeNotifier};
use crate::record::{RecordHandle, RecordId, RecordIdentity, TypeKey};
use crate::relationships::guard;
use crate::relationships::inverse::{
    InverseField, InverseRelationshipTracker, InverseResolution,
};
use crate::relationships::many_array::ManyArray;
use crate::relationships::metadata::{RelationshipKind, RelationshipMeta};
use crate::relationships::resolver::{RelationshipResolver, ResolverStats};
use crate::schema::{SchemaRegistry, SchemaStats, TypeDefinition};

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether resolver metrics are collected
    pub enable_metrics: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
        }
    }
}

struct StoreInner {
    schema: SchemaRegistry,
    identity_map: IdentityMap,
    resolver: RelationshipResolver,
    inverse: InverseRelationshipTracker,
    adapter: Arc<dyn AdapterBridge>,
    notifier: Arc<ChangeNotifier>,
}

/// Client-side record store with a has-many relationship engine
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn new(adapter: Arc<dyn AdapterBridge>) -> Self {
        Self::with_config(adapter, StoreConfig::default())
    }

    pub fn with_config(adapter: Arc<dyn AdapterBridge>, config: StoreConfig) -> Self {
        let schema = SchemaRegistry::new();
        Self {
            inner: Arc::new(StoreInner {
                inverse: InverseRelationshipTracker::new(schema.clone()),
                schema,
                identity_map: IdentityMap::new(),
                resolver: RelationshipResolver::new(config.enable_metrics),
                adapter,
                notifier: Arc::new(ChangeNotifier::new()),
            }),
        }
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.inner.schema
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.inner.identity_map
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.inner.notifier
    }

    /// Register a record type; types are immutable once registered
    pub fn register_type(&self, definition: TypeDefinition) -> StoreResult<()> {
        self.inner.schema.register(definition)
    }

    /// Push canonical record data from the authoritative source
    ///
    /// Upserts the record cell in place and feeds relationship membership
    /// (id lists, polymorphic `{id, type}` references, `links` entries) into
    /// the resolver. Existing holders of the record and of its relationship
    /// arrays observe the update.
    pub fn push(&self, type_key: &str, payload: Value) -> StoreResult<RecordHandle> {
        let type_key = TypeKey::new(type_key)?;
        self.inner.schema.expect_type(&type_key)?;
        let record = self.inner.identity_map.materialize(&type_key, &payload)?;
        tracing::debug!(record = %record.identity(), "pushed canonical record data");
        self.inner.notifier.emit(&ChangeEvent::RecordUpdated {
            record: record.identity(),
        });
        self.extract_relationships(&record, &payload)?;
        Ok(record)
    }

    /// Push a batch of canonical payloads of one type
    pub fn push_many(&self, type_key: &str, payloads: Vec<Value>) -> StoreResult<Vec<RecordHandle>> {
        payloads
            .into_iter()
            .map(|payload| self.push(type_key, payload))
            .collect()
    }

    /// A loaded record from the identity map, without fetching
    pub fn peek(&self, type_key: &str, id: &str) -> Option<RecordHandle> {
        let type_key = TypeKey::new(type_key).ok()?;
        let identity = RecordIdentity::new(type_key, RecordId::from(id));
        self.inner
            .identity_map
            .get(&identity)
            .filter(|record| record.is_loaded())
    }

    /// A record by type and id, fetching through the adapter when unloaded
    pub async fn find(&self, type_key: &str, id: &str) -> StoreResult<RecordHandle> {
        if let Some(record) = self.peek(type_key, id) {
            return Ok(record);
        }
        let key = TypeKey::new(type_key)?;
        self.inner.schema.expect_type(&key)?;
        let payload = self
            .inner
            .adapter
            .find(&key, &RecordId::from(id))
            .await
            .map_err(StoreError::from)?;
        self.push(type_key, payload)
    }

    /// Create a new, unsaved client record
    ///
    /// Its has-many fields resolve immediately to loaded, empty collections.
    pub fn create_record(&self, type_key: &str) -> StoreResult<RecordHandle> {
        let key = TypeKey::new(type_key)?;
        self.inner.schema.expect_type(&key)?;
        Ok(self.inner.identity_map.create_record(&key))
    }

    /// Remove a record and the relationship state it owns
    ///
    /// Deletion is a store-level decision; relationship logic never unloads
    /// records on its own.
    pub fn unload_record(&self, record: &RecordHandle) {
        let identity = record.identity();
        self.inner.identity_map.remove(&identity);
        self.inner.resolver.remove_owner(&identity);
    }

    /// Sync access to a has-many field
    ///
    /// Resolves entirely from loaded local data; fails with
    /// `UnloadedRecords` when any referenced member is unloaded, and with a
    /// configuration error for relationships declared async.
    pub fn get_has_many(&self, owner: &RecordHandle, field: &str) -> StoreResult<ManyArray> {
        let meta = self.has_many_meta(&owner.type_key(), field)?;
        if meta.is_async() {
            return Err(StoreError::Configuration(format!(
                "relationship '{}.{}' is declared async; use fetch_has_many",
                owner.type_key(),
                field
            )));
        }
        self.inner.resolver.materialize(
            &owner.identity(),
            &meta,
            &self.inner.notifier,
            &self.inner.identity_map,
        )
    }

    /// Async access to a has-many field
    ///
    /// Fetches unloaded members through the adapter; makes zero adapter
    /// calls when every referenced member is already loaded. Sync
    /// relationships resolve locally without suspending.
    pub async fn fetch_has_many(&self, owner: &RecordHandle, field: &str) -> StoreResult<ManyArray> {
        let meta = self.has_many_meta(&owner.type_key(), field)?;
        if !meta.is_async() {
            return self.inner.resolver.materialize(
                &owner.identity(),
                &meta,
                &self.inner.notifier,
                &self.inner.identity_map,
            );
        }
        self.inner
            .resolver
            .fetch(
                &owner.identity(),
                &meta,
                &self.inner.notifier,
                &self.inner.identity_map,
                &self.inner.adapter,
            )
            .await
    }

    /// Force a fresh fetch of a has-many field, in place
    pub async fn reload_has_many(
        &self,
        owner: &RecordHandle,
        field: &str,
    ) -> StoreResult<ManyArray> {
        let meta = self.has_many_meta(&owner.type_key(), field)?;
        self.inner
            .resolver
            .reload(
                &owner.identity(),
                &meta,
                &self.inner.notifier,
                &self.inner.identity_map,
                &self.inner.adapter,
            )
            .await
    }

    /// Whole-collection assignment is rejected: has-many fields are read-only
    ///
    /// Mutation happens through the resolved array's add/remove.
    pub fn set_has_many(
        &self,
        owner: &RecordHandle,
        field: &str,
        _records: &[RecordHandle],
    ) -> StoreResult<()> {
        self.has_many_meta(&owner.type_key(), field)?;
        Err(StoreError::ReadOnlyField {
            type_key: owner.type_key().as_str().to_string(),
            field: field.to_string(),
        })
    }

    /// Set a belongs-to field, mirroring the change onto the inverse
    pub fn set_belongs_to(
        &self,
        owner: &RecordHandle,
        field: &str,
        value: Option<&RecordHandle>,
    ) -> StoreResult<()> {
        let owner_type = owner.type_key();
        let meta = self.relationship_meta(&owner_type, field)?;
        if meta.kind() != RelationshipKind::BelongsTo {
            return Err(StoreError::Configuration(format!(
                "'{}.{}' is not a belongs-to relationship",
                owner_type, field
            )));
        }
        if let Some(record) = value {
            guard::check_membership(&self.inner.schema, &meta, &record.type_key())?;
        }
        let inverse = self.required_inverse(&owner_type, &meta)?;

        let previous = owner.belongs_to(field);
        let next = value.map(|record| record.identity());
        if previous == next {
            return Ok(());
        }
        owner.set_belongs_to_local(field, next);
        owner.mark_dirty();
        self.inner.notifier.emit(&ChangeEvent::BelongsToChanged {
            owner: owner.identity(),
            field: field.to_string(),
        });

        if let Some(inverse) = inverse {
            if let Some(previous_identity) = previous {
                if let Some(previous_record) = self.inner.identity_map.get(&previous_identity) {
                    self.inner.inverse.sync_remove(
                        &self.inner.resolver,
                        &self.inner.notifier,
                        owner,
                        &inverse,
                        &previous_record,
                    )?;
                }
            }
            if let Some(record) = value {
                self.inner.inverse.sync_add(
                    &self.inner.resolver,
                    &self.inner.notifier,
                    owner,
                    &inverse,
                    record,
                )?;
            }
        }
        Ok(())
    }

    /// Aggregate statistics over the store's registries
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            schema: self.inner.schema.stats(),
            identity_map: self.inner.identity_map.stats(),
            resolver: self.inner.resolver.stats(),
        }
    }

    /// Guarded add with owner dirty-marking and inverse mirroring
    pub(crate) fn apply_relationship_add(
        &self,
        array: &ManyArray,
        record: &RecordHandle,
    ) -> StoreResult<bool> {
        let meta = array.meta();
        guard::check_membership(&self.inner.schema, meta, &record.type_key())?;
        if array.contains(record) {
            return Ok(false);
        }
        let owner = self.owner_record(array)?;
        let inverse = self.required_inverse(&array.owner().type_key, meta)?;

        array.local_add(record);
        owner.mark_dirty();
        record.mark_dirty();
        if let Some(inverse) = inverse {
            self.inner.inverse.sync_add(
                &self.inner.resolver,
                &self.inner.notifier,
                &owner,
                &inverse,
                record,
            )?;
        }
        Ok(true)
    }

    /// Remove with inverse mirroring; absent members are a no-op
    pub(crate) fn apply_relationship_remove(
        &self,
        array: &ManyArray,
        record: &RecordHandle,
    ) -> StoreResult<bool> {
        if !array.contains(record) {
            return Ok(false);
        }
        let meta = array.meta();
        let owner = self.owner_record(array)?;
        let inverse = self.required_inverse(&array.owner().type_key, meta)?;

        array.local_remove(record);
        owner.mark_dirty();
        record.mark_dirty();
        if let Some(inverse) = inverse {
            self.inner.inverse.sync_remove(
                &self.inner.resolver,
                &self.inner.notifier,
                &owner,
                &inverse,
                record,
            )?;
        }
        Ok(true)
    }

    /// Create a member record through the relationship and add it
    pub(crate) fn create_through_relationship(
        &self,
        array: &ManyArray,
    ) -> StoreResult<RecordHandle> {
        let meta = array.meta();
        guard::check_create(meta)?;
        let record = self.create_record(meta.bound_target()?.as_str())?;
        self.apply_relationship_add(array, &record)?;
        Ok(record)
    }

    pub(crate) async fn reload_many_array(&self, array: &ManyArray) -> StoreResult<ManyArray> {
        self.inner
            .resolver
            .reload(
                array.owner(),
                array.meta(),
                &self.inner.notifier,
                &self.inner.identity_map,
                &self.inner.adapter,
            )
            .await
    }

    /// Extract relationship membership from a pushed payload
    fn extract_relationships(&self, record: &RecordHandle, payload: &Value) -> StoreResult<()> {
        let owner = record.identity();
        let links = payload.get("links").and_then(|value| value.as_object());
        for meta in self.inner.schema.relationships_of(&owner.type_key) {
            let field = meta.bound_key()?;
            match meta.kind() {
                RelationshipKind::HasMany => {
                    if let Some(value) = payload.get(field) {
                        let ids = self.parse_membership(&meta, field, value)?;
                        self.inner.resolver.push_ids(
                            &owner,
                            &meta,
                            &self.inner.notifier,
                            ids,
                            &self.inner.identity_map,
                        )?;
                    }
                    if let Some(link) = links
                        .and_then(|map| map.get(field))
                        .and_then(|value| value.as_str())
                    {
                        self.inner
                            .resolver
                            .push_link(&owner, &meta, &self.inner.notifier, link)?;
                    }
                }
                RelationshipKind::BelongsTo => {
                    if let Some(value) = payload.get(field) {
                        let reference = self.parse_reference(&meta, field, value)?;
                        record.set_belongs_to_local(field, reference);
                    }
                }
            }
        }
        Ok(())
    }

    /// Parse a canonical has-many membership value
    fn parse_membership(
        &self,
        meta: &Arc<RelationshipMeta>,
        field: &str,
        value: &Value,
    ) -> StoreResult<Vec<RecordIdentity>> {
        let entries = value.as_array().ok_or_else(|| {
            StoreError::Configuration(format!(
                "has-many field '{}' expects an array of references, got {}",
                field, value
            ))
        })?;
        entries
            .iter()
            .map(|entry| {
                self.parse_reference(meta, field, entry)?.ok_or_else(|| {
                    StoreError::Configuration(format!(
                        "has-many field '{}' may not contain null references",
                        field
                    ))
                })
            })
            .collect()
    }

    /// Parse a single record reference: scalar id or `{id, type}`
    fn parse_reference(
        &self,
        meta: &Arc<RelationshipMeta>,
        field: &str,
        value: &Value,
    ) -> StoreResult<Option<RecordIdentity>> {
        if value.is_null() {
            return Ok(None);
        }
        if let Some(id) = RecordId::from_value(value) {
            return Ok(Some(RecordIdentity::new(meta.bound_target()?.clone(), id)));
        }
        if let Some(object) = value.as_object() {
            let id = object
                .get("id")
                .and_then(RecordId::from_value)
                .ok_or_else(|| {
                    StoreError::Configuration(format!(
                        "reference in '{}' is missing an 'id'",
                        field
                    ))
                })?;
            let type_key = match object.get("type").and_then(|t| t.as_str()) {
                Some(raw) => TypeKey::new(raw)?,
                None => meta.bound_target()?.clone(),
            };
            return Ok(Some(RecordIdentity::new(type_key, id)));
        }
        Err(StoreError::Configuration(format!(
            "reference in '{}' must be an id or an {{id, type}} object, got {}",
            field, value
        )))
    }

    /// The has-many meta for a field, searching inherited relationships
    fn has_many_meta(
        &self,
        owner_type: &TypeKey,
        field: &str,
    ) -> StoreResult<Arc<RelationshipMeta>> {
        let meta = self.relationship_meta(owner_type, field)?;
        if meta.kind() != RelationshipKind::HasMany {
            return Err(StoreError::Configuration(format!(
                "'{}.{}' is not a has-many relationship",
                owner_type, field
            )));
        }
        Ok(meta)
    }

    fn relationship_meta(
        &self,
        owner_type: &TypeKey,
        field: &str,
    ) -> StoreResult<Arc<RelationshipMeta>> {
        self.inner
            .schema
            .relationship(owner_type, field)
            .ok_or_else(|| {
                StoreError::Configuration(format!(
                    "no relationship '{}' declared on '{}'",
                    field, owner_type
                ))
            })
    }

    /// Resolve the inverse, converting ambiguity into the mutation-time error
    fn required_inverse(
        &self,
        owner_type: &TypeKey,
        meta: &Arc<RelationshipMeta>,
    ) -> StoreResult<Option<InverseField>> {
        match self.inner.inverse.resolve_inverse(owner_type, meta)? {
            InverseResolution::None => Ok(None),
            InverseResolution::Field(inverse) => Ok(Some(inverse)),
            InverseResolution::Ambiguous(candidates) => Err(StoreError::InverseAmbiguity {
                owner_type: owner_type.as_str().to_string(),
                field: meta.bound_key()?.to_string(),
                target_type: meta.bound_target()?.as_str().to_string(),
                candidates,
            }),
        }
    }

    fn owner_record(&self, array: &ManyArray) -> StoreResult<RecordHandle> {
        self.inner.identity_map.get(array.owner()).ok_or_else(|| {
            StoreError::NotFound {
                type_key: array.owner().type_key.as_str().to_string(),
                id: array.owner().id.as_str().to_string(),
            }
        })
    }
}

/// Aggregate store statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub schema: SchemaStats,
    pub identity_map: IdentityMapStats,
    pub resolver: ResolverStats,
}
