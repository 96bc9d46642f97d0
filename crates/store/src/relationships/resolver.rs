//! Relationship Resolver - Per-(owner, field) fetch coordination and caching
//!
//! The resolver decides, on each access, whether a has-many relationship is
//! already resolvable from local data, must be fetched by id list, or must be
//! fetched via an opaque link. It guarantees at most one in-flight fetch per
//! (owner, field): concurrent accessors serialize on a per-entry lock and the
//! late arrivals observe the completed resolution instead of issuing a
//! duplicate request. Canonical pushes bump an epoch; a fetch whose epoch is
//! stale by the time it completes is discarded and re-planned, so the last
//! canonical write wins at apply time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::adapter::{AdapterBridge, AdapterError};
use crate::error::{StoreError, StoreResult};
use crate::identity_map::IdentityMap;
use crate::notify::ChangeNotifier;
use crate::record::{RecordHandle, RecordIdentity, TypeKey};
use crate::relationships::many_array::ManyArray;
use crate::relationships::metadata::RelationshipMeta;

/// Fetch lifecycle of one relationship entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Fetching,
    Resolved,
    Errored,
}

/// How the relationship is currently addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Addressing {
    Ids,
    Link,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct RelationshipKey {
    owner: RecordIdentity,
    field: String,
}

struct ResolverEntry {
    canonical: Vec<RecordIdentity>,
    link: Option<String>,
    resolved_link: Option<String>,
    addressing: Addressing,
    state: FetchState,
    canonical_dirty: bool,
    epoch: u64,
    array: ManyArray,
}

impl ResolverEntry {
    fn needs_resolution(&self) -> bool {
        if self.canonical_dirty {
            return true;
        }
        match self.state {
            FetchState::Idle | FetchState::Fetching | FetchState::Errored => true,
            FetchState::Resolved => match self.addressing {
                Addressing::Link => self.resolved_link != self.link,
                Addressing::Ids => false,
            },
        }
    }

    fn unloaded_members(&self, map: &IdentityMap) -> Vec<RecordIdentity> {
        self.canonical
            .iter()
            .filter(|identity| !map.is_loaded(identity))
            .cloned()
            .collect()
    }
}

struct EntryCell {
    entry: std::sync::RwLock<ResolverEntry>,
    fetch_lock: Mutex<()>,
}

impl EntryCell {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, ResolverEntry> {
        self.entry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ResolverEntry> {
        self.entry.write().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: FetchState) {
        self.write().state = state;
    }
}

enum FetchPlan {
    /// Current resolution is valid; nothing to do
    Done(ManyArray),
    /// Everything referenced is loaded locally; reconcile without the adapter
    Local { epoch: u64 },
    /// Fetch the membership via the opaque link
    Link { link: String, epoch: u64 },
    /// Fetch the given unloaded subset by id
    Ids {
        missing: Vec<RecordIdentity>,
        epoch: u64,
    },
}

/// Coordinates materialization and fetching for every has-many entry
pub struct RelationshipResolver {
    entries: DashMap<RelationshipKey, Arc<EntryCell>>,
    enable_metrics: bool,
    fetches_issued: AtomicU64,
    superseded_discards: AtomicU64,
}

impl RelationshipResolver {
    pub(crate) fn new(enable_metrics: bool) -> Self {
        Self {
            entries: DashMap::new(),
            enable_metrics,
            fetches_issued: AtomicU64::new(0),
            superseded_discards: AtomicU64::new(0),
        }
    }

    fn entry_for(
        &self,
        owner: &RecordIdentity,
        meta: &Arc<RelationshipMeta>,
        notifier: &Arc<ChangeNotifier>,
    ) -> StoreResult<Arc<EntryCell>> {
        let key = RelationshipKey {
            owner: owner.clone(),
            field: meta.bound_key()?.to_string(),
        };
        if let Some(cell) = self.entries.get(&key) {
            return Ok(cell.value().clone());
        }
        let array = ManyArray::new(owner.clone(), Arc::clone(meta), Arc::clone(notifier))?;
        let cell = Arc::new(EntryCell {
            entry: std::sync::RwLock::new(ResolverEntry {
                canonical: Vec::new(),
                link: None,
                resolved_link: None,
                addressing: Addressing::Ids,
                state: FetchState::Idle,
                canonical_dirty: false,
                epoch: 0,
                array,
            }),
            fetch_lock: Mutex::new(()),
        });
        Ok(self.entries.entry(key).or_insert(cell).value().clone())
    }

    /// Canonical id-list push from the authoritative source
    pub(crate) fn push_ids(
        &self,
        owner: &RecordIdentity,
        meta: &Arc<RelationshipMeta>,
        notifier: &Arc<ChangeNotifier>,
        ids: Vec<RecordIdentity>,
        map: &IdentityMap,
    ) -> StoreResult<()> {
        let cell = self.entry_for(owner, meta, notifier)?;
        let reconcile_now = {
            let mut entry = cell.write();
            entry.canonical = ids;
            entry.addressing = Addressing::Ids;
            entry.epoch += 1;
            if entry.unloaded_members(map).is_empty() {
                entry.canonical_dirty = false;
                entry.state = FetchState::Resolved;
                Some((entry.array.clone(), entry.canonical.clone()))
            } else {
                entry.canonical_dirty = true;
                None
            }
        };
        // Reconcile outside the entry lock; listeners may re-enter the resolver.
        if let Some((array, canonical)) = reconcile_now {
            array.reconcile(&canonical, map);
        }
        Ok(())
    }

    /// Canonical link push; a changed link invalidates the cached resolution
    pub(crate) fn push_link(
        &self,
        owner: &RecordIdentity,
        meta: &Arc<RelationshipMeta>,
        notifier: &Arc<ChangeNotifier>,
        link: &str,
    ) -> StoreResult<()> {
        let cell = self.entry_for(owner, meta, notifier)?;
        let array = {
            let mut entry = cell.write();
            let changed = entry.link.as_deref() != Some(link);
            entry.addressing = Addressing::Link;
            if !changed {
                return Ok(());
            }
            if entry.state == FetchState::Resolved {
                tracing::debug!(
                    owner = %owner,
                    field = meta.bound_key()?,
                    link,
                    "relationship link changed; invalidating cached resolution"
                );
            }
            entry.link = Some(link.to_string());
            entry.epoch += 1;
            entry.array.clone()
        };
        array.set_link(Some(link.to_string()));
        Ok(())
    }

    /// Synchronous resolution from already-loaded local data
    ///
    /// Fails with `UnloadedRecords` if any referenced member is unloaded;
    /// callers must preload the data or declare the relationship async.
    pub(crate) fn materialize(
        &self,
        owner: &RecordIdentity,
        meta: &Arc<RelationshipMeta>,
        notifier: &Arc<ChangeNotifier>,
        map: &IdentityMap,
    ) -> StoreResult<ManyArray> {
        let cell = self.entry_for(owner, meta, notifier)?;
        let (array, canonical) = {
            let mut entry = cell.write();
            if !entry.needs_resolution() {
                return Ok(entry.array.clone());
            }
            let missing = entry.unloaded_members(map);
            if !missing.is_empty() {
                return Err(StoreError::UnloadedRecords {
                    owner_type: owner.type_key.as_str().to_string(),
                    owner_id: owner.id.as_str().to_string(),
                    field: meta.bound_key()?.to_string(),
                    missing: missing.iter().map(|m| m.to_string()).collect(),
                });
            }
            entry.canonical_dirty = false;
            entry.state = FetchState::Resolved;
            (entry.array.clone(), entry.canonical.clone())
        };
        array.reconcile(&canonical, map);
        Ok(array)
    }

    /// Asynchronous resolution, fetching unloaded members through the adapter
    ///
    /// Zero adapter calls are made when every referenced member is already
    /// loaded locally.
    pub(crate) async fn fetch(
        &self,
        owner: &RecordIdentity,
        meta: &Arc<RelationshipMeta>,
        notifier: &Arc<ChangeNotifier>,
        map: &IdentityMap,
        adapter: &Arc<dyn AdapterBridge>,
    ) -> StoreResult<ManyArray> {
        let cell = self.entry_for(owner, meta, notifier)?;
        let _fetch_guard = cell.fetch_lock.lock().await;
        loop {
            let plan = {
                let entry = cell.read();
                if !entry.needs_resolution() {
                    FetchPlan::Done(entry.array.clone())
                } else if entry.addressing == Addressing::Link && entry.link.is_some() {
                    FetchPlan::Link {
                        link: entry.link.clone().unwrap_or_default(),
                        epoch: entry.epoch,
                    }
                } else {
                    let missing = entry.unloaded_members(map);
                    if missing.is_empty() {
                        FetchPlan::Local { epoch: entry.epoch }
                    } else {
                        FetchPlan::Ids {
                            missing,
                            epoch: entry.epoch,
                        }
                    }
                }
            };
            match self
                .execute_plan(&cell, plan, owner, meta, map, adapter)
                .await?
            {
                Some(array) => return Ok(array),
                None => continue,
            }
        }
    }

    /// Force a fresh fetch using the currently known addressing mode
    ///
    /// Link if present, else the full canonical id list. Contents are
    /// replaced in place; the array identity is preserved.
    pub(crate) async fn reload(
        &self,
        owner: &RecordIdentity,
        meta: &Arc<RelationshipMeta>,
        notifier: &Arc<ChangeNotifier>,
        map: &IdentityMap,
        adapter: &Arc<dyn AdapterBridge>,
    ) -> StoreResult<ManyArray> {
        let cell = self.entry_for(owner, meta, notifier)?;
        let _fetch_guard = cell.fetch_lock.lock().await;
        loop {
            let plan = {
                let entry = cell.read();
                match &entry.link {
                    Some(link) => FetchPlan::Link {
                        link: link.clone(),
                        epoch: entry.epoch,
                    },
                    None => FetchPlan::Ids {
                        missing: entry.canonical.clone(),
                        epoch: entry.epoch,
                    },
                }
            };
            match self
                .execute_plan(&cell, plan, owner, meta, map, adapter)
                .await?
            {
                Some(array) => return Ok(array),
                None => continue,
            }
        }
    }

    /// Run one plan; `None` means the plan went stale and must be recomputed
    async fn execute_plan(
        &self,
        cell: &Arc<EntryCell>,
        plan: FetchPlan,
        owner: &RecordIdentity,
        meta: &Arc<RelationshipMeta>,
        map: &IdentityMap,
        adapter: &Arc<dyn AdapterBridge>,
    ) -> StoreResult<Option<ManyArray>> {
        match plan {
            FetchPlan::Done(array) => Ok(Some(array)),
            FetchPlan::Local { epoch } => {
                let (array, canonical) = {
                    let mut entry = cell.write();
                    if entry.epoch != epoch {
                        return Ok(None);
                    }
                    entry.canonical_dirty = false;
                    entry.resolved_link = None;
                    entry.state = FetchState::Resolved;
                    (entry.array.clone(), entry.canonical.clone())
                };
                array.reconcile(&canonical, map);
                Ok(Some(array))
            }
            FetchPlan::Link { link, epoch } => {
                cell.set_state(FetchState::Fetching);
                self.count_fetch();
                tracing::debug!(owner = %owner, field = meta.bound_key()?, link = %link, "fetching has-many via link");
                let payloads = match adapter.find_has_many(owner, &link, meta).await {
                    Ok(payloads) => payloads,
                    Err(err) => {
                        cell.set_state(FetchState::Errored);
                        return Err(err.into());
                    }
                };
                let mut records = Vec::with_capacity(payloads.len());
                for payload in &payloads {
                    let type_key = match payload.get("type").and_then(|v| v.as_str()) {
                        Some(raw) => TypeKey::new(raw)?,
                        None => meta.bound_target()?.clone(),
                    };
                    records.push(map.materialize(&type_key, payload)?);
                }
                let array = {
                    let mut entry = cell.write();
                    if entry.epoch != epoch {
                        self.count_discard(owner, meta);
                        return Ok(None);
                    }
                    entry.canonical = records.iter().map(|r| r.identity()).collect();
                    entry.resolved_link = Some(link.clone());
                    entry.canonical_dirty = false;
                    entry.state = FetchState::Resolved;
                    entry.array.clone()
                };
                array.apply_fetched(records, Some(link));
                Ok(Some(array))
            }
            FetchPlan::Ids { missing, epoch } => {
                cell.set_state(FetchState::Fetching);
                self.count_fetch();
                tracing::debug!(
                    owner = %owner,
                    field = meta.bound_key()?,
                    missing = missing.len(),
                    "fetching unloaded has-many members by id"
                );
                if let Err(err) = self.fetch_by_ids(map, adapter, &missing).await {
                    cell.set_state(FetchState::Errored);
                    return Err(err.into());
                }
                let (array, canonical) = {
                    let mut entry = cell.write();
                    if entry.epoch != epoch {
                        self.count_discard(owner, meta);
                        return Ok(None);
                    }
                    entry.canonical_dirty = false;
                    entry.resolved_link = None;
                    entry.state = FetchState::Resolved;
                    (entry.array.clone(), entry.canonical.clone())
                };
                array.reconcile(&canonical, map);
                Ok(Some(array))
            }
        }
    }

    /// Fetch an unloaded id set, batching per type where a batch is viable
    async fn fetch_by_ids(
        &self,
        map: &IdentityMap,
        adapter: &Arc<dyn AdapterBridge>,
        missing: &[RecordIdentity],
    ) -> Result<(), AdapterError> {
        let mut groups: Vec<(TypeKey, Vec<RecordIdentity>)> = Vec::new();
        for identity in missing {
            match groups.iter_mut().find(|(key, _)| key == &identity.type_key) {
                Some((_, members)) => members.push(identity.clone()),
                None => groups.push((identity.type_key.clone(), vec![identity.clone()])),
            }
        }
        for (type_key, members) in groups {
            if members.len() > 1 {
                let ids: Vec<_> = members.iter().map(|m| m.id.clone()).collect();
                let payloads = adapter.find_many(&type_key, &ids).await?;
                for payload in &payloads {
                    map.materialize(&type_key, payload).map_err(|err| {
                        AdapterError::MalformedPayload(err.to_string())
                    })?;
                }
            } else {
                let identity = &members[0];
                let payload = adapter.find(&type_key, &identity.id).await?;
                map.materialize(&type_key, &payload)
                    .map_err(|err| AdapterError::MalformedPayload(err.to_string()))?;
            }
        }
        Ok(())
    }

    /// Mirror an add without guard or inverse handling (inverse side only)
    pub(crate) fn local_add(
        &self,
        owner: &RecordIdentity,
        meta: &Arc<RelationshipMeta>,
        notifier: &Arc<ChangeNotifier>,
        record: &RecordHandle,
    ) -> StoreResult<bool> {
        let cell = self.entry_for(owner, meta, notifier)?;
        let array = cell.read().array.clone();
        Ok(array.local_add(record))
    }

    /// Mirror a remove without inverse handling (inverse side only)
    pub(crate) fn local_remove(
        &self,
        owner: &RecordIdentity,
        meta: &Arc<RelationshipMeta>,
        notifier: &Arc<ChangeNotifier>,
        record: &RecordHandle,
    ) -> StoreResult<bool> {
        let cell = self.entry_for(owner, meta, notifier)?;
        let array = cell.read().array.clone();
        Ok(array.local_remove(record))
    }

    /// Drop all relationship state owned by a destroyed record
    pub(crate) fn remove_owner(&self, owner: &RecordIdentity) {
        self.entries.retain(|key, _| &key.owner != owner);
    }

    /// Current resolver statistics
    pub fn stats(&self) -> ResolverStats {
        let mut resolved_entries = 0;
        let mut errored_entries = 0;
        for cell in self.entries.iter() {
            match cell.value().read().state {
                FetchState::Resolved => resolved_entries += 1,
                FetchState::Errored => errored_entries += 1,
                _ => {}
            }
        }
        ResolverStats {
            total_entries: self.entries.len(),
            resolved_entries,
            errored_entries,
            fetches_issued: self.fetches_issued.load(Ordering::Relaxed),
            superseded_discards: self.superseded_discards.load(Ordering::Relaxed),
        }
    }

    fn count_fetch(&self) {
        if self.enable_metrics {
            self.fetches_issued.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn count_discard(&self, owner: &RecordIdentity, meta: &Arc<RelationshipMeta>) {
        tracing::debug!(
            owner = %owner,
            field = meta.key().unwrap_or("<unbound>"),
            "discarding superseded fetch result"
        );
        if self.enable_metrics {
            self.superseded_discards.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Resolver statistics
#[derive(Debug, Clone)]
pub struct ResolverStats {
    pub total_entries: usize,
    pub resolved_entries: usize,
    pub errored_entries: usize,
    pub fetches_issued: u64,
    pub superseded_discards: u64,
}
