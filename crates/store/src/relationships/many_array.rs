//! ManyArray - The materialized, ordered collection behind a has-many field
//!
//! One ManyArray exists per (owner, field). It is a shared handle: clones
//! observe the same underlying state, and new canonical data mutates the
//! collection in place so existing holders see updates rather than receiving
//! a new instance. Element order always reflects the most recently pushed
//! canonical ordering, and no duplicate identities are ever present.

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::StoreResult;
use crate::identity_map::IdentityMap;
use crate::notify::{ChangeEvent, ChangeNotifier};
use crate::record::{RecordHandle, RecordIdentity, TypeKey};
use crate::relationships::metadata::RelationshipMeta;
use crate::store::Store;

struct ManyArrayState {
    records: Vec<RecordHandle>,
    is_loaded: bool,
    link: Option<String>,
}

struct ManyArrayInner {
    owner: RecordIdentity,
    field: String,
    meta: Arc<RelationshipMeta>,
    state: RwLock<ManyArrayState>,
    notifier: Arc<ChangeNotifier>,
}

/// Shared handle over one has-many collection
#[derive(Clone)]
pub struct ManyArray {
    inner: Arc<ManyArrayInner>,
}

impl ManyArray {
    pub(crate) fn new(
        owner: RecordIdentity,
        meta: Arc<RelationshipMeta>,
        notifier: Arc<ChangeNotifier>,
    ) -> StoreResult<Self> {
        let field = meta.bound_key()?.to_string();
        Ok(Self {
            inner: Arc::new(ManyArrayInner {
                owner,
                field,
                meta,
                state: RwLock::new(ManyArrayState {
                    records: Vec::new(),
                    is_loaded: false,
                    link: None,
                }),
                notifier,
            }),
        })
    }

    pub fn owner(&self) -> &RecordIdentity {
        &self.inner.owner
    }

    pub fn field(&self) -> &str {
        &self.inner.field
    }

    /// The declared (or inferred) member base type
    pub fn base_type(&self) -> &TypeKey {
        // Meta is always bound before an array is created.
        self.inner
            .meta
            .target_type()
            .expect("many-array created from unbound relationship")
    }

    pub fn is_polymorphic(&self) -> bool {
        self.inner.meta.is_polymorphic()
    }

    pub(crate) fn meta(&self) -> &Arc<RelationshipMeta> {
        &self.inner.meta
    }

    /// True once every member is materialized (sync) or a fetch completed (async)
    pub fn is_loaded(&self) -> bool {
        self.read().is_loaded
    }

    /// Last known fetch URL for this relationship, if link-addressed
    pub fn link(&self) -> Option<String> {
        self.read().link.clone()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    /// The member at `index`, if present
    pub fn get(&self, index: usize) -> Option<RecordHandle> {
        self.read().records.get(index).cloned()
    }

    /// Ordered snapshot of the current members
    pub fn records(&self) -> Vec<RecordHandle> {
        self.read().records.clone()
    }

    /// Ordered snapshot of the current member identities
    pub fn record_identities(&self) -> Vec<RecordIdentity> {
        self.read().records.iter().map(|r| r.identity()).collect()
    }

    pub fn contains(&self, record: &RecordHandle) -> bool {
        let identity = record.identity();
        self.read().records.iter().any(|r| r.identity() == identity)
    }

    /// True if both handles refer to the same underlying collection
    pub fn same_array(&self, other: &ManyArray) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Add a record, enforcing the type guard and mirroring the inverse
    ///
    /// Adding a present member is a no-op; returns whether membership changed.
    pub fn add(&self, store: &Store, record: &RecordHandle) -> StoreResult<bool> {
        store.apply_relationship_add(self, record)
    }

    /// Remove a record, mirroring the inverse
    ///
    /// Removing an absent member is a no-op; returns whether membership changed.
    pub fn remove(&self, store: &Store, record: &RecordHandle) -> StoreResult<bool> {
        store.apply_relationship_remove(self, record)
    }

    /// Create a new record of the member type and add it
    ///
    /// Rejected for polymorphic relationships: there is no single concrete
    /// type to instantiate.
    pub fn create_record(&self, store: &Store) -> StoreResult<RecordHandle> {
        store.create_through_relationship(self)
    }

    /// Force a fresh fetch using the current addressing mode
    pub async fn reload(&self, store: &Store) -> StoreResult<ManyArray> {
        store.reload_many_array(self).await
    }

    /// Rebuild elements to exactly match the canonical ordered id list
    ///
    /// Existing handles are reused by identity, newly introduced identities
    /// are taken from the identity map, and identities no longer present are
    /// dropped. Returns true when every canonical member was materialized.
    pub(crate) fn reconcile(&self, canonical: &[RecordIdentity], map: &IdentityMap) -> bool {
        let mut changed = false;
        let all_present;
        {
            let mut state = self.write();
            let mut next: Vec<RecordHandle> = Vec::with_capacity(canonical.len());
            let mut missing = false;
            for identity in canonical {
                if next.iter().any(|r| &r.identity() == identity) {
                    continue;
                }
                let existing = state
                    .records
                    .iter()
                    .find(|r| &r.identity() == identity)
                    .cloned();
                match existing.or_else(|| map.get(identity).filter(|r| r.is_loaded())) {
                    Some(record) => next.push(record),
                    None => missing = true,
                }
            }
            all_present = !missing;

            let order_changed = state.records.len() != next.len()
                || state
                    .records
                    .iter()
                    .zip(next.iter())
                    .any(|(a, b)| a.identity() != b.identity());
            if order_changed || state.is_loaded != all_present {
                state.records = next;
                state.is_loaded = all_present;
                changed = true;
            }
        }
        if changed {
            self.notify();
        }
        all_present
    }

    /// Replace contents atomically from a completed fetch
    pub(crate) fn apply_fetched(&self, records: Vec<RecordHandle>, link: Option<String>) {
        {
            let mut state = self.write();
            let mut next: Vec<RecordHandle> = Vec::with_capacity(records.len());
            for record in records {
                if !next.iter().any(|r| r.identity() == record.identity()) {
                    next.push(record);
                }
            }
            state.records = next;
            state.is_loaded = true;
            if link.is_some() {
                state.link = link;
            }
        }
        self.notify();
    }

    pub(crate) fn set_link(&self, link: Option<String>) {
        self.write().link = link;
    }

    /// Append a member without guard or inverse handling; set-like
    pub(crate) fn local_add(&self, record: &RecordHandle) -> bool {
        {
            let mut state = self.write();
            let identity = record.identity();
            if state.records.iter().any(|r| r.identity() == identity) {
                return false;
            }
            state.records.push(record.clone());
        }
        self.notify();
        true
    }

    /// Drop a member without inverse handling; absent member is a no-op
    pub(crate) fn local_remove(&self, record: &RecordHandle) -> bool {
        {
            let mut state = self.write();
            let identity = record.identity();
            let before = state.records.len();
            state.records.retain(|r| r.identity() != identity);
            if state.records.len() == before {
                return false;
            }
        }
        self.notify();
        true
    }

    fn notify(&self) {
        self.inner.notifier.emit(&ChangeEvent::HasManyChanged {
            owner: self.inner.owner.clone(),
            field: self.inner.field.clone(),
        });
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ManyArrayState> {
        self.inner.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ManyArrayState> {
        self.inner.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ManyArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("ManyArray")
            .field("owner", &self.inner.owner)
            .field("field", &self.inner.field)
            .field("len", &state.records.len())
            .field("is_loaded", &state.is_loaded)
            .field("link", &state.link)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordId;
    use crate::relationships::has_many::has_many;
    use crate::relationships::metadata::RelationshipOptions;
    use serde_json::json;

    fn type_key(raw: &str) -> TypeKey {
        TypeKey::new(raw).unwrap()
    }

    fn identity(type_raw: &str, id: i64) -> RecordIdentity {
        RecordIdentity::new(type_key(type_raw), RecordId::from(id))
    }

    fn fixture() -> (ManyArray, IdentityMap) {
        let meta = has_many(Some("comment"), RelationshipOptions::sync()).unwrap();
        meta.bind("comments", &type_key("post")).unwrap();
        let array = ManyArray::new(
            identity("post", 1),
            Arc::new(meta),
            Arc::new(ChangeNotifier::new()),
        )
        .unwrap();
        let map = IdentityMap::new();
        for id in 1..=4 {
            map.materialize(&type_key("comment"), &json!({ "id": id }))
                .unwrap();
        }
        (array, map)
    }

    fn ids(raw: &[i64]) -> Vec<RecordIdentity> {
        raw.iter().map(|id| identity("comment", *id)).collect()
    }

    fn observed_ids(array: &ManyArray) -> Vec<String> {
        array
            .record_identities()
            .iter()
            .map(|identity| identity.id.as_str().to_string())
            .collect()
    }

    #[test]
    fn test_reconcile_matches_pushed_order_exactly() {
        let (array, map) = fixture();

        assert!(array.reconcile(&ids(&[1, 2]), &map));
        assert_eq!(observed_ids(&array), ["1", "2"]);

        assert!(array.reconcile(&ids(&[2, 1]), &map));
        assert_eq!(observed_ids(&array), ["2", "1"]);

        assert!(array.reconcile(&ids(&[2]), &map));
        assert_eq!(observed_ids(&array), ["2"]);

        assert!(array.reconcile(&ids(&[1, 2, 3, 4]), &map));
        assert_eq!(observed_ids(&array), ["1", "2", "3", "4"]);

        assert!(array.reconcile(&ids(&[4, 3]), &map));
        assert_eq!(observed_ids(&array), ["4", "3"]);

        assert!(array.reconcile(&ids(&[4, 2, 3, 1]), &map));
        assert_eq!(observed_ids(&array), ["4", "2", "3", "1"]);
    }

    #[test]
    fn test_reconcile_reuses_existing_handles() {
        let (array, map) = fixture();
        array.reconcile(&ids(&[1, 2]), &map);
        let first = array.get(0).unwrap();

        array.reconcile(&ids(&[2, 1]), &map);
        let moved = array.get(1).unwrap();
        assert!(first.same_record(&moved));
    }

    #[test]
    fn test_reconcile_reports_missing_members() {
        let (array, map) = fixture();
        assert!(!array.reconcile(&ids(&[1, 99]), &map));
        assert!(!array.is_loaded());
        assert_eq!(observed_ids(&array), ["1"]);

        assert!(array.reconcile(&ids(&[1]), &map));
        assert!(array.is_loaded());
    }

    #[test]
    fn test_reconcile_drops_duplicate_identities() {
        let (array, map) = fixture();
        assert!(array.reconcile(&ids(&[1, 2, 1]), &map));
        assert_eq!(observed_ids(&array), ["1", "2"]);
    }

    #[test]
    fn test_local_add_and_remove_are_idempotent() {
        let (array, map) = fixture();
        let comment = map.get(&identity("comment", 1)).unwrap();

        assert!(array.local_add(&comment));
        assert!(!array.local_add(&comment));
        assert_eq!(array.len(), 1);

        assert!(array.local_remove(&comment));
        assert!(!array.local_remove(&comment));
        assert_eq!(array.len(), 0);
    }

    #[test]
    fn test_clones_share_state_and_identity() {
        let (array, map) = fixture();
        let alias = array.clone();
        array.reconcile(&ids(&[3, 4]), &map);

        assert!(array.same_array(&alias));
        assert_eq!(observed_ids(&alias), ["3", "4"]);
    }

    #[test]
    fn test_notifications_on_visible_transitions() {
        let meta = has_many(Some("comment"), RelationshipOptions::sync()).unwrap();
        meta.bind("comments", &type_key("post")).unwrap();
        let notifier = Arc::new(ChangeNotifier::new());
        let array =
            ManyArray::new(identity("post", 1), Arc::new(meta), Arc::clone(&notifier)).unwrap();

        let seen = Arc::new(std::sync::Mutex::new(0usize));
        let seen_clone = Arc::clone(&seen);
        notifier.subscribe(move |event| {
            if matches!(event, ChangeEvent::HasManyChanged { .. }) {
                *seen_clone.lock().unwrap() += 1;
            }
        });

        let map = IdentityMap::new();
        map.materialize(&type_key("comment"), &json!({ "id": 1 }))
            .unwrap();
        array.reconcile(&ids(&[1]), &map);
        assert_eq!(*seen.lock().unwrap(), 1);

        // No visible transition, no notification
        array.reconcile(&ids(&[1]), &map);
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
