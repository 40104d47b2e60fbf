use std::collections::HashSet;
use std::sync::Arc;

use parcelscout_storage::Storage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::models::{Carrier, Package, PackagePatch};
use crate::stats::PackageStats;

/// Key the package partitions are persisted under
pub const STORAGE_KEY: &str = "package-tracker-storage";

/// The store as the rest of the app sees it. The lock is only ever held for
/// one synchronous operation, never across an await.
pub type SharedStore = Arc<Mutex<PackageStore>>;

/// What actually hits the disk: both partitions, nothing transient
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    packages: Vec<Package>,
    #[serde(default, rename = "archivedPackages")]
    archived_packages: Vec<Package>,
}

/// Client-side table of tracked packages.
///
/// Packages live in exactly one of two ordered partitions, `active` and
/// `archived`, most recently added first. Every method here is the whole
/// mutation surface; the collections themselves are never handed out mutably.
pub struct PackageStore {
    active: Vec<Package>,
    archived: Vec<Package>,
    /// Open loading sections; overlapping bulk refreshes each hold one
    loading: usize,
    error: Option<String>,
    storage: Option<Arc<dyn Storage>>,
}

impl PackageStore {
    /// Store without persistence
    pub fn new() -> Self {
        Self {
            active: Vec::new(),
            archived: Vec::new(),
            loading: 0,
            error: None,
            storage: None,
        }
    }

    /// Restore both partitions from `storage` and keep writing back to it.
    ///
    /// A missing record yields an empty store, and so does a corrupt one. A
    /// failed read is returned as an error: opening empty would let the next
    /// write replace whatever is still on disk. The loading and error flags
    /// always start cleared.
    pub fn open(storage: Arc<dyn Storage>) -> crate::Result<Self> {
        let state = match storage.get(STORAGE_KEY)? {
            Some(raw) => match serde_json::from_str::<PersistedState>(&raw) {
                Ok(state) => state,
                Err(e) => {
                    error!("Persisted package state is corrupt, starting empty: {}", e);
                    PersistedState::default()
                }
            },
            None => PersistedState::default(),
        };

        debug!(
            "Restored {} active and {} archived packages",
            state.packages.len(),
            state.archived_packages.len()
        );

        Ok(Self {
            active: state.packages,
            archived: state.archived_packages,
            loading: 0,
            error: None,
            storage: Some(storage),
        })
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    /// Insert at the front of `active`, replacing any record with the same id
    pub fn add(&mut self, mut package: Package) {
        package.archived = false;
        package.normalize_events();

        self.active.retain(|p| p.id != package.id);
        // An id lives in one partition only
        self.archived.retain(|p| p.id != package.id);

        debug!("Adding package {} ({})", package.id, package.tracking_number);
        self.active.insert(0, package);
        self.persist();
    }

    /// Shallow merge into the active package with this id. Missing id: no-op.
    pub fn update(&mut self, id: &str, patch: PackagePatch) {
        let Some(package) = self.active.iter_mut().find(|p| p.id == id) else {
            debug!("update: {} is not active, ignoring", id);
            return;
        };
        if patch.is_empty() {
            return;
        }

        patch.apply(package);
        self.persist();
    }

    /// Delete from whichever partition holds it
    pub fn remove(&mut self, id: &str) {
        let before = self.active.len() + self.archived.len();
        self.active.retain(|p| p.id != id);
        self.archived.retain(|p| p.id != id);

        if self.active.len() + self.archived.len() != before {
            self.persist();
        }
    }

    /// Move from `active` to the front of `archived`
    pub fn archive(&mut self, id: &str) {
        let Some(pos) = self.active.iter().position(|p| p.id == id) else {
            return;
        };

        let mut package = self.active.remove(pos);
        package.archived = true;
        self.archived.insert(0, package);
        self.persist();
    }

    /// Move from `archived` back to the front of `active`
    pub fn unarchive(&mut self, id: &str) {
        let Some(pos) = self.archived.iter().position(|p| p.id == id) else {
            return;
        };

        let mut package = self.archived.remove(pos);
        package.archived = false;
        self.active.insert(0, package);
        self.persist();
    }

    /// Empty both partitions and drop the persisted record
    pub fn clear(&mut self) {
        self.active.clear();
        self.archived.clear();

        if let Some(storage) = &self.storage {
            if let Err(e) = storage.remove(STORAGE_KEY) {
                warn!("Failed to remove persisted package state: {}", e);
            }
        }
    }

    /// Prepend imported packages whose id is not already tracked.
    ///
    /// Ids already present in either partition are skipped, as are repeats
    /// within `packages` (first one wins). Checking `archived` as well goes
    /// beyond a plain active-only duplicate check on purpose: an id must never
    /// live in both partitions. Survivors keep their input order.
    /// Returns how many were added.
    pub fn import(&mut self, packages: Vec<Package>) -> usize {
        let mut seen: HashSet<String> = self
            .active
            .iter()
            .chain(self.archived.iter())
            .map(|p| p.id.clone())
            .collect();

        let mut fresh: Vec<Package> = packages
            .into_iter()
            .filter(|p| seen.insert(p.id.clone()))
            .map(|mut p| {
                p.archived = false;
                p.normalize_events();
                p
            })
            .collect();

        let added = fresh.len();
        if added == 0 {
            return 0;
        }

        fresh.append(&mut self.active);
        self.active = fresh;
        self.persist();
        added
    }

    pub fn active(&self) -> &[Package] {
        &self.active
    }

    pub fn archived(&self) -> &[Package] {
        &self.archived
    }

    /// Look a package up in either partition
    pub fn get(&self, id: &str) -> Option<&Package> {
        self.active
            .iter()
            .chain(self.archived.iter())
            .find(|p| p.id == id)
    }

    /// First active package with this tracking number
    pub fn find_by_tracking_number(&self, tracking_number: &str) -> Option<&Package> {
        self.active
            .iter()
            .find(|p| p.tracking_number == tracking_number)
    }

    /// Active packages that have not been delivered yet
    pub fn active_undelivered(&self) -> Vec<&Package> {
        self.active.iter().filter(|p| !p.is_delivered()).collect()
    }

    /// Delivered packages that have not been archived
    pub fn delivered(&self) -> Vec<&Package> {
        self.active.iter().filter(|p| p.is_delivered()).collect()
    }

    pub fn by_carrier(&self, carrier: Carrier) -> Vec<&Package> {
        self.active.iter().filter(|p| p.carrier == carrier).collect()
    }

    /// Most recently delivered active packages, newest delivery first
    pub fn recent_deliveries(&self, limit: usize) -> Vec<&Package> {
        let mut delivered = self.delivered();
        delivered.sort_by(|a, b| b.delivered_at.cmp(&a.delivered_at));
        delivered.into_iter().take(limit).collect()
    }

    pub fn stats(&self) -> PackageStats {
        PackageStats::from_packages(&self.active)
    }

    pub fn is_loading(&self) -> bool {
        self.loading > 0
    }

    pub fn begin_loading(&mut self) {
        self.loading += 1;
    }

    pub fn end_loading(&mut self) {
        self.loading = self.loading.saturating_sub(1);
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    fn persist(&self) {
        let Some(storage) = &self.storage else {
            return;
        };

        let state = PersistedState {
            packages: self.active.clone(),
            archived_packages: self.archived.clone(),
        };

        let raw = match serde_json::to_string(&state) {
            Ok(raw) => raw,
            Err(e) => {
                error!("Failed to serialize package state: {}", e);
                return;
            }
        };

        if let Err(e) = storage.set(STORAGE_KEY, &raw) {
            warn!("Failed to persist package state: {}", e);
        }
    }
}

impl Default for PackageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PackageStatus;
    use crate::test_support::{event, package};
    use parcelscout_storage::MemoryStorage;

    fn ids(packages: &[Package]) -> Vec<&str> {
        packages.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_add_prepends() {
        let mut store = PackageStore::new();
        store.add(package("a", PackageStatus::InTransit));
        store.add(package("b", PackageStatus::InTransit));
        assert_eq!(ids(store.active()), vec!["b", "a"]);
    }

    #[test]
    fn test_add_replaces_same_id_and_moves_to_front() {
        let mut store = PackageStore::new();
        store.add(package("a", PackageStatus::InTransit));
        store.add(package("b", PackageStatus::InTransit));

        let mut newer = package("a", PackageStatus::Delivered);
        newer.source = Some("manual".to_string());
        store.add(newer);

        assert_eq!(ids(store.active()), vec!["a", "b"]);
        assert_eq!(store.active().iter().filter(|p| p.id == "a").count(), 1);
        assert_eq!(store.active()[0].status, PackageStatus::Delivered);
        assert_eq!(store.active()[0].source.as_deref(), Some("manual"));
    }

    #[test]
    fn test_add_drops_archived_copy() {
        let mut store = PackageStore::new();
        store.add(package("a", PackageStatus::Delivered));
        store.archive("a");
        store.add(package("a", PackageStatus::InTransit));

        assert_eq!(ids(store.active()), vec!["a"]);
        assert!(store.archived().is_empty());
    }

    #[test]
    fn test_add_sorts_events() {
        let mut store = PackageStore::new();
        let mut pkg = package("a", PackageStatus::InTransit);
        pkg.events = vec![event(1, "old"), event(5, "new")];
        store.add(pkg);
        assert_eq!(store.active()[0].events[0].description, "new");
    }

    #[test]
    fn test_update_and_missing_id() {
        let mut store = PackageStore::new();
        store.add(package("a", PackageStatus::InTransit));

        store.update("a", PackagePatch::nickname(Some("Shoes".to_string())));
        assert_eq!(store.get("a").unwrap().nickname.as_deref(), Some("Shoes"));

        let before = store.active().to_vec();
        store.update("missing", PackagePatch::nickname(Some("x".to_string())));
        assert_eq!(store.active(), before.as_slice());
    }

    #[test]
    fn test_update_ignores_archived() {
        let mut store = PackageStore::new();
        store.add(package("a", PackageStatus::InTransit));
        store.archive("a");
        store.update("a", PackagePatch::nickname(Some("x".to_string())));
        assert_eq!(store.archived()[0].nickname, None);
    }

    #[test]
    fn test_remove_from_either_partition() {
        let mut store = PackageStore::new();
        store.add(package("a", PackageStatus::InTransit));
        store.add(package("b", PackageStatus::Delivered));
        store.archive("b");

        store.remove("b");
        assert!(store.archived().is_empty());
        store.remove("a");
        assert!(store.active().is_empty());

        // idempotent
        store.remove("a");
    }

    #[test]
    fn test_archive_round_trip() {
        let mut store = PackageStore::new();
        let mut pkg = package("a", PackageStatus::Delivered);
        pkg.nickname = Some("Gift".to_string());
        pkg.events = vec![event(2, "Delivered"), event(1, "Shipped")];
        store.add(pkg);
        store.add(package("b", PackageStatus::InTransit));
        let original = store.get("a").unwrap().clone();

        store.archive("a");
        assert_eq!(ids(store.active()), vec!["b"]);
        assert_eq!(ids(store.archived()), vec!["a"]);
        assert!(store.archived()[0].archived);

        store.unarchive("a");
        assert!(store.archived().is_empty());
        assert_eq!(ids(store.active()), vec!["a", "b"]);
        assert_eq!(store.get("a").unwrap(), &original);
    }

    #[test]
    fn test_archive_unknown_is_noop() {
        let mut store = PackageStore::new();
        store.add(package("a", PackageStatus::InTransit));
        store.archive("zzz");
        store.unarchive("a");
        assert_eq!(ids(store.active()), vec!["a"]);
        assert!(store.archived().is_empty());
    }

    #[test]
    fn test_import_dedup_preserves_order() {
        let mut store = PackageStore::new();
        store.add(package("x", PackageStatus::InTransit));
        store.add(package("a", PackageStatus::InTransit));

        let added = store.import(vec![
            package("a", PackageStatus::Delivered),
            package("b", PackageStatus::InTransit),
        ]);

        assert_eq!(added, 1);
        assert_eq!(ids(store.active()), vec!["b", "a", "x"]);
        // The existing "a" was not replaced
        assert_eq!(store.get("a").unwrap().status, PackageStatus::InTransit);
    }

    #[test]
    fn test_import_skips_archived_ids_and_batch_repeats() {
        let mut store = PackageStore::new();
        store.add(package("old", PackageStatus::Delivered));
        store.archive("old");

        let added = store.import(vec![
            package("old", PackageStatus::Delivered),
            package("c", PackageStatus::InTransit),
            package("d", PackageStatus::InTransit),
            package("c", PackageStatus::Exception),
        ]);

        assert_eq!(added, 2);
        assert_eq!(ids(store.active()), vec!["c", "d"]);
        assert_eq!(store.get("c").unwrap().status, PackageStatus::InTransit);
        assert_eq!(ids(store.archived()), vec!["old"]);
    }

    #[test]
    fn test_queries() {
        let mut store = PackageStore::new();
        let mut delivered = package("d", PackageStatus::Delivered);
        delivered.carrier = Carrier::Fedex;
        store.add(delivered);
        store.add(package("t", PackageStatus::InTransit));
        let mut archived = package("z", PackageStatus::Delivered);
        archived.carrier = Carrier::Fedex;
        store.add(archived);
        store.archive("z");

        assert_eq!(store.active_undelivered().len(), 1);
        assert_eq!(store.delivered().len(), 1);
        assert_eq!(store.delivered()[0].id, "d");
        assert_eq!(store.by_carrier(Carrier::Fedex).len(), 1);
        assert_eq!(store.by_carrier(Carrier::Ups).len(), 1);
        assert_eq!(
            store.find_by_tracking_number("TRK-t").map(|p| p.id.as_str()),
            Some("t")
        );
        assert!(store.find_by_tracking_number("TRK-z").is_none());
    }

    #[test]
    fn test_recent_deliveries() {
        let mut store = PackageStore::new();
        for (id, hour) in [("a", 1), ("b", 3), ("c", 2)] {
            let mut pkg = package(id, PackageStatus::Delivered);
            pkg.delivered_at = Some(event(hour, "").timestamp);
            store.add(pkg);
        }
        store.add(package("t", PackageStatus::InTransit));

        let recent: Vec<_> = store.recent_deliveries(2).iter().map(|p| p.id.clone()).collect();
        assert_eq!(recent, vec!["b", "c"]);
    }

    #[test]
    fn test_loading_sections_nest() {
        let mut store = PackageStore::new();
        assert!(!store.is_loading());
        store.begin_loading();
        store.begin_loading();
        store.end_loading();
        assert!(store.is_loading());
        store.end_loading();
        assert!(!store.is_loading());
        store.end_loading();
        assert!(!store.is_loading());
    }

    #[test]
    fn test_persistence_round_trip() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

        {
            let mut store = PackageStore::open(Arc::clone(&storage)).unwrap();
            store.add(package("a", PackageStatus::InTransit));
            store.add(package("b", PackageStatus::Delivered));
            store.archive("b");
            store.set_error("boom");
            store.begin_loading();
        }

        let restored = PackageStore::open(Arc::clone(&storage)).unwrap();
        assert_eq!(ids(restored.active()), vec!["a"]);
        assert_eq!(ids(restored.archived()), vec!["b"]);
        assert!(!restored.is_loading());
        assert_eq!(restored.error(), None);
    }

    #[test]
    fn test_persisted_shape() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut store = PackageStore::open(Arc::clone(&storage)).unwrap();
        store.add(package("a", PackageStatus::InTransit));

        let raw = storage.get(STORAGE_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["packages"].as_array().unwrap().len(), 1);
        assert!(object["archivedPackages"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_state_starts_empty() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage.set(STORAGE_KEY, "{not json").unwrap();

        let store = PackageStore::open(storage).unwrap();
        assert!(store.active().is_empty());
        assert!(store.archived().is_empty());
    }

    /// Storage whose reads can be switched off
    struct FailingReads {
        inner: MemoryStorage,
        fail: std::sync::atomic::AtomicBool,
    }

    impl Storage for FailingReads {
        fn get(&self, key: &str) -> parcelscout_storage::Result<Option<String>> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(parcelscout_storage::StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "database is locked",
                )));
            }
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> parcelscout_storage::Result<()> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> parcelscout_storage::Result<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_failed_read_keeps_persisted_state() {
        let storage = Arc::new(FailingReads {
            inner: MemoryStorage::new(),
            fail: std::sync::atomic::AtomicBool::new(false),
        });

        {
            let mut store = PackageStore::open(storage.clone()).unwrap();
            store.add(package("a", PackageStatus::InTransit));
            store.add(package("b", PackageStatus::InTransit));
            store.add(package("c", PackageStatus::Delivered));
        }

        storage.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let result = PackageStore::open(storage.clone());
        assert!(matches!(result, Err(crate::Error::StorageError(_))));

        storage.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        let restored = PackageStore::open(storage).unwrap();
        assert_eq!(ids(restored.active()), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_clear_removes_persisted_record() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut store = PackageStore::open(Arc::clone(&storage)).unwrap();
        store.add(package("a", PackageStatus::InTransit));
        store.add(package("b", PackageStatus::InTransit));
        store.archive("b");

        store.clear();
        assert_eq!(storage.get(STORAGE_KEY).unwrap(), None);

        let restored = PackageStore::open(storage).unwrap();
        assert!(restored.active().is_empty());
        assert!(restored.archived().is_empty());
    }

    #[test]
    fn test_empty_patch_does_not_write() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut store = PackageStore::open(Arc::clone(&storage)).unwrap();
        store.add(package("a", PackageStatus::InTransit));
        storage.remove(STORAGE_KEY).unwrap();

        store.update("a", PackagePatch::default());
        assert_eq!(storage.get(STORAGE_KEY).unwrap(), None);

        store.update("a", PackagePatch::nickname(Some("Shoes".to_string())));
        assert!(storage.get(STORAGE_KEY).unwrap().is_some());
    }
}
