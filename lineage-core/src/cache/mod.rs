//! Two-tier cache of current and historical entity versions.
//!
//! Each cache instance owns one mutex guarding its fast tier. Every read and
//! write for that entity kind, including migration of evicted entries into
//! the durable tier, happens under that mutex, so a concurrent reader finds
//! an entry in exactly one tier. Entries are promoted back into the fast
//! tier on a best-effort basis when a durable read succeeds.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{Changeset, ChangesetId, Id, Version, Versioned};

mod durable;
mod fast;
#[cfg(feature = "store-sqlite")]
mod sqlite;

pub use durable::{BoxedError, DurableTier, DurableTierError};
#[cfg(feature = "store-sqlite")]
pub use sqlite::{SqliteCacheDb, SqliteCacheError, SqliteDurableTier};

use fast::FastTier;

const HOUR: Duration = Duration::from_secs(60 * 60);

/// Bounds for both cache tiers.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use lineage_core::CacheConfig;
///
/// let config: CacheConfig = serde_json::from_str(r#"{ "max_entries": 64 }"#).unwrap();
/// assert_eq!(config.max_entries, 64);
/// assert_eq!(config.max_age, Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of ids held by the fast tier.
    pub max_entries: usize,
    /// Maximum time an entry stays in the fast tier after its last change.
    #[serde(with = "seconds")]
    pub max_age: Duration,
    /// Maximum number of records kept by the durable tier.
    pub durable_max_entries: usize,
    /// Maximum age of a durable record.
    #[serde(with = "seconds")]
    pub durable_max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_age: HOUR,
            durable_max_entries: 1_000_000,
            durable_max_age: HOUR * 24 * 7,
        }
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Every cached version of one id plus the version last seen as current.
///
/// `unavailable` lists versions a full history fetch did not return, such as
/// redacted ones. It lives only in the fast tier.
#[derive(Debug)]
struct Bundle<T> {
    current: Option<Version>,
    versions: BTreeMap<Version, Arc<T>>,
    unavailable: BTreeSet<Version>,
}

impl<T> Default for Bundle<T> {
    fn default() -> Self {
        Self {
            current: None,
            versions: BTreeMap::new(),
            unavailable: BTreeSet::new(),
        }
    }
}

impl<T: Versioned> Bundle<T> {
    fn from_values(values: Vec<T>) -> Self {
        let mut bundle = Self::default();
        for value in values {
            bundle.record(Arc::new(value));
        }
        bundle
    }

    fn current(&self) -> Option<&Arc<T>> {
        self.current.and_then(|version| self.versions.get(&version))
    }

    /// Install `element`; reports whether the bundle changed.
    fn record(&mut self, element: Arc<T>) -> bool {
        let version = element.version();
        let mut changed = match self.versions.get(&version) {
            Some(existing) if Self::same_content(existing, &element) => false,
            _ => {
                self.versions.insert(version, Arc::clone(&element));
                true
            }
        };
        if element.is_current() && self.current.is_none_or(|seen| seen < version) {
            self.current = Some(version);
            changed = true;
        }
        self.unavailable.remove(&version);
        changed
    }

    /// Mark every version below the current one that is not cached as
    /// unavailable. No-op unless the newest cached version is current.
    fn seal(&mut self) -> bool {
        let Some(current) = self.current else {
            return false;
        };
        if self.versions.keys().next_back() != Some(&current) {
            return false;
        }
        let missing: BTreeSet<Version> = current
            .up_to()
            .filter(|version| !self.versions.contains_key(version))
            .collect();
        let changed = missing != self.unavailable;
        self.unavailable = missing;
        changed
    }

    /// Equal content, where a stored current value absorbs a non-current copy.
    fn same_content(existing: &T, incoming: &T) -> bool {
        if existing == incoming {
            return true;
        }
        existing.is_current()
            && !incoming.is_current()
            && *existing == incoming.clone().with_current(true)
    }

    /// Complete when every version in `1..=current` is either present or
    /// known to be unavailable, and nothing newer than `current` is known.
    fn complete_history(&self) -> Option<BTreeMap<Version, Arc<T>>> {
        let current = self.current?;
        let newest = *self.versions.keys().next_back()?;
        let known = self.versions.len() + self.unavailable.len();
        let known = u64::try_from(known).ok()?;
        (newest == current && known == current.get()).then(|| self.versions.clone())
    }
}

/// Two-tier cache of one versioned element kind.
pub struct VersionedCache<T: Versioned> {
    fast: Mutex<FastTier<Id<T>, Bundle<T>>>,
    durable: Option<Arc<dyn DurableTier<T>>>,
    config: CacheConfig,
}

impl<T: Versioned> fmt::Debug for VersionedCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedCache")
            .field("kind", &T::KIND)
            .field("entries", &self.lock().len())
            .field("durable", &self.durable.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Versioned> VersionedCache<T> {
    /// Cache with only the in-memory tier.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_durable(config, None)
    }

    /// Cache backed by an optional durable tier.
    #[must_use]
    pub fn with_durable(config: CacheConfig, durable: Option<Arc<dyn DurableTier<T>>>) -> Self {
        Self {
            fast: Mutex::new(FastTier::new(config.max_entries, config.max_age)),
            durable,
            config,
        }
    }

    /// Current version of `id`, if cached.
    pub fn get(&self, id: Id<T>) -> Option<Arc<T>> {
        let mut fast = self.lock();
        self.ensure_loaded(&mut fast, id);
        fast.get(&id).and_then(Bundle::current).cloned()
    }

    /// A specific version of `id`, if cached.
    pub fn get_version(&self, id: Id<T>, version: Version) -> Option<Arc<T>> {
        let mut fast = self.lock();
        self.ensure_loaded(&mut fast, id);
        fast.get(&id)
            .and_then(|bundle| bundle.versions.get(&version))
            .cloned()
    }

    /// Every cached version of `id`, regardless of completeness.
    pub fn cached_versions(&self, id: Id<T>) -> Vec<Arc<T>> {
        let mut fast = self.lock();
        self.ensure_loaded(&mut fast, id);
        fast.get(&id)
            .map(|bundle| bundle.versions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Full history of `id`, or `None` unless the cached history is
    /// complete from version 1 to the current version.
    pub fn history(&self, id: Id<T>) -> Option<BTreeMap<Version, Arc<T>>> {
        let mut fast = self.lock();
        self.ensure_loaded(&mut fast, id);
        let history = fast.get(&id).and_then(Bundle::complete_history);
        if history.is_none() {
            debug!("{} {id} history incomplete in cache", T::KIND);
        }
        history
    }

    /// Record `element` in its id's history and, when it is flagged current,
    /// in the current slot. Re-inserting identical content leaves the
    /// eviction order untouched.
    pub fn put(&self, element: T) -> Arc<T> {
        let element = Arc::new(element);
        self.put_shared(Arc::clone(&element));
        element
    }

    /// Install a full history of `id` as returned by a source, newest version
    /// flagged current. Versions the history skips are remembered as
    /// unavailable so a later [`VersionedCache::history`] accepts the gaps.
    pub fn put_history(&self, id: Id<T>, elements: Vec<T>) -> BTreeMap<Version, Arc<T>> {
        let installed: BTreeMap<Version, Arc<T>> = elements
            .into_iter()
            .filter(|element| element.id() == id)
            .map(|element| (element.version(), Arc::new(element)))
            .collect();
        if installed.is_empty() {
            return installed;
        }
        let now = Instant::now();
        let mut fast = self.lock();
        self.ensure_loaded(&mut fast, id);
        fast.update(id, now, |bundle| {
            let mut changed = false;
            for element in installed.values() {
                changed |= bundle.record(Arc::clone(element));
            }
            bundle.seal() || changed
        });
        self.settle(&mut fast, now);
        installed
    }

    /// [`VersionedCache::put`] for an already shared value.
    pub fn put_shared(&self, element: Arc<T>) {
        let id = element.id();
        let now = Instant::now();
        let mut fast = self.lock();
        self.ensure_loaded(&mut fast, id);
        fast.update(id, now, |bundle| bundle.record(element));
        self.settle(&mut fast, now);
    }

    /// Number of ids held by the fast tier.
    pub fn fast_len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, FastTier<Id<T>, Bundle<T>>> {
        self.fast.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_loaded(&self, fast: &mut FastTier<Id<T>, Bundle<T>>, id: Id<T>) {
        if fast.contains(&id) {
            return;
        }
        let Some(durable) = &self.durable else {
            return;
        };
        match durable.load(id.get()) {
            Ok(values) if values.is_empty() => {}
            Ok(values) => {
                let now = Instant::now();
                fast.insert(id, Bundle::from_values(values), now);
                self.settle(fast, now);
            }
            Err(err) => warn!("{} {id}: durable read failed: {err}", T::KIND),
        }
    }

    /// Evict until both fast-tier bounds hold, migrating evicted bundles.
    fn settle(&self, fast: &mut FastTier<Id<T>, Bundle<T>>, now: Instant) {
        let evicted = fast.evict(now);
        let Some(durable) = &self.durable else {
            return;
        };
        if evicted.is_empty() {
            return;
        }
        for (id, bundle) in evicted {
            for (version, element) in bundle.versions {
                if let Err(err) = durable.store(id.get(), Some(version), &element) {
                    warn!("{} {id} {version}: dropped on migration: {err}", T::KIND);
                }
            }
        }
        purge(durable.as_ref(), &self.config, T::KIND.as_str());
    }
}

/// Two-tier cache of changesets, which carry no versions.
pub struct ChangesetCache {
    fast: Mutex<FastTier<ChangesetId, Arc<Changeset>>>,
    durable: Option<Arc<dyn DurableTier<Changeset>>>,
    config: CacheConfig,
}

impl fmt::Debug for ChangesetCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangesetCache")
            .field("entries", &self.lock().len())
            .field("durable", &self.durable.is_some())
            .finish_non_exhaustive()
    }
}

impl ChangesetCache {
    /// Cache with only the in-memory tier.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_durable(config, None)
    }

    /// Cache backed by an optional durable tier.
    #[must_use]
    pub fn with_durable(
        config: CacheConfig,
        durable: Option<Arc<dyn DurableTier<Changeset>>>,
    ) -> Self {
        Self {
            fast: Mutex::new(FastTier::new(config.max_entries, config.max_age)),
            durable,
            config,
        }
    }

    /// Cached changeset, if any.
    pub fn get(&self, id: ChangesetId) -> Option<Arc<Changeset>> {
        let mut fast = self.lock();
        if let Some(found) = fast.get(&id) {
            return Some(Arc::clone(found));
        }
        let durable = self.durable.as_ref()?;
        match durable.load(id.get()) {
            Ok(values) => {
                let changeset = Arc::new(values.into_iter().next()?);
                let now = Instant::now();
                fast.insert(id, Arc::clone(&changeset), now);
                self.settle(&mut fast, now);
                Some(changeset)
            }
            Err(err) => {
                warn!("changeset {id}: durable read failed: {err}");
                None
            }
        }
    }

    /// Record `changeset`. Identical content leaves the eviction order
    /// untouched.
    pub fn put(&self, changeset: Changeset) -> Arc<Changeset> {
        let id = changeset.id;
        let now = Instant::now();
        let mut fast = self.lock();
        if let Some(existing) = fast.get(&id).filter(|existing| ***existing == changeset) {
            return Arc::clone(existing);
        }
        let changeset = Arc::new(changeset);
        fast.insert(id, Arc::clone(&changeset), now);
        self.settle(&mut fast, now);
        changeset
    }

    fn lock(&self) -> MutexGuard<'_, FastTier<ChangesetId, Arc<Changeset>>> {
        self.fast.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, fast: &mut FastTier<ChangesetId, Arc<Changeset>>, now: Instant) {
        let evicted = fast.evict(now);
        let Some(durable) = &self.durable else {
            return;
        };
        if evicted.is_empty() {
            return;
        }
        for (id, changeset) in evicted {
            if let Err(err) = durable.store(id.get(), None, &changeset) {
                warn!("changeset {id}: dropped on migration: {err}");
            }
        }
        purge(durable.as_ref(), &self.config, "changeset");
    }
}

fn purge<T>(durable: &dyn DurableTier<T>, config: &CacheConfig, namespace: &str) {
    match durable.purge(config.durable_max_age, config.durable_max_entries) {
        Ok(0) => {}
        Ok(removed) => debug!("{namespace}: purged {removed} durable entries"),
        Err(err) => warn!("{namespace}: durable purge failed: {err}"),
    }
}
