//! Cache-first access to an [`OsmSource`].
//!
//! Every lookup consults the matching cache first and falls back to the
//! source on a miss. Caches lock internally per call, so no lock is held
//! while the source is working.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use log::debug;

use crate::{
    CacheConfig, Changeset, ChangesetCache, ChangesetDownload, ChangesetId, Entity, Id, Node,
    NodeId, OsmSource, Relation, Version, VersionedCache, Versioned, Way,
    source::{self, HistorySource, SourceError},
};

mod sealed {
    pub trait Sealed {}

    impl Sealed for crate::Node {}
    impl Sealed for crate::Way {}
    impl Sealed for crate::Relation {}
}

/// One cache per entity kind.
#[derive(Debug)]
pub struct CacheSet {
    nodes: VersionedCache<Node>,
    ways: VersionedCache<Way>,
    relations: VersionedCache<Relation>,
    changesets: ChangesetCache,
}

impl CacheSet {
    /// In-memory caches bounded by `config`.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            nodes: VersionedCache::new(config),
            ways: VersionedCache::new(config),
            relations: VersionedCache::new(config),
            changesets: ChangesetCache::new(config),
        }
    }

    /// Caches whose evicted entries migrate into `db`.
    #[cfg(feature = "store-sqlite")]
    #[must_use]
    pub fn with_sqlite(config: CacheConfig, db: &crate::SqliteCacheDb) -> Self {
        use crate::EntityKind;

        Self {
            nodes: VersionedCache::with_durable(config, Some(Arc::new(db.tier(EntityKind::Node)))),
            ways: VersionedCache::with_durable(config, Some(Arc::new(db.tier(EntityKind::Way)))),
            relations: VersionedCache::with_durable(
                config,
                Some(Arc::new(db.tier(EntityKind::Relation))),
            ),
            changesets: ChangesetCache::with_durable(
                config,
                Some(Arc::new(db.tier(EntityKind::Changeset))),
            ),
        }
    }

    /// The cache holding `T`.
    #[must_use]
    pub fn of<T: Cached>(&self) -> &VersionedCache<T> {
        T::cache(self)
    }

    /// The changeset cache.
    #[must_use]
    pub const fn changesets(&self) -> &ChangesetCache {
        &self.changesets
    }
}

impl Default for CacheSet {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Element kinds that have a cache in a [`CacheSet`].
pub trait Cached: Versioned + sealed::Sealed {
    /// Select this kind's cache.
    fn cache(caches: &CacheSet) -> &VersionedCache<Self>;
}

impl Cached for Node {
    fn cache(caches: &CacheSet) -> &VersionedCache<Self> {
        &caches.nodes
    }
}

impl Cached for Way {
    fn cache(caches: &CacheSet) -> &VersionedCache<Self> {
        &caches.ways
    }
}

impl Cached for Relation {
    fn cache(caches: &CacheSet) -> &VersionedCache<Self> {
        &caches.relations
    }
}

/// Cache-backed view over a source.
///
/// # Examples
/// ```
/// use lineage_core::{NodeId, Repository, test_support::MemorySource};
///
/// let repository = Repository::new(MemorySource::default());
/// let missing = repository.current(NodeId::new(1)).expect("memory source never fails");
/// assert!(missing.is_none());
/// ```
#[derive(Debug)]
pub struct Repository<S> {
    source: S,
    caches: CacheSet,
}

impl<S> Repository<S> {
    /// Wrap `source` with default in-memory caches.
    #[must_use]
    pub fn new(source: S) -> Self {
        Self::with_caches(source, CacheSet::default())
    }

    /// Wrap `source` with the supplied caches.
    #[must_use]
    pub const fn with_caches(source: S, caches: CacheSet) -> Self {
        Self { source, caches }
    }

    /// The underlying source.
    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// The caches in front of the source.
    #[must_use]
    pub const fn caches(&self) -> &CacheSet {
        &self.caches
    }

    /// Current version of `id`. Deleted elements have no current version.
    ///
    /// # Errors
    /// Propagates [`SourceError`] from the source on a cache miss.
    pub fn current<T>(&self, id: Id<T>) -> Result<Option<Arc<T>>, SourceError>
    where
        T: Cached,
        S: HistorySource<T>,
    {
        let cache = self.caches.of::<T>();
        if let Some(cached) = cache.get(id) {
            return Ok(cached.is_visible().then_some(cached));
        }
        debug!("{} {id} current: cache miss", T::KIND);
        let fetched = <S as HistorySource<T>>::fetch_current(&self.source, id)?;
        Ok(fetched
            .filter(Versioned::is_visible)
            .map(|element| cache.put(element.with_current(true))))
    }

    /// Current versions of several ids. Unknown and deleted ids are omitted.
    ///
    /// # Errors
    /// Propagates [`SourceError`] from the source on a cache miss.
    pub fn current_many<T>(&self, ids: &[Id<T>]) -> Result<HashMap<Id<T>, Arc<T>>, SourceError>
    where
        T: Cached,
        S: HistorySource<T>,
    {
        let cache = self.caches.of::<T>();
        let mut found = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match cache.get(*id) {
                Some(cached) if cached.is_visible() => {
                    found.insert(*id, cached);
                }
                Some(_) => {}
                None => missing.push(*id),
            }
        }
        if missing.is_empty() {
            return Ok(found);
        }
        missing.sort_unstable();
        missing.dedup();
        let fetched = <S as HistorySource<T>>::fetch_current_many(&self.source, &missing)?;
        for (id, element) in fetched {
            if element.is_visible() {
                found.insert(id, cache.put(element.with_current(true)));
            }
        }
        Ok(found)
    }

    /// A specific version of `id`.
    ///
    /// # Errors
    /// Propagates [`SourceError`] (including redactions) on a cache miss.
    pub fn version<T>(&self, id: Id<T>, version: Version) -> Result<Option<Arc<T>>, SourceError>
    where
        T: Cached,
        S: HistorySource<T>,
    {
        let cache = self.caches.of::<T>();
        if let Some(cached) = cache.get_version(id, version) {
            return Ok(Some(cached));
        }
        let fetched = <S as HistorySource<T>>::fetch_version(&self.source, id, version)?;
        Ok(fetched.map(|element| cache.put(element.with_current(false))))
    }

    /// Every available version of `id`. Empty when the source knows nothing
    /// about `id`.
    ///
    /// A complete cached history is served directly; anything else is
    /// re-fetched in full and installed with the newest version flagged
    /// current.
    ///
    /// # Errors
    /// Propagates [`SourceError`] from the source on a cache miss.
    pub fn history<T>(&self, id: Id<T>) -> Result<BTreeMap<Version, Arc<T>>, SourceError>
    where
        T: Cached,
        S: HistorySource<T>,
    {
        let cache = self.caches.of::<T>();
        if let Some(history) = cache.history(id) {
            return Ok(history);
        }
        let mut fetched = <S as HistorySource<T>>::fetch_history(&self.source, id)?;
        fetched.retain(|element| element.id() == id);
        fetched.sort_by_key(Versioned::version);
        fetched.dedup_by_key(|element| element.version());
        let newest = fetched.last().map(Versioned::version);
        let fetched = fetched
            .into_iter()
            .map(|element| {
                let current = Some(element.version()) == newest;
                element.with_current(current)
            })
            .collect();
        Ok(cache.put_history(id, fetched))
    }

    /// Version of `id` current at `at`, or `None` when it did not exist or
    /// was deleted at that moment.
    ///
    /// # Errors
    /// Propagates [`SourceError`] from the history fetch.
    pub fn as_of<T>(&self, id: Id<T>, at: DateTime<Utc>) -> Result<Option<Arc<T>>, SourceError>
    where
        T: Cached,
        S: HistorySource<T>,
    {
        let history = self.history(id)?;
        Ok(source::as_of(history.values().map(|element| &**element), at)
            .and_then(|found| history.get(&found.version()))
            .cloned())
    }

    /// State of `id` strictly before `changeset` was applied.
    ///
    /// # Errors
    /// Propagates [`SourceError`] from the history fetch.
    pub fn before_changeset<T>(
        &self,
        id: Id<T>,
        changeset: ChangesetId,
    ) -> Result<Option<Arc<T>>, SourceError>
    where
        T: Cached,
        S: HistorySource<T>,
    {
        let history = self.history(id)?;
        Ok(
            source::before_changeset(history.values().map(|element| &**element), changeset)
                .and_then(|found| history.get(&found.version()))
                .cloned(),
        )
    }

    /// Current relations referencing `id`.
    ///
    /// # Errors
    /// Propagates [`SourceError`] from the source.
    pub fn parent_relations<T>(&self, id: Id<T>) -> Result<Vec<Arc<Relation>>, SourceError>
    where
        T: Cached,
        S: HistorySource<T>,
    {
        let relations = <S as HistorySource<T>>::fetch_parent_relations(&self.source, id)?;
        let cache = self.caches.of::<Relation>();
        Ok(relations
            .into_iter()
            .map(|relation| cache.put(relation.with_current(true)))
            .collect())
    }
}

impl<S: OsmSource> Repository<S> {
    /// Current ways referencing `node`.
    ///
    /// # Errors
    /// Propagates [`SourceError`] from the source.
    pub fn parent_ways(&self, node: NodeId) -> Result<Vec<Arc<Way>>, SourceError> {
        let ways = self.source.fetch_parent_ways(node)?;
        let cache = self.caches.of::<Way>();
        Ok(ways
            .into_iter()
            .map(|way| cache.put(way.with_current(true)))
            .collect())
    }

    /// Changeset metadata for `ids`. Unknown ids are omitted.
    ///
    /// # Errors
    /// Propagates [`SourceError`] from the source on a cache miss.
    pub fn changesets(
        &self,
        ids: &[ChangesetId],
    ) -> Result<HashMap<ChangesetId, Arc<Changeset>>, SourceError> {
        let cache = self.caches.changesets();
        let mut found = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match cache.get(*id) {
                Some(cached) => {
                    found.insert(*id, cached);
                }
                None => missing.push(*id),
            }
        }
        if missing.is_empty() {
            return Ok(found);
        }
        missing.sort_unstable();
        missing.dedup();
        for (id, changeset) in self.source.fetch_changesets(&missing)? {
            found.insert(id, cache.put(changeset));
        }
        Ok(found)
    }

    /// Metadata of a single changeset.
    ///
    /// # Errors
    /// Propagates [`SourceError`] from the source on a cache miss.
    pub fn changeset(&self, id: ChangesetId) -> Result<Option<Arc<Changeset>>, SourceError> {
        Ok(self.changesets(&[id])?.remove(&id))
    }

    /// Raw change lists of `changeset`. Listed element versions are recorded
    /// in the caches.
    ///
    /// # Errors
    /// Propagates [`SourceError`] from the source.
    pub fn changeset_download(
        &self,
        changeset: ChangesetId,
    ) -> Result<Option<ChangesetDownload>, SourceError> {
        let Some(download) = self.source.fetch_changeset_download(changeset)? else {
            return Ok(None);
        };
        for entity in download
            .create
            .iter()
            .chain(&download.modify)
            .chain(&download.delete)
        {
            self.record(entity);
        }
        Ok(Some(download))
    }

    fn record(&self, entity: &Entity) {
        match entity {
            Entity::Node(node) => {
                self.caches.nodes.put(Node::clone(node).with_current(false));
            }
            Entity::Way(way) => {
                self.caches.ways.put(Way::clone(way).with_current(false));
            }
            Entity::Relation(relation) => {
                self.caches
                    .relations
                    .put(Relation::clone(relation).with_current(false));
            }
            Entity::Changeset(changeset) => {
                self.caches.changesets.put(Changeset::clone(changeset));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityKind;
    use crate::test_support::{MemorySource, node_version};
    use rstest::{fixture, rstest};

    #[fixture]
    fn repository() -> Repository<MemorySource> {
        let mut source = MemorySource::default();
        source.insert_node(node_version(1, 1, 10, 100, (0.0, 0.0)));
        source.insert_node(node_version(1, 2, 20, 200, (0.0, 1.0)));
        source.insert_node(node_version(1, 3, 30, 300, (0.0, 2.0)));
        Repository::new(source)
    }

    #[rstest]
    fn history_is_fetched_once(repository: Repository<MemorySource>) {
        let first = repository.history(NodeId::new(1)).expect("history");
        let second = repository.history(NodeId::new(1)).expect("history");
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(repository.source().history_calls(), 1);
    }

    #[rstest]
    fn history_with_redacted_versions_is_fetched_once() {
        let mut source = MemorySource::default();
        source.insert_node(node_version(1, 1, 10, 100, (0.0, 0.0)));
        source.insert_node(node_version(1, 2, 20, 200, (0.0, 1.0)));
        source.insert_node(node_version(1, 3, 30, 300, (0.0, 2.0)));
        source.redact(EntityKind::Node, 1, Version::FIRST);
        let repository = Repository::new(source);

        for _ in 0..3 {
            let history = repository.history(NodeId::new(1)).expect("history");
            let versions: Vec<u64> = history.keys().map(|version| version.get()).collect();
            assert_eq!(versions, vec![2, 3]);
        }
        assert_eq!(repository.source().history_calls(), 1);
    }

    #[rstest]
    fn history_marks_newest_as_current(repository: Repository<MemorySource>) {
        let history = repository.history(NodeId::new(1)).expect("history");
        let flags: Vec<bool> = history.values().map(|node| node.is_current()).collect();
        assert_eq!(flags, vec![false, false, true]);
        let current = repository
            .current(NodeId::new(1))
            .expect("current")
            .expect("node exists");
        assert_eq!(current.version().get(), 3);
        assert_eq!(repository.source().current_calls(), 0);
    }

    #[rstest]
    fn current_is_fetched_then_cached(repository: Repository<MemorySource>) {
        let _ = repository.current(NodeId::new(1)).expect("current");
        let again = repository.current(NodeId::new(1)).expect("current");
        assert!(again.is_some_and(|node| node.is_current()));
        assert_eq!(repository.source().current_calls(), 1);
    }

    #[rstest]
    #[case(20, Some(1))]
    #[case(30, Some(2))]
    #[case(5, None)]
    fn before_changeset_reads_history(
        repository: Repository<MemorySource>,
        #[case] changeset: i64,
        #[case] expected: Option<u64>,
    ) {
        let found = repository
            .before_changeset(NodeId::new(1), ChangesetId::new(changeset))
            .expect("lookup");
        assert_eq!(found.map(|node| node.version().get()), expected);
    }

    #[rstest]
    fn unknown_ids_are_absent_not_errors(repository: Repository<MemorySource>) {
        assert!(repository.current(NodeId::new(99)).expect("lookup").is_none());
        assert!(repository.history(NodeId::new(99)).expect("lookup").is_empty());
    }
}
