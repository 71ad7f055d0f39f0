//! In-memory history snapshot serving the `OsmSource` interface.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use lineage_core::{
    Changeset, ChangesetDownload, ChangesetId, Entity, EntityKind, HistorySource, Id, MemberRef,
    Node, NodeId, OsmSource, Relation, RelationId, SourceError, Tags, Version, Versioned, Way,
    WayId,
};

/// Element counts of a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistorySummary {
    /// Distinct node ids.
    pub nodes: usize,
    /// Distinct way ids.
    pub ways: usize,
    /// Distinct relation ids.
    pub relations: usize,
    /// Element versions across all kinds.
    pub versions: usize,
    /// Changesets known to the snapshot.
    pub changesets: usize,
    /// Versions dropped during ingestion for lack of history metadata.
    pub skipped: u64,
}

/// Complete element histories held in memory.
///
/// The newest version of an element is its current version unless it is a
/// deletion. Changeset metadata not supplied explicitly is synthesised from
/// the element versions: the author is the first user seen, the changeset
/// opens at its earliest version timestamp and closes at its latest.
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    nodes: BTreeMap<NodeId, Vec<Node>>,
    ways: BTreeMap<WayId, Vec<Way>>,
    relations: BTreeMap<RelationId, Vec<Relation>>,
    changesets: HashMap<ChangesetId, Changeset>,
    edits: HashMap<ChangesetId, Vec<(EntityKind, i64, Version)>>,
    parent_ways: HashMap<NodeId, Vec<WayId>>,
    parent_relations: HashMap<MemberRef, Vec<RelationId>>,
    summary: HistorySummary,
}

/// Accumulates element versions for a [`HistorySnapshot`].
///
/// # Examples
/// ```
/// use lineage_core::{
///     ChangesetId, HistorySource, Node, NodeId, Versioned, test_support::node_version,
/// };
/// use lineage_data::HistorySnapshot;
///
/// let snapshot = HistorySnapshot::builder()
///     .node(node_version(1, 1, 10, 100, (0.0, 0.0)))
///     .node(node_version(1, 2, 11, 200, (0.0, 1.0)))
///     .build();
/// let current = HistorySource::<Node>::fetch_current(&snapshot, NodeId::new(1))
///     .expect("snapshots never fail")
///     .expect("node exists");
/// assert_eq!(current.changeset(), ChangesetId::new(11));
/// ```
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshotBuilder {
    nodes: Vec<Node>,
    ways: Vec<Way>,
    relations: Vec<Relation>,
    changesets: Vec<Changeset>,
    authors: HashMap<ChangesetId, String>,
    skipped: u64,
}

impl HistorySnapshotBuilder {
    /// Add a node version.
    #[must_use]
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add a way version.
    #[must_use]
    pub fn way(mut self, way: Way) -> Self {
        self.ways.push(way);
        self
    }

    /// Add a relation version.
    #[must_use]
    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Supply explicit changeset metadata, replacing the synthesised record.
    #[must_use]
    pub fn changeset(mut self, changeset: Changeset) -> Self {
        self.changesets.push(changeset);
        self
    }

    /// Record the author of a changeset. The first name recorded wins.
    #[must_use]
    pub fn author(mut self, changeset: ChangesetId, user: impl Into<String>) -> Self {
        self.authors.entry(changeset).or_insert_with(|| user.into());
        self
    }

    pub(crate) fn push_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub(crate) fn push_way(&mut self, way: Way) {
        self.ways.push(way);
    }

    pub(crate) fn push_relation(&mut self, relation: Relation) {
        self.relations.push(relation);
    }

    pub(crate) fn push_author(&mut self, changeset: ChangesetId, user: String) {
        self.authors.entry(changeset).or_insert(user);
    }

    pub(crate) fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub(crate) const fn skipped(&self) -> u64 {
        self.skipped
    }

    pub(crate) fn merge(mut self, other: Self) -> Self {
        self.nodes.extend(other.nodes);
        self.ways.extend(other.ways);
        self.relations.extend(other.relations);
        self.changesets.extend(other.changesets);
        for (changeset, user) in other.authors {
            self.authors.entry(changeset).or_insert(user);
        }
        self.skipped += other.skipped;
        self
    }

    /// Index the collected versions.
    #[must_use]
    pub fn build(self) -> HistorySnapshot {
        let nodes = group(self.nodes);
        let ways = group(self.ways);
        let relations = group(self.relations);

        let mut spans: HashMap<ChangesetId, (DateTime<Utc>, DateTime<Utc>)> = HashMap::new();
        let mut edits: HashMap<ChangesetId, Vec<(EntityKind, i64, Version)>> = HashMap::new();
        let mut versions = 0;
        for meta in nodes
            .values()
            .flatten()
            .map(edit_of)
            .chain(ways.values().flatten().map(edit_of))
            .chain(relations.values().flatten().map(edit_of))
        {
            let (changeset, at, edit) = meta;
            versions += 1;
            spans
                .entry(changeset)
                .and_modify(|(opened, closed)| {
                    *opened = (*opened).min(at);
                    *closed = (*closed).max(at);
                })
                .or_insert((at, at));
            edits.entry(changeset).or_default().push(edit);
        }

        let mut changesets: HashMap<ChangesetId, Changeset> = spans
            .into_iter()
            .map(|(id, (opened, closed))| {
                let changeset = Changeset {
                    id,
                    author: self.authors.get(&id).cloned(),
                    created_at: opened,
                    closed_at: Some(closed),
                    tags: Tags::new(),
                };
                (id, changeset)
            })
            .collect();
        for changeset in self.changesets {
            changesets.insert(changeset.id, changeset);
        }

        let mut parent_ways: HashMap<NodeId, Vec<WayId>> = HashMap::new();
        for way in ways.values().filter_map(|history| current_of(history)) {
            for node in way.nodes() {
                let parents = parent_ways.entry(*node).or_default();
                if !parents.contains(&way.id()) {
                    parents.push(way.id());
                }
            }
        }
        let mut parent_relations: HashMap<MemberRef, Vec<RelationId>> = HashMap::new();
        for relation in relations.values().filter_map(|history| current_of(history)) {
            for member in relation.members() {
                let parents = parent_relations.entry(member.target).or_default();
                if !parents.contains(&relation.id()) {
                    parents.push(relation.id());
                }
            }
        }

        let summary = HistorySummary {
            nodes: nodes.len(),
            ways: ways.len(),
            relations: relations.len(),
            versions,
            changesets: changesets.len(),
            skipped: self.skipped,
        };
        HistorySnapshot {
            nodes,
            ways,
            relations,
            changesets,
            edits,
            parent_ways,
            parent_relations,
            summary,
        }
    }
}

fn group<T: Versioned>(versions: Vec<T>) -> BTreeMap<Id<T>, Vec<T>> {
    let mut grouped: BTreeMap<Id<T>, Vec<T>> = BTreeMap::new();
    for element in versions {
        grouped.entry(element.id()).or_default().push(element);
    }
    for history in grouped.values_mut() {
        // Later duplicates of a version replace earlier ones.
        history.reverse();
        history.sort_by_key(Versioned::version);
        history.dedup_by_key(|element| element.version());
    }
    grouped
}

fn edit_of<T: Versioned>(element: &T) -> (ChangesetId, DateTime<Utc>, (EntityKind, i64, Version)) {
    (
        element.changeset(),
        element.timestamp(),
        (T::KIND, element.id().get(), element.version()),
    )
}

fn current_of<T: Versioned>(history: &[T]) -> Option<&T> {
    history.last().filter(|element| element.is_visible())
}

fn version_of<T: Versioned>(history: Option<&Vec<T>>, version: Version) -> Option<T> {
    history?
        .iter()
        .find(|element| element.version() == version)
        .cloned()
}

impl HistorySnapshot {
    /// Start building a snapshot in memory.
    #[must_use]
    pub fn builder() -> HistorySnapshotBuilder {
        HistorySnapshotBuilder::default()
    }

    /// Element counts.
    #[must_use]
    pub const fn summary(&self) -> HistorySummary {
        self.summary
    }

    fn parents_of(&self, target: MemberRef) -> Vec<Relation> {
        self.parent_relations
            .get(&target)
            .into_iter()
            .flatten()
            .filter_map(|id| self.relations.get(id))
            .filter_map(|history| current_of(history))
            .cloned()
            .collect()
    }

    fn entity(&self, kind: EntityKind, id: i64, version: Version) -> Option<Entity> {
        match kind {
            EntityKind::Node => version_of(self.nodes.get(&NodeId::new(id)), version)
                .map(|node| Entity::Node(Arc::new(node))),
            EntityKind::Way => version_of(self.ways.get(&WayId::new(id)), version)
                .map(|way| Entity::Way(Arc::new(way))),
            EntityKind::Relation => {
                version_of(self.relations.get(&RelationId::new(id)), version)
                    .map(|relation| Entity::Relation(Arc::new(relation)))
            }
            EntityKind::Changeset => None,
        }
    }
}

macro_rules! snapshot_history_source {
    ($element:ty, $field:ident, $member:expr) => {
        impl HistorySource<$element> for HistorySnapshot {
            fn fetch_current(&self, id: Id<$element>) -> Result<Option<$element>, SourceError> {
                Ok(self
                    .$field
                    .get(&id)
                    .and_then(|history| current_of(history))
                    .cloned())
            }

            fn fetch_version(
                &self,
                id: Id<$element>,
                version: Version,
            ) -> Result<Option<$element>, SourceError> {
                Ok(version_of(self.$field.get(&id), version))
            }

            fn fetch_history(&self, id: Id<$element>) -> Result<Vec<$element>, SourceError> {
                Ok(self.$field.get(&id).cloned().unwrap_or_default())
            }

            fn fetch_parent_relations(
                &self,
                id: Id<$element>,
            ) -> Result<Vec<Relation>, SourceError> {
                Ok(self.parents_of($member(id)))
            }
        }
    };
}

snapshot_history_source!(Node, nodes, MemberRef::Node);
snapshot_history_source!(Way, ways, MemberRef::Way);
snapshot_history_source!(Relation, relations, MemberRef::Relation);

impl OsmSource for HistorySnapshot {
    fn fetch_parent_ways(&self, node: NodeId) -> Result<Vec<Way>, SourceError> {
        Ok(self
            .parent_ways
            .get(&node)
            .into_iter()
            .flatten()
            .filter_map(|id| self.ways.get(id))
            .filter_map(|history| current_of(history))
            .cloned()
            .collect())
    }

    fn fetch_changesets(
        &self,
        ids: &[ChangesetId],
    ) -> Result<HashMap<ChangesetId, Changeset>, SourceError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.changesets.get(id).map(|found| (*id, found.clone())))
            .collect())
    }

    /// Versions a changeset produced, classified as creations (version 1),
    /// deletions (invisible versions) or modifications.
    fn fetch_changeset_download(
        &self,
        changeset: ChangesetId,
    ) -> Result<Option<ChangesetDownload>, SourceError> {
        let Some(edits) = self.edits.get(&changeset) else {
            return Ok(None);
        };
        let mut download = ChangesetDownload::default();
        for &(kind, id, version) in edits {
            let Some(entity) = self.entity(kind, id, version) else {
                continue;
            };
            let visible = entity.meta().is_some_and(|meta| meta.visible);
            if !visible {
                download.delete.push(entity);
            } else if version == Version::FIRST {
                download.create.push(entity);
            } else {
                download.modify.push(entity);
            }
        }
        Ok(Some(download))
    }
}
