//! In-memory `OsmSource` implementation used by unit and behaviour tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::atomic::{AtomicUsize, Ordering},
};

use chrono::{DateTime, TimeZone, Utc};

use crate::{
    Changeset, ChangesetDownload, ChangesetId, Coordinate, ElementMeta, EntityKind, HistorySource,
    Id, MemberRef, Node, NodeId, OsmSource, Relation, RelationId, RelationMember, SourceError,
    Tags, Version, Versioned, Way, WayId,
};

/// Moment `seconds` after the Unix epoch. Out-of-range input clamps to the
/// epoch.
#[must_use]
pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().unwrap_or_default()
}

fn meta(version: u64, changeset: i64, seconds: i64) -> ElementMeta {
    let version = Version::new(version).unwrap_or(Version::FIRST);
    ElementMeta::new(version, ChangesetId::new(changeset), at(seconds))
}

/// Visible node version at `(lon, lat)`.
#[must_use]
pub fn node_version(
    id: i64,
    version: u64,
    changeset: i64,
    seconds: i64,
    lon_lat: (f64, f64),
) -> Node {
    let (lon, lat) = lon_lat;
    Node::new(
        NodeId::new(id),
        Coordinate::new(lon, lat),
        meta(version, changeset, seconds),
    )
}

/// Deletion version of a node.
#[must_use]
pub fn deleted_node(id: i64, version: u64, changeset: i64, seconds: i64) -> Node {
    Node::new(
        NodeId::new(id),
        Coordinate::new(0.0, 0.0),
        meta(version, changeset, seconds).deleted(),
    )
}

/// Visible way version over `nodes`.
#[must_use]
pub fn way_version(id: i64, version: u64, changeset: i64, seconds: i64, nodes: &[i64]) -> Way {
    Way::new(
        WayId::new(id),
        nodes.iter().copied().map(NodeId::new).collect(),
        meta(version, changeset, seconds),
    )
}

/// Deletion version of a way.
#[must_use]
pub fn deleted_way(id: i64, version: u64, changeset: i64, seconds: i64) -> Way {
    Way::new(
        WayId::new(id),
        Vec::new(),
        meta(version, changeset, seconds).deleted(),
    )
}

/// Visible relation version over `members`.
#[must_use]
pub fn relation_version(
    id: i64,
    version: u64,
    changeset: i64,
    seconds: i64,
    members: &[MemberRef],
) -> Relation {
    Relation::new(
        RelationId::new(id),
        members
            .iter()
            .map(|member| RelationMember::new(*member, ""))
            .collect(),
        meta(version, changeset, seconds),
    )
}

/// Changeset opened at `seconds` by `author`.
#[must_use]
pub fn changeset(id: i64, author: &str, seconds: i64) -> Changeset {
    Changeset {
        id: ChangesetId::new(id),
        author: Some(author.to_owned()),
        created_at: at(seconds),
        closed_at: None,
        tags: Tags::new(),
    }
}

/// In-memory source holding explicit element histories.
///
/// Lookups perform linear scans and are intended only for small datasets.
/// Fetch counters let tests observe cache behaviour.
#[derive(Debug, Default)]
pub struct MemorySource {
    nodes: BTreeMap<NodeId, Vec<Node>>,
    ways: BTreeMap<WayId, Vec<Way>>,
    relations: BTreeMap<RelationId, Vec<Relation>>,
    changesets: HashMap<ChangesetId, Changeset>,
    downloads: HashMap<ChangesetId, ChangesetDownload>,
    redacted: HashSet<(EntityKind, i64, Version)>,
    failing: bool,
    current_calls: AtomicUsize,
    history_calls: AtomicUsize,
}

fn insert_version<T: Versioned>(history: &mut Vec<T>, element: T) {
    history.retain(|existing| existing.version() != element.version());
    history.push(element);
    history.sort_by_key(Versioned::version);
}

impl MemorySource {
    /// Add a node version.
    pub fn insert_node(&mut self, node: Node) {
        insert_version(self.nodes.entry(node.id()).or_default(), node);
    }

    /// Add a way version.
    pub fn insert_way(&mut self, way: Way) {
        insert_version(self.ways.entry(way.id()).or_default(), way);
    }

    /// Add a relation version.
    pub fn insert_relation(&mut self, relation: Relation) {
        insert_version(self.relations.entry(relation.id()).or_default(), relation);
    }

    /// Add changeset metadata.
    pub fn insert_changeset(&mut self, changeset: Changeset) {
        self.changesets.insert(changeset.id, changeset);
    }

    /// Register the raw change lists of a changeset.
    pub fn insert_download(&mut self, changeset: ChangesetId, download: ChangesetDownload) {
        self.downloads.insert(changeset, download);
    }

    /// Make a version inaccessible: history fetches omit it and direct
    /// version fetches report it as redacted.
    pub fn redact(&mut self, kind: EntityKind, id: i64, version: Version) {
        self.redacted.insert((kind, id, version));
    }

    /// Make every fetch fail with a transport error.
    pub fn fail_all(&mut self) {
        self.failing = true;
    }

    /// Number of current-version fetches served.
    pub fn current_calls(&self) -> usize {
        self.current_calls.load(Ordering::Relaxed)
    }

    /// Number of history fetches served.
    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::Relaxed)
    }

    fn check(&self, operation: &'static str) -> Result<(), SourceError> {
        if self.failing {
            return Err(SourceError::Transport {
                operation,
                message: "source unavailable".to_owned(),
            });
        }
        Ok(())
    }

    fn is_redacted<T: Versioned>(&self, element: &T) -> bool {
        self.redacted
            .contains(&(T::KIND, element.id().get(), element.version()))
    }

    fn visible_history<T: Versioned>(&self, history: Option<&Vec<T>>) -> Vec<T> {
        history
            .into_iter()
            .flatten()
            .filter(|element| !self.is_redacted(*element))
            .cloned()
            .collect()
    }

    fn current_of<T: Versioned>(history: Option<&Vec<T>>) -> Option<T> {
        history?
            .last()
            .filter(|element| element.is_visible())
            .cloned()
    }

    fn version_of<T: Versioned>(
        &self,
        history: Option<&Vec<T>>,
        version: Version,
    ) -> Result<Option<T>, SourceError> {
        let Some(found) = history
            .into_iter()
            .flatten()
            .find(|element| element.version() == version)
        else {
            return Ok(None);
        };
        if self.is_redacted(found) {
            return Err(SourceError::Redacted {
                kind: T::KIND,
                id: found.id().get(),
                version,
            });
        }
        Ok(Some(found.clone()))
    }

    fn relations_referencing(&self, target: MemberRef) -> Vec<Relation> {
        self.relations
            .values()
            .filter_map(|history| Self::current_of(Some(history)))
            .filter(|relation| {
                relation
                    .members()
                    .iter()
                    .any(|member| member.target == target)
            })
            .collect()
    }
}

macro_rules! memory_history_source {
    ($element:ty, $field:ident, $member:expr) => {
        impl HistorySource<$element> for MemorySource {
            fn fetch_current(&self, id: Id<$element>) -> Result<Option<$element>, SourceError> {
                self.check("fetch_current")?;
                self.current_calls.fetch_add(1, Ordering::Relaxed);
                Ok(Self::current_of(self.$field.get(&id)))
            }

            fn fetch_version(
                &self,
                id: Id<$element>,
                version: Version,
            ) -> Result<Option<$element>, SourceError> {
                self.check("fetch_version")?;
                self.version_of(self.$field.get(&id), version)
            }

            fn fetch_history(&self, id: Id<$element>) -> Result<Vec<$element>, SourceError> {
                self.check("fetch_history")?;
                self.history_calls.fetch_add(1, Ordering::Relaxed);
                Ok(self.visible_history(self.$field.get(&id)))
            }

            fn fetch_parent_relations(
                &self,
                id: Id<$element>,
            ) -> Result<Vec<Relation>, SourceError> {
                self.check("fetch_parent_relations")?;
                Ok(self.relations_referencing($member(id)))
            }
        }
    };
}

memory_history_source!(Node, nodes, MemberRef::Node);
memory_history_source!(Way, ways, MemberRef::Way);
memory_history_source!(Relation, relations, MemberRef::Relation);

impl OsmSource for MemorySource {
    fn fetch_parent_ways(&self, node: NodeId) -> Result<Vec<Way>, SourceError> {
        self.check("fetch_parent_ways")?;
        Ok(self
            .ways
            .values()
            .filter_map(|history| Self::current_of(Some(history)))
            .filter(|way| way.contains(node))
            .collect())
    }

    fn fetch_changesets(
        &self,
        ids: &[ChangesetId],
    ) -> Result<HashMap<ChangesetId, Changeset>, SourceError> {
        self.check("fetch_changesets")?;
        Ok(ids
            .iter()
            .filter_map(|id| self.changesets.get(id).map(|found| (*id, found.clone())))
            .collect())
    }

    fn fetch_changeset_download(
        &self,
        changeset: ChangesetId,
    ) -> Result<Option<ChangesetDownload>, SourceError> {
        self.check("fetch_changeset_download")?;
        Ok(self.downloads.get(&changeset).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn deleted_elements_have_no_current_version() {
        let mut source = MemorySource::default();
        source.insert_node(node_version(1, 1, 10, 100, (0.0, 0.0)));
        source.insert_node(deleted_node(1, 2, 20, 200));
        let current = HistorySource::<Node>::fetch_current(&source, NodeId::new(1))
            .expect("fetch current");
        assert!(current.is_none());
    }

    #[rstest]
    fn redacted_versions_are_hidden() {
        let mut source = MemorySource::default();
        source.insert_way(way_version(4, 1, 10, 100, &[1, 2]));
        source.insert_way(way_version(4, 2, 20, 200, &[1, 2, 3]));
        source.redact(EntityKind::Way, 4, Version::FIRST);
        let history =
            HistorySource::<Way>::fetch_history(&source, WayId::new(4)).expect("fetch history");
        assert_eq!(history.len(), 1);
        let redacted = HistorySource::<Way>::fetch_version(&source, WayId::new(4), Version::FIRST);
        assert!(matches!(redacted, Err(SourceError::Redacted { .. })));
    }
}
