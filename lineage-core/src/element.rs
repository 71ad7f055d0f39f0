//! Versioned map entities: nodes, ways, relations and changesets.
//!
//! Every element value is immutable once constructed. The `current` flag is
//! assigned by the fetch path that produced the value and is never flipped on
//! an existing instance; fetch paths build a fresh value with
//! [`Versioned::with_current`] instead.

use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Coordinate, Id, Version};

/// OpenStreetMap-style free-form key/value tags.
pub type Tags = BTreeMap<String, String>;

/// Identifier of a [`Node`].
pub type NodeId = Id<Node>;
/// Identifier of a [`Way`].
pub type WayId = Id<Way>;
/// Identifier of a [`Relation`].
pub type RelationId = Id<Relation>;
/// Identifier of a [`Changeset`].
pub type ChangesetId = Id<Changeset>;

/// Discriminant over the four entity namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A point.
    Node,
    /// An ordered list of nodes.
    Way,
    /// An ordered list of typed members.
    Relation,
    /// A group of edits by one author.
    Changeset,
}

impl EntityKind {
    /// Lowercase name, also used as the cache namespace.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
            Self::Changeset => "changeset",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata shared by every versioned element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementMeta {
    /// Version of the element this value describes.
    pub version: Version,
    /// Changeset that produced this version.
    pub changeset: ChangesetId,
    /// Moment the version was created.
    pub timestamp: DateTime<Utc>,
    /// Tags attached to this version.
    pub tags: Tags,
    /// `false` when this version deletes the element.
    pub visible: bool,
    /// Whether the fetch path that produced this value saw it as the
    /// element's current version.
    pub current: bool,
}

impl ElementMeta {
    /// Metadata for a visible, non-current version without tags.
    #[must_use]
    pub fn new(version: Version, changeset: ChangesetId, timestamp: DateTime<Utc>) -> Self {
        Self {
            version,
            changeset,
            timestamp,
            tags: Tags::new(),
            visible: true,
            current: false,
        }
    }

    /// Attach tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Mark the version as a deletion.
    #[must_use]
    pub fn deleted(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// Behaviour shared by nodes, ways and relations.
pub trait Versioned: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Namespace of the implementing element.
    const KIND: EntityKind;

    /// Identifier of the element.
    fn id(&self) -> Id<Self>;

    /// Versioned metadata.
    fn meta(&self) -> &ElementMeta;

    /// Build a copy of this value carrying the given `current` flag.
    #[must_use]
    fn with_current(self, current: bool) -> Self;

    /// Version number.
    fn version(&self) -> Version {
        self.meta().version
    }

    /// Changeset that produced this version.
    fn changeset(&self) -> ChangesetId {
        self.meta().changeset
    }

    /// Creation moment of this version.
    fn timestamp(&self) -> DateTime<Utc> {
        self.meta().timestamp
    }

    /// Whether this version was current when fetched.
    fn is_current(&self) -> bool {
        self.meta().current
    }

    /// Whether this version exists (is not a deletion).
    fn is_visible(&self) -> bool {
        self.meta().visible
    }
}

/// A single point on the map.
///
/// # Examples
/// ```
/// use chrono::{TimeZone, Utc};
/// use lineage_core::{ChangesetId, Coordinate, ElementMeta, Node, NodeId, Version, Versioned};
///
/// let created = Utc.timestamp_opt(0, 0).single().expect("valid timestamp");
/// let meta = ElementMeta::new(Version::FIRST, ChangesetId::new(10), created);
/// let node = Node::new(NodeId::new(1), Coordinate::new(13.4, 52.5), meta);
/// assert_eq!(node.version(), Version::FIRST);
/// assert!(!node.is_current());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    coordinate: Coordinate,
    meta: ElementMeta,
}

impl Node {
    /// Construct a node version.
    #[must_use]
    pub const fn new(id: NodeId, coordinate: Coordinate, meta: ElementMeta) -> Self {
        Self {
            id,
            coordinate,
            meta,
        }
    }

    /// Position of the node. Deletion versions carry no meaningful position.
    #[must_use]
    pub const fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    /// Whether `other` sits at a different position.
    #[must_use]
    pub fn moved_from(&self, other: &Self) -> bool {
        self.coordinate != other.coordinate
    }
}

impl Versioned for Node {
    const KIND: EntityKind = EntityKind::Node;

    fn id(&self) -> NodeId {
        self.id
    }

    fn meta(&self) -> &ElementMeta {
        &self.meta
    }

    fn with_current(mut self, current: bool) -> Self {
        self.meta.current = current;
        self
    }
}

/// An ordered chain of node references. Nodes may repeat (closed ways start
/// and end with the same node).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Way {
    id: WayId,
    nodes: Vec<NodeId>,
    meta: ElementMeta,
}

impl Way {
    /// Construct a way version.
    #[must_use]
    pub const fn new(id: WayId, nodes: Vec<NodeId>, meta: ElementMeta) -> Self {
        Self { id, nodes, meta }
    }

    /// Member node references in order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Whether the way references `node`.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Whether first and last member are the same node and the way has more
    /// than one member.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match (self.nodes.first(), self.nodes.last()) {
            (Some(first), Some(last)) => self.nodes.len() > 1 && first == last,
            _ => false,
        }
    }
}

impl Versioned for Way {
    const KIND: EntityKind = EntityKind::Way;

    fn id(&self) -> WayId {
        self.id
    }

    fn meta(&self) -> &ElementMeta {
        &self.meta
    }

    fn with_current(mut self, current: bool) -> Self {
        self.meta.current = current;
        self
    }
}

/// Typed reference held by a relation member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRef {
    /// Reference to a node.
    Node(NodeId),
    /// Reference to a way.
    Way(WayId),
    /// Reference to another relation.
    Relation(RelationId),
}

/// A relation member: a typed reference plus its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationMember {
    /// Referenced entity.
    pub target: MemberRef,
    /// Role string, possibly empty.
    pub role: String,
}

impl RelationMember {
    /// Build a member.
    #[must_use]
    pub fn new(target: MemberRef, role: impl Into<String>) -> Self {
        Self {
            target,
            role: role.into(),
        }
    }
}

/// An ordered collection of typed members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    id: RelationId,
    members: Vec<RelationMember>,
    meta: ElementMeta,
}

impl Relation {
    /// Construct a relation version.
    #[must_use]
    pub const fn new(id: RelationId, members: Vec<RelationMember>, meta: ElementMeta) -> Self {
        Self { id, members, meta }
    }

    /// Members in order.
    #[must_use]
    pub fn members(&self) -> &[RelationMember] {
        &self.members
    }
}

impl Versioned for Relation {
    const KIND: EntityKind = EntityKind::Relation;

    fn id(&self) -> RelationId {
        self.id
    }

    fn meta(&self) -> &ElementMeta {
        &self.meta
    }

    fn with_current(mut self, current: bool) -> Self {
        self.meta.current = current;
        self
    }
}

/// A group of edits made by one author. Not itself versioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    /// Identifier.
    pub id: ChangesetId,
    /// Display name of the author, when known.
    pub author: Option<String>,
    /// Moment the changeset was opened.
    pub created_at: DateTime<Utc>,
    /// Moment the changeset was closed, if it has been.
    pub closed_at: Option<DateTime<Utc>>,
    /// Changeset tags (comment, source, ...).
    pub tags: Tags,
}

/// Composite key identifying an entity across namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Namespace.
    pub kind: EntityKind,
    /// Raw identifier within the namespace.
    pub id: i64,
}

/// Tagged union over every entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entity {
    /// A node version.
    Node(Arc<Node>),
    /// A way version.
    Way(Arc<Way>),
    /// A relation version.
    Relation(Arc<Relation>),
    /// A changeset.
    Changeset(Arc<Changeset>),
}

impl Entity {
    /// Namespace of the entity.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Node(_) => EntityKind::Node,
            Self::Way(_) => EntityKind::Way,
            Self::Relation(_) => EntityKind::Relation,
            Self::Changeset(_) => EntityKind::Changeset,
        }
    }

    /// Composite `(kind, id)` key.
    #[must_use]
    pub fn key(&self) -> EntityKey {
        let id = match self {
            Self::Node(node) => node.id().get(),
            Self::Way(way) => way.id().get(),
            Self::Relation(relation) => relation.id().get(),
            Self::Changeset(changeset) => changeset.id.get(),
        };
        EntityKey {
            kind: self.kind(),
            id,
        }
    }

    /// Version of versioned entities; `None` for changesets.
    #[must_use]
    pub fn version(&self) -> Option<Version> {
        self.meta().map(|meta| meta.version)
    }

    /// Versioned metadata; `None` for changesets.
    #[must_use]
    pub fn meta(&self) -> Option<&ElementMeta> {
        match self {
            Self::Node(node) => Some(node.meta()),
            Self::Way(way) => Some(way.meta()),
            Self::Relation(relation) => Some(relation.meta()),
            Self::Changeset(_) => None,
        }
    }
}

impl From<Node> for Entity {
    fn from(value: Node) -> Self {
        Self::Node(Arc::new(value))
    }
}

impl From<Way> for Entity {
    fn from(value: Way) -> Self {
        Self::Way(Arc::new(value))
    }
}

impl From<Relation> for Entity {
    fn from(value: Relation) -> Self {
        Self::Relation(Arc::new(value))
    }
}

impl From<Changeset> for Entity {
    fn from(value: Changeset) -> Self {
        Self::Changeset(Arc::new(value))
    }
}
