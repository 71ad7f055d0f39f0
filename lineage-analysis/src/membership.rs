//! Recursive relation membership at a chosen moment.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use lineage_core::{
    Cached, Coordinate, HistorySource, Id, MemberRef, Node, NodeId, OsmSource, Relation,
    RelationId, Repository, Segment, SourceError, Versioned, Way, WayId,
};

use log::debug;

use crate::error::{AnalysisError, tolerate_redaction};

/// Point in time at which membership is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Moment {
    /// The present state.
    Current,
    /// The state as of the given instant, inclusive.
    At(DateTime<Utc>),
}

/// Resolved members of a relation, flattened across sub-relations.
///
/// Ways appear once each, in depth-first member order. Nodes cover both
/// direct node members and the nodes of every resolved way. Members that do
/// not exist at the moment are left out.
#[derive(Debug, Clone, Default)]
pub struct Membership {
    root: Option<Arc<Relation>>,
    relations: Vec<Arc<Relation>>,
    ways: Vec<Arc<Way>>,
    nodes: HashMap<NodeId, Arc<Node>>,
}

impl Membership {
    /// The resolved relation itself, when it exists at the moment.
    #[must_use]
    pub fn root(&self) -> Option<&Arc<Relation>> {
        self.root.as_ref()
    }

    /// The root followed by every sub-relation reached.
    #[must_use]
    pub fn relations(&self) -> &[Arc<Relation>] {
        &self.relations
    }

    /// Member ways in depth-first order.
    #[must_use]
    pub fn ways(&self) -> &[Arc<Way>] {
        &self.ways
    }

    /// Resolved nodes by id.
    #[must_use]
    pub const fn nodes(&self) -> &HashMap<NodeId, Arc<Node>> {
        &self.nodes
    }

    /// Coordinates of `way`'s resolved nodes, in way order.
    #[must_use]
    pub fn way_coordinates(&self, way: &Way) -> Vec<Coordinate> {
        way.nodes()
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|node| node.coordinate())
            .collect()
    }

    /// Segments between consecutive resolved nodes of every member way.
    #[must_use]
    pub fn segments(&self) -> HashSet<Segment> {
        let mut segments = HashSet::new();
        for way in &self.ways {
            for pair in way.nodes().windows(2) {
                let [a, b] = pair else { continue };
                if a == b {
                    continue;
                }
                if let (Some(first), Some(second)) = (self.nodes.get(a), self.nodes.get(b)) {
                    segments.insert(Segment::new(Arc::clone(first), Arc::clone(second)));
                }
            }
        }
        segments
    }
}

fn fetch<S, T>(
    repository: &Repository<S>,
    id: Id<T>,
    moment: Moment,
) -> Result<Option<Arc<T>>, SourceError>
where
    T: Cached,
    S: HistorySource<T>,
{
    tolerate_redaction(match moment {
        Moment::Current => repository.current(id),
        Moment::At(at) => repository.as_of(id, at),
    })
}

/// Resolve `relation`'s recursive membership at `moment`.
///
/// Sub-relations are followed depth-first and each is visited at most once,
/// so membership cycles terminate. A relation absent at `moment` resolves to
/// an empty membership.
///
/// # Errors
/// Returns [`AnalysisError::Source`] when a fetch fails for a reason other
/// than redaction.
pub fn resolve_membership<S: OsmSource>(
    repository: &Repository<S>,
    relation: RelationId,
    moment: Moment,
) -> Result<Membership, AnalysisError> {
    let mut membership = Membership::default();
    let Some(root) = fetch(repository, relation, moment)? else {
        return Ok(membership);
    };

    let mut visited: HashSet<RelationId> = HashSet::from([relation]);
    let mut seen_ways: HashSet<WayId> = HashSet::new();
    let mut node_ids: BTreeSet<NodeId> = BTreeSet::new();
    let mut stack: Vec<(Arc<Relation>, usize)> = vec![(Arc::clone(&root), 0)];
    membership.relations.push(Arc::clone(&root));
    membership.root = Some(root);

    while let Some((current, index)) = stack.pop() {
        let Some(member) = current.members().get(index) else {
            continue;
        };
        let target = member.target;
        stack.push((current, index + 1));
        match target {
            MemberRef::Node(id) => {
                node_ids.insert(id);
            }
            MemberRef::Way(id) => {
                if !seen_ways.insert(id) {
                    continue;
                }
                match fetch(repository, id, moment)? {
                    Some(way) => {
                        node_ids.extend(way.nodes().iter().copied());
                        membership.ways.push(way);
                    }
                    None => debug!("member way {id} of relation {relation} is unresolved"),
                }
            }
            MemberRef::Relation(id) => {
                if !visited.insert(id) {
                    continue;
                }
                match fetch(repository, id, moment)? {
                    Some(child) => {
                        membership.relations.push(Arc::clone(&child));
                        stack.push((child, 0));
                    }
                    None => debug!("member relation {id} of relation {relation} is unresolved"),
                }
            }
        }
    }

    let node_ids: Vec<NodeId> = node_ids.into_iter().collect();
    membership.nodes = match moment {
        Moment::Current => repository.current_many(&node_ids)?,
        Moment::At(_) => {
            let mut nodes = HashMap::with_capacity(node_ids.len());
            for id in node_ids {
                if let Some(node) = fetch(repository, id, moment)? {
                    nodes.insert(node.id(), node);
                }
            }
            nodes
        }
    };
    Ok(membership)
}

/// Segments of `relation`'s member ways at `moment`.
///
/// # Errors
/// Propagates failures from [`resolve_membership`].
pub fn relation_segments<S: OsmSource>(
    repository: &Repository<S>,
    relation: RelationId,
    moment: Moment,
) -> Result<HashSet<Segment>, AnalysisError> {
    Ok(resolve_membership(repository, relation, moment)?.segments())
}
