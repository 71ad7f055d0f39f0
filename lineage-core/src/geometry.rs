//! Undirected segments and assembled polylines.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use serde::{Serialize, Serializer};

use crate::{Coordinate, Node, NodeId, Version, Versioned, WayId};

/// An undirected edge between two node versions.
///
/// Identity is the unordered pair of `(node id, coordinate)` endpoints:
/// `Segment(a, b) == Segment(b, a)` and both hash identically. Version,
/// tags and timestamps of the endpoint nodes do not take part. A segment
/// whose endpoints are the same node is degenerate and marks a node that was
/// added or removed on its own.
///
/// Serialises as a two-element array of `{id, version, coordinate}`
/// endpoints.
#[derive(Debug, Clone)]
pub struct Segment {
    first: Arc<Node>,
    second: Arc<Node>,
}

impl Segment {
    /// Join two node versions.
    #[must_use]
    pub const fn new(first: Arc<Node>, second: Arc<Node>) -> Self {
        Self { first, second }
    }

    /// Degenerate segment marking a single node.
    #[must_use]
    pub fn point(node: Arc<Node>) -> Self {
        Self {
            first: Arc::clone(&node),
            second: node,
        }
    }

    /// First endpoint as supplied at construction.
    #[must_use]
    pub fn first(&self) -> &Arc<Node> {
        &self.first
    }

    /// Second endpoint as supplied at construction.
    #[must_use]
    pub fn second(&self) -> &Arc<Node> {
        &self.second
    }

    /// Both endpoints.
    #[must_use]
    pub fn nodes(&self) -> [&Arc<Node>; 2] {
        [&self.first, &self.second]
    }

    /// Whether both endpoints are the same node.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.first.id() == self.second.id()
    }

    /// Whether either endpoint is `node`.
    #[must_use]
    pub fn touches(&self, node: NodeId) -> bool {
        self.first.id() == node || self.second.id() == node
    }

    /// Great-circle length in metres.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.first.coordinate().distance_to(&self.second.coordinate())
    }

    fn end_key(node: &Node) -> (NodeId, Coordinate) {
        (node.id(), node.coordinate())
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (Self::end_key(&self.first), Self::end_key(&self.second));
        let (c, d) = (Self::end_key(&other.first), Self::end_key(&other.second));
        (a == c && b == d) || (a == d && b == c)
    }
}

impl Eq for Segment {}

impl Hash for Segment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let end_hash = |node: &Node| {
            let mut hasher = DefaultHasher::new();
            Self::end_key(node).hash(&mut hasher);
            hasher.finish()
        };
        (end_hash(&self.first) ^ end_hash(&self.second)).hash(state);
    }
}

#[derive(Serialize)]
struct Endpoint {
    id: NodeId,
    version: Version,
    coordinate: Coordinate,
}

impl From<&Node> for Endpoint {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id(),
            version: node.version(),
            coordinate: node.coordinate(),
        }
    }
}

impl Serialize for Segment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [Endpoint::from(&*self.first), Endpoint::from(&*self.second)].serialize(serializer)
    }
}

/// An ordered coordinate sequence assembled from consecutive ways.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polyline {
    coordinates: Vec<Coordinate>,
    ways: Vec<WayId>,
    length: f64,
}

impl Polyline {
    /// Build a polyline and compute its great-circle length.
    #[must_use]
    pub fn new(coordinates: Vec<Coordinate>, ways: Vec<WayId>) -> Self {
        let length = coordinates
            .windows(2)
            .map(|pair| match pair {
                [a, b] => a.distance_to(b),
                _ => 0.0,
            })
            .sum();
        Self {
            coordinates,
            ways,
            length,
        }
    }

    /// Coordinates in walking order.
    #[must_use]
    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }

    /// Identifiers of the ways the polyline was assembled from, in order.
    #[must_use]
    pub fn ways(&self) -> &[WayId] {
        &self.ways
    }

    /// Great-circle length in metres.
    #[must_use]
    pub const fn length(&self) -> f64 {
        self.length
    }

    /// First and last coordinate, if any.
    #[must_use]
    pub fn ends(&self) -> Option<(Coordinate, Coordinate)> {
        Some((*self.coordinates.first()?, *self.coordinates.last()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChangesetId, ElementMeta};
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use std::collections::HashSet;

    fn node(id: i64, version: u64, lon: f64, lat: f64) -> Arc<Node> {
        let timestamp = Utc
            .timestamp_opt(1_000 * i64::try_from(version).expect("small"), 0)
            .single()
            .expect("valid timestamp");
        let meta = ElementMeta::new(
            Version::new(version).expect("valid version"),
            ChangesetId::new(1),
            timestamp,
        );
        Arc::new(Node::new(NodeId::new(id), Coordinate::new(lon, lat), meta))
    }

    #[rstest]
    fn reversed_segments_are_equal() {
        let ab = Segment::new(node(1, 1, 0.0, 0.0), node(2, 1, 1.0, 0.0));
        let ba = Segment::new(node(2, 1, 1.0, 0.0), node(1, 1, 0.0, 0.0));
        assert_eq!(ab, ba);
        let set: HashSet<_> = [ab, ba].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[rstest]
    fn node_version_does_not_affect_identity() {
        let old = Segment::new(node(1, 1, 0.0, 0.0), node(2, 1, 1.0, 0.0));
        let retagged = Segment::new(node(1, 2, 0.0, 0.0), node(2, 1, 1.0, 0.0));
        assert_eq!(old, retagged);
    }

    #[rstest]
    fn moved_endpoint_changes_identity() {
        let old = Segment::new(node(1, 1, 0.0, 0.0), node(2, 1, 1.0, 0.0));
        let moved = Segment::new(node(1, 2, 0.0, 0.5), node(2, 1, 1.0, 0.0));
        assert_ne!(old, moved);
    }

    #[rstest]
    fn degenerate_segment_touches_its_node() {
        let point = Segment::point(node(3, 1, 0.0, 0.0));
        assert!(point.is_degenerate());
        assert!(point.touches(NodeId::new(3)));
        assert!(point.length().abs() < f64::EPSILON);
    }

    #[rstest]
    fn segments_serialise_as_endpoint_pairs() {
        let segment = Segment::new(node(1, 2, 0.0, 0.0), node(2, 1, 1.0, 0.0));
        let json = serde_json::to_value(&segment).expect("serialise segment");
        assert_eq!(json[0]["id"], 1);
        assert_eq!(json[0]["version"], 2);
        assert_eq!(json[1]["coordinate"]["lon"], 1.0);
    }

    #[rstest]
    fn polyline_length_sums_legs() {
        let line = Polyline::new(
            vec![
                Coordinate::new(0.0, 0.0),
                Coordinate::new(0.0, 1.0),
                Coordinate::new(0.0, 2.0),
            ],
            vec![WayId::new(1)],
        );
        let expected = Coordinate::new(0.0, 0.0).distance_to(&Coordinate::new(0.0, 2.0));
        assert!((line.length() - expected).abs() < 1.0);
    }
}
