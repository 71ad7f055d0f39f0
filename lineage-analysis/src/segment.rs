//! Assemble a relation's member ways into ordered polylines.
//!
//! Ways are chained end to end through junctions where exactly two way-ends
//! meet. Branch points (three or more ends) and dead ends (a single end)
//! start and stop chains. Closed ways are treated as roundabouts and
//! collapsed onto their centroid, so routes passing through them stay
//! connected.

use std::collections::HashMap;

use lineage_core::{
    Coordinate, OsmSource, Polyline, RelationId, Repository, Versioned, Way, WayId,
};
use log::debug;

use crate::{
    error::AnalysisError,
    membership::{Moment, resolve_membership},
};

/// A member way reduced to the coordinates of its resolved nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct WayPath {
    /// Way the coordinates belong to.
    pub id: WayId,
    /// Coordinates in way order.
    pub coordinates: Vec<Coordinate>,
    /// Whether the way closes on its first node.
    pub closed: bool,
}

impl WayPath {
    /// Pair a way id with its coordinates, treating the path as closed when
    /// its first and last coordinates coincide.
    #[must_use]
    pub fn new(id: WayId, coordinates: Vec<Coordinate>) -> Self {
        let closed = coordinates.len() > 1 && coordinates.first() == coordinates.last();
        Self {
            id,
            coordinates,
            closed,
        }
    }

    /// Path of `way` over its resolved `coordinates`. Closure follows the
    /// way's node list even when the closing node did not resolve.
    #[must_use]
    pub fn from_way(way: &Way, coordinates: Vec<Coordinate>) -> Self {
        Self {
            id: way.id(),
            coordinates,
            closed: way.is_closed(),
        }
    }

    const fn is_roundabout(&self) -> bool {
        self.closed
    }

    /// Member coordinates without the duplicated closing one.
    fn ring(&self) -> &[Coordinate] {
        match self.coordinates.split_last() {
            Some((last, rest)) if rest.first() == Some(last) => rest,
            _ => self.coordinates.as_slice(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Start,
    Finish,
}

impl End {
    const fn opposite(self) -> Self {
        match self {
            Self::Start => Self::Finish,
            Self::Finish => Self::Start,
        }
    }
}

/// An open way with its roundabout-substituted end coordinates.
struct Leg<'a> {
    path: &'a WayPath,
    start: Coordinate,
    finish: Coordinate,
}

impl Leg<'_> {
    const fn end(&self, end: End) -> Coordinate {
        match end {
            End::Start => self.start,
            End::Finish => self.finish,
        }
    }
}

struct Network<'a> {
    legs: Vec<Leg<'a>>,
    centres: HashMap<Coordinate, Coordinate>,
    junctions: HashMap<Coordinate, Vec<(usize, End)>>,
}

impl<'a> Network<'a> {
    fn new(paths: &'a [WayPath]) -> Self {
        let mut centres = HashMap::new();
        for path in paths.iter().filter(|path| path.is_roundabout()) {
            let ring = path.ring();
            let Some(centre) = Coordinate::centroid(ring) else {
                continue;
            };
            debug!("way {} collapsed to roundabout centre", path.id);
            for member in ring {
                centres.insert(*member, centre);
            }
        }

        let substitute = |coordinate: Coordinate| centres.get(&coordinate).copied();
        let legs: Vec<Leg<'a>> = paths
            .iter()
            .filter(|path| !path.is_roundabout())
            .filter_map(|path| {
                let first = *path.coordinates.first()?;
                let last = *path.coordinates.last()?;
                (path.coordinates.len() > 1).then(|| Leg {
                    path,
                    start: substitute(first).unwrap_or(first),
                    finish: substitute(last).unwrap_or(last),
                })
            })
            .collect();

        let mut junctions: HashMap<Coordinate, Vec<(usize, End)>> = HashMap::new();
        for (index, leg) in legs.iter().enumerate() {
            for end in [End::Start, End::Finish] {
                junctions.entry(leg.end(end)).or_default().push((index, end));
            }
        }
        Self {
            legs,
            centres,
            junctions,
        }
    }

    /// Way-ends of other legs meeting `index`'s `end`.
    fn neighbours(&self, index: usize, end: End) -> Vec<(usize, End)> {
        let Some(leg) = self.legs.get(index) else {
            return Vec::new();
        };
        self.junctions
            .get(&leg.end(end))
            .map(|ends| {
                ends.iter()
                    .copied()
                    .filter(|(other, _)| *other != index)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_simple(&self, index: usize, end: End) -> bool {
        self.neighbours(index, end).len() == 1
    }

    /// Chains of `(leg, walked forwards)` covering every leg exactly once.
    fn chains(&self) -> Vec<Vec<(usize, bool)>> {
        let mut used = vec![false; self.legs.len()];
        let mut chains = Vec::new();
        for index in 0..self.legs.len() {
            if used[index] {
                continue;
            }
            let start_simple = self.is_simple(index, End::Start);
            if start_simple && self.is_simple(index, End::Finish) {
                continue;
            }
            chains.push(self.walk(index, !start_simple, &mut used));
        }
        // Whatever remains forms closed cycles; cut each at its first leg.
        for index in 0..self.legs.len() {
            if !used[index] {
                chains.push(self.walk(index, true, &mut used));
            }
        }
        chains
    }

    fn walk(&self, first: usize, forward: bool, used: &mut [bool]) -> Vec<(usize, bool)> {
        used[first] = true;
        let mut chain = vec![(first, forward)];
        let mut current = first;
        let mut exit = if forward { End::Finish } else { End::Start };
        loop {
            let neighbours = self.neighbours(current, exit);
            let &[(next, entry)] = neighbours.as_slice() else {
                break;
            };
            if used[next] {
                break;
            }
            used[next] = true;
            chain.push((next, entry == End::Start));
            current = next;
            exit = entry.opposite();
        }
        chain
    }

    fn assemble(&self, chain: &[(usize, bool)]) -> Polyline {
        let mut coordinates: Vec<Coordinate> = Vec::new();
        let mut ways = Vec::with_capacity(chain.len());
        for &(index, forward) in chain {
            let Some(leg) = self.legs.get(index) else {
                continue;
            };
            ways.push(leg.path.id);
            let mut oriented = leg.path.coordinates.clone();
            if !forward {
                oriented.reverse();
            }
            let head = oriented.first().and_then(|c| self.centres.get(c)).copied();
            let tail = oriented.last().and_then(|c| self.centres.get(c)).copied();
            for coordinate in head.into_iter().chain(oriented).chain(tail) {
                if coordinates.last() != Some(&coordinate) {
                    coordinates.push(coordinate);
                }
            }
        }
        Polyline::new(coordinates, ways)
    }
}

/// Sort polylines by distance from a reference point at one extreme of the
/// route.
///
/// The two free ends (polyline ends not shared with another polyline) that
/// lie farthest apart decide the reference: the northern one when the
/// route spans more latitude than longitude, otherwise the western one.
fn order_geographically(polylines: &mut [Polyline]) {
    let ends: Vec<(usize, Coordinate)> = polylines
        .iter()
        .enumerate()
        .filter_map(|(index, line)| line.ends().map(|(a, b)| (index, a, b)))
        .flat_map(|(index, a, b)| [(index, a), (index, b)])
        .collect();
    let free: Vec<Coordinate> = ends
        .iter()
        .filter(|(index, end)| {
            !ends
                .iter()
                .any(|(other, candidate)| other != index && candidate == end)
        })
        .map(|(_, end)| *end)
        .collect();
    let candidates = if free.is_empty() {
        ends.iter().map(|(_, end)| *end).collect()
    } else {
        free
    };

    let mut extremes: Option<(Coordinate, Coordinate, f64)> = None;
    for (offset, a) in candidates.iter().enumerate() {
        for b in &candidates[offset..] {
            let distance = a.distance_to(b);
            if extremes.is_none_or(|(_, _, best)| distance > best) {
                extremes = Some((*a, *b, distance));
            }
        }
    }
    let Some((a, b, _)) = extremes else {
        return;
    };
    let reference = if (a.lat() - b.lat()).abs() > (a.lon() - b.lon()).abs() {
        if a.lat() >= b.lat() { a } else { b }
    } else if a.lon() <= b.lon() {
        a
    } else {
        b
    };

    let key = |line: &Polyline| {
        line.ends().map_or(f64::INFINITY, |(first, last)| {
            first
                .distance_to(&reference)
                .min(last.distance_to(&reference))
        })
    };
    polylines.sort_by(|x, y| key(x).total_cmp(&key(y)));
}

/// Assemble `paths` into polylines ordered from one end of the route.
///
/// # Examples
/// ```
/// use lineage_analysis::{WayPath, segment_ways};
/// use lineage_core::{Coordinate, WayId};
///
/// let paths = vec![
///     WayPath::new(WayId::new(1), vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)]),
///     WayPath::new(WayId::new(2), vec![Coordinate::new(0.0, 2.0), Coordinate::new(0.0, 1.0)]),
/// ];
/// let lines = segment_ways(&paths);
/// assert_eq!(lines.len(), 1);
/// assert_eq!(lines[0].coordinates().len(), 3);
/// ```
#[must_use]
pub fn segment_ways(paths: &[WayPath]) -> Vec<Polyline> {
    let network = Network::new(paths);
    let mut polylines: Vec<Polyline> = network
        .chains()
        .iter()
        .map(|chain| network.assemble(chain))
        .collect();
    order_geographically(&mut polylines);
    polylines
}

/// Segment the current geometry of `relation`.
///
/// # Errors
/// Returns [`AnalysisError::MissingRelation`] when the relation does not
/// currently exist, or a source error from membership resolution.
pub fn segment_relation<S: OsmSource>(
    repository: &Repository<S>,
    relation: RelationId,
) -> Result<Vec<Polyline>, AnalysisError> {
    let membership = resolve_membership(repository, relation, Moment::Current)?;
    if membership.root().is_none() {
        return Err(AnalysisError::MissingRelation { id: relation });
    }
    let paths: Vec<WayPath> = membership
        .ways()
        .iter()
        .map(|way| WayPath::from_way(way, membership.way_coordinates(way)))
        .collect();
    Ok(segment_ways(&paths))
}
