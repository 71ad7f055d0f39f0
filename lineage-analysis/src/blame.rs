//! Attribute each current segment of a relation to the changeset that
//! produced it.
//!
//! The walk starts from the present and steps back one change at a time.
//! Every step compares the relation's geometry at the cursor with its
//! geometry just before the cursor's change; current segments that vanish
//! across that step were produced by the change at the cursor.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use lineage_core::{
    Cached, Changeset, ChangesetId, HistorySource, Id, OsmSource, RelationId, Repository,
    Segment, Versioned, source,
};
use log::{debug, info};
use serde::{Serialize, Serializer};

use crate::{
    error::AnalysisError,
    membership::{Membership, Moment, resolve_membership},
};

/// Outcome of a blame walk.
///
/// Segments that existed unchanged since the relation and its members were
/// first created carry no attribution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlameReport {
    /// Responsible changeset per current segment.
    #[serde(serialize_with = "attribution_list")]
    pub attributions: HashMap<Segment, ChangesetId>,
    /// Metadata of every attributed changeset the source knows.
    pub changesets: HashMap<ChangesetId, Arc<Changeset>>,
    /// Number of historical moments visited.
    pub steps: usize,
}

impl BlameReport {
    /// Changeset responsible for `segment`, if attributed.
    #[must_use]
    pub fn changeset_for(&self, segment: &Segment) -> Option<ChangesetId> {
        self.attributions.get(segment).copied()
    }

    /// Segments attributed to `changeset`.
    pub fn segments_by(&self, changeset: ChangesetId) -> impl Iterator<Item = &Segment> {
        self.attributions
            .iter()
            .filter(move |(_, responsible)| **responsible == changeset)
            .map(|(segment, _)| segment)
    }
}

fn attribution_list<S: Serializer>(
    attributions: &HashMap<Segment, ChangesetId>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Attribution<'a> {
        segment: &'a Segment,
        changeset: ChangesetId,
    }

    serializer.collect_seq(
        attributions
            .iter()
            .map(|(segment, changeset)| Attribution {
                segment,
                changeset: *changeset,
            }),
    )
}

fn latest_in<S, T>(
    repository: &Repository<S>,
    id: Id<T>,
    cursor: DateTime<Utc>,
) -> Result<Option<(DateTime<Utc>, ChangesetId)>, AnalysisError>
where
    T: Cached,
    S: HistorySource<T>,
{
    let history = repository.history(id)?;
    Ok(
        source::latest_before(history.values().map(|element| &**element), cursor)
            .map(|element| (element.timestamp(), element.changeset())),
    )
}

/// Most recent change strictly before `cursor` among every member.
fn latest_change<S: OsmSource>(
    repository: &Repository<S>,
    membership: &Membership,
    cursor: DateTime<Utc>,
) -> Result<Option<(DateTime<Utc>, ChangesetId)>, AnalysisError> {
    let mut latest = None;
    for relation in membership.relations() {
        latest = latest.max(latest_in(repository, relation.id(), cursor)?);
    }
    for way in membership.ways() {
        latest = latest.max(latest_in(repository, way.id(), cursor)?);
    }
    for node in membership.nodes().keys() {
        latest = latest.max(latest_in(repository, *node, cursor)?);
    }
    Ok(latest)
}

/// Blame every current segment of `relation`.
///
/// # Errors
/// Returns [`AnalysisError::MissingRelation`] when the relation does not
/// currently exist, or a source error from any history lookup.
pub fn blame_relation<S: OsmSource>(
    repository: &Repository<S>,
    relation: RelationId,
) -> Result<BlameReport, AnalysisError> {
    info!("blaming relation {relation}");
    let mut membership = resolve_membership(repository, relation, Moment::Current)?;
    if membership.root().is_none() {
        return Err(AnalysisError::MissingRelation { id: relation });
    }

    let mut surviving: HashSet<Segment> = membership.segments();
    let mut attributions = HashMap::new();
    let mut cursor = DateTime::<Utc>::MAX_UTC;
    let mut responsible: Option<ChangesetId> = None;
    let mut steps = 0;

    while !surviving.is_empty() {
        let Some((moment, changeset)) = latest_change(repository, &membership, cursor)? else {
            break;
        };
        let older = resolve_membership(repository, relation, Moment::At(moment))?;
        let older_segments = older.segments();
        if let Some(responsible) = responsible {
            for segment in surviving.difference(&older_segments) {
                attributions.insert(segment.clone(), responsible);
            }
        }
        surviving.retain(|segment| older_segments.contains(segment));
        steps += 1;
        debug!(
            "relation {relation} at {moment}: {} segments still unattributed",
            surviving.len()
        );
        cursor = moment;
        responsible = Some(changeset);
        membership = older;
    }

    let ids: Vec<ChangesetId> = attributions
        .values()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let changesets = repository.changesets(&ids)?;
    Ok(BlameReport {
        attributions,
        changesets,
        steps,
    })
}
