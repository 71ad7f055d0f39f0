//! Segment-level geometry diff of a single changeset.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, TimeDelta, Utc};
use lineage_core::{
    ChangesetId, Entity, Node, NodeId, OsmSource, Repository, Segment, Versioned, WayId, source,
};
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    error::{AnalysisError, tolerate_redaction},
    reconcile::{ReconciledChangeset, reconcile},
};

/// Offset subtracted from a changeset's creation time when choosing the way
/// version that an indirectly affected way had before the changeset.
pub const INDIRECT_GUARD: TimeDelta = TimeDelta::seconds(1);

/// Segments a changeset removed, created and left untouched.
///
/// `removed` and `created` are disjoint; segments present on both sides are
/// reported in `unchanged` instead. Nodes added or removed on their own
/// appear as degenerate segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeometryDiff {
    /// Segments present before the changeset and absent after it.
    pub removed: HashSet<Segment>,
    /// Segments present after the changeset and absent before it.
    pub created: HashSet<Segment>,
    /// Segments rebuilt by the changeset without geometric change.
    pub unchanged: HashSet<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Before,
    After,
}

struct DiffBuilder<'a, S> {
    repository: &'a Repository<S>,
    changeset: ChangesetId,
    removed_nodes: HashMap<NodeId, Arc<Node>>,
    added_nodes: HashMap<NodeId, Arc<Node>>,
    moved: Vec<NodeId>,
    prior: HashMap<NodeId, Option<Arc<Node>>>,
    touched_ways: HashSet<WayId>,
    removed: HashSet<Segment>,
    created: HashSet<Segment>,
}

impl<'a, S: OsmSource> DiffBuilder<'a, S> {
    fn new(repository: &'a Repository<S>, changeset: ChangesetId) -> Self {
        Self {
            repository,
            changeset,
            removed_nodes: HashMap::new(),
            added_nodes: HashMap::new(),
            moved: Vec::new(),
            prior: HashMap::new(),
            touched_ways: HashSet::new(),
            removed: HashSet::new(),
            created: HashSet::new(),
        }
    }

    /// Node state before the changeset, memoised per node.
    fn prior(&mut self, id: NodeId) -> Result<Option<Arc<Node>>, AnalysisError> {
        if let Some(found) = self.prior.get(&id) {
            return Ok(found.clone());
        }
        let found = tolerate_redaction(self.repository.before_changeset(id, self.changeset))?;
        self.prior.insert(id, found.clone());
        Ok(found)
    }

    fn partition_nodes(&mut self, reconciled: &ReconciledChangeset) -> Result<(), AnalysisError> {
        for entity in &reconciled.create {
            if let Entity::Node(node) = entity
                && node.is_visible()
            {
                self.added_nodes.insert(node.id(), Arc::clone(node));
            }
        }
        for entity in &reconciled.modify {
            let Entity::Node(node) = entity else { continue };
            match self.prior(node.id())? {
                Some(before) if node.moved_from(&before) => {
                    self.removed_nodes.insert(node.id(), before);
                    self.added_nodes.insert(node.id(), Arc::clone(node));
                    self.moved.push(node.id());
                }
                Some(_) => {}
                None => {
                    self.added_nodes.insert(node.id(), Arc::clone(node));
                }
            }
        }
        for entity in &reconciled.delete {
            let Entity::Node(node) = entity else { continue };
            if let Some(before) = self.prior(node.id())? {
                self.removed_nodes.insert(node.id(), before);
            }
        }
        Ok(())
    }

    fn resolve(&mut self, id: NodeId, side: Side) -> Result<Option<Arc<Node>>, AnalysisError> {
        let changed = match side {
            Side::Before => self.removed_nodes.get(&id),
            Side::After => self.added_nodes.get(&id),
        };
        if let Some(node) = changed {
            return Ok(Some(Arc::clone(node)));
        }
        self.prior(id)
    }

    fn chain(&mut self, nodes: &[NodeId], side: Side) -> Result<(), AnalysisError> {
        let mut resolved = Vec::with_capacity(nodes.len());
        for id in nodes {
            resolved.push(self.resolve(*id, side)?);
        }
        let target = match side {
            Side::Before => &mut self.removed,
            Side::After => &mut self.created,
        };
        for pair in resolved.windows(2) {
            if let [Some(first), Some(second)] = pair
                && first.id() != second.id()
            {
                target.insert(Segment::new(Arc::clone(first), Arc::clone(second)));
            }
        }
        Ok(())
    }

    fn chain_ways(&mut self, reconciled: &ReconciledChangeset) -> Result<(), AnalysisError> {
        for entity in &reconciled.create {
            let Entity::Way(way) = entity else { continue };
            self.touched_ways.insert(way.id());
            if way.is_visible() {
                self.chain(way.nodes(), Side::After)?;
            }
        }
        for entity in reconciled.modify.iter().chain(&reconciled.delete) {
            let Entity::Way(way) = entity else { continue };
            self.touched_ways.insert(way.id());
            let before = tolerate_redaction(
                self.repository
                    .before_changeset(way.id(), self.changeset),
            )?;
            if let Some(before) = before {
                self.chain(before.nodes(), Side::Before)?;
            }
            if way.is_visible() {
                self.chain(way.nodes(), Side::After)?;
            }
        }
        Ok(())
    }

    /// Rebuild ways the changeset did not list but whose geometry changed
    /// because a member node moved.
    fn chain_indirect(&mut self, guard: DateTime<Utc>) -> Result<(), AnalysisError> {
        let mut visited: HashSet<WayId> = HashSet::new();
        for node in self.moved.clone() {
            for parent in self.repository.parent_ways(node)? {
                let id = parent.id();
                if self.touched_ways.contains(&id) || !visited.insert(id) {
                    continue;
                }
                let history = self.repository.history(id)?;
                let Some(way) = source::as_of(history.values().map(|way| &**way), guard) else {
                    continue;
                };
                if !way.contains(node) {
                    continue;
                }
                debug!("way {id} indirectly affected by node {node}");
                self.chain(way.nodes(), Side::Before)?;
                self.chain(way.nodes(), Side::After)?;
            }
        }
        Ok(())
    }

    fn finish(mut self) -> GeometryDiff {
        self.removed
            .extend(self.removed_nodes.into_values().map(Segment::point));
        self.created
            .extend(self.added_nodes.into_values().map(Segment::point));
        let unchanged: HashSet<Segment> =
            self.removed.intersection(&self.created).cloned().collect();
        self.removed.retain(|segment| !unchanged.contains(segment));
        self.created.retain(|segment| !unchanged.contains(segment));
        GeometryDiff {
            removed: self.removed,
            created: self.created,
            unchanged,
        }
    }
}

/// Moment used to pick the pre-changeset version of indirectly affected
/// ways.
///
/// Falls back to the earliest element timestamp in the changeset when its
/// metadata is unavailable.
fn guard_moment<S: OsmSource>(
    repository: &Repository<S>,
    changeset: ChangesetId,
    reconciled: &ReconciledChangeset,
) -> Result<Option<DateTime<Utc>>, AnalysisError> {
    let opened = match repository.changeset(changeset)? {
        Some(meta) => Some(meta.created_at),
        None => reconciled
            .iter()
            .filter_map(Entity::meta)
            .map(|meta| meta.timestamp)
            .min(),
    };
    Ok(opened.and_then(|at| at.checked_sub_signed(INDIRECT_GUARD)))
}

/// Diff the geometry of `changeset`.
///
/// # Errors
/// Returns [`AnalysisError::MissingChangeset`] when the source has no
/// download for `changeset`, or a source error from any lookup. Redacted
/// versions are skipped.
pub fn diff_changeset<S: OsmSource>(
    repository: &Repository<S>,
    changeset: ChangesetId,
) -> Result<GeometryDiff, AnalysisError> {
    info!("diffing changeset {changeset}");
    let download = repository
        .changeset_download(changeset)?
        .ok_or(AnalysisError::MissingChangeset { id: changeset })?;
    let reconciled = reconcile(&download);

    let mut builder = DiffBuilder::new(repository, changeset);
    builder.partition_nodes(&reconciled)?;
    builder.chain_ways(&reconciled)?;
    match guard_moment(repository, changeset, &reconciled)? {
        Some(guard) => builder.chain_indirect(guard)?,
        None if !builder.moved.is_empty() => {
            warn!("changeset {changeset} has no timestamp; indirect ways skipped");
        }
        None => {}
    }

    let diff = builder.finish();
    debug!(
        "changeset {changeset}: {} removed, {} created, {} unchanged",
        diff.removed.len(),
        diff.created.len(),
        diff.unchanged.len()
    );
    Ok(diff)
}
