//! Collaborator interface for fetching entities and their histories.
//!
//! A source performs potentially blocking I/O (network, disk). Callers must
//! not hold cache locks while a fetch is outstanding. Missing entities are a
//! valid `Ok(None)` result; errors are reserved for transport failures,
//! malformed responses and redacted versions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    Changeset, ChangesetId, Entity, EntityKind, Id, Node, NodeId, Relation, Version, Versioned,
    Way,
};

/// Errors surfaced by an [`OsmSource`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The request did not complete. Not retried.
    #[error("{operation} failed: {message}")]
    Transport {
        /// Collaborator operation that failed.
        operation: &'static str,
        /// Human-readable failure description.
        message: String,
    },
    /// The response could not be understood.
    #[error("malformed response to {operation}: {message}")]
    Parse {
        /// Collaborator operation whose response was malformed.
        operation: &'static str,
        /// Human-readable failure description.
        message: String,
    },
    /// A specific historical version is not accessible.
    #[error("{kind} {id} {version} is redacted")]
    Redacted {
        /// Namespace of the entity.
        kind: EntityKind,
        /// Raw identifier of the entity.
        id: i64,
        /// Inaccessible version.
        version: Version,
    },
}

impl SourceError {
    /// Whether history walks may skip this failure and keep searching.
    #[must_use]
    pub const fn is_redacted(&self) -> bool {
        matches!(self, Self::Redacted { .. })
    }
}

/// Raw create/modify/delete lists of a changeset download.
///
/// Lists are reported verbatim and may mention the same entity more than
/// once, within and across lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangesetDownload {
    /// Entities listed as created.
    pub create: Vec<Entity>,
    /// Entities listed as modified.
    pub modify: Vec<Entity>,
    /// Entities listed as deleted.
    pub delete: Vec<Entity>,
}

/// History-aware access to one versioned element kind.
///
/// Histories are returned ordered by ascending version. Versions that the
/// source cannot serve (for example redacted ones) are simply absent.
pub trait HistorySource<T: Versioned>: Send + Sync {
    /// Fetch the current version of `id`.
    fn fetch_current(&self, id: Id<T>) -> Result<Option<T>, SourceError>;

    /// Fetch the current versions of several ids. Unknown ids are omitted.
    fn fetch_current_many(&self, ids: &[Id<T>]) -> Result<HashMap<Id<T>, T>, SourceError> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(element) = self.fetch_current(*id)? {
                found.insert(*id, element);
            }
        }
        Ok(found)
    }

    /// Fetch a specific version of `id`.
    fn fetch_version(&self, id: Id<T>, version: Version) -> Result<Option<T>, SourceError>;

    /// Fetch every available version of `id`, ascending.
    fn fetch_history(&self, id: Id<T>) -> Result<Vec<T>, SourceError>;

    /// Fetch the current relations that reference `id`.
    fn fetch_parent_relations(&self, id: Id<T>) -> Result<Vec<Relation>, SourceError>;

    /// Fetch the version of `id` that was current at `at`.
    fn fetch_as_of(&self, id: Id<T>, at: DateTime<Utc>) -> Result<Option<T>, SourceError> {
        let history = self.fetch_history(id)?;
        Ok(as_of(&history, at).cloned())
    }

    /// Fetch the state of `id` strictly before `changeset` was applied.
    fn fetch_before_changeset(
        &self,
        id: Id<T>,
        changeset: ChangesetId,
    ) -> Result<Option<T>, SourceError> {
        let history = self.fetch_history(id)?;
        Ok(before_changeset(&history, changeset).cloned())
    }
}

/// Full collaborator surface over nodes, ways, relations and changesets.
pub trait OsmSource: HistorySource<Node> + HistorySource<Way> + HistorySource<Relation> {
    /// Fetch the current ways that reference `node`.
    fn fetch_parent_ways(&self, node: NodeId) -> Result<Vec<Way>, SourceError>;

    /// Fetch changeset metadata. Unknown ids are omitted.
    fn fetch_changesets(
        &self,
        ids: &[ChangesetId],
    ) -> Result<HashMap<ChangesetId, Changeset>, SourceError>;

    /// Fetch the raw change lists of `changeset`.
    fn fetch_changeset_download(
        &self,
        changeset: ChangesetId,
    ) -> Result<Option<ChangesetDownload>, SourceError>;
}

/// Version current at `at`: the newest entry created no later than `at`.
///
/// A deletion version at that moment yields `None`.
pub fn as_of<'a, T, I>(history: I, at: DateTime<Utc>) -> Option<&'a T>
where
    T: Versioned,
    I: IntoIterator<Item = &'a T>,
{
    history
        .into_iter()
        .filter(|element| element.timestamp() <= at)
        .max_by_key(|element| element.version())
        .filter(|element| element.is_visible())
}

/// State strictly before `changeset` was applied.
///
/// When the changeset produced a version, the answer is the newest available
/// version older than the first one it produced. Otherwise it is the newest
/// version whose changeset id is lower than `changeset`. A deletion state
/// yields `None`.
pub fn before_changeset<'a, T, I>(history: I, changeset: ChangesetId) -> Option<&'a T>
where
    T: Versioned,
    I: IntoIterator<Item = &'a T>,
{
    let mut entries: Vec<&T> = history.into_iter().collect();
    entries.sort_by_key(|element| element.version());
    let candidate = match entries
        .iter()
        .position(|element| element.changeset() == changeset)
    {
        Some(first) => first
            .checked_sub(1)
            .and_then(|index| entries.get(index))
            .copied(),
        None => entries
            .iter()
            .rev()
            .find(|element| element.changeset() < changeset)
            .copied(),
    };
    candidate.filter(|element| element.is_visible())
}

/// Entry with the greatest timestamp strictly earlier than `cursor`.
///
/// Deletion versions count: a deletion is a change like any other.
pub fn latest_before<'a, T, I>(history: I, cursor: DateTime<Utc>) -> Option<&'a T>
where
    T: Versioned,
    I: IntoIterator<Item = &'a T>,
{
    history
        .into_iter()
        .filter(|element| element.timestamp() < cursor)
        .max_by_key(|element| (element.timestamp(), element.version()))
}
