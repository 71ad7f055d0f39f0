//! Versioned map entities, the collaborator interface that serves them and
//! the two-tier cache in front of it.
//!
//! Elements (nodes, ways and relations) are immutable values carrying their
//! version metadata. A [`Repository`] wraps any [`OsmSource`] with one
//! [`VersionedCache`] per element kind so that repeated historical lookups
//! are served from memory, or from the SQLite durable tier when the
//! `store-sqlite` feature is enabled.
#![forbid(unsafe_code)]

mod cache;
mod coordinate;
mod element;
mod geometry;
mod ids;
mod repository;
pub mod source;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use cache::{
    BoxedError, CacheConfig, ChangesetCache, DurableTier, DurableTierError, VersionedCache,
};
#[cfg(feature = "store-sqlite")]
pub use cache::{SqliteCacheDb, SqliteCacheError, SqliteDurableTier};
pub use coordinate::{COORDINATE_TOLERANCE, Coordinate};
pub use element::{
    Changeset, ChangesetId, ElementMeta, Entity, EntityKey, EntityKind, MemberRef, Node, NodeId,
    Relation, RelationId, RelationMember, Tags, Versioned, Way, WayId,
};
pub use geometry::{Polyline, Segment};
pub use ids::{Id, Version, VersionError};
pub use repository::{CacheSet, Cached, Repository};
pub use source::{ChangesetDownload, HistorySource, OsmSource, SourceError};
