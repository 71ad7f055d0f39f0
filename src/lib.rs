//! Facade crate for OSM edit lineage.
//!
//! This crate re-exports the versioned entity model and cache, the lineage
//! analyses built on them, and (behind `history-pbf`) the full-history
//! extract loader.

#![forbid(unsafe_code)]

pub use lineage_core::{
    CacheConfig, CacheSet, Changeset, ChangesetDownload, ChangesetId, Coordinate, Entity,
    EntityKind, HistorySource, MemberRef, Node, NodeId, OsmSource, Polyline, Relation, RelationId,
    Repository, Segment, SourceError, Tags, Version, Versioned, Way, WayId,
};

#[cfg(feature = "store-sqlite")]
pub use lineage_core::{SqliteCacheDb, SqliteCacheError};

pub use lineage_analysis::{
    AnalysisError, AnalysisFailure, AnalysisOutcome, AnalysisReport, AnalysisRequest,
    BlameReport, GeometryDiff, ReconciledChangeset, blame_relation, diff_changeset, reconcile,
    run_batch, run_request, segment_relation,
};

#[cfg(feature = "history-pbf")]
pub use lineage_data::{HistoryIngestError, HistorySnapshot, load_history_pbf};

/// Test doubles for exercising analyses without a real history source.
#[cfg(feature = "test-support")]
pub use lineage_core::test_support;
