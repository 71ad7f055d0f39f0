//! Analyses over versioned OSM history: changeset reconciliation, geometry
//! diffs, relation segmentation and per-segment blame.
//!
//! Every analysis reads through a [`lineage_core::Repository`], so repeated
//! lookups within and across analyses are served from its caches.
#![forbid(unsafe_code)]

mod blame;
mod diff;
mod error;
mod membership;
mod outcome;
mod reconcile;
mod segment;

pub use blame::{BlameReport, blame_relation};
pub use diff::{GeometryDiff, INDIRECT_GUARD, diff_changeset};
pub use error::AnalysisError;
pub use membership::{Membership, Moment, relation_segments, resolve_membership};
pub use outcome::{
    AnalysisFailure, AnalysisOutcome, AnalysisReport, AnalysisRequest, run_analysis, run_batch,
    run_request,
};
pub use reconcile::{ReconciledChangeset, reconcile};
pub use segment::{WayPath, segment_relation, segment_ways};
