//! History data sources for the lineage engines.
//!
//! Responsibilities:
//! - Load complete element histories from OSM history PBF extracts.
//! - Serve them through the `OsmSource` collaborator interface.
//!
//! Boundaries:
//! - Do not encode analysis rules (live in `lineage-analysis`).
//! - Caching belongs to the repository in `lineage-core`.
#![forbid(unsafe_code)]

mod ingest;
mod snapshot;

pub use ingest::{HistoryIngestError, load_history_pbf};
pub use snapshot::{HistorySnapshot, HistorySnapshotBuilder, HistorySummary};
