//! Parallel ingestion of OSM history PBF extracts.

use std::io::{self, BufReader};

use camino::{Utf8Path, Utf8PathBuf};
use log::{info, warn};
use osmpbf::ElementReader;
use thiserror::Error;

use crate::snapshot::HistorySnapshot;

mod accumulator;

use accumulator::HistoryAccumulator;

/// Errors returned when loading a history PBF extract.
#[derive(Debug, Error)]
pub enum HistoryIngestError {
    /// The path does not name a regular file.
    #[error("no history extract at {path}")]
    Missing {
        /// Requested path.
        path: Utf8PathBuf,
    },
    /// The file could not be opened.
    #[error("failed to open history extract at {path}")]
    Open {
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
        /// Requested path.
        path: Utf8PathBuf,
    },
    /// The file is not valid PBF data.
    #[error("failed to decode history extract at {path}")]
    Decode {
        /// Underlying decoder failure.
        #[source]
        source: osmpbf::Error,
        /// Requested path.
        path: Utf8PathBuf,
    },
}

/// Load every element version of a history PBF extract (`.osh.pbf`).
///
/// Versions without history metadata (version, changeset and timestamp) are
/// skipped and counted; plain extracts therefore load as single-version
/// histories.
///
/// # Errors
/// Returns [`HistoryIngestError`] when the file is missing, unreadable or
/// malformed.
///
/// # Examples
/// ```no_run
/// use camino::Utf8Path;
/// use lineage_data::load_history_pbf;
///
/// # fn main() -> Result<(), lineage_data::HistoryIngestError> {
/// let snapshot = load_history_pbf(Utf8Path::new("region.osh.pbf"))?;
/// println!("Versions: {}", snapshot.summary().versions);
/// # Ok(())
/// # }
/// ```
pub fn load_history_pbf(path: &Utf8Path) -> Result<HistorySnapshot, HistoryIngestError> {
    let open_error = |source| HistoryIngestError::Open {
        source,
        path: path.to_path_buf(),
    };
    if !lineage_fs::is_regular_file(path).map_err(open_error)? {
        return Err(HistoryIngestError::Missing {
            path: path.to_path_buf(),
        });
    }
    let file = lineage_fs::open_file(path).map_err(open_error)?;
    let reader = ElementReader::new(BufReader::new(file));

    let accumulator = reader
        .par_map_reduce(
            |element| {
                let mut accumulator = HistoryAccumulator::default();
                accumulator.process_element(element);
                accumulator
            },
            HistoryAccumulator::default,
            HistoryAccumulator::combine,
        )
        .map_err(|source| HistoryIngestError::Decode {
            source,
            path: path.to_path_buf(),
        })?;

    if accumulator.skipped() > 0 {
        warn!(
            "Skipped {} element versions without history metadata",
            accumulator.skipped()
        );
    }
    let snapshot = accumulator.into_snapshot();
    let summary = snapshot.summary();
    info!(
        "loaded {} versions of {} nodes, {} ways and {} relations from {path}",
        summary.versions, summary.nodes, summary.ways, summary.relations
    );
    Ok(snapshot)
}
