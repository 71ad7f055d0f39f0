//! Error types for the analysis engines.

use lineage_core::{ChangesetId, RelationId, SourceError};
use log::debug;
use thiserror::Error;

/// Errors raised while running an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// The collaborator source failed.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// The changeset has no download to analyse.
    #[error("changeset {id} was not found")]
    MissingChangeset {
        /// Requested changeset.
        id: ChangesetId,
    },
    /// The relation does not exist at the requested moment.
    #[error("relation {id} was not found")]
    MissingRelation {
        /// Requested relation.
        id: RelationId,
    },
}

/// Treat a redacted version as absent so history walks can carry on.
pub(crate) fn tolerate_redaction<T>(
    result: Result<Option<T>, SourceError>,
) -> Result<Option<T>, SourceError> {
    match result {
        Err(err) if err.is_redacted() => {
            debug!("skipping inaccessible version: {err}");
            Ok(None)
        }
        other => other,
    }
}
