//! Failure capture and batch execution of analyses.
//!
//! An analysis never takes its caller down: errors and panics are turned
//! into a [`AnalysisOutcome::Failed`] value carrying a message and logged.

use std::{
    any::Any,
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use lineage_core::{ChangesetId, OsmSource, Polyline, RelationId, Repository};
use log::{error, info};
use serde::Serialize;

use crate::{
    blame::{BlameReport, blame_relation},
    diff::{GeometryDiff, diff_changeset},
    error::AnalysisError,
    segment::segment_relation,
};

/// Why an analysis did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisFailure {
    /// Name of the analysis that failed.
    pub analysis: String,
    /// Error or panic message.
    pub message: String,
    /// Whether the analysis panicked rather than returning an error.
    pub panicked: bool,
}

/// Result of running one analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum AnalysisOutcome<T> {
    /// The analysis produced a result.
    Completed(T),
    /// The analysis failed; the failure has been logged.
    Failed(AnalysisFailure),
}

impl<T> AnalysisOutcome<T> {
    /// The result, if the analysis completed.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Failed(_) => None,
        }
    }

    /// The failure, if the analysis failed.
    pub const fn failure(&self) -> Option<&AnalysisFailure> {
        match self {
            Self::Completed(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "analysis panicked".to_owned()
    }
}

/// Run `analysis`, capturing errors and panics as a failed outcome.
///
/// # Examples
/// ```
/// use lineage_analysis::{AnalysisError, AnalysisOutcome, run_analysis};
/// use lineage_core::RelationId;
///
/// let outcome: AnalysisOutcome<()> = run_analysis("segments", || {
///     Err(AnalysisError::MissingRelation { id: RelationId::new(7) })
/// });
/// let failure = outcome.failure().expect("analysis fails");
/// assert_eq!(failure.message, "relation 7 was not found");
/// ```
pub fn run_analysis<T, F>(name: &str, analysis: F) -> AnalysisOutcome<T>
where
    F: FnOnce() -> Result<T, AnalysisError>,
{
    let (message, panicked) = match panic::catch_unwind(AssertUnwindSafe(analysis)) {
        Ok(Ok(value)) => return AnalysisOutcome::Completed(value),
        Ok(Err(err)) => (err.to_string(), false),
        Err(payload) => (panic_message(payload.as_ref()), true),
    };
    error!("{name} failed: {message}");
    AnalysisOutcome::Failed(AnalysisFailure {
        analysis: name.to_owned(),
        message,
        panicked,
    })
}

/// A single analysis to run against a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisRequest {
    /// Geometry diff of a changeset.
    Diff(ChangesetId),
    /// Ordered polylines of a relation.
    Segments(RelationId),
    /// Per-segment blame of a relation.
    Blame(RelationId),
}

impl AnalysisRequest {
    /// Short name used in logs and failure reports.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Diff(changeset) => format!("diff of changeset {changeset}"),
            Self::Segments(relation) => format!("segments of relation {relation}"),
            Self::Blame(relation) => format!("blame of relation {relation}"),
        }
    }
}

/// Result payload of an [`AnalysisRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "analysis", content = "result", rename_all = "snake_case")]
pub enum AnalysisReport {
    /// See [`diff_changeset`].
    Diff(GeometryDiff),
    /// See [`segment_relation`].
    Segments(Vec<Polyline>),
    /// See [`blame_relation`].
    Blame(BlameReport),
}

/// Run one request with failure capture.
pub fn run_request<S: OsmSource>(
    repository: &Repository<S>,
    request: AnalysisRequest,
) -> AnalysisOutcome<AnalysisReport> {
    run_analysis(&request.name(), || match request {
        AnalysisRequest::Diff(changeset) => {
            diff_changeset(repository, changeset).map(AnalysisReport::Diff)
        }
        AnalysisRequest::Segments(relation) => {
            segment_relation(repository, relation).map(AnalysisReport::Segments)
        }
        AnalysisRequest::Blame(relation) => {
            blame_relation(repository, relation).map(AnalysisReport::Blame)
        }
    })
}

/// Run `requests` on up to `workers` scoped threads sharing `repository`.
///
/// Outcomes are returned in request order. A failing request does not stop
/// the others.
pub fn run_batch<S: OsmSource>(
    repository: &Repository<S>,
    requests: &[AnalysisRequest],
    workers: NonZeroUsize,
) -> Vec<AnalysisOutcome<AnalysisReport>> {
    let workers = workers.get().min(requests.len().max(1));
    info!("running {} analyses on {workers} workers", requests.len());
    let next = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<AnalysisOutcome<AnalysisReport>>>> =
        Mutex::new(requests.iter().map(|_| None).collect());

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(request) = requests.get(index) else {
                        break;
                    };
                    let outcome = run_request(repository, *request);
                    let mut guard = slots
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    if let Some(slot) = guard.get_mut(index) {
                        *slot = Some(outcome);
                    }
                }
            });
        }
    });

    let slots = slots
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    slots
        .into_iter()
        .zip(requests)
        .map(|(slot, request)| {
            slot.unwrap_or_else(|| {
                AnalysisOutcome::Failed(AnalysisFailure {
                    analysis: request.name(),
                    message: "analysis did not run".to_owned(),
                    panicked: true,
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn completed_analyses_pass_their_value_through() {
        let outcome = run_analysis("sum", || Ok(2 + 2));
        assert_eq!(outcome.completed(), Some(4));
    }

    #[rstest]
    fn panics_become_failures() {
        let outcome: AnalysisOutcome<()> = run_analysis("explode", || panic!("boom"));
        let failure = outcome.failure().expect("panic captured");
        assert!(failure.panicked);
        assert_eq!(failure.message, "boom");
        assert_eq!(failure.analysis, "explode");
    }

    #[rstest]
    fn formatted_panics_keep_their_message() {
        let outcome: AnalysisOutcome<()> = run_analysis("explode", || panic!("code {}", 7));
        assert_eq!(
            outcome.failure().map(|failure| failure.message.as_str()),
            Some("code 7")
        );
    }

    #[rstest]
    fn outcomes_serialise_with_a_status_tag() {
        let outcome: AnalysisOutcome<u8> = AnalysisOutcome::Completed(3);
        let json = serde_json::to_value(&outcome).expect("serialise outcome");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["value"], 3);
    }
}
