//! Pluggable durable tier receiving entries evicted from the fast tier.

use std::time::Duration;

use thiserror::Error;

use crate::Version;

/// Boxed backend failure.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Error raised by a [`DurableTier`] backend.
#[derive(Debug, Error)]
pub enum DurableTierError {
    /// The backend rejected a read, write or purge.
    #[error("durable tier {operation} failed for namespace {namespace}: {source}")]
    Backend {
        /// Cache namespace the request targeted.
        namespace: &'static str,
        /// Operation that failed.
        operation: &'static str,
        /// Backend failure.
        #[source]
        source: BoxedError,
    },
    /// A stored payload could not be encoded or decoded.
    #[error("durable entry {namespace}/{id} could not be (de)serialised: {source}")]
    Codec {
        /// Cache namespace of the entry.
        namespace: &'static str,
        /// Raw entity identifier.
        id: i64,
        /// Codec failure.
        #[source]
        source: BoxedError,
    },
}

/// Slower, larger storage consulted only on fast-tier misses.
///
/// One record exists per `(namespace, id, version)`; unversioned values
/// (changesets) use `None`. Count-based purging removes an arbitrary subset
/// of the excess entries; callers must not assume recency ordering.
pub trait DurableTier<T>: Send + Sync {
    /// Every stored value for `id`.
    fn load(&self, id: i64) -> Result<Vec<T>, DurableTierError>;

    /// Insert or replace the value stored for `(id, version)`.
    fn store(&self, id: i64, version: Option<Version>, value: &T)
    -> Result<(), DurableTierError>;

    /// Delete entries older than `max_age`, then delete entries beyond
    /// `max_entries`. Returns the number of deleted entries.
    fn purge(&self, max_age: Duration, max_entries: usize) -> Result<usize, DurableTierError>;
}
