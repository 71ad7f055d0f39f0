//! Typed identifiers and version numbers.
//!
//! Each entity namespace (node, way, relation, changeset) gets its own
//! [`Id`] type so that a way id can never be passed where a node id is
//! expected. Versions are dense, start at one and are never reused.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    num::NonZeroU64,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Identifier of an entity within the namespace of `T`.
///
/// The marker type only selects the namespace; the identifier itself is a
/// plain 64-bit integer with the usual total order.
///
/// # Examples
/// ```
/// use lineage_core::{NodeId, WayId};
///
/// let node = NodeId::new(42);
/// let way = WayId::new(42);
/// assert_eq!(node.get(), way.get());
/// assert!(NodeId::new(1) < node);
/// ```
pub struct Id<T> {
    raw: i64,
    kind: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self {
            raw,
            kind: PhantomData,
        }
    }

    /// Return the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.raw
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.raw)
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl<T> From<i64> for Id<T> {
    fn from(raw: i64) -> Self {
        Self::new(raw)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.raw)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(Self::new)
    }
}

/// Error returned by [`Version::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VersionError {
    /// Versions start at one.
    #[error("entity versions start at 1")]
    Zero,
}

/// Version number of a versioned entity.
///
/// An absent version is modelled as `Option<Version>`; `None` sorts before
/// every present version.
///
/// # Examples
/// ```
/// use lineage_core::Version;
///
/// let first = Version::FIRST;
/// assert_eq!(first.get(), 1);
/// assert_eq!(Some(first.next()), Version::new(2).ok());
/// assert!(Version::new(0).is_err());
/// assert!(None < Some(first));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Version(NonZeroU64);

impl Version {
    /// The first version every entity starts with.
    pub const FIRST: Self = Self(NonZeroU64::MIN);

    /// Validate and wrap a raw version number.
    pub fn new(raw: u64) -> Result<Self, VersionError> {
        NonZeroU64::new(raw).map(Self).ok_or(VersionError::Zero)
    }

    /// Return the raw version number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }

    /// The version that follows this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// The version preceding this one, if any.
    #[must_use]
    pub fn previous(self) -> Option<Self> {
        Self::new(self.get() - 1).ok()
    }

    /// Iterate over every version from [`Version::FIRST`] up to and including
    /// `self`.
    pub fn up_to(self) -> impl Iterator<Item = Self> {
        (1..=self.get()).filter_map(|raw| Self::new(raw).ok())
    }
}

impl TryFrom<u64> for Version {
    type Error = VersionError;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.get()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Node, Way};
    use rstest::rstest;

    #[rstest]
    fn ids_compare_by_value() {
        let a: Id<Node> = Id::new(3);
        let b: Id<Node> = Id::new(3);
        assert_eq!(a, b);
        assert!(Id::<Node>::new(2) < a);
    }

    #[rstest]
    fn ids_serialise_as_plain_integers() {
        let id: Id<Way> = Id::new(77);
        let json = serde_json::to_string(&id).expect("serialise id");
        assert_eq!(json, "77");
        let back: Id<Way> = serde_json::from_str(&json).expect("deserialise id");
        assert_eq!(back, id);
    }

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(u64::MAX, true)]
    fn versions_reject_zero(#[case] raw: u64, #[case] valid: bool) {
        assert_eq!(Version::new(raw).is_ok(), valid);
    }

    #[rstest]
    fn absent_version_sorts_lowest() {
        let mut versions = vec![Version::new(3).ok(), None, Some(Version::FIRST)];
        versions.sort();
        assert_eq!(versions, vec![None, Some(Version::FIRST), Version::new(3).ok()]);
    }

    #[rstest]
    fn up_to_is_dense() {
        let version = Version::new(4).expect("valid version");
        let raw: Vec<u64> = version.up_to().map(Version::get).collect();
        assert_eq!(raw, vec![1, 2, 3, 4]);
        assert_eq!(Version::FIRST.previous(), None);
    }

    #[rstest]
    fn zero_version_fails_to_deserialise() {
        let result: Result<Version, _> = serde_json::from_str("0");
        assert!(result.is_err());
    }
}
