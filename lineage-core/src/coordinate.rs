//! Tolerant WGS84 coordinates.

use std::hash::{Hash, Hasher};

use geo::{Coord, Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

/// Coordinates closer than this (in degrees, per axis) compare equal.
pub const COORDINATE_TOLERANCE: f64 = 5.0e-8;

/// Grid used to derive hashes; one cell is a tenth of a micro-degree.
const HASH_GRID: f64 = 1.0e7;

/// An immutable longitude/latitude pair.
///
/// Equality tolerates floating round-trip error: two coordinates are equal
/// when both axes differ by less than [`COORDINATE_TOLERANCE`]. The hash is
/// computed from the coordinate snapped to a fixed grid so that near-equal
/// coordinates hash identically.
///
/// # Examples
/// ```
/// use lineage_core::Coordinate;
///
/// let a = Coordinate::new(13.4, 52.5);
/// let b = Coordinate::new(13.4 + 1.0e-9, 52.5);
/// assert_eq!(a, b);
/// assert_ne!(a, Coordinate::new(13.5, 52.5));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinate {
    lon: f64,
    lat: f64,
}

impl Coordinate {
    /// Build a coordinate from longitude and latitude in degrees.
    #[must_use]
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Longitude in degrees.
    #[must_use]
    pub const fn lon(&self) -> f64 {
        self.lon
    }

    /// Latitude in degrees.
    #[must_use]
    pub const fn lat(&self) -> f64 {
        self.lat
    }

    /// Great-circle distance to `other` in metres.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        Haversine.distance(Point::from(*self), Point::from(*other))
    }

    /// Arithmetic mean of the supplied coordinates.
    ///
    /// Returns `None` for an empty input.
    ///
    /// # Examples
    /// ```
    /// use lineage_core::Coordinate;
    ///
    /// let centre = Coordinate::centroid(&[
    ///     Coordinate::new(0.0, 0.0),
    ///     Coordinate::new(2.0, 0.0),
    ///     Coordinate::new(2.0, 2.0),
    ///     Coordinate::new(0.0, 2.0),
    /// ]);
    /// assert_eq!(centre, Some(Coordinate::new(1.0, 1.0)));
    /// ```
    #[must_use]
    pub fn centroid(coordinates: &[Self]) -> Option<Self> {
        if coordinates.is_empty() {
            return None;
        }
        let (lon_sum, lat_sum) = coordinates
            .iter()
            .fold((0.0, 0.0), |(lon, lat), c| (lon + c.lon, lat + c.lat));
        #[expect(
            clippy::cast_precision_loss,
            reason = "way member counts are far below f64 mantissa precision"
        )]
        let count = coordinates.len() as f64;
        Some(Self::new(lon_sum / count, lat_sum / count))
    }

    fn grid_cell(&self) -> (i64, i64) {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "WGS84 degrees scaled by 1e7 fit comfortably in i64"
        )]
        let cell = (
            (self.lon * HASH_GRID).round() as i64,
            (self.lat * HASH_GRID).round() as i64,
        );
        cell
    }
}

impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        (self.lon - other.lon).abs() < COORDINATE_TOLERANCE
            && (self.lat - other.lat).abs() < COORDINATE_TOLERANCE
    }
}

impl Eq for Coordinate {}

impl Hash for Coordinate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.grid_cell().hash(state);
    }
}

impl From<Coordinate> for Coord<f64> {
    fn from(value: Coordinate) -> Self {
        Self {
            x: value.lon,
            y: value.lat,
        }
    }
}

impl From<Coord<f64>> for Coordinate {
    fn from(value: Coord<f64>) -> Self {
        Self::new(value.x, value.y)
    }
}

impl From<Coordinate> for Point<f64> {
    fn from(value: Coordinate) -> Self {
        Self::from(Coord::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(coordinate: &Coordinate) -> u64 {
        let mut hasher = DefaultHasher::new();
        coordinate.hash(&mut hasher);
        hasher.finish()
    }

    #[rstest]
    #[case(1.0e-9)]
    #[case(2.0e-8)]
    #[case(-4.0e-8)]
    fn near_equal_coordinates_match(#[case] delta: f64) {
        let a = Coordinate::new(-0.1275, 51.5072);
        let b = Coordinate::new(-0.1275 + delta, 51.5072 - delta);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[rstest]
    fn distinct_coordinates_differ() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 1.0e-7);
        assert_ne!(a, b);
    }

    #[rstest]
    fn one_degree_of_latitude_is_about_111_km() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 1.0);
        let distance = a.distance_to(&b);
        assert!((110_000.0..112_500.0).contains(&distance), "got {distance}");
    }

    #[rstest]
    fn centroid_of_nothing_is_none() {
        assert!(Coordinate::centroid(&[]).is_none());
    }
}
