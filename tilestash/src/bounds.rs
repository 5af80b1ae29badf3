//! Geographic bounding box of an offline region.

use serde::{Deserialize, Serialize};

/// Maximum latitude representable in the web-mercator projection.
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

/// Axis-aligned geographic bounding box in degrees.
///
/// A box may be degenerate (zero width or height); a single point is a legal
/// extent for an offline region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLonBounds {
    south: f64,
    west: f64,
    north: f64,
    east: f64,
}

impl LatLonBounds {
    /// Creates a new bounding box from its southwest and northeast corners.
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south: south.min(north),
            west: west.min(east),
            north: south.max(north),
            east: west.max(east),
        }
    }

    /// Bounding box containing a single point.
    pub fn point(lat: f64, lon: f64) -> Self {
        Self::new(lat, lon, lat, lon)
    }

    /// Bounding box covering the whole world.
    pub fn world() -> Self {
        Self::new(-90.0, -180.0, 90.0, 180.0)
    }

    /// Southern edge latitude.
    pub fn south(&self) -> f64 {
        self.south
    }

    /// Western edge longitude.
    pub fn west(&self) -> f64 {
        self.west
    }

    /// Northern edge latitude.
    pub fn north(&self) -> f64 {
        self.north
    }

    /// Eastern edge longitude.
    pub fn east(&self) -> f64 {
        self.east
    }

    /// Extends the box to include the given point.
    pub fn extend(&mut self, lat: f64, lon: f64) {
        self.south = self.south.min(lat);
        self.north = self.north.max(lat);
        self.west = self.west.min(lon);
        self.east = self.east.max(lon);
    }

    /// Returns `true` if the given point lies within the box (edges included).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
    }

    /// Returns `true` if the two boxes share at least one point.
    pub fn intersects(&self, other: &LatLonBounds) -> bool {
        self.south <= other.north
            && other.south <= self.north
            && self.west <= other.east
            && other.west <= self.east
    }
}

impl From<geo_types::Rect<f64>> for LatLonBounds {
    fn from(rect: geo_types::Rect<f64>) -> Self {
        Self::new(rect.min().y, rect.min().x, rect.max().y, rect.max().x)
    }
}
