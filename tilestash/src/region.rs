//! Offline region records and their definitions.

use geo::BoundingRect;
use geo_types::Geometry;
use serde::{Deserialize, Serialize};

use crate::bounds::LatLonBounds;
use crate::error::OfflineError;

/// Identifier of a persisted offline region.
///
/// Assigned by the store at creation time; stable across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(i64);

impl RegionId {
    pub(crate) fn new(value: i64) -> Self {
        Self(value)
    }

    /// Raw numeric value of the identifier.
    pub fn value(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether background downloading for a region proceeds.
///
/// The flag is level-triggered: while a region is active, its download driver
/// keeps working towards completion; setting it inactive pauses scheduling of
/// new fetches without discarding progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DownloadState {
    /// No background work is scheduled.
    #[default]
    Inactive,
    /// The download driver fetches missing resources.
    Active,
}

/// Geographic extent of an offline region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegionExtent {
    /// A plain bounding box.
    Bounds(LatLonBounds),
    /// An arbitrary geometry; tiles are enumerated over its bounding box.
    ///
    /// Coordinates are `(lon, lat)` degree pairs.
    Geometry(Geometry<f64>),
}

/// Immutable description of what an offline region must contain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDefinition {
    style_url: String,
    extent: RegionExtent,
    min_zoom: f64,
    max_zoom: f64,
    pixel_ratio: f32,
    include_ideographs: bool,
}

impl RegionDefinition {
    /// Creates and validates a new definition.
    ///
    /// `max_zoom` may be `f64::INFINITY`, meaning "up to each tile source's
    /// native maximum".
    pub fn new(
        style_url: impl Into<String>,
        extent: RegionExtent,
        min_zoom: f64,
        max_zoom: f64,
        pixel_ratio: f32,
        include_ideographs: bool,
    ) -> Result<Self, OfflineError> {
        let definition = Self {
            style_url: style_url.into(),
            extent,
            min_zoom,
            max_zoom,
            pixel_ratio,
            include_ideographs,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Url of the style document the region is built from.
    pub fn style_url(&self) -> &str {
        &self.style_url
    }

    /// Geographic extent of the region.
    pub fn extent(&self) -> &RegionExtent {
        &self.extent
    }

    /// Minimum zoom level to download.
    pub fn min_zoom(&self) -> f64 {
        self.min_zoom
    }

    /// Maximum zoom level to download. May be `f64::INFINITY`.
    pub fn max_zoom(&self) -> f64 {
        self.max_zoom
    }

    /// Pixel ratio the region is downloaded for. Affects sprite selection.
    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    /// Whether CJK ideograph glyph ranges are included in the download.
    pub fn include_ideographs(&self) -> bool {
        self.include_ideographs
    }

    /// Axis-aligned bounding box of the region's extent.
    ///
    /// For a geometry extent this is computed over all coordinate pairs of
    /// the geometry, including nested rings and multi-geometries. Returns
    /// `None` for a geometry with no coordinates.
    pub fn bounds(&self) -> Option<LatLonBounds> {
        match &self.extent {
            RegionExtent::Bounds(bounds) => Some(*bounds),
            RegionExtent::Geometry(geometry) => geometry.bounding_rect().map(Into::into),
        }
    }

    fn validate(&self) -> Result<(), OfflineError> {
        if self.min_zoom < 0.0 || !self.min_zoom.is_finite() {
            return Err(OfflineError::InvalidDefinition(format!(
                "min zoom must be a non-negative number, got {}",
                self.min_zoom
            )));
        }
        if self.max_zoom < self.min_zoom {
            return Err(OfflineError::InvalidDefinition(format!(
                "min zoom {} is greater than max zoom {}",
                self.min_zoom, self.max_zoom
            )));
        }
        if !(self.pixel_ratio.is_finite() && self.pixel_ratio > 0.0) {
            return Err(OfflineError::InvalidDefinition(format!(
                "pixel ratio must be positive, got {}",
                self.pixel_ratio
            )));
        }
        if self.bounds().is_none() {
            return Err(OfflineError::InvalidDefinition(
                "extent geometry contains no coordinates".to_string(),
            ));
        }

        Ok(())
    }

    pub(crate) fn to_json(&self) -> Result<String, OfflineError> {
        Ok(serde_json::to_string(self)?)
    }

    pub(crate) fn from_json(json: &str) -> Result<Self, OfflineError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A persisted offline region record.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    id: RegionId,
    definition: RegionDefinition,
    metadata: Vec<u8>,
}

impl Region {
    pub(crate) fn new(id: RegionId, definition: RegionDefinition, metadata: Vec<u8>) -> Self {
        Self {
            id,
            definition,
            metadata,
        }
    }

    /// Identifier of the region.
    pub fn id(&self) -> RegionId {
        self.id
    }

    /// The region's definition.
    pub fn definition(&self) -> &RegionDefinition {
        &self.definition
    }

    /// Caller-defined metadata blob, e.g. a display name.
    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use geo_types::{polygon, MultiPoint};

    use super::*;

    fn point_definition() -> RegionDefinition {
        RegionDefinition::new(
            "https://styles.test/basic.json",
            RegionExtent::Bounds(LatLonBounds::point(48.8584, 2.2945)),
            0.0,
            14.0,
            1.0,
            false,
        )
        .expect("definition should be valid")
    }

    #[test]
    fn inverted_zoom_range_is_rejected() {
        let result = RegionDefinition::new(
            "https://styles.test/basic.json",
            RegionExtent::Bounds(LatLonBounds::world()),
            10.0,
            5.0,
            1.0,
            false,
        );
        assert_matches!(result, Err(OfflineError::InvalidDefinition(_)));
    }

    #[test]
    fn non_positive_pixel_ratio_is_rejected() {
        for ratio in [0.0, -1.0, f32::NAN] {
            let result = RegionDefinition::new(
                "https://styles.test/basic.json",
                RegionExtent::Bounds(LatLonBounds::world()),
                0.0,
                5.0,
                ratio,
                false,
            );
            assert_matches!(result, Err(OfflineError::InvalidDefinition(_)));
        }
    }

    #[test]
    fn empty_geometry_is_rejected() {
        let result = RegionDefinition::new(
            "https://styles.test/basic.json",
            RegionExtent::Geometry(Geometry::MultiPoint(MultiPoint(vec![]))),
            0.0,
            5.0,
            1.0,
            false,
        );
        assert_matches!(result, Err(OfflineError::InvalidDefinition(_)));
    }

    #[test]
    fn unbounded_max_zoom_is_legal() {
        let definition = RegionDefinition::new(
            "https://styles.test/basic.json",
            RegionExtent::Bounds(LatLonBounds::world()),
            3.0,
            f64::INFINITY,
            1.0,
            false,
        );
        assert!(definition.is_ok());
    }

    #[test]
    fn geometry_bounds_cover_all_rings() {
        let geometry: Geometry<f64> = polygon![
            (x: 2.0, y: 48.0),
            (x: 3.0, y: 48.0),
            (x: 3.0, y: 49.5),
            (x: 2.0, y: 49.5),
        ]
        .into();
        let definition = RegionDefinition::new(
            "https://styles.test/basic.json",
            RegionExtent::Geometry(geometry),
            0.0,
            10.0,
            1.0,
            false,
        )
        .expect("definition should be valid");

        let bounds = definition.bounds().expect("polygon has bounds");
        assert_eq!(bounds.south(), 48.0);
        assert_eq!(bounds.west(), 2.0);
        assert_eq!(bounds.north(), 49.5);
        assert_eq!(bounds.east(), 3.0);
    }

    #[test]
    fn definition_round_trips_through_json() {
        let definition = point_definition();
        let json = definition.to_json().expect("serialization should succeed");
        let parsed = RegionDefinition::from_json(&json).expect("deserialization should succeed");
        assert_eq!(definition, parsed);
    }
}
