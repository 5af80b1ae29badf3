//! Enumeration of the web-mercator tile pyramid covered by a region.

use serde::{Deserialize, Serialize};

use crate::bounds::{LatLonBounds, MAX_MERCATOR_LATITUDE};

/// Index of a tile in the standard web-mercator tile pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileIndex {
    /// Horizontal index of the tile.
    pub x: u32,
    /// Vertical index of the tile, counted from the north edge.
    pub y: u32,
    /// Zoom level of the tile.
    pub z: u8,
}

impl TileIndex {
    /// Creates a new index.
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }
}

fn lon_to_x(lon: f64, z: u8) -> u32 {
    let tile_count = (1u64 << z) as f64;
    let x = (lon + 180.0) / 360.0 * tile_count;
    (x.floor().max(0.0) as u64).min((1u64 << z) - 1) as u32
}

fn lat_to_y(lat: f64, z: u8) -> u32 {
    let lat = lat.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
    let tile_count = (1u64 << z) as f64;
    let lat_rad = lat.to_radians();
    let y = (1.0 - lat_rad.tan().asinh() / std::f64::consts::PI) / 2.0 * tile_count;
    (y.floor().max(0.0) as u64).min((1u64 << z) - 1) as u32
}

/// Iterates over all tiles of zoom level `z` intersecting the given bounds.
pub(crate) fn tile_cover(bounds: &LatLonBounds, z: u8) -> impl Iterator<Item = TileIndex> {
    let x_range = lon_to_x(bounds.west(), z)..=lon_to_x(bounds.east(), z);
    let y_range = lat_to_y(bounds.north(), z)..=lat_to_y(bounds.south(), z);

    x_range.flat_map(move |x| y_range.clone().map(move |y| TileIndex::new(x, y, z)))
}

/// Integer zoom levels a region covers for one tile source.
///
/// The region's zoom range is clamped to the source's native range; an
/// unbounded region `max_zoom` resolves to the source's native maximum. The
/// clamping is independent per source. Returns `None` if the ranges do not
/// overlap.
pub(crate) fn zoom_levels(
    region_min: f64,
    region_max: f64,
    source_min: Option<f64>,
    source_max: Option<f64>,
) -> Option<std::ops::RangeInclusive<u8>> {
    const DEFAULT_SOURCE_MAX_ZOOM: f64 = 22.0;

    let min = region_min.max(source_min.unwrap_or(0.0)).max(0.0);
    let max = region_max
        .min(source_max.unwrap_or(DEFAULT_SOURCE_MAX_ZOOM))
        .min(DEFAULT_SOURCE_MAX_ZOOM);
    if min > max {
        return None;
    }

    Some(min.floor() as u8..=max.floor() as u8)
}
