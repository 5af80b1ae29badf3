//! Download progress of an offline region.

use serde::{Deserialize, Serialize};

use crate::region::DownloadState;

/// Snapshot of a region's download progress.
///
/// Recomputed from the persisted cache state and the running download; never
/// stored independently. `required_resource_count` is a lower bound until the
/// style and tile source manifests have been resolved, at which point
/// `required_resource_count_is_precise` becomes `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegionStatus {
    /// Whether the region is currently downloading.
    pub download_state: DownloadState,
    /// Number of resources (of all kinds) cached for this region.
    pub completed_resource_count: u64,
    /// Total byte size of the cached resources.
    pub completed_resource_size: u64,
    /// Number of tiles cached for this region.
    pub completed_tile_count: u64,
    /// Total byte size of the cached tiles.
    pub completed_tile_size: u64,
    /// Number of resources the region requires in total.
    pub required_resource_count: u64,
    /// Number of tiles the region requires in total.
    pub required_tile_count: u64,
    /// Whether the required counts are exact rather than a lower bound.
    pub required_resource_count_is_precise: bool,
}

impl RegionStatus {
    /// Returns `true` once every required resource is cached.
    ///
    /// Always `false` while the required count is still imprecise, regardless
    /// of the counter values.
    pub fn is_complete(&self) -> bool {
        self.required_resource_count_is_precise
            && self.completed_resource_count >= self.required_resource_count
    }
}
