//! Tilestash is the offline-region core of a map rendering SDK: it downloads
//! bounded slices of map data (styles, tile source manifests, tiles, glyphs
//! and sprites) into a local cache database so maps keep working without a
//! network connection.
//!
//! # Quick start
//!
//! ```no_run
//! use tilestash::{
//!     DownloadState, LatLonBounds, OfflineManagerBuilder, RegionDefinition, RegionExtent,
//! };
//!
//! # tokio_test::block_on(async {
//! let manager = OfflineManagerBuilder::new()
//!     .with_database_path("cache/offline.db")
//!     .build()
//!     .await?;
//!
//! let definition = RegionDefinition::new(
//!     "https://demotiles.maplibre.org/style.json",
//!     RegionExtent::Bounds(LatLonBounds::new(48.81, 2.22, 48.90, 2.47)),
//!     0.0,
//!     14.0,
//!     1.0,
//!     false,
//! )?;
//!
//! let region = manager
//!     .create_offline_region(&definition, b"Paris".to_vec())
//!     .await?;
//! let mut events = manager.watch_region(region.id());
//! manager
//!     .set_download_state(region.id(), DownloadState::Active)
//!     .await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let tilestash::RegionEvent::Progress(status) = event {
//!         if status.is_complete() {
//!             manager
//!                 .set_download_state(region.id(), DownloadState::Inactive)
//!                 .await?;
//!             break;
//!         }
//!     }
//! }
//! # Ok::<(), tilestash::error::OfflineError>(())
//! # });
//! ```
//!
//! # Main components
//!
//! * [`OfflineManager`] creates, lists, merges and deletes regions, and owns
//!   the shared cache database and the fetch layer.
//! * [`RegionDefinition`] describes what a region must contain: a style url,
//!   a geographic extent (box or arbitrary geometry), a zoom range, a pixel
//!   ratio and whether CJK glyphs are included.
//! * Activating a region (`set_download_state`) spawns a background download
//!   that resolves the style, enumerates the required resources and fetches
//!   the missing ones; [`RegionEvent`]s report progress, soft errors and the
//!   tile-count-limit condition over the channel returned by
//!   [`OfflineManager::watch_region`].
//! * The [`FileSource`] trait is the seam to the resource-fetching layer;
//!   [`HttpFileSource`] is the default implementation.
//!
//! Resources are shared between regions through reference counting: deleting
//! a region only evicts resources no other region still requires. Resources
//! cached outside any region form the ambient cache, which can be bounded,
//! invalidated or cleared independently.

#![warn(clippy::unwrap_used)]
#![warn(missing_docs)]

mod bounds;
mod download;
pub mod error;
mod glyphs;
mod http_source;
mod manager;
mod region;
mod resource;
mod status;
mod store;
mod style;
mod tile_cover;
mod time;

pub use bounds::LatLonBounds;
pub use download::{RegionError, RegionEvent};
pub use http_source::HttpFileSource;
pub use manager::{OfflineManager, OfflineManagerBuilder};
pub use region::{DownloadState, Region, RegionDefinition, RegionExtent, RegionId};
pub use resource::{FetchResult, FileSource, Resource, ResourceKind};
pub use status::RegionStatus;
pub use tile_cover::TileIndex;

// Reexport geo_types for construction of geometry extents.
pub use geo_types;
