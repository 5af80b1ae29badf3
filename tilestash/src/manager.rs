//! Top-level entry point for offline region management.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::download::{DownloadDriver, EventSink, RegionEvent};
use crate::error::OfflineError;
use crate::http_source::HttpFileSource;
use crate::region::{DownloadState, Region, RegionDefinition, RegionId};
use crate::resource::{FileSource, Resource};
use crate::status::RegionStatus;
use crate::store::OfflineStore;

/// Default number of concurrent resource fetches per region.
const DEFAULT_FETCH_CONCURRENCY: usize = 8;

/// Default upper bound on the number of tiles a single region may require.
const DEFAULT_TILE_COUNT_LIMIT: u64 = 6000;

/// Sentinel for "no ambient cache size bound".
const AMBIENT_CACHE_UNBOUNDED: u64 = u64::MAX;

struct ActiveDownload {
    state: watch::Sender<DownloadState>,
    task: JoinHandle<()>,
}

/// Manages offline regions and the shared resource cache.
///
/// The manager owns the persistent store and the fetch layer; constructing
/// one (through [`OfflineManagerBuilder`]) and dropping it are the explicit
/// lifecycle of the subsystem. All operations are asynchronous and report
/// failures through their returned `Result`; download progress of individual
/// regions is delivered through the channel returned by
/// [`watch_region`](OfflineManager::watch_region).
///
/// # Example
///
/// ```no_run
/// use tilestash::{
///     DownloadState, LatLonBounds, OfflineManagerBuilder, RegionDefinition, RegionExtent,
/// };
///
/// # tokio_test::block_on(async {
/// let manager = OfflineManagerBuilder::new()
///     .with_database_path("offline.db")
///     .build()
///     .await?;
///
/// let definition = RegionDefinition::new(
///     "https://demotiles.maplibre.org/style.json",
///     RegionExtent::Bounds(LatLonBounds::new(48.81, 2.22, 48.90, 2.47)),
///     0.0,
///     14.0,
///     1.0,
///     false,
/// )?;
/// let region = manager.create_offline_region(&definition, b"Paris".to_vec()).await?;
///
/// let mut events = manager.watch_region(region.id());
/// manager.set_download_state(region.id(), DownloadState::Active).await?;
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok::<(), tilestash::error::OfflineError>(())
/// # });
/// ```
pub struct OfflineManager {
    store: Arc<OfflineStore>,
    source: Arc<dyn FileSource>,
    events: EventSink,
    downloads: Mutex<HashMap<RegionId, ActiveDownload>>,
    concurrency: usize,
    tile_count_limit: AtomicU64,
    ambient_cache_limit: AtomicU64,
}

impl OfflineManager {
    /// Creates and persists a new offline region with zero progress.
    ///
    /// The definition was validated at construction time; the new region is
    /// returned with its assigned identifier.
    pub async fn create_offline_region(
        &self,
        definition: &RegionDefinition,
        metadata: Vec<u8>,
    ) -> Result<Region, OfflineError> {
        self.store.create_region(definition, &metadata).await
    }

    /// Returns all persisted regions.
    ///
    /// Fails without partial results if the store is unreadable or any
    /// persisted definition cannot be deserialized.
    pub async fn list_offline_regions(&self) -> Result<Vec<Region>, OfflineError> {
        self.store.list_regions().await
    }

    /// Returns the region with the given id, if it exists.
    pub async fn get_offline_region(&self, id: RegionId) -> Result<Option<Region>, OfflineError> {
        self.store.get_region(id).await
    }

    /// Replaces a region's metadata blob, returning the stored value.
    pub async fn update_metadata(
        &self,
        id: RegionId,
        metadata: Vec<u8>,
    ) -> Result<Vec<u8>, OfflineError> {
        self.store.update_metadata(id, &metadata).await
    }

    /// Imports regions and their downloaded resources from another database
    /// file of the same schema.
    ///
    /// Resources already present locally are deduplicated by `(url, kind)`
    /// and not copied again. Returns the newly imported regions with fresh
    /// local identifiers.
    pub async fn merge_offline_regions(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Vec<Region>, OfflineError> {
        self.store.merge(path.as_ref()).await
    }

    /// Deletes a region and evicts resources no other region references.
    ///
    /// An active download is deactivated first and its in-flight work awaited
    /// before the persisted state is removed.
    pub async fn delete_region(&self, id: RegionId) -> Result<(), OfflineError> {
        self.deactivate_and_wait(id).await;
        self.events.unsubscribe(id);
        self.store.delete_region(id).await
    }

    /// Flags all of a region's resources for a freshness re-check on the next
    /// activation, without deleting them or resetting progress counters.
    pub async fn invalidate_region(&self, id: RegionId) -> Result<(), OfflineError> {
        if self.store.get_region(id).await?.is_none() {
            return Err(OfflineError::RegionNotFound(id));
        }
        self.store.invalidate_region(id).await
    }

    /// Sets a region's download state.
    ///
    /// Activation spawns a background download driver (or is a no-op if one
    /// is already running); deactivation stops scheduling of new fetches
    /// while letting in-flight ones finish and land in the cache.
    pub async fn set_download_state(
        &self,
        id: RegionId,
        state: DownloadState,
    ) -> Result<(), OfflineError> {
        match state {
            DownloadState::Inactive => {
                let downloads = self.downloads.lock();
                if let Some(active) = downloads.get(&id) {
                    let _ = active.state.send(DownloadState::Inactive);
                }
                Ok(())
            }
            DownloadState::Active => {
                let has_stale_entry = {
                    let downloads = self.downloads.lock();
                    match downloads.get(&id) {
                        Some(active)
                            if !active.task.is_finished()
                                && *active.state.borrow() == DownloadState::Active =>
                        {
                            // Already downloading; activation is level-triggered.
                            return Ok(());
                        }
                        Some(_) => true,
                        None => false,
                    }
                };
                if has_stale_entry {
                    // A previous driver is winding down; let its in-flight
                    // work settle before starting a new one.
                    self.deactivate_and_wait(id).await;
                }

                let region = self
                    .store
                    .get_region(id)
                    .await?
                    .ok_or(OfflineError::RegionNotFound(id))?;

                let (state_tx, state_rx) = watch::channel(DownloadState::Active);
                let driver = DownloadDriver::new(
                    id,
                    region.definition().clone(),
                    Arc::clone(&self.store),
                    Arc::clone(&self.source),
                    self.events.clone(),
                    state_rx,
                    self.concurrency,
                    self.tile_count_limit.load(Ordering::Relaxed),
                );
                let task = tokio::spawn(driver.run());
                self.downloads.lock().insert(
                    id,
                    ActiveDownload {
                        state: state_tx,
                        task,
                    },
                );
                Ok(())
            }
        }
    }

    /// Subscribes to a region's download events, replacing any previous
    /// subscriber for that region.
    pub fn watch_region(&self, id: RegionId) -> mpsc::UnboundedReceiver<RegionEvent> {
        self.events.subscribe(id)
    }

    /// Returns a snapshot of a region's progress from the persisted cache
    /// state.
    ///
    /// When no download driver is running the required counts are reported as
    /// a lower bound (`required_resource_count_is_precise == false`); precise
    /// counts are delivered through the event channel while downloading.
    pub async fn region_status(&self, id: RegionId) -> Result<RegionStatus, OfflineError> {
        if self.store.get_region(id).await?.is_none() {
            return Err(OfflineError::RegionNotFound(id));
        }
        let counts = self.store.region_counts(id).await?;

        let active = {
            let downloads = self.downloads.lock();
            downloads
                .get(&id)
                .map(|active| {
                    !active.task.is_finished()
                        && *active.state.borrow() == DownloadState::Active
                })
                .unwrap_or(false)
        };

        Ok(RegionStatus {
            download_state: if active {
                DownloadState::Active
            } else {
                DownloadState::Inactive
            },
            completed_resource_count: counts.resources,
            completed_resource_size: counts.resource_size,
            completed_tile_count: counts.tiles,
            completed_tile_size: counts.tile_size,
            required_resource_count: counts.resources,
            required_tile_count: counts.tiles,
            required_resource_count_is_precise: false,
        })
    }

    /// Sets the tile count limit applied to subsequently activated downloads.
    pub fn set_tile_count_limit(&self, limit: u64) {
        self.tile_count_limit.store(limit, Ordering::Relaxed);
    }

    /// Pre-seeds the ambient cache with a resource, e.g. one bundled with the
    /// application.
    pub async fn put_resource(
        &self,
        resource: &Resource,
        data: &[u8],
        expires: Option<i64>,
    ) -> Result<(), OfflineError> {
        self.store.put_resource(resource, data, expires).await?;
        self.enforce_ambient_limit().await
    }

    /// Flags all ambient (non-region) resources for a freshness re-check.
    pub async fn invalidate_ambient_cache(&self) -> Result<(), OfflineError> {
        self.store.invalidate_ambient().await
    }

    /// Removes all ambient (non-region) resources from the cache.
    pub async fn clear_ambient_cache(&self) -> Result<(), OfflineError> {
        self.store.clear_ambient().await
    }

    /// Bounds the ambient cache to the given byte size, evicting
    /// least-recently-accessed unowned resources if it currently exceeds it.
    pub async fn set_maximum_ambient_cache_size(&self, size: u64) -> Result<(), OfflineError> {
        self.ambient_cache_limit.store(size, Ordering::Relaxed);
        self.enforce_ambient_limit().await
    }

    /// Total byte size of all cached resource payloads, offline and ambient.
    pub async fn total_cache_size(&self) -> Result<u64, OfflineError> {
        self.store.total_size().await
    }

    /// Deletes every region and every cached resource.
    ///
    /// All active downloads are deactivated and awaited first.
    pub async fn reset_database(&self) -> Result<(), OfflineError> {
        let ids: Vec<RegionId> = self.downloads.lock().keys().copied().collect();
        for id in ids {
            self.deactivate_and_wait(id).await;
        }
        self.store.reset().await
    }

    /// Reclaims free pages in the database file.
    pub async fn pack_database(&self) -> Result<(), OfflineError> {
        self.store.pack().await
    }

    async fn enforce_ambient_limit(&self) -> Result<(), OfflineError> {
        let limit = self.ambient_cache_limit.load(Ordering::Relaxed);
        if limit != AMBIENT_CACHE_UNBOUNDED {
            self.store.evict_ambient_to(limit).await?;
        }
        Ok(())
    }

    async fn deactivate_and_wait(&self, id: RegionId) {
        let active = self.downloads.lock().remove(&id);
        if let Some(active) = active {
            let _ = active.state.send(DownloadState::Inactive);
            let _ = active.task.await;
        }
    }
}

enum DatabaseLocation {
    InMemory,
    Path(PathBuf),
}

/// Constructor for an [`OfflineManager`].
///
/// ```no_run
/// use tilestash::OfflineManagerBuilder;
///
/// # tokio_test::block_on(async {
/// let manager = OfflineManagerBuilder::new()
///     .with_database_path("cache/offline.db")
///     .with_fetch_concurrency(4)
///     .build()
///     .await?;
/// # Ok::<(), tilestash::error::OfflineError>(())
/// # });
/// ```
pub struct OfflineManagerBuilder {
    database: DatabaseLocation,
    source: Option<Arc<dyn FileSource>>,
    concurrency: usize,
    tile_count_limit: u64,
}

impl Default for OfflineManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineManagerBuilder {
    /// Initializes a builder with an in-memory database and the HTTP file
    /// source.
    pub fn new() -> Self {
        Self {
            database: DatabaseLocation::InMemory,
            source: None,
            concurrency: DEFAULT_FETCH_CONCURRENCY,
            tile_count_limit: DEFAULT_TILE_COUNT_LIMIT,
        }
    }

    /// Persists the cache database at the given path. The file and its parent
    /// directories are created if missing.
    pub fn with_database_path(mut self, path: impl AsRef<Path>) -> Self {
        self.database = DatabaseLocation::Path(path.as_ref().into());
        self
    }

    /// Uses the given file source instead of the default HTTP one.
    pub fn with_file_source(mut self, source: impl FileSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Caps the number of concurrent resource fetches per region.
    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the initial tile count limit for region downloads.
    pub fn with_tile_count_limit(mut self, limit: u64) -> Self {
        self.tile_count_limit = limit;
        self
    }

    /// Opens the store and builds the manager.
    pub async fn build(self) -> Result<OfflineManager, OfflineError> {
        let store = match &self.database {
            DatabaseLocation::InMemory => OfflineStore::in_memory().await?,
            DatabaseLocation::Path(path) => OfflineStore::open(path).await?,
        };
        let source = match self.source {
            Some(source) => source,
            None => Arc::new(HttpFileSource::new()?),
        };

        Ok(OfflineManager {
            store: Arc::new(store),
            source,
            events: EventSink::default(),
            downloads: Mutex::new(HashMap::new()),
            concurrency: self.concurrency,
            tile_count_limit: AtomicU64::new(self.tile_count_limit),
            ambient_cache_limit: AtomicU64::new(AMBIENT_CACHE_UNBOUNDED),
        })
    }
}
