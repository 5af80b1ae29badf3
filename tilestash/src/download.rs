//! Download state machine driving an offline region towards completion.
//!
//! A driver is spawned when a region is activated. It resolves the style and
//! tile source manifests, enumerates every resource the region requires,
//! fetches the ones missing from the cache with bounded concurrency and
//! reports progress over the region's event channel. The activation flag is
//! level-triggered: deactivating stops scheduling of new fetches but lets
//! in-flight ones finish and land in the cache.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use log::{info, trace, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::error::OfflineError;
use crate::glyphs::glyph_ranges;
use crate::time::unix_now;
use crate::region::{DownloadState, RegionDefinition, RegionId};
use crate::resource::{FetchResult, FileSource, Resource, ResourceKind};
use crate::status::RegionStatus;
use crate::store::OfflineStore;
use crate::style::{self, StyleManifest, TileJson};
use crate::tile_cover::{tile_cover, zoom_levels};

/// Failure report delivered through a region's event channel.
#[derive(Debug, Clone)]
pub struct RegionError {
    /// The resource whose fetch failed, if the failure is tied to one.
    pub resource: Option<Resource>,
    /// Human-readable description of the failure.
    pub message: String,
}

/// Events emitted while a region downloads.
///
/// Progress events for one region are delivered in non-decreasing order of
/// `completed_resource_count`.
#[derive(Debug, Clone)]
pub enum RegionEvent {
    /// Progress counters changed.
    Progress(RegionStatus),
    /// A fetch failed. Transient: the region stays active and the resource is
    /// retried on the next activation.
    Error(RegionError),
    /// The region's tile pyramid exceeds the configured tile count limit.
    /// Terminal for this activation; no tiles are fetched.
    TileCountLimitExceeded(u64),
}

/// Routes events from download drivers to per-region subscribers.
#[derive(Clone, Default)]
pub(crate) struct EventSink {
    observers: Arc<Mutex<HashMap<RegionId, mpsc::UnboundedSender<RegionEvent>>>>,
}

impl EventSink {
    /// Subscribes to a region's events, replacing any previous subscriber.
    pub fn subscribe(&self, id: RegionId) -> mpsc::UnboundedReceiver<RegionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().insert(id, tx);
        rx
    }

    pub fn unsubscribe(&self, id: RegionId) {
        self.observers.lock().remove(&id);
    }

    pub fn emit(&self, id: RegionId, event: RegionEvent) {
        let mut observers = self.observers.lock();
        if let Some(tx) = observers.get(&id) {
            if tx.send(event).is_err() {
                observers.remove(&id);
            }
        }
    }
}

pub(crate) struct DownloadDriver {
    region_id: RegionId,
    definition: RegionDefinition,
    store: Arc<OfflineStore>,
    source: Arc<dyn FileSource>,
    events: EventSink,
    state: watch::Receiver<DownloadState>,
    concurrency: usize,
    tile_count_limit: u64,
}

impl DownloadDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        region_id: RegionId,
        definition: RegionDefinition,
        store: Arc<OfflineStore>,
        source: Arc<dyn FileSource>,
        events: EventSink,
        state: watch::Receiver<DownloadState>,
        concurrency: usize,
        tile_count_limit: u64,
    ) -> Self {
        Self {
            region_id,
            definition,
            store,
            source,
            events,
            state,
            concurrency,
            tile_count_limit,
        }
    }

    pub async fn run(self) {
        let region_id = self.region_id;
        if let Err(err) = self.run_inner().await {
            warn!("Offline region {region_id} download failed: {err}");
            self.events.emit(
                region_id,
                RegionEvent::Error(RegionError {
                    resource: None,
                    message: err.to_string(),
                }),
            );
        }
    }

    async fn run_inner(&self) -> Result<(), OfflineError> {
        let bounds = self.definition.bounds().ok_or_else(|| {
            OfflineError::InvalidDefinition("extent geometry contains no coordinates".to_string())
        })?;

        let counts = self.store.region_counts(self.region_id).await?;
        let mut status = RegionStatus {
            download_state: DownloadState::Active,
            completed_resource_count: counts.resources,
            completed_resource_size: counts.resource_size,
            completed_tile_count: counts.tiles,
            completed_tile_size: counts.tile_size,
            required_resource_count: counts.resources,
            required_tile_count: counts.tiles,
            required_resource_count_is_precise: false,
        };
        self.emit_progress(&mut status);

        // The style and the tile source manifests are a hard dependency of
        // tile enumeration; they are resolved sequentially before anything
        // else is scheduled.
        let style_resource = Resource::new(ResourceKind::Style, self.definition.style_url());
        let style_bytes = self.ensure_manifest(&style_resource, &mut status).await?;
        let style = StyleManifest::parse(&style_bytes)?;

        let mut seen: HashSet<Resource> = HashSet::new();
        seen.insert(style_resource);

        let mut tile_plans = vec![];
        for (name, source) in &style.sources {
            if self.is_deactivated() {
                return Ok(());
            }
            if !source.is_tiled() {
                continue;
            }

            let (templates, source_min, source_max) = match &source.url {
                Some(url) => {
                    let resource = Resource::new(ResourceKind::Source, url.clone());
                    let bytes = self.ensure_manifest(&resource, &mut status).await?;
                    seen.insert(resource);
                    let manifest = TileJson::parse(&bytes)?;
                    (manifest.tiles, manifest.minzoom, manifest.maxzoom)
                }
                None => (source.tiles.clone(), source.minzoom, source.maxzoom),
            };

            let Some(template) = templates.first() else {
                warn!("Tile source {name} declares no tile url templates");
                continue;
            };
            let zooms = zoom_levels(
                self.definition.min_zoom(),
                self.definition.max_zoom(),
                source_min,
                source_max,
            );
            if let Some(zooms) = zooms {
                tile_plans.push((template.clone(), zooms));
            }
        }

        let mut pending = VecDeque::new();
        for (template, zooms) in tile_plans {
            for z in zooms {
                for tile in tile_cover(&bounds, z) {
                    let url = style::expand_tile_url(&template, tile.x, tile.y, z);
                    let resource = Resource::new(ResourceKind::Tile, url);
                    if seen.insert(resource.clone()) {
                        pending.push_back(resource);
                    }
                }
            }
        }

        if let Some(glyph_template) = &style.glyphs {
            for stack in style.font_stacks() {
                for (start, end) in glyph_ranges(self.definition.include_ideographs()) {
                    let url = style::expand_glyph_url(glyph_template, &stack, start, end);
                    let resource = Resource::new(ResourceKind::Glyphs, url);
                    if seen.insert(resource.clone()) {
                        pending.push_back(resource);
                    }
                }
            }
        }

        if let Some(sprite) = &style.sprite {
            let (json_url, image_url) =
                style::sprite_urls(sprite, self.definition.pixel_ratio());
            for resource in [
                Resource::new(ResourceKind::SpriteJson, json_url),
                Resource::new(ResourceKind::SpriteImage, image_url),
            ] {
                if seen.insert(resource.clone()) {
                    pending.push_back(resource);
                }
            }
        }

        let required_tiles = seen.iter().filter(|r| r.kind().is_tile()).count() as u64;
        if required_tiles > self.tile_count_limit {
            info!(
                "Offline region {} requires {required_tiles} tiles, over the limit of {}",
                self.region_id, self.tile_count_limit
            );
            self.emit(RegionEvent::TileCountLimitExceeded(self.tile_count_limit));
            return Ok(());
        }

        status.required_resource_count = seen.len() as u64;
        status.required_tile_count = required_tiles;
        status.required_resource_count_is_precise = true;
        self.emit_progress(&mut status);

        self.download_pending(pending, &mut status).await?;

        if status.is_complete() {
            info!("Offline region {} download complete", self.region_id);
        }
        Ok(())
    }

    /// Makes a manifest resource available, from cache or by fetching it.
    ///
    /// Fetch failures propagate: without a manifest the activation attempt
    /// cannot enumerate the region's resources.
    async fn ensure_manifest(
        &self,
        resource: &Resource,
        status: &mut RegionStatus,
    ) -> Result<Bytes, OfflineError> {
        let cached = self.store.get_resource(resource).await?;
        let prior_size = cached.as_ref().map(|cached| cached.data.len() as u64);

        if let Some(cached) = cached {
            if cached.is_fresh(unix_now()) {
                trace!("Cache hit for {}", resource.url());
                let newly = self.store.mark_owned(self.region_id, resource).await?;
                if newly {
                    apply_completion(
                        status,
                        resource.kind(),
                        cached.data.len() as u64,
                        None,
                        true,
                    );
                    self.emit_progress(status);
                }
                return Ok(cached.data);
            }
        }

        let fetched = self.source.fetch(resource).await?;
        info!("Loaded {}", resource.url());
        self.store
            .put_resource(resource, &fetched.data, fetched.expires)
            .await?;
        let newly = self.store.mark_owned(self.region_id, resource).await?;
        apply_completion(
            status,
            resource.kind(),
            fetched.data.len() as u64,
            prior_size,
            newly,
        );
        self.emit_progress(status);
        Ok(fetched.data)
    }

    /// Downloads all pending resources with bounded concurrency.
    ///
    /// Resources already fresh in the cache are claimed without a fetch, so
    /// re-activating a region never re-downloads completed work.
    async fn download_pending(
        &self,
        mut queue: VecDeque<Resource>,
        status: &mut RegionStatus,
    ) -> Result<(), OfflineError> {
        let mut in_flight: JoinSet<(
            Resource,
            Option<u64>,
            Result<FetchResult, OfflineError>,
        )> = JoinSet::new();

        loop {
            while in_flight.len() < self.concurrency && !self.is_deactivated() {
                let Some(resource) = queue.pop_front() else {
                    break;
                };

                let meta = self.store.resource_meta(&resource).await?;
                if let Some(meta) = &meta {
                    if meta.is_fresh(unix_now()) {
                        let newly = self.store.mark_owned(self.region_id, &resource).await?;
                        if newly {
                            apply_completion(status, resource.kind(), meta.size, None, true);
                            self.emit_progress(status);
                        }
                        continue;
                    }
                }

                let prior_size = meta.map(|meta| meta.size);
                let source = Arc::clone(&self.source);
                in_flight.spawn(async move {
                    let result = source.fetch(&resource).await;
                    (resource, prior_size, result)
                });
            }

            match in_flight.join_next().await {
                Some(Ok((resource, prior_size, Ok(fetched)))) => {
                    trace!("Loaded {}", resource.url());
                    self.store
                        .put_resource(&resource, &fetched.data, fetched.expires)
                        .await?;
                    let newly = self.store.mark_owned(self.region_id, &resource).await?;
                    apply_completion(
                        status,
                        resource.kind(),
                        fetched.data.len() as u64,
                        prior_size,
                        newly,
                    );
                    self.emit_progress(status);
                }
                Some(Ok((resource, _, Err(err)))) => {
                    warn!("Failed to load {}: {err}", resource.url());
                    self.emit(RegionEvent::Error(RegionError {
                        resource: Some(resource),
                        message: err.to_string(),
                    }));
                }
                Some(Err(join_err)) => {
                    warn!("Download task failed: {join_err}");
                }
                None => {
                    if self.is_deactivated() || queue.is_empty() {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    fn is_deactivated(&self) -> bool {
        *self.state.borrow() == DownloadState::Inactive
    }

    fn emit(&self, event: RegionEvent) {
        self.events.emit(self.region_id, event);
    }

    fn emit_progress(&self, status: &mut RegionStatus) {
        if !status.required_resource_count_is_precise {
            status.required_resource_count = status
                .required_resource_count
                .max(status.completed_resource_count);
            status.required_tile_count = status.required_tile_count.max(status.completed_tile_count);
        }
        self.emit(RegionEvent::Progress(*status));
    }
}

/// Updates the completed counters after a resource landed in the cache.
///
/// A refetch of an already-owned stale resource moves only the size counters;
/// the completed counts never regress.
fn apply_completion(
    status: &mut RegionStatus,
    kind: ResourceKind,
    new_size: u64,
    prior_size: Option<u64>,
    newly_owned: bool,
) {
    if newly_owned {
        status.completed_resource_count += 1;
        status.completed_resource_size += new_size;
        if kind.is_tile() {
            status.completed_tile_count += 1;
            status.completed_tile_size += new_size;
        }
    } else if let Some(prior) = prior_size {
        status.completed_resource_size =
            status.completed_resource_size.saturating_sub(prior) + new_size;
        if kind.is_tile() {
            status.completed_tile_size =
                status.completed_tile_size.saturating_sub(prior) + new_size;
        }
    }
}
