//! The [ResourceManager] ties every piece together behind the interface the application talks to.
//!
//! There are no globals: the application constructs one manager, passes it to whatever needs assets, and shuts it down
//! (or drops it) when done.  Shutting down disposes everything still resident.
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::BoxStream;
use glam::Vec3;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::*;

#[derive(Clone, Debug, derive_builder::Builder)]
#[builder(default)]
pub struct ManagerConfig {
    /// Loads running longer than this fail with [CacheError::Timeout].  `None` waits forever.
    pub load_timeout: Option<Duration>,
    /// Length of one frame rate measurement window.
    pub fps_window: Duration,
    /// Readings below this drop the tier to [QualityTier::Low].
    pub downgrade_fps: u32,
    /// Automatic recovery after a downgrade; off by default.
    pub upgrade: Option<UpgradePolicy>,
    /// Meshes with more vertices than this are simplified at [QualityTier::Low].
    pub simplify_vertex_threshold: usize,
    /// Vertex ratios for LOD levels 1 and 2.
    pub lod_ratios: [f32; 2],
    /// How many preload items may load at once.
    pub preload_concurrency: usize,
    /// Whether a downgrade triggers an orphan sweep against the last declared set of active keys.
    pub evict_on_downgrade: bool,
}

impl Default for ManagerConfig {
    fn default() -> ManagerConfig {
        ManagerConfig {
            load_timeout: Some(Duration::from_secs(30)),
            fps_window: DEFAULT_FPS_WINDOW,
            downgrade_fps: DEFAULT_DOWNGRADE_FPS,
            upgrade: None,
            simplify_vertex_threshold: DEFAULT_SIMPLIFY_VERTEX_THRESHOLD,
            lod_ratios: DEFAULT_LOD_RATIOS,
            preload_concurrency: 4,
            evict_on_downgrade: true,
        }
    }
}

/// Everything the manager needs from the application.
#[derive(Clone)]
pub struct Collaborators {
    pub loader: Arc<dyn Loader<Asset>>,
    pub texture_loader: Option<Arc<dyn Loader<Texture>>>,
    pub simplifier: Option<Arc<dyn Simplifier>>,
    pub releaser: Arc<dyn ResourceReleaser>,
}

impl Collaborators {
    /// Just an asset loader; no textures, no simplification, nothing to release.
    pub fn new(loader: Arc<dyn Loader<Asset>>) -> Collaborators {
        Collaborators {
            loader,
            texture_loader: None,
            simplifier: None,
            releaser: Arc::new(NullReleaser),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Lod(#[from] LodError),
    #[error("{0} isn't loaded")]
    NotResident(CacheKey),
    #[error("no texture loader was provided")]
    NoTextureLoader,
}

/// Telemetry for status displays.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryReport {
    pub resident_asset_count: usize,
    pub loading_asset_count: usize,
    pub cached_texture_count: usize,
    /// Distinct geometries across resident assets.
    pub cached_geometry_count: usize,
    pub lod_set_count: usize,
    pub current_fps: u32,
    pub current_tier: QualityTier,
}

pub struct ResourceManager {
    config: ManagerConfig,
    quality: Arc<QualityController>,
    disposal: Arc<DisposalManager>,
    assets: AssetCache<Asset>,
    textures: TextureCache,
    loader: Arc<dyn Loader<Asset>>,
    texture_loader: Option<Arc<dyn Loader<Texture>>>,
    lod_builder: LodBuilder,
    monitor: Mutex<FrameRateMonitor>,
    lods: Mutex<LodRegistry>,
    preload: Mutex<PreloadQueue>,
    last_active: Mutex<ActiveSets>,
}

/// What the application last said it is using, per cache; swept against on downgrade.
///
/// Asset paths and texture keys live in different namespaces, so a set declared for one cache never sweeps the other.
#[derive(Clone, Debug, Default)]
struct ActiveSets {
    assets: Option<KeySet>,
    textures: Option<KeySet>,
}

impl ResourceManager {
    pub fn new(
        config: ManagerConfig,
        hints: CapabilityHints,
        collaborators: Collaborators,
    ) -> ResourceManager {
        let quality = Arc::new(QualityController::from_hints(
            &hints,
            config.downgrade_fps,
            config.upgrade,
        ));
        let disposal = Arc::new(DisposalManager::new(collaborators.releaser));
        let optimizer = AssetOptimizer::new(
            collaborators.simplifier.clone(),
            disposal.clone(),
            config.simplify_vertex_threshold,
        );
        let assets = AssetCache::new(
            "asset",
            disposal.clone(),
            quality.clone(),
            Arc::new(move |asset: &mut Asset, tier| optimizer.optimize(asset, tier)),
            config.load_timeout,
        );
        let textures = TextureCache::new(disposal.clone(), quality.clone(), config.load_timeout);

        ResourceManager {
            lod_builder: LodBuilder::new(collaborators.simplifier, config.lod_ratios),
            monitor: Mutex::new(FrameRateMonitor::new(Instant::now(), config.fps_window)),
            lods: Mutex::new(LodRegistry::new(disposal.clone())),
            preload: Mutex::new(PreloadQueue::new()),
            last_active: Mutex::new(Default::default()),
            loader: collaborators.loader,
            texture_loader: collaborators.texture_loader,
            config,
            quality,
            disposal,
            assets,
            textures,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Get an asset, loading it if necessary.  Concurrent requests for one path share a single load.
    pub async fn request_asset(&self, path: impl Into<CacheKey>) -> Result<Handle<Asset>, CacheError> {
        self.assets.request(path, self.loader.clone()).await
    }

    pub async fn request_texture(
        &self,
        path: impl Into<CacheKey>,
    ) -> Result<Handle<Texture>, ManagerError> {
        let loader = self
            .texture_loader
            .clone()
            .ok_or(ManagerError::NoTextureLoader)?;
        Ok(self.textures.request(path, loader).await?)
    }

    pub fn evict_asset(&self, path: &str) -> bool {
        self.assets.evict(path)
    }

    /// Evict every asset not in `paths`, remembering `paths` as the active asset set.  Textures are untouched.
    pub fn evict_all_except(&self, paths: &KeySet) -> usize {
        self.last_active.lock().assets = Some(paths.clone());
        self.assets.evict_all(paths)
    }

    /// Reclaim assets and textures not in `active`, which holds both asset paths and texture keys.
    ///
    /// `active` becomes the active set for both caches.
    pub fn sweep_orphans(&self, active: &KeySet) -> usize {
        {
            let mut last = self.last_active.lock();
            last.assets = Some(active.clone());
            last.textures = Some(active.clone());
        }
        self.disposal
            .sweep_orphans(&[&self.assets as &dyn OrphanSweep, &self.textures], active)
    }

    /// Apply the current tier to an asset which is already resident.
    pub fn reoptimize(&self, path: &str) -> bool {
        self.assets.reapply(path)
    }

    pub fn tier(&self) -> QualityTier {
        self.quality.tier()
    }

    /// Pin the tier until [ResourceManager::reclassify].
    pub fn set_tier(&self, tier: QualityTier) {
        self.quality.set_tier(tier);
    }

    pub fn reclassify(&self, hints: &CapabilityHints) -> QualityTier {
        self.quality.reclassify(hints)
    }

    pub fn subscribe_tier(&self) -> watch::Receiver<QualityTier> {
        self.quality.subscribe()
    }

    pub fn subscribe_fps(&self) -> watch::Receiver<u32> {
        self.monitor.lock().subscribe()
    }

    /// Called by the render loop once per frame.
    ///
    /// Returns the tier change this frame caused, if any.
    pub fn on_frame(&self, now: Instant) -> Option<TierChange> {
        let fps = self.monitor.lock().on_frame(now)?;
        let change = self.quality.on_fps(fps)?;
        if let TierChange::Downgraded { .. } = change {
            if self.config.evict_on_downgrade {
                self.sweep_after_downgrade();
            }
        }
        Some(change)
    }

    fn sweep_after_downgrade(&self) {
        let active = self.last_active.lock().clone();
        if let Some(assets) = active.assets.as_ref() {
            self.disposal
                .sweep_orphans(&[&self.assets as &dyn OrphanSweep], assets);
        }
        if let Some(textures) = active.textures.as_ref() {
            self.disposal
                .sweep_orphans(&[&self.textures as &dyn OrphanSweep], textures);
        }
        if active.assets.is_none() && active.textures.is_none() {
            log::debug!("Downgraded with no active set declared, nothing to sweep");
        }
    }

    /// Build a LOD set for a resident asset and start tracking it.  Replaces any set already built for that asset.
    pub fn build_lod(
        &self,
        path: &str,
        thresholds: [f32; 3],
        anchor: Vec3,
    ) -> Result<(), ManagerError> {
        let handle = self
            .assets
            .get(path)
            .ok_or_else(|| ManagerError::NotResident(path.into()))?;
        let set = self.lod_builder.build(&handle, thresholds, anchor)?;
        self.lods.lock().insert(set);
        Ok(())
    }

    /// Pick LOD levels for the viewer's position.  Called once per frame.
    pub fn update_lods(&self, viewer: Vec3) {
        self.lods.lock().update_all(viewer);
    }

    /// The active LOD level of an asset, if it has a set.
    pub fn active_lod(&self, path: &str) -> Option<usize> {
        self.lods.lock().get(path).map(LodSet::active)
    }

    pub fn remove_lod(&self, path: &str) -> bool {
        self.lods.lock().remove(path)
    }

    /// Load a batch of assets through the cache, reporting progress as each finishes.
    pub fn preload<I, K>(&self, paths: I) -> BoxStream<'static, ProgressEvent>
    where
        I: IntoIterator<Item = K>,
        K: Into<CacheKey>,
    {
        let mut queue = self.preload.lock();
        queue.enqueue(paths);
        let assets = self.assets.clone();
        let loader = self.loader.clone();
        queue.run(
            move |key| {
                let (assets, loader) = (assets.clone(), loader.clone());
                async move { assets.request(key, loader).await.map(|_| ()) }
            },
            self.config.preload_concurrency,
        )
    }

    pub fn memory_report(&self) -> MemoryReport {
        let mut geometries = KeyedIds::default();
        for handle in self.assets.ready_handles() {
            handle
                .read()
                .for_each_mesh(&mut |m| {
                    geometries.insert(m.geometry.id);
                });
        }

        MemoryReport {
            resident_asset_count: self.assets.ready_count(),
            loading_asset_count: self.assets.loading_count(),
            cached_texture_count: self.textures.cached_count(),
            cached_geometry_count: geometries.len(),
            lod_set_count: self.lods.lock().len(),
            current_fps: self.monitor.lock().fps(),
            current_tier: self.quality.tier(),
        }
    }

    pub fn disposal_stats(&self) -> DisposalStats {
        self.disposal.stats()
    }

    /// Abort in-flight loads and dispose everything: assets, textures and LOD sets.
    pub fn shutdown(&self) {
        self.lods.lock().clear();
        self.assets.shutdown();
        self.textures.cache().shutdown();
    }
}

type KeyedIds = std::collections::HashSet<ResourceId, ahash::RandomState>;

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
