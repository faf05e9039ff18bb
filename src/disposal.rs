//! Deterministic release of GPU-backed resources.
//!
//! The [DisposalManager] walks an asset's meshes and hands every geometry, material and texture to the
//! [ResourceReleaser].  A resource reachable twice within one asset (a texture shared by two materials, say) is freed
//! once.  Across calls, exactly-once is the owner's job: a cache entry's [Handle] records that it was disposed, a
//! [LodSet] is consumed by its disposal, and a [DisposeGuard] gives its value up when it disposes it.  Nothing here
//! remembers released ids.
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::*;

/// Counts of resources released so far, by kind.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DisposalStats {
    pub geometries: u64,
    pub materials: u64,
    pub textures: u64,
}

pub struct DisposalManager {
    releaser: Arc<dyn ResourceReleaser>,
    geometries: AtomicU64,
    materials: AtomicU64,
    textures: AtomicU64,
}

impl std::fmt::Debug for DisposalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposalManager")
            .field("stats", &self.stats())
            .finish()
    }
}

impl DisposalManager {
    pub fn new(releaser: Arc<dyn ResourceReleaser>) -> DisposalManager {
        DisposalManager {
            releaser,
            geometries: AtomicU64::new(0),
            materials: AtomicU64::new(0),
            textures: AtomicU64::new(0),
        }
    }

    fn release(&self, id: ResourceId, kind: ResourceKind) {
        self.releaser.release(id, kind);
        let counter = match kind {
            ResourceKind::Geometry => &self.geometries,
            ResourceKind::Material => &self.materials,
            ResourceKind::Texture => &self.textures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Release every geometry, material and texture an asset owns.
    ///
    /// The caller must own the asset and must not dispose it again.
    pub fn dispose(&self, asset: &dyn Drawable) {
        let mut seen: HashSet<ResourceId, ahash::RandomState> = Default::default();
        let mut release = |id: ResourceId, kind: ResourceKind| {
            if seen.insert(id) {
                self.release(id, kind);
            }
        };
        asset.for_each_mesh(&mut |mesh| {
            release(mesh.geometry.id, ResourceKind::Geometry);
            release(mesh.material.id, ResourceKind::Material);
            for texture in mesh.material.textures.iter() {
                release(texture.id, ResourceKind::Texture);
            }
        });
        log::debug!("Disposed asset, released {} resources", seen.len());
    }

    pub fn dispose_geometry(&self, geometry: &Geometry) {
        self.release(geometry.id, ResourceKind::Geometry);
    }

    pub fn dispose_texture(&self, texture: &Texture) {
        self.release(texture.id, ResourceKind::Texture);
    }

    pub fn stats(&self) -> DisposalStats {
        DisposalStats {
            geometries: self.geometries.load(Ordering::Relaxed),
            materials: self.materials.load(Ordering::Relaxed),
            textures: self.textures.load(Ordering::Relaxed),
        }
    }

    /// Reclaim every cache entry whose key isn't in `active`.
    ///
    /// Meant to run periodically, not every frame.  Returns how many entries were disposed right away; in-flight loads
    /// outside `active` are disposed when they finish.
    pub fn sweep_orphans(&self, caches: &[&dyn OrphanSweep], active: &KeySet) -> usize {
        let swept = caches.iter().map(|c| c.sweep(active)).sum();
        log::info!("Orphan sweep reclaimed {} entries", swept);
        swept
    }
}

/// A cache the [DisposalManager] can sweep.
pub trait OrphanSweep {
    /// Evict everything not in `keep`, returning how many entries were disposed.
    fn sweep(&self, keep: &KeySet) -> usize;
}

/// Owns a freshly produced value until it is handed off, disposing it if the owner goes away first.
///
/// This covers every early exit between "the loader returned something" and "the cache holds it", including the task
/// being aborted.
pub struct DisposeGuard<T: Disposable> {
    value: Option<T>,
    disposal: Arc<DisposalManager>,
}

impl<T: Disposable> DisposeGuard<T> {
    pub fn new(value: T, disposal: Arc<DisposalManager>) -> DisposeGuard<T> {
        DisposeGuard {
            value: Some(value),
            disposal,
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.value.as_mut()
    }

    /// Hand the value to its next owner; the guard won't dispose it.
    pub fn into_inner(mut self) -> Option<T> {
        self.value.take()
    }
}

impl<T: Disposable> Drop for DisposeGuard<T> {
    fn drop(&mut self) {
        if let Some(v) = self.value.take() {
            v.dispose_with(&self.disposal);
        }
    }
}
