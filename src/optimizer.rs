//! Applies a [QualityTier]'s policy to a loaded asset.
use std::sync::Arc;

use crate::*;

/// Material parameters forced on every material at [QualityTier::Low].
pub const LOW_ROUGHNESS: f32 = 0.8;
pub const LOW_METALNESS: f32 = 0.1;
pub const LOW_ENV_MAP_INTENSITY: f32 = 0.5;

/// Meshes above this many vertices get simplified at [QualityTier::Low], if a simplifier is available.
pub const DEFAULT_SIMPLIFY_VERTEX_THRESHOLD: usize = 10_000;

#[derive(Clone)]
pub struct AssetOptimizer {
    simplifier: Option<Arc<dyn Simplifier>>,
    disposal: Arc<DisposalManager>,
    vertex_threshold: usize,
}

impl AssetOptimizer {
    pub fn new(
        simplifier: Option<Arc<dyn Simplifier>>,
        disposal: Arc<DisposalManager>,
        vertex_threshold: usize,
    ) -> AssetOptimizer {
        AssetOptimizer {
            simplifier,
            disposal,
            vertex_threshold,
        }
    }

    /// Mutate the asset in place for `tier`.
    ///
    /// Applying the same tier twice changes nothing the second time.  Higher tiers leave materials and shadows as
    /// authored; they are not restored once an asset has been optimized for [QualityTier::Low].
    pub fn optimize(&self, asset: &mut dyn Drawable, tier: QualityTier) {
        let mut simplified = 0usize;
        asset.for_each_mesh_mut(&mut |mesh| {
            mesh.frustum_culled = true;
            if tier != QualityTier::Low {
                return;
            }

            mesh.cast_shadow = false;
            mesh.receive_shadow = false;
            mesh.material.roughness = LOW_ROUGHNESS;
            mesh.material.metalness = LOW_METALNESS;
            mesh.material.env_map_intensity = LOW_ENV_MAP_INTENSITY;

            // Aim for the threshold itself so a second pass finds nothing left to do.
            if mesh.geometry.vertex_count > self.vertex_threshold {
                if let Some(s) = self.simplifier.as_ref() {
                    let ratio = self.vertex_threshold as f32 / mesh.geometry.vertex_count as f32;
                    let reduced = s.simplify(&mesh.geometry, ratio);
                    let old = std::mem::replace(&mut mesh.geometry, reduced);
                    self.disposal.dispose_geometry(&old);
                    simplified += 1;
                }
            }
        });

        if simplified > 0 {
            log::debug!("Simplified {} meshes for the {} tier", simplified, tier);
        }
    }
}
