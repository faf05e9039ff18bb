//! Distance-based level of detail.
//!
//! A [LodSet] holds independent copies of one asset at decreasing detail, each registered at a distance threshold:
//!
//! | level | geometry | used from |
//! |---|---|---|
//! | 0 | full detail | 0 |
//! | 1 | first simplification ratio | `d0` |
//! | 2 | second simplification ratio | `d1` |
//! | 3 | flat proxy quad | `d2` |
//!
//! Every level owns its own GPU resources and is disposed on its own.
use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;

use crate::*;

/// Fractions of vertices kept at levels 1 and 2.
pub const DEFAULT_LOD_RATIOS: [f32; 2] = [0.5, 0.25];

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum LodError {
    #[error("LOD thresholds must be finite, positive and strictly increasing, got {0:?}")]
    BadThresholds([f32; 3]),
}

#[derive(Debug)]
pub struct LodLevel {
    /// The level is used from this distance out.
    pub distance: f32,
    pub asset: Asset,
}

#[derive(Debug)]
pub struct LodSet {
    source: CacheKey,
    anchor: Vec3,
    levels: Vec<LodLevel>,
    active: usize,
}

impl LodSet {
    /// The key of the asset this set was built from.
    pub fn source(&self) -> &CacheKey {
        &self.source
    }

    pub fn anchor(&self) -> Vec3 {
        self.anchor
    }

    pub fn set_anchor(&mut self, anchor: Vec3) {
        self.anchor = anchor;
    }

    pub fn levels(&self) -> &[LodLevel] {
        &self.levels
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn active_level(&self) -> &LodLevel {
        &self.levels[self.active]
    }

    /// The level for a distance: the one with the greatest threshold not above it.
    pub fn select(&self, distance: f32) -> usize {
        self.levels
            .iter()
            .rposition(|l| l.distance <= distance)
            .unwrap_or(0)
    }

    /// Pick the active level for a viewer position.  Cheap enough to call every frame.
    pub fn update(&mut self, viewer: Vec3) -> usize {
        self.active = self.select(viewer.distance(self.anchor));
        self.active
    }

    /// Release every level.
    pub fn dispose(self, disposal: &DisposalManager) {
        for level in self.levels.iter() {
            disposal.dispose(&level.asset);
        }
        log::debug!("Disposed {} LOD levels of {}", self.levels.len(), self.source);
    }
}

#[derive(Clone)]
pub struct LodBuilder {
    simplifier: Option<Arc<dyn Simplifier>>,
    ratios: [f32; 2],
}

impl LodBuilder {
    pub fn new(simplifier: Option<Arc<dyn Simplifier>>, ratios: [f32; 2]) -> LodBuilder {
        LodBuilder { simplifier, ratios }
    }

    fn check_thresholds(thresholds: [f32; 3]) -> Result<(), LodError> {
        let [d0, d1, d2] = thresholds;
        let ok = thresholds.iter().all(|d| d.is_finite()) && 0.0 < d0 && d0 < d1 && d1 < d2;
        if ok {
            Ok(())
        } else {
            Err(LodError::BadThresholds(thresholds))
        }
    }

    /// A copy of `asset` keeping roughly `ratio` of its vertices.
    ///
    /// Without a simplifier the geometry is copied as is.
    fn reduced(&self, asset: &Asset, ratio: f32) -> Asset {
        let meshes = asset
            .meshes
            .iter()
            .map(|m| {
                let geometry = match self.simplifier.as_ref() {
                    Some(s) => s.simplify(&m.geometry, ratio),
                    None => m.geometry.duplicate(),
                };
                Mesh {
                    name: m.name.clone(),
                    geometry,
                    material: m.material.duplicate(),
                    ..*m
                }
            })
            .collect();
        Asset::new(meshes)
    }

    fn proxy(asset: &Asset) -> Asset {
        let material = asset
            .meshes
            .first()
            .map(|m| m.material.duplicate())
            .unwrap_or_default();
        let mut quad = Mesh::new("proxy", Geometry::quad(), material);
        quad.cast_shadow = false;
        quad.receive_shadow = false;
        quad.frustum_culled = true;
        Asset::new(vec![quad])
    }

    /// Build a [LodSet] from the asset behind `source`, anchored at `anchor`.
    pub fn build(
        &self,
        source: &Handle<Asset>,
        thresholds: [f32; 3],
        anchor: Vec3,
    ) -> Result<LodSet, LodError> {
        Self::check_thresholds(thresholds)?;
        if self.simplifier.is_none() {
            log::debug!("No simplifier, LOD levels of {} keep full geometry", source.key());
        }

        let asset = source.read();
        let levels = vec![
            LodLevel {
                distance: 0.0,
                asset: asset.duplicate(),
            },
            LodLevel {
                distance: thresholds[0],
                asset: self.reduced(&asset, self.ratios[0]),
            },
            LodLevel {
                distance: thresholds[1],
                asset: self.reduced(&asset, self.ratios[1]),
            },
            LodLevel {
                distance: thresholds[2],
                asset: Self::proxy(&asset),
            },
        ];

        Ok(LodSet {
            source: source.key().clone(),
            anchor,
            levels,
            active: 0,
        })
    }
}

/// Owns the live [LodSet]s, one per source asset, and updates them each frame.
///
/// Sets still registered when the registry is dropped are disposed.
pub struct LodRegistry {
    sets: HashMap<CacheKey, LodSet, ahash::RandomState>,
    disposal: Arc<DisposalManager>,
}

impl LodRegistry {
    pub fn new(disposal: Arc<DisposalManager>) -> LodRegistry {
        LodRegistry {
            sets: Default::default(),
            disposal,
        }
    }

    /// Take ownership of a set, disposing any set it replaces.
    pub fn insert(&mut self, set: LodSet) {
        if let Some(old) = self.sets.insert(set.source().clone(), set) {
            old.dispose(&self.disposal);
        }
    }

    pub fn get(&self, key: &str) -> Option<&LodSet> {
        self.sets.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut LodSet> {
        self.sets.get_mut(key)
    }

    /// Update every set for the viewer's position.
    pub fn update_all(&mut self, viewer: Vec3) {
        for set in self.sets.values_mut() {
            set.update(viewer);
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.sets.remove(key) {
            Some(set) => {
                set.dispose(&self.disposal);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        for (_, set) in self.sets.drain() {
            set.dispose(&self.disposal);
        }
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl Drop for LodRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}
