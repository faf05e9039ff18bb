//! The in-memory representation of a loaded asset: a typed drawable graph of meshes, each pointing at GPU-backed
//! geometry, a material, and the material's textures.
//!
//! Every GPU-backed piece carries a [ResourceId].  Ids are never reused, so the
//! [DisposalManager](crate::DisposalManager) can tell whether something has already been released.  Cloning an asset
//! with [Asset::duplicate] mints fresh ids, because each copy must be released independently.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{CacheKey, Disposable, DisposalManager};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one GPU-backed resource for the lifetime of the process.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn fresh() -> ResourceId {
        ResourceId(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResourceKind {
    Geometry,
    Material,
    Texture,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MinFilter {
    Linear,
    LinearMipmapLinear,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MagFilter {
    Linear,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SamplerSettings {
    pub min_filter: MinFilter,
    pub mag_filter: MagFilter,
    pub anisotropy: u8,
}

impl Default for SamplerSettings {
    fn default() -> SamplerSettings {
        SamplerSettings {
            min_filter: MinFilter::LinearMipmapLinear,
            mag_filter: MagFilter::Linear,
            anisotropy: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    pub id: ResourceId,
    pub width: u32,
    pub height: u32,
    pub sampler: SamplerSettings,
}

impl Texture {
    pub fn new(width: u32, height: u32) -> Texture {
        Texture {
            id: ResourceId::fresh(),
            width,
            height,
            sampler: Default::default(),
        }
    }

    /// Copy this texture under a new id.
    pub fn duplicate(&self) -> Texture {
        Texture {
            id: ResourceId::fresh(),
            ..self.clone()
        }
    }
}

/// Vertex and index buffers.  Only the counts matter to this crate.
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    pub id: ResourceId,
    pub vertex_count: usize,
    pub index_count: usize,
}

impl Geometry {
    pub fn new(vertex_count: usize, index_count: usize) -> Geometry {
        Geometry {
            id: ResourceId::fresh(),
            vertex_count,
            index_count,
        }
    }

    /// A flat quad, used as the last-resort LOD level.
    pub fn quad() -> Geometry {
        Geometry::new(4, 6)
    }

    pub fn duplicate(&self) -> Geometry {
        Geometry {
            id: ResourceId::fresh(),
            ..self.clone()
        }
    }
}

/// A physically based material and the textures it samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub id: ResourceId,
    pub roughness: f32,
    pub metalness: f32,
    pub env_map_intensity: f32,
    pub textures: Vec<Texture>,
}

impl Material {
    pub fn new(roughness: f32, metalness: f32, env_map_intensity: f32) -> Material {
        Material {
            id: ResourceId::fresh(),
            roughness,
            metalness,
            env_map_intensity,
            textures: vec![],
        }
    }

    pub fn with_texture(mut self, texture: Texture) -> Material {
        self.textures.push(texture);
        self
    }

    /// Copy this material and all of its textures under new ids.
    pub fn duplicate(&self) -> Material {
        Material {
            id: ResourceId::fresh(),
            roughness: self.roughness,
            metalness: self.metalness,
            env_map_intensity: self.env_map_intensity,
            textures: self.textures.iter().map(Texture::duplicate).collect(),
        }
    }
}

impl Default for Material {
    fn default() -> Material {
        Material::new(1.0, 0.0, 1.0)
    }
}

/// One drawable part of an asset.
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    pub name: String,
    pub geometry: Geometry,
    pub material: Material,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    pub frustum_culled: bool,
}

impl Mesh {
    pub fn new(name: impl Into<String>, geometry: Geometry, material: Material) -> Mesh {
        Mesh {
            name: name.into(),
            geometry,
            material,
            cast_shadow: true,
            receive_shadow: true,
            frustum_culled: false,
        }
    }

    pub fn duplicate(&self) -> Mesh {
        Mesh {
            name: self.name.clone(),
            geometry: self.geometry.duplicate(),
            material: self.material.duplicate(),
            ..*self
        }
    }
}

/// Visitor access to the meshes of an asset.
///
/// Anything the optimizer, LOD builder or disposal manager walks goes through this trait rather than poking at the
/// concrete layout.
pub trait Drawable {
    fn for_each_mesh(&self, visitor: &mut dyn FnMut(&Mesh));

    fn for_each_mesh_mut(&mut self, visitor: &mut dyn FnMut(&mut Mesh));
}

/// A loaded scene asset: a flat list of meshes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Asset {
    pub meshes: Vec<Mesh>,
}

impl Asset {
    pub fn new(meshes: Vec<Mesh>) -> Asset {
        Asset { meshes }
    }

    /// An independent copy, every GPU resource under a fresh id.
    pub fn duplicate(&self) -> Asset {
        Asset {
            meshes: self.meshes.iter().map(Mesh::duplicate).collect(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.meshes.iter().map(|m| m.geometry.vertex_count).sum()
    }
}

impl Drawable for Asset {
    fn for_each_mesh(&self, visitor: &mut dyn FnMut(&Mesh)) {
        self.meshes.iter().for_each(visitor);
    }

    fn for_each_mesh_mut(&mut self, visitor: &mut dyn FnMut(&mut Mesh)) {
        self.meshes.iter_mut().for_each(visitor);
    }
}

/// A shared handle to a cached value.
///
/// The cache is the owner responsible for disposal; handles given out to callers let them read the value but neither
/// mutate nor release it.  The handle remembers whether its value was disposed, so no release path can run twice.
///
/// ```compile_fail
/// fn recolor(handle: &adaptive_assets::Handle<adaptive_assets::Asset>) {
///     handle.write().meshes.clear();
/// }
/// ```
#[derive(Debug)]
pub struct Handle<T> {
    key: CacheKey,
    inner: Arc<HandleInner<T>>,
}

#[derive(Debug)]
struct HandleInner<T> {
    value: RwLock<T>,
    disposed: AtomicBool,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Handle {
            key: self.key.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T> Handle<T> {
    pub(crate) fn new(key: CacheKey, value: T) -> Handle<T> {
        Handle {
            key,
            inner: Arc::new(HandleInner {
                value: RwLock::new(value),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.value.read()
    }

    /// Only the cache mutates a value it owns, when re-optimizing.
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.value.write()
    }

    /// Whether both handles point at the same cached value.
    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the cache has released this value's GPU resources.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl<T: Disposable> Handle<T> {
    /// Release the value's resources unless that already happened.  Returns whether this call released them.
    pub(crate) fn dispose_with(&self, disposal: &DisposalManager) -> bool {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.read().dispose_with(disposal);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured_mesh() -> Mesh {
        let material = Material::new(0.3, 0.9, 1.0).with_texture(Texture::new(64, 64));
        Mesh::new("hull", Geometry::new(300, 900), material)
    }

    #[test]
    fn test_duplicate_mints_new_ids() {
        let asset = Asset::new(vec![textured_mesh(), textured_mesh()]);
        let copy = asset.duplicate();

        assert_eq!(copy.meshes.len(), 2);
        for (a, b) in asset.meshes.iter().zip(copy.meshes.iter()) {
            assert_ne!(a.geometry.id, b.geometry.id);
            assert_ne!(a.material.id, b.material.id);
            assert_ne!(a.material.textures[0].id, b.material.textures[0].id);
            assert_eq!(a.geometry.vertex_count, b.geometry.vertex_count);
            assert_eq!(a.material.roughness, b.material.roughness);
            assert_eq!(a.name, b.name);
        }
    }

    #[test]
    fn test_visitor_sees_every_mesh() {
        let mut asset = Asset::new(vec![textured_mesh(), textured_mesh(), textured_mesh()]);
        let mut seen = 0;
        asset.for_each_mesh(&mut |_| seen += 1);
        assert_eq!(seen, 3);

        asset.for_each_mesh_mut(&mut |m| m.cast_shadow = false);
        assert!(asset.meshes.iter().all(|m| !m.cast_shadow));
        assert_eq!(asset.vertex_count(), 900);
    }

    #[test]
    fn test_handle_disposes_once() {
        let (rec, disposal) = crate::disposal::tests::recording();
        let handle = Handle::new("hull".into(), Asset::new(vec![textured_mesh()]));
        let other = handle.clone();
        assert!(!other.is_disposed());

        assert!(handle.dispose_with(&disposal));
        assert!(!other.dispose_with(&disposal));
        assert!(other.is_disposed());
        assert_eq!(rec.released.lock().len(), 3);
    }
}
