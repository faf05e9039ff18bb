//! The seams between this crate and the application.
//!
//! A [Loader] turns a key into a value, usually by way of the network or the filesystem.  The [FileLoader] hands the
//! bytes it reads to a [Decoder], because the file format is none of our business.  A [Simplifier] reduces geometry,
//! and a [ResourceReleaser] actually frees GPU memory when the [DisposalManager] says so.
use std::future::Future;

use crate::*;

/// Why a loader couldn't produce a value.
///
/// This is `Clone` because one failed load is reported to every caller waiting on it.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("asset not found: {0}")]
    NotFound(CacheKey),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{0}")]
    Other(String),
}

/// Produce a value for a key.
///
/// Any `Fn(CacheKey) -> impl Future<Output = Result<T, LoadError>>` closure is a loader.
#[async_trait::async_trait]
pub trait Loader<T>: Send + Sync + 'static {
    async fn load(&self, key: &CacheKey) -> Result<T, LoadError>;
}

#[async_trait::async_trait]
impl<T, F, Fut> Loader<T> for F
where
    T: Send + 'static,
    F: Fn(CacheKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, LoadError>> + Send + 'static,
{
    async fn load(&self, key: &CacheKey) -> Result<T, LoadError> {
        (self)(key.clone()).await
    }
}

/// A `Decoder` knows how to get from raw bytes to a decoded representation in memory.
pub trait Decoder<T>: Send + Sync + 'static {
    type Error: std::error::Error;

    fn decode(&self, key: &CacheKey, bytes: Vec<u8>) -> Result<T, Self::Error>;
}

/// Reduce the complexity of a piece of geometry.
///
/// `ratio` is the fraction of vertices to keep, in `(0, 1]`.  The returned geometry must carry a fresh
/// [ResourceId]; the caller disposes the input.
pub trait Simplifier: Send + Sync + 'static {
    fn simplify(&self, geometry: &Geometry, ratio: f32) -> Geometry;
}

/// Frees the GPU memory behind a resource.
///
/// Called exactly once per [ResourceId] by the [DisposalManager].
pub trait ResourceReleaser: Send + Sync + 'static {
    fn release(&self, id: ResourceId, kind: ResourceKind);
}

/// A releaser for headless use, where there is no GPU memory to give back.
#[derive(Debug, Default)]
pub struct NullReleaser;

impl ResourceReleaser for NullReleaser {
    fn release(&self, _id: ResourceId, _kind: ResourceKind) {}
}

/// Something the [DisposalManager] knows how to take apart.
pub trait Disposable: Send + Sync + 'static {
    fn dispose_with(&self, disposal: &DisposalManager);
}

impl Disposable for Asset {
    fn dispose_with(&self, disposal: &DisposalManager) {
        disposal.dispose(self);
    }
}

impl Disposable for Texture {
    fn dispose_with(&self, disposal: &DisposalManager) {
        disposal.dispose_texture(self);
    }
}
