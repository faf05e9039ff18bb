//! An [AssetCache] of textures, whose finishing step picks sampler settings for the current tier.
//!
//! Settings are chosen once, when the texture finishes loading.  Changing tier later leaves cached textures alone.
use std::sync::Arc;
use std::time::Duration;

use crate::*;

/// Sampler settings for a tier.
pub fn sampler_for(tier: QualityTier) -> SamplerSettings {
    match tier {
        QualityTier::Low => SamplerSettings {
            min_filter: MinFilter::Linear,
            mag_filter: MagFilter::Linear,
            anisotropy: 1,
        },
        QualityTier::Balanced => SamplerSettings {
            min_filter: MinFilter::LinearMipmapLinear,
            mag_filter: MagFilter::Linear,
            anisotropy: 4,
        },
        QualityTier::High => SamplerSettings {
            min_filter: MinFilter::LinearMipmapLinear,
            mag_filter: MagFilter::Linear,
            anisotropy: 16,
        },
    }
}

#[derive(Clone)]
pub struct TextureCache {
    cache: AssetCache<Texture>,
}

impl TextureCache {
    pub fn new(
        disposal: Arc<DisposalManager>,
        quality: Arc<QualityController>,
        load_timeout: Option<Duration>,
    ) -> TextureCache {
        let finish: Finisher<Texture> = Arc::new(|texture: &mut Texture, tier| {
            texture.sampler = sampler_for(tier);
        });
        TextureCache {
            cache: AssetCache::new("texture", disposal, quality, finish, load_timeout),
        }
    }

    pub async fn request(
        &self,
        key: impl Into<CacheKey>,
        loader: Arc<dyn Loader<Texture>>,
    ) -> Result<Handle<Texture>, CacheError> {
        self.cache.request(key, loader).await
    }

    pub fn evict(&self, key: &str) -> bool {
        self.cache.evict(key)
    }

    pub fn evict_all(&self, keep: &KeySet) -> usize {
        self.cache.evict_all(keep)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.ready_count()
    }

    /// The underlying cache, for everything else.
    pub fn cache(&self) -> &AssetCache<Texture> {
        &self.cache
    }
}

impl OrphanSweep for TextureCache {
    fn sweep(&self, keep: &KeySet) -> usize {
        self.cache.evict_all(keep)
    }
}
