//! Loading, caching, quality adaptation and disposal for 3D assets.
//!
//! A renderer asks for assets by path and wants three things: never to load the same file twice at once, for what it
//! gets back to suit the device it's running on, and for GPU memory to be given back deterministically when something
//! is no longer needed.  This crate provides that via a handful of pieces which can be used alone or through the
//! [ResourceManager]:
//!
//! - [AssetCache] deduplicates loads per key and runs a finishing step on every freshly loaded value with the
//!   [QualityTier] current when the load completes.  [TextureCache] is one of these for textures.
//! - The [QualityController] picks a starting tier from [CapabilityHints] and drops to [QualityTier::Low] when the
//!   [FrameRateMonitor] reports the device struggling.
//! - The [AssetOptimizer] applies a tier to an asset: shadows, material parameters, and geometry simplification.
//! - The [DisposalManager] releases every geometry, material and texture exactly once, and sweeps caches for entries
//!   the application no longer references.
//! - [LodBuilder] and [LodRegistry] provide distance-based level of detail, and [PreloadQueue] loads batches with
//!   progress reporting.
//!
//! The crate doesn't know how to read or parse anything.  Implement [Loader] (or [Decoder], and use [FileLoader]) for
//! your formats, and [ResourceReleaser] for your GPU API, then construct a [ResourceManager] with your chosen
//! [ManagerConfig].
mod asset;
mod asset_cache;
mod disposal;
mod file_loader;
mod frame_rate;
mod lod;
mod manager;
mod optimizer;
mod preload;
mod quality;
mod texture_cache;
mod tier;
mod traits;

pub use asset::*;
pub use asset_cache::*;
pub use disposal::*;
pub use file_loader::*;
pub use frame_rate::*;
pub use lod::*;
pub use manager::*;
pub use optimizer::*;
pub use preload::*;
pub use quality::*;
pub use texture_cache::*;
pub use tier::*;
pub use traits::*;
