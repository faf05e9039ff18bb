//! The [AssetCache] maps keys to loaded values, making sure each key is loaded at most once at a time.
//!
//! Every key is in one of four states: absent, loading, ready or failed.  A request for a loading key joins the load
//! already in flight instead of starting another; all callers waiting on one load see the same outcome.  When a load
//! finishes, the cache's finishing step (usually the [AssetOptimizer]) runs with whatever [QualityTier] is current at
//! that moment, not the one current when the request was made.
//!
//! Eviction never races a load: evicting a loading key only marks it, and the value is disposed as soon as the load
//! produces it.  A request arriving in the meantime clears the mark, as does a sweep whose keep set names the key.
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, AbortHandle, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::*;

/// Identifies an asset, usually by its path or URI.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub fn new(key: impl Into<Arc<str>>) -> CacheKey {
        CacheKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> CacheKey {
        CacheKey::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> CacheKey {
        CacheKey::new(key)
    }
}

impl From<&CacheKey> for CacheKey {
    fn from(key: &CacheKey) -> CacheKey {
        key.clone()
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub type KeySet = HashSet<CacheKey, ahash::RandomState>;

/// Build a [KeySet] from anything key-like.
pub fn key_set<I, K>(keys: I) -> KeySet
where
    I: IntoIterator<Item = K>,
    K: Into<CacheKey>,
{
    keys.into_iter().map(Into::into).collect()
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("failed to load {key}: {source}")]
    Load { key: CacheKey, source: LoadError },
    #[error("loading {key} timed out after {after:?}")]
    Timeout { key: CacheKey, after: Duration },
    #[error("{0} was evicted before its load finished")]
    Evicted(CacheKey),
    #[error("loading {0} was aborted")]
    Aborted(CacheKey),
}

/// What a key is doing right now.  A key with no entry is simply absent.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryState {
    Loading,
    Ready,
    Failed,
}

/// Applies tier-dependent settings to a freshly loaded value.
pub type Finisher<T> = Arc<dyn Fn(&mut T, QualityTier) + Send + Sync>;

type Flight<T> = Shared<BoxFuture<'static, Result<Handle<T>, CacheError>>>;

type CacheHashMap<V> = HashMap<CacheKey, V, ahash::RandomState>;

enum Slot<T> {
    Loading {
        flight: Flight<T>,
        abort: AbortHandle,
        /// Distinguishes this load from earlier ones for the same key which were abandoned.
        load_id: u64,
        evict_when_done: bool,
    },
    Ready(Handle<T>),
    Failed(CacheError),
}

impl<T> Slot<T> {
    fn state(&self) -> EntryState {
        match self {
            Slot::Loading { .. } => EntryState::Loading,
            Slot::Ready(_) => EntryState::Ready,
            Slot::Failed(_) => EntryState::Failed,
        }
    }
}

/// Either the value is here, or this is the load to wait on.
enum Lookup<T> {
    Hit(Handle<T>),
    Wait(Flight<T>),
}

struct CacheInner<T> {
    /// Used in log messages to tell the caches apart.
    kind: &'static str,
    entries: Mutex<CacheHashMap<Slot<T>>>,
    next_load_id: AtomicU64,
    disposal: Arc<DisposalManager>,
    quality: Arc<QualityController>,
    finish: Finisher<T>,
    load_timeout: Option<Duration>,
}

/// A deduplicating cache of loaded values.  Cloning it is cheap and gives another handle to the same cache.
pub struct AssetCache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for AssetCache<T> {
    fn clone(&self) -> Self {
        AssetCache {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Disposable> AssetCache<T> {
    pub fn new(
        kind: &'static str,
        disposal: Arc<DisposalManager>,
        quality: Arc<QualityController>,
        finish: Finisher<T>,
        load_timeout: Option<Duration>,
    ) -> AssetCache<T> {
        AssetCache {
            inner: Arc::new(CacheInner {
                kind,
                entries: Mutex::new(Default::default()),
                next_load_id: AtomicU64::new(0),
                disposal,
                quality,
                finish,
                load_timeout,
            }),
        }
    }

    /// Get the value for a key, loading it with `loader` if it isn't ready.
    ///
    /// Concurrent requests for a key which is already loading wait on that load; `loader` is only invoked when nothing
    /// is in flight.  A failed key is retried.  Must be called from within a tokio runtime, since the load runs as its
    /// own task and finishes even if every caller stops waiting.  If the cache has a load timeout, that runtime must
    /// have its time driver enabled (`enable_time` or `enable_all` on the builder); `#[tokio::main]` does this.
    pub async fn request(
        &self,
        key: impl Into<CacheKey>,
        loader: Arc<dyn Loader<T>>,
    ) -> Result<Handle<T>, CacheError> {
        match self.lookup_or_start(key.into(), loader) {
            Lookup::Hit(h) => Ok(h),
            Lookup::Wait(flight) => flight.await,
        }
    }

    fn lookup_or_start(&self, key: CacheKey, loader: Arc<dyn Loader<T>>) -> Lookup<T> {
        let mut entries = self.inner.entries.lock();
        match entries.get_mut(&key) {
            Some(Slot::Ready(h)) => {
                log::debug!("Cache hit for {} {}", self.inner.kind, key);
                return Lookup::Hit(h.clone());
            }
            Some(Slot::Loading {
                flight,
                evict_when_done,
                ..
            }) => {
                if *evict_when_done {
                    log::debug!("Re-request of {} cancels its pending eviction", key);
                    *evict_when_done = false;
                }
                return Lookup::Wait(flight.clone());
            }
            Some(Slot::Failed(e)) => {
                log::debug!("Retrying {} after earlier failure: {}", key, e);
            }
            None => {}
        }

        let load_id = self.inner.next_load_id.fetch_add(1, Ordering::Relaxed);
        let (load, abort) = future::abortable(self.inner.clone().run_load(key.clone(), load_id, loader));
        let aborted_key = key.clone();
        let work = load
            .map(move |r| r.unwrap_or_else(|_| Err(CacheError::Aborted(aborted_key))))
            .boxed()
            .shared();
        // The spawned task drives the load to completion whether or not anyone is still waiting on it.
        tokio::spawn(work.clone());
        entries.insert(
            key,
            Slot::Loading {
                flight: work.clone(),
                abort,
                load_id,
                evict_when_done: false,
            },
        );
        Lookup::Wait(work)
    }

    /// The ready value for a key, without loading anything.
    pub fn get(&self, key: &str) -> Option<Handle<T>> {
        match self.inner.entries.lock().get(key) {
            Some(Slot::Ready(h)) => Some(h.clone()),
            _ => None,
        }
    }

    /// The current state of a key, or `None` if the cache knows nothing about it.
    pub fn state(&self, key: &str) -> Option<EntryState> {
        self.inner.entries.lock().get(key).map(Slot::state)
    }

    /// The error a failed key is holding.
    pub fn failure(&self, key: &str) -> Option<CacheError> {
        match self.inner.entries.lock().get(key) {
            Some(Slot::Failed(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Evict one key.  Returns whether a ready value was disposed.
    ///
    /// A loading key is marked instead, and disposed when its load finishes.
    pub fn evict(&self, key: &str) -> bool {
        let mut entries = self.inner.entries.lock();
        let state = match entries.get_mut(key) {
            None => return false,
            Some(Slot::Loading {
                evict_when_done, ..
            }) => {
                log::debug!("Deferring eviction of {} until its load finishes", key);
                *evict_when_done = true;
                return false;
            }
            Some(slot) => slot.state(),
        };

        let removed = entries.remove(key);
        drop(entries);
        match removed {
            Some(Slot::Ready(h)) if state == EntryState::Ready => {
                h.dispose_with(&self.inner.disposal);
                log::info!("Evicted {} {}", self.inner.kind, key);
                true
            }
            _ => false,
        }
    }

    /// Evict every ready key not in `keep`, returning how many were disposed.
    ///
    /// Loading keys not in `keep` are marked for eviction when their loads finish.  Failed keys not in `keep` are
    /// forgotten.
    pub fn evict_all(&self, keep: &KeySet) -> usize {
        let mut doomed = vec![];
        let mut deferred = 0;
        self.inner.entries.lock().retain(|key, slot| {
            if keep.contains(key) {
                if let Slot::Loading {
                    evict_when_done, ..
                } = slot
                {
                    *evict_when_done = false;
                }
                return true;
            }
            match slot {
                Slot::Loading {
                    evict_when_done, ..
                } => {
                    *evict_when_done = true;
                    deferred += 1;
                    true
                }
                Slot::Failed(_) => false,
                Slot::Ready(h) => {
                    doomed.push(h.clone());
                    false
                }
            }
        });

        for h in doomed.iter() {
            h.dispose_with(&self.inner.disposal);
        }
        if !doomed.is_empty() || deferred > 0 {
            log::info!(
                "Evicted {} {} entries, {} more after their loads finish",
                doomed.len(),
                self.inner.kind,
                deferred
            );
        }
        doomed.len()
    }

    /// Run the finishing step again on a ready value with the current tier.
    pub fn reapply(&self, key: &str) -> bool {
        let handle = match self.get(key) {
            Some(h) => h,
            None => return false,
        };
        let tier = self.inner.quality.tier();
        (self.inner.finish)(&mut *handle.write(), tier);
        true
    }

    /// Abort every load in flight and dispose every ready value, leaving the cache empty.
    ///
    /// Callers waiting on an aborted load get [CacheError::Aborted] right away, and the loader's future is dropped.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.inner.entries.lock().drain().collect();
        let mut disposed = 0;
        for (key, slot) in drained {
            match slot {
                Slot::Loading { abort, .. } => {
                    log::debug!("Aborting load of {}", key);
                    abort.abort();
                }
                Slot::Ready(h) => {
                    disposed += h.dispose_with(&self.inner.disposal) as usize;
                }
                Slot::Failed(_) => {}
            }
        }
        log::info!("Shut down {} cache, disposed {} entries", self.inner.kind, disposed);
    }

    fn count(&self, state: EntryState) -> usize {
        self.inner
            .entries
            .lock()
            .values()
            .filter(|s| s.state() == state)
            .count()
    }

    pub fn ready_count(&self) -> usize {
        self.count(EntryState::Ready)
    }

    pub fn loading_count(&self) -> usize {
        self.count(EntryState::Loading)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every ready value.
    pub fn ready_handles(&self) -> Vec<Handle<T>> {
        self.inner
            .entries
            .lock()
            .values()
            .filter_map(|s| match s {
                Slot::Ready(h) => Some(h.clone()),
                _ => None,
            })
            .collect()
    }
}

impl<T: Disposable> CacheInner<T> {
    async fn run_load(
        self: Arc<Self>,
        key: CacheKey,
        load_id: u64,
        loader: Arc<dyn Loader<T>>,
    ) -> Result<Handle<T>, CacheError> {
        let loaded = match self.load_timeout {
            Some(after) => match tokio::time::timeout(after, loader.load(&key)).await {
                Ok(r) => r.map_err(|source| CacheError::Load {
                    key: key.clone(),
                    source,
                }),
                Err(_) => Err(CacheError::Timeout {
                    key: key.clone(),
                    after,
                }),
            },
            None => loader.load(&key).await.map_err(|source| CacheError::Load {
                key: key.clone(),
                source,
            }),
        };

        match loaded {
            Ok(value) => {
                let mut guard = DisposeGuard::new(value, self.disposal.clone());
                let tier = self.quality.tier();
                if let Some(v) = guard.get_mut() {
                    (self.finish)(v, tier);
                }
                self.store(key, load_id, guard)
            }
            Err(e) => {
                log::warn!("Failed to load {} {}: {}", self.kind, key, e);
                self.fail(key, load_id, e.clone());
                Err(e)
            }
        }
    }

    /// Whether `load_id` still owns the entry for `key`, and if so whether it was evicted meanwhile.
    fn owner_state(entries: &CacheHashMap<Slot<T>>, key: &CacheKey, load_id: u64) -> Option<bool> {
        match entries.get(key) {
            Some(Slot::Loading {
                load_id: current,
                evict_when_done,
                ..
            }) if *current == load_id => Some(*evict_when_done),
            _ => None,
        }
    }

    fn store(
        &self,
        key: CacheKey,
        load_id: u64,
        guard: DisposeGuard<T>,
    ) -> Result<Handle<T>, CacheError> {
        let mut entries = self.entries.lock();
        match Self::owner_state(&entries, &key, load_id) {
            None => {
                drop(entries);
                log::debug!("Load of {} finished after the cache let go of it", key);
                Err(CacheError::Aborted(key))
            }
            Some(true) => {
                entries.remove(&key);
                drop(entries);
                log::debug!("Disposing {} {}, evicted while loading", self.kind, key);
                Err(CacheError::Evicted(key))
            }
            Some(false) => match guard.into_inner() {
                Some(value) => {
                    let handle = Handle::new(key.clone(), value);
                    entries.insert(key.clone(), Slot::Ready(handle.clone()));
                    log::info!("Loaded {} {}", self.kind, key);
                    Ok(handle)
                }
                None => {
                    entries.remove(&key);
                    Err(CacheError::Aborted(key))
                }
            },
        }
    }

    fn fail(&self, key: CacheKey, load_id: u64, error: CacheError) {
        let mut entries = self.entries.lock();
        match Self::owner_state(&entries, &key, load_id) {
            Some(false) => {
                entries.insert(key, Slot::Failed(error));
            }
            Some(true) => {
                entries.remove(&key);
            }
            None => {}
        }
    }
}

impl<T: Disposable> OrphanSweep for AssetCache<T> {
    fn sweep(&self, keep: &KeySet) -> usize {
        self.evict_all(keep)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Semaphore;

    use super::*;
    use crate::disposal::tests::{recording, RecordingReleaser};

    struct Fixture {
        rec: Arc<RecordingReleaser>,
        quality: Arc<QualityController>,
        cache: AssetCache<Asset>,
    }

    fn fixture(timeout: Option<Duration>) -> Fixture {
        let (rec, disposal) = recording();
        let quality = Arc::new(QualityController::new(QualityTier::High, 20, None));
        let optimizer = AssetOptimizer::new(None, disposal.clone(), 10_000);
        let cache = AssetCache::new(
            "asset",
            disposal,
            quality.clone(),
            Arc::new(move |a: &mut Asset, tier| optimizer.optimize(a, tier)),
            timeout,
        );
        Fixture {
            rec,
            quality,
            cache,
        }
    }

    fn sample_asset() -> Asset {
        Asset::new(vec![Mesh::new(
            "body",
            Geometry::new(100, 300),
            Material::new(0.3, 0.7, 1.0).with_texture(Texture::new(16, 16)),
        )])
    }

    /// A loader which waits on a gate, counts its calls, and remembers everything it produced.
    struct GatedLoader {
        calls: AtomicUsize,
        gate: Semaphore,
        produced: Mutex<Vec<Asset>>,
    }

    impl GatedLoader {
        fn new(open: bool) -> Arc<GatedLoader> {
            Arc::new(GatedLoader {
                calls: AtomicUsize::new(0),
                gate: Semaphore::new(if open { 1 << 20 } else { 0 }),
                produced: Mutex::new(vec![]),
            })
        }

        fn open(&self) {
            self.gate.add_permits(1000);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Loader<Asset> for GatedLoader {
        async fn load(&self, key: &CacheKey) -> Result<Asset, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| LoadError::Other(e.to_string()))?;
            if key.as_str().starts_with("missing") {
                return Err(LoadError::NotFound(key.clone()));
            }
            let asset = sample_asset();
            self.produced.lock().push(asset.clone());
            Ok(asset)
        }
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_load_once() {
        let f = fixture(None);
        let loader = GatedLoader::new(false);

        let mut waiters = vec![];
        for _ in 0..4 {
            let cache = f.cache.clone();
            let l: Arc<dyn Loader<Asset>> = loader.clone();
            waiters.push(tokio::spawn(async move { cache.request("ship", l).await }));
        }
        settle().await;
        assert_eq!(f.cache.state("ship"), Some(EntryState::Loading));

        loader.open();
        let mut handles = vec![];
        for w in waiters {
            handles.push(w.await.expect("Task shouldn't panic").expect("Load should succeed"));
        }

        assert_eq!(loader.calls(), 1);
        assert!(handles.iter().all(|h| h.ptr_eq(&handles[0])));
        assert_eq!(f.cache.state("ship"), Some(EntryState::Ready));

        // And once ready, further requests are hits.
        let again = f.cache.request("ship", loader.clone()).await.unwrap();
        assert!(again.ptr_eq(&handles[0]));
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter_and_can_be_retried() {
        let f = fixture(None);
        let loader = GatedLoader::new(false);

        let a = tokio::spawn({
            let (cache, l) = (f.cache.clone(), loader.clone());
            async move { cache.request("missing", l).await }
        });
        let b = tokio::spawn({
            let (cache, l) = (f.cache.clone(), loader.clone());
            async move { cache.request("missing", l).await }
        });
        settle().await;
        loader.open();

        let expected = CacheError::Load {
            key: "missing".into(),
            source: LoadError::NotFound("missing".into()),
        };
        assert_eq!(a.await.unwrap().unwrap_err(), expected);
        assert_eq!(b.await.unwrap().unwrap_err(), expected);
        assert_eq!(loader.calls(), 1);
        assert_eq!(f.cache.state("missing"), Some(EntryState::Failed));
        assert_eq!(f.cache.failure("missing"), Some(expected));

        // A later request tries again.
        assert!(f.cache.request("missing", loader.clone()).await.is_err());
        assert_eq!(loader.calls(), 2);
        // Failures never leave resources behind.
        assert!(f.rec.released.lock().is_empty());
    }

    #[tokio::test]
    async fn test_evict_disposes_every_sub_resource_once() {
        let f = fixture(None);
        let loader = GatedLoader::new(true);
        let handle = f.cache.request("ship", loader.clone()).await.unwrap();
        let asset = handle.read().clone();

        assert!(f.cache.evict("ship"));
        assert_eq!(f.cache.state("ship"), None);
        let mesh = &asset.meshes[0];
        assert_eq!(f.rec.count_of(mesh.geometry.id), 1);
        assert_eq!(f.rec.count_of(mesh.material.id), 1);
        assert_eq!(f.rec.count_of(mesh.material.textures[0].id), 1);
        assert_eq!(f.rec.released.lock().len(), 3);

        // Evicting again is a no-op.
        assert!(!f.cache.evict("ship"));
        assert_eq!(f.rec.released.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_evict_all_defers_in_flight_loads() {
        let f = fixture(None);
        let ready = GatedLoader::new(true);
        let slow = GatedLoader::new(false);

        let a = f.cache.request("a", ready.clone()).await.unwrap();
        let b = f.cache.request("b", ready.clone()).await.unwrap();
        let c = tokio::spawn({
            let (cache, l) = (f.cache.clone(), slow.clone());
            async move { cache.request("c", l).await }
        });
        settle().await;
        assert_eq!(f.cache.state("c"), Some(EntryState::Loading));

        let disposed = f.cache.evict_all(&key_set(["a"]));
        assert_eq!(disposed, 1);
        assert_eq!(f.cache.state("a"), Some(EntryState::Ready));
        assert_eq!(f.cache.state("b"), None);
        assert_eq!(f.cache.state("c"), Some(EntryState::Loading));
        assert!(b.is_disposed());
        assert!(!a.is_disposed());
        assert_eq!(f.rec.count_of(b.read().meshes[0].geometry.id), 1);
        assert_eq!(f.rec.count_of(a.read().meshes[0].geometry.id), 0);

        slow.open();
        assert_eq!(c.await.unwrap().unwrap_err(), CacheError::Evicted("c".into()));
        assert_eq!(f.cache.state("c"), None);
        let produced = slow.produced.lock()[0].clone();
        assert_eq!(f.rec.count_of(produced.meshes[0].geometry.id), 1);
        assert_eq!(f.rec.count_of(produced.meshes[0].material.id), 1);
    }

    #[tokio::test]
    async fn test_keeping_a_marked_key_cancels_its_eviction() {
        let f = fixture(None);
        let ready = GatedLoader::new(true);
        let slow = GatedLoader::new(false);

        f.cache.request("a", ready.clone()).await.unwrap();
        let c = tokio::spawn({
            let (cache, l) = (f.cache.clone(), slow.clone());
            async move { cache.request("c", l).await }
        });
        settle().await;

        f.cache.evict_all(&key_set(["a"]));
        assert_eq!(f.cache.evict_all(&key_set(["a", "c"])), 0);
        slow.open();

        let handle = c.await.unwrap().expect("c was kept by the latest sweep");
        assert!(!handle.is_disposed());
        assert_eq!(f.cache.state("c"), Some(EntryState::Ready));
        assert!(f.rec.released.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rerequest_cancels_deferred_eviction() {
        let f = fixture(None);
        let slow = GatedLoader::new(false);

        let first = tokio::spawn({
            let (cache, l) = (f.cache.clone(), slow.clone());
            async move { cache.request("c", l).await }
        });
        settle().await;
        assert!(!f.cache.evict("c"));

        let second = tokio::spawn({
            let (cache, l) = (f.cache.clone(), slow.clone());
            async move { cache.request("c", l).await }
        });
        settle().await;
        slow.open();

        let h1 = first.await.unwrap().unwrap();
        let h2 = second.await.unwrap().unwrap();
        assert!(h1.ptr_eq(&h2));
        assert_eq!(f.cache.state("c"), Some(EntryState::Ready));
        assert_eq!(slow.calls(), 1);
        assert!(f.rec.released.lock().is_empty());
    }

    #[tokio::test]
    async fn test_tier_is_read_when_the_load_completes() {
        let f = fixture(None);
        let slow = GatedLoader::new(false);

        let pending = tokio::spawn({
            let (cache, l) = (f.cache.clone(), slow.clone());
            async move { cache.request("ship", l).await }
        });
        settle().await;
        f.quality.set_tier(QualityTier::Low);
        slow.open();

        let handle = pending.await.unwrap().unwrap();
        let asset = handle.read();
        assert_eq!(asset.meshes[0].material.roughness, LOW_ROUGHNESS);
        assert!(!asset.meshes[0].cast_shadow);
    }

    #[tokio::test]
    async fn test_stalled_load_times_out() {
        let f = fixture(Some(Duration::from_millis(20)));
        let stalled = GatedLoader::new(false);

        let err = f.cache.request("ship", stalled.clone()).await.unwrap_err();
        assert_eq!(
            err,
            CacheError::Timeout {
                key: "ship".into(),
                after: Duration::from_millis(20),
            }
        );
        assert_eq!(f.cache.state("ship"), Some(EntryState::Failed));
    }

    #[tokio::test]
    async fn test_closures_are_loaders() {
        let f = fixture(None);
        let loader: Arc<dyn Loader<Asset>> =
            Arc::new(|_key: CacheKey| async { Ok::<_, LoadError>(sample_asset()) });
        let handle = f.cache.request("ship", loader).await.unwrap();
        assert_eq!(handle.key().as_str(), "ship");
        assert_eq!(f.cache.ready_count(), 1);
    }

    #[tokio::test]
    async fn test_reapply_uses_current_tier() {
        let f = fixture(None);
        let handle = f.cache.request("ship", GatedLoader::new(true)).await.unwrap();
        assert_eq!(handle.read().meshes[0].material.roughness, 0.3);

        f.quality.set_tier(QualityTier::Low);
        assert!(f.cache.reapply("ship"));
        assert_eq!(handle.read().meshes[0].material.roughness, LOW_ROUGHNESS);
        assert!(!f.cache.reapply("nothing"));
    }

    #[tokio::test]
    async fn test_shutdown_empties_the_cache() {
        let f = fixture(None);
        let ready = GatedLoader::new(true);
        let slow = GatedLoader::new(false);
        let a = f.cache.request("a", ready.clone()).await.unwrap();
        let pending = tokio::spawn({
            let (cache, l) = (f.cache.clone(), slow.clone());
            async move { cache.request("b", l).await }
        });
        settle().await;
        assert_eq!(f.cache.loading_count(), 1);

        f.cache.shutdown();
        assert!(f.cache.is_empty());
        assert!(a.is_disposed());
        assert_eq!(f.rec.count_of(a.read().meshes[0].geometry.id), 1);

        // The waiter hears about the abort without the loader ever finishing.
        assert_eq!(
            pending.await.unwrap().unwrap_err(),
            CacheError::Aborted("b".into())
        );
        slow.open();
        settle().await;
        assert_eq!(slow.calls(), 1);
        assert!(slow.produced.lock().is_empty());
        assert!(f.cache.is_empty());

        // Shutting down twice releases nothing more.
        let released = f.rec.released.lock().len();
        f.cache.shutdown();
        assert_eq!(f.rec.released.lock().len(), released);
    }

    #[test]
    fn test_no_timeout_needs_no_time_driver() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("Should build a runtime");
        let f = fixture(None);
        let handle = rt
            .block_on(f.cache.request("ship", GatedLoader::new(true)))
            .unwrap();
        assert_eq!(handle.read().meshes.len(), 1);
    }
}
