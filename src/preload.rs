//! Batch loading with bounded concurrency and progress reporting.
use std::future::Future;

use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::*;

/// Reported after every item of a batch finishes, successfully or not.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressEvent<E = CacheError> {
    pub completed: usize,
    pub total: usize,
    /// `floor(completed / total * 100)`; 100 for an empty batch.
    pub percent: u8,
    /// The item that just finished, or `None` for the event an empty batch produces.
    pub key: Option<CacheKey>,
    /// Set if that item failed.  Failures don't stop the batch.
    pub error: Option<E>,
}

impl<E> ProgressEvent<E> {
    pub fn is_done(&self) -> bool {
        self.completed == self.total
    }
}

/// A batch of keys waiting to be loaded.  Duplicates are dropped on the way in.
#[derive(Debug, Default)]
pub struct PreloadQueue {
    pending: Vec<CacheKey>,
    seen: KeySet,
}

impl PreloadQueue {
    pub fn new() -> PreloadQueue {
        Default::default()
    }

    /// Queue keys, returning how many were new to the batch.
    pub fn enqueue<I, K>(&mut self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: Into<CacheKey>,
    {
        let before = self.pending.len();
        for key in keys.into_iter().map(Into::into) {
            if self.seen.insert(key.clone()) {
                self.pending.push(key);
            }
        }
        self.pending.len() - before
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain the queue, running `load` on up to `max_concurrency` keys at once.
    ///
    /// The stream yields one event per finished key, with progress that never goes backwards and ends at 100.  The
    /// queue is empty and reusable as soon as this returns.  An empty queue yields a single 100% event.
    pub fn run<F, Fut, E>(&mut self, mut load: F, max_concurrency: usize) -> BoxStream<'static, ProgressEvent<E>>
    where
        F: FnMut(CacheKey) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let keys = std::mem::take(&mut self.pending);
        self.seen.clear();
        let total = keys.len();

        if total == 0 {
            return stream::once(future::ready(ProgressEvent {
                completed: 0,
                total: 0,
                percent: 100,
                key: None,
                error: None,
            }))
            .boxed();
        }

        log::info!("Preloading {} assets, {} at a time", total, max_concurrency.max(1));
        stream::iter(keys)
            .map(move |key| {
                let work = load(key.clone());
                async move { (key, work.await) }
            })
            .buffer_unordered(max_concurrency.max(1))
            .scan(0usize, move |completed, (key, result)| {
                *completed += 1;
                let error = match result {
                    Ok(()) => None,
                    Err(e) => {
                        log::warn!("Failed to preload {}: {}", key, e);
                        Some(e)
                    }
                };
                future::ready(Some(ProgressEvent {
                    completed: *completed,
                    total,
                    percent: (*completed * 100 / total) as u8,
                    key: Some(key),
                    error,
                }))
            })
            .boxed()
    }
}
