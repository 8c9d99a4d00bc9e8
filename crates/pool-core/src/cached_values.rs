//! Two-tier read/write path for one slot

use futures::StreamExt;
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::cache::{DiskCache, MemoryCache, SlotKey};
use crate::context::CacheContext;
use crate::error::CacheError;
use crate::policy::CachePolicy;
use crate::pool::{Cacheable, Pool};

/// Callback receiving disk tier errors
pub type ErrorObserver = Arc<dyn Fn(&CacheError) + Send + Sync>;

/// Combines the memory and disk tiers for the `(V, P)` slot
///
/// Writes always land in memory; disk failures go to the error observer and
/// are never returned to the caller. Reads prefer memory and fall back to
/// disk. A value found on disk is returned as is and not copied back into
/// memory.
///
/// While alive, a background task evicts memory buckets on pressure events.
/// Dropping the value aborts that task.
pub struct CachedValues<V, P> {
    memory: Arc<MemoryCache>,
    disk: Arc<DiskCache>,
    observer: RwLock<Option<ErrorObserver>>,
    pressure_task: AbortHandle,
    _slot: PhantomData<fn() -> (V, P)>,
}

impl<V: Cacheable, P: CachePolicy> CachedValues<V, P> {
    pub fn new(context: &CacheContext) -> Self {
        let memory = context.memory().clone();

        // Subscribe before spawning so no event sent after `new` returns is missed
        let mut events = context.pressure().subscribe();
        let evicting = memory.clone();
        let task = context.runtime().spawn(async move {
            while let Some(level) = events.next().await {
                let evicted = evicting.evict(level);
                if evicted > 0 {
                    metrics::counter!("pool_cache_pressure_evictions_total")
                        .increment(evicted as u64);
                }
            }
            debug!("Pressure stream ended");
        });

        Self {
            memory,
            disk: context.disk().clone(),
            observer: RwLock::new(None),
            pressure_task: task.abort_handle(),
            _slot: PhantomData,
        }
    }

    /// Store the pool in memory, then on disk
    pub fn write(&self, pool: Pool<V, P>) {
        self.memory.set(pool.clone());

        if let Err(e) = self.disk.set(&pool) {
            self.report(e);
        }
    }

    /// Current pool for the slot
    ///
    /// A slot that has never been persisted reads as an empty pool and is not
    /// reported as an error.
    pub fn read(&self) -> Pool<V, P> {
        let memory_pool = self.memory.get::<V, P>();
        if !memory_pool.is_empty() {
            metrics::counter!("pool_cache_memory_hits_total").increment(1);
            return memory_pool;
        }

        match self.disk.get::<V, P>() {
            Ok(disk_pool) => {
                metrics::counter!("pool_cache_disk_hits_total").increment(1);
                disk_pool
            }
            Err(e) if e.is_not_found() => {
                metrics::counter!("pool_cache_misses_total").increment(1);
                debug!("No cached value for {}", SlotKey::of::<V>());
                memory_pool
            }
            Err(e) => {
                metrics::counter!("pool_cache_misses_total").increment(1);
                self.report(e);
                memory_pool
            }
        }
    }

    /// Drop the slot from both tiers
    pub fn remove(&self) {
        self.memory.remove::<V, P>();

        if let Err(e) = self.disk.remove::<V, P>() {
            self.report(e);
        }
    }

    /// Register the error observer, replacing any previous one
    pub fn observe_errors<F>(&self, observer: F)
    where
        F: Fn(&CacheError) + Send + Sync + 'static,
    {
        *self.observer.write() = Some(Arc::new(observer));
    }

    pub fn clear_observer(&self) {
        *self.observer.write() = None;
    }

    fn report(&self, error: CacheError) {
        warn!("Disk cache error for {}: {}", SlotKey::of::<V>(), error);
        metrics::counter!("pool_cache_disk_errors_total").increment(1);

        // Call outside the lock so the observer may replace itself
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer(&error);
        }
    }
}

impl<V, P> Drop for CachedValues<V, P> {
    fn drop(&mut self) {
        self.pressure_task.abort();
    }
}
