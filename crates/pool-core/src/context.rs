//! Shared handles every cache slot is built from

use std::sync::Arc;
use tokio::runtime::Handle;

use crate::cache::{DiskCache, MemoryCache};
use crate::pressure::{PressureNotifier, PressureSource};

/// The process-wide pieces of the cache
///
/// Construct one at startup and hand clones to whatever creates slots. All
/// clones share the same memory tier, disk tier, and pressure source. The
/// runtime handle is where pressure subscriptions and async accessors run.
#[derive(Clone)]
pub struct CacheContext {
    memory: Arc<MemoryCache>,
    disk: Arc<DiskCache>,
    pressure: Arc<dyn PressureSource>,
    runtime: Handle,
}

impl CacheContext {
    /// Fresh memory tier, local disk tier with JSON encoding, and a
    /// [`PressureNotifier`] nobody else holds
    pub fn new(runtime: Handle) -> Self {
        Self {
            memory: Arc::new(MemoryCache::new()),
            disk: Arc::new(DiskCache::local()),
            pressure: Arc::new(PressureNotifier::new()),
            runtime,
        }
    }

    pub fn with_memory(mut self, memory: Arc<MemoryCache>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_disk(mut self, disk: Arc<DiskCache>) -> Self {
        self.disk = disk;
        self
    }

    pub fn with_pressure_source(mut self, pressure: Arc<dyn PressureSource>) -> Self {
        self.pressure = pressure;
        self
    }

    pub fn memory(&self) -> &Arc<MemoryCache> {
        &self.memory
    }

    pub fn disk(&self) -> &Arc<DiskCache> {
        &self.disk
    }

    pub fn pressure(&self) -> &Arc<dyn PressureSource> {
        &self.pressure
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}
