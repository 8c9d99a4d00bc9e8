//! Typed two-tier value cache
//!
//! Each cached value lives in a slot identified by its value type `V` and a
//! policy type `P`. Reads are served from memory first and fall back to a
//! per-policy directory on disk; writes go to both. The policy decides when
//! disk files expire, how large the directory may grow, and at which memory
//! pressure level the in-memory copies are dropped.

pub mod cache;
pub mod cached_values;
pub mod context;
pub mod error;
pub mod policy;
pub mod pool;
pub mod pressure;
pub mod slot;

#[cfg(test)]
mod test_support;

pub use cache::{DiskCache, MemoryCache, SlotKey, SweepReport};
pub use cached_values::{CachedValues, ErrorObserver};
pub use context::CacheContext;
pub use error::CacheError;
pub use policy::{
    CachePolicy, DefaultCachePolicy, DiskCachePolicy, Expiry, MemoryCachePolicy,
    MemoryPressureLevel,
};
pub use pool::{Cacheable, Pool};
pub use pressure::{PressureNotifier, PressureSource, PressureStream};
pub use slot::CacheSlot;
