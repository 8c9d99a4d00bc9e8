//! In-memory tier

use parking_lot::ReentrantMutex;
use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

use crate::policy::{CachePolicy, MemoryPressureLevel};
use crate::pool::{Cacheable, Pool};

/// Identity of a policy type
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PolicyId {
    type_id: TypeId,
    name: &'static str,
}

impl PolicyId {
    pub fn of<P: CachePolicy>() -> Self {
        Self {
            type_id: TypeId::of::<P>(),
            name: type_name::<P>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PolicyId({})", self.name)
    }
}

/// Identity of a slot: the (value type, policy type) pair
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    type_id: TypeId,
    name: &'static str,
}

impl SlotId {
    pub fn of<V: Cacheable, P: CachePolicy>() -> Self {
        Self {
            type_id: TypeId::of::<Pool<V, P>>(),
            name: type_name::<V>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotId({})", self.name)
    }
}

type ErasedPool = Box<dyn Any + Send + Sync>;

/// All slots sharing one policy type
struct PolicyBucket {
    pressure_level: MemoryPressureLevel,
    slots: HashMap<SlotId, ErasedPool>,
}

type Buckets = HashMap<PolicyId, PolicyBucket>;

/// Process-wide in-memory store
///
/// Maps policy identity to a bucket of pools keyed by slot identity. Every
/// operation holds one re-entrant lock for the whole map. Lookups never fail:
/// a missing slot is returned as an empty pool.
pub struct MemoryCache {
    buckets: ReentrantMutex<RefCell<Buckets>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            buckets: ReentrantMutex::new(RefCell::new(HashMap::new())),
        }
    }

    /// Get a snapshot of the slot's pool, or a fresh empty pool.
    /// A fresh pool is not inserted.
    pub fn get<V: Cacheable, P: CachePolicy>(&self) -> Pool<V, P> {
        let guard = self.buckets.lock();
        let buckets = guard.borrow();

        buckets
            .get(&PolicyId::of::<P>())
            .and_then(|bucket| bucket.slots.get(&SlotId::of::<V, P>()))
            .and_then(|erased| erased.downcast_ref::<Pool<V, P>>())
            .cloned()
            .unwrap_or_default()
    }

    /// Insert or replace the slot's pool
    ///
    /// The bucket is keyed by policy type. Its pressure level comes from the
    /// policy instance that first created it.
    pub fn set<V: Cacheable, P: CachePolicy>(&self, pool: Pool<V, P>) {
        let guard = self.buckets.lock();
        let mut buckets = guard.borrow_mut();

        let policy_id = PolicyId::of::<P>();
        let bucket = buckets.entry(policy_id).or_insert_with(|| {
            debug!("Creating memory bucket for {:?}", policy_id);
            PolicyBucket {
                pressure_level: pool.policy().memory().pressure_level,
                slots: HashMap::new(),
            }
        });
        bucket.slots.insert(SlotId::of::<V, P>(), Box::new(pool));
    }

    /// Drop one slot. Returns whether it was present.
    pub fn remove<V: Cacheable, P: CachePolicy>(&self) -> bool {
        let guard = self.buckets.lock();
        let mut buckets = guard.borrow_mut();

        buckets
            .get_mut(&PolicyId::of::<P>())
            .and_then(|bucket| bucket.slots.remove(&SlotId::of::<V, P>()))
            .is_some()
    }

    /// Clear every bucket configured for exactly `level`
    ///
    /// Buckets configured for other levels are untouched, including lower
    /// ones. Returns the number of slots dropped.
    pub fn evict(&self, level: MemoryPressureLevel) -> usize {
        let guard = self.buckets.lock();
        let mut buckets = guard.borrow_mut();

        let mut evicted = 0;
        for (policy_id, bucket) in buckets.iter_mut() {
            if bucket.pressure_level == level && !bucket.slots.is_empty() {
                debug!(
                    "Evicting {} slots of {:?} on {} pressure",
                    bucket.slots.len(),
                    policy_id,
                    level
                );
                evicted += bucket.slots.len();
                bucket.slots.clear();
            }
        }

        if evicted > 0 {
            info!("Memory pressure {}: evicted {} slots", level, evicted);
        }
        evicted
    }

    /// Drop everything
    pub fn clear_all(&self) {
        let guard = self.buckets.lock();
        guard.borrow_mut().clear();
    }

    /// Number of live slots across all buckets
    pub fn len(&self) -> usize {
        let guard = self.buckets.lock();
        let buckets = guard.borrow();
        buckets.values().map(|bucket| bucket.slots.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}
