//! Typed handle to one cached value

use std::sync::Arc;
use tokio::runtime::Handle;

use crate::cached_values::CachedValues;
use crate::context::CacheContext;
use crate::error::CacheError;
use crate::policy::CachePolicy;
use crate::pool::{Cacheable, Pool};

/// Get/set access to the `(V, P)` slot
///
/// Clones share one [`CachedValues`], and with it one pressure subscription.
/// The blocking accessors touch the disk on the calling thread; inside async
/// code use [`CacheSlot::get_async`] and [`CacheSlot::set_async`].
pub struct CacheSlot<V, P> {
    values: Arc<CachedValues<V, P>>,
    runtime: Handle,
}

impl<V: Cacheable, P: CachePolicy> CacheSlot<V, P> {
    pub fn new(context: &CacheContext) -> Self {
        Self {
            values: Arc::new(CachedValues::new(context)),
            runtime: context.runtime().clone(),
        }
    }

    /// Current value, if any
    pub fn get(&self) -> Option<V> {
        self.values.read().into_value()
    }

    /// Replace the value. `None` empties the memory tier only; use
    /// [`CacheSlot::remove`] to drop the persisted copy too.
    pub fn set(&self, value: Option<V>) {
        self.values.write(Pool::with_value(value));
    }

    pub fn remove(&self) {
        self.values.remove();
    }

    pub async fn get_async(&self) -> Result<Option<V>, CacheError> {
        let values = self.values.clone();
        let value = self
            .runtime
            .spawn_blocking(move || values.read().into_value())
            .await?;
        Ok(value)
    }

    pub async fn set_async(&self, value: Option<V>) -> Result<(), CacheError> {
        let values = self.values.clone();
        self.runtime
            .spawn_blocking(move || values.write(Pool::with_value(value)))
            .await?;
        Ok(())
    }

    /// Register the callback for disk errors, replacing any previous one
    pub fn observe_errors<F>(&self, observer: F)
    where
        F: Fn(&CacheError) + Send + Sync + 'static,
    {
        self.values.observe_errors(observer);
    }

    pub fn values(&self) -> &Arc<CachedValues<V, P>> {
        &self.values
    }
}

impl<V, P> Clone for CacheSlot<V, P> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            runtime: self.runtime.clone(),
        }
    }
}
