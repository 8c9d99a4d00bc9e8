//! The unit of cached state: a policy plus an optional value

use parking_lot::Mutex;
use pool_storage::{Codec, JsonCodec};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::policy::CachePolicy;

/// Values that can be held in a [`Pool`]
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// One cached slot for value type `V` under policy type `P`
///
/// The value sits behind its own lock, so replacing it through a shared
/// reference is atomic: readers see the old or the new value, never a mix.
/// Cloning takes a snapshot.
pub struct Pool<V, P> {
    policy: P,
    value: Mutex<Option<V>>,
}

impl<V: Cacheable, P: CachePolicy> Pool<V, P> {
    pub fn new() -> Self {
        Self {
            policy: P::default(),
            value: Mutex::new(None),
        }
    }

    /// Build a pool already holding `value`
    pub fn with_value(value: Option<V>) -> Self {
        let pool = Self::new();
        pool.overwrite(value);
        pool
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Snapshot of the held value
    pub fn value(&self) -> Option<V> {
        self.value.lock().clone()
    }

    /// Replace the held value
    pub fn overwrite(&self, value: Option<V>) {
        *self.value.lock() = value;
    }

    pub fn is_empty(&self) -> bool {
        self.value.lock().is_none()
    }

    /// Take the value out, leaving the pool empty
    pub fn into_value(self) -> Option<V> {
        self.value.into_inner()
    }

    /// Content fingerprint under [`JsonCodec`], used for equality and hashing
    pub fn fingerprint(&self) -> Option<String> {
        self.fingerprint_with(&JsonCodec::new())
    }

    /// Codec fingerprint of the held value, `None` when empty or unserializable
    pub fn fingerprint_with(&self, codec: &dyn Codec) -> Option<String> {
        let value = self.value.lock().as_ref().map(serde_json::to_value)?.ok()?;
        codec.fingerprint(&value).ok()
    }
}

impl<V: Cacheable, P: CachePolicy> Default for Pool<V, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Cacheable, P: CachePolicy> Clone for Pool<V, P> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            value: Mutex::new(self.value()),
        }
    }
}

impl<V: Cacheable, P: CachePolicy> PartialEq for Pool<V, P> {
    fn eq(&self, other: &Self) -> bool {
        self.policy == other.policy && self.fingerprint() == other.fingerprint()
    }
}

impl<V: Cacheable, P: CachePolicy> Eq for Pool<V, P> {}

impl<V: Cacheable, P: CachePolicy> Hash for Pool<V, P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let fingerprint = self.fingerprint();
        self.policy.hash(state);
        self.is_empty().hash(state);
        if let Some(fingerprint) = fingerprint {
            fingerprint.hash(state);
        }
    }
}

impl<V: Cacheable, P: CachePolicy> fmt::Debug for Pool<V, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("policy", &self.policy)
            .field("value", &self.fingerprint())
            .finish()
    }
}
