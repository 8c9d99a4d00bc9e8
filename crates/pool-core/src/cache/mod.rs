//! Cache tiers

mod disk;
mod memory;

pub use disk::{DiskCache, SlotKey, SweepReport};
pub use memory::{MemoryCache, PolicyId, SlotId};
