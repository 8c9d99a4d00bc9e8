//! Pool Cache Storage Layer
//!
//! This crate provides the adapters the cache core consumes:
//! a file storage abstraction (local disk and in-process backends)
//! and the byte-level codec used to persist cached values.

pub mod backend;
pub mod codec;
pub mod error;
pub mod local;
pub mod memory;

pub use backend::{FileEntry, StorageBackend};
pub use codec::{Codec, JsonCodec, decode_value, encode_value};
pub use error::{CodecError, StorageError};
pub use local::LocalStorage;
pub use memory::MemoryStorage;
