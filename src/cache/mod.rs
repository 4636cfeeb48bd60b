// src/cache/mod.rs
//! Result cache: the key function and the bounded store of rendered PDFs.

mod key;
mod store;

pub use key::cache_key;
pub use store::{CacheSettings, CacheStats, CacheStore, ClearScope};
