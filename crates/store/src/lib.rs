//! Persistent backends for the quire generation service.
//!
//! ## Available implementations
//!
//! - [`SledStore`]: one sled database holding the cache index and job tables
//!   ([`SledCacheIndex`], [`SledJobTable`])
//! - [`FilesystemContentSource`]: loads `<dir>/<proposal_id>.json`
//!
//! ## Re-exports
//!
//! The in-memory implementations from quire-traits are re-exported for
//! convenience.

mod filesystem;
mod sled_store;

pub use filesystem::FilesystemContentSource;
pub use sled_store::{SledCacheIndex, SledJobTable, SledStore};

pub use quire_traits::{InMemoryCacheIndex, InMemoryContentSource, InMemoryJobTable};
