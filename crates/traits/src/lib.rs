pub mod clock;
pub mod content;
pub mod store;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use content::{ContentError, ContentSource, InMemoryContentSource};
pub use store::{CacheIndex, InMemoryCacheIndex, InMemoryJobTable, JobTable, StoreError};
