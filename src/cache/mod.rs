//! Cache Module
//!
//! Provides the process-wide cache, its key scheme, the per-key mutex
//! registry and the read-through helpers built on them.

mod entry;
mod key;
mod mutex;
mod read_through;
mod stats;
mod store;


// Re-export public types
pub use entry::{CacheEntry, CachedValue};
pub use key::{KeyBuilder, KeySegment};
pub use mutex::{KeyedMutexRegistry, MutexToken};
pub use read_through::ReadThrough;
pub use stats::CacheStats;
pub use store::{CacheStore, Stamp};

// == Public Constants ==
/// Default number of invalidation generation stripes per store
pub const DEFAULT_GENERATION_STRIPES: usize = 64;
