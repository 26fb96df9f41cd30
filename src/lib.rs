//! Pipeline Cache - transaction-aware caching and pipeline locking
//!
//! Read-through caching in front of a CD orchestration store. Cache
//! invalidations are deferred until the writing transaction commits, cold
//! loads of the same key run once, and pipeline locks are settled by the
//! store's conditional writes.

pub mod api;
pub mod cache;
pub mod config;
pub mod dao;
pub mod domain;
pub mod error;
pub mod events;
pub mod history;
pub mod lock;
pub mod models;
pub mod persistence;
pub mod tasks;
pub mod transaction;

pub use api::AppState;
pub use cache::{CacheStore, KeyBuilder, KeySegment, KeyedMutexRegistry, ReadThrough};
pub use config::Config;
pub use error::{CoreError, QueryFailure, Result};
pub use events::{InvalidationListeners, StatusEvent};
pub use history::{FeedModifier, HistoryCursor, Pagination};
pub use lock::{LockState, ResourceLockManager};
pub use tasks::spawn_warmup_task;
pub use transaction::{TransactionScope, TransactionStatus, TransactionTemplate};
