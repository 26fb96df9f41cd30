//! Persistence Module
//!
//! The query boundary the caching layer wraps, and an in-memory store that
//! implements it.

mod executor;
mod memory;
mod tables;

pub use executor::{decode, encode, rows_affected, QueryExecutor};
pub use memory::MemoryDatabase;
