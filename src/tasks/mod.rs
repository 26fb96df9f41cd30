//! Background Tasks Module
//!
//! Contains background tasks started alongside the admin server.
//!
//! # Tasks
//! - Warm-up: primes the cache with active pipelines at startup

mod warmup;

pub use warmup::spawn_warmup_task;
