//! Configuration Module
//!
//! Handles loading service configuration from environment variables.

use std::env;

use crate::cache::DEFAULT_GENERATION_STRIPES;

/// Service configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Admin HTTP server port
    pub admin_port: u16,
    /// Prime the cache with active pipelines at startup
    pub warmup_on_start: bool,
    /// Number of invalidation generation stripes in the cache
    pub generation_stripes: usize,
    /// Seed the in-memory store with a demo pipeline
    pub seed_demo_data: bool,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `ADMIN_PORT` - Admin HTTP server port (default: 3000)
    /// - `WARMUP_ON_START` - Warm the cache at startup (default: true)
    /// - `GENERATION_STRIPES` - Invalidation generation stripes (default: 64)
    /// - `SEED_DEMO_DATA` - Seed a demo pipeline (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            admin_port: parsed("ADMIN_PORT").unwrap_or(defaults.admin_port),
            warmup_on_start: parsed("WARMUP_ON_START").unwrap_or(defaults.warmup_on_start),
            generation_stripes: parsed("GENERATION_STRIPES")
                .filter(|stripes| *stripes > 0)
                .unwrap_or(defaults.generation_stripes),
            seed_demo_data: parsed("SEED_DEMO_DATA").unwrap_or(defaults.seed_demo_data),
        }
    }
}

fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admin_port: 3000,
            warmup_on_start: true,
            generation_stripes: DEFAULT_GENERATION_STRIPES,
            seed_demo_data: true,
        }
    }
}
