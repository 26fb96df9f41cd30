//! API Handlers
//!
//! HTTP request handlers for the admin endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use crate::cache::{CacheStore, KeyedMutexRegistry, ReadThrough};
use crate::config::Config;
use crate::dao::{DaoSupport, JobDao, PipelineDao, StageDao, UserDao};
use crate::error::{CoreError, Result};
use crate::events::InvalidationListeners;
use crate::lock::{LockState, ResourceLockManager};
use crate::models::{ClearResponse, HealthResponse, LocksResponse, StatsResponse};
use crate::persistence::MemoryDatabase;
use crate::transaction::TransactionTemplate;

/// Application state shared across all handlers.
///
/// Every component shares one cache and one mutex registry.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheStore>,
    pub pipelines: PipelineDao,
    pub stages: StageDao,
    pub jobs: JobDao,
    pub users: UserDao,
    pub locks: ResourceLockManager,
    pub listeners: InvalidationListeners,
}

impl AppState {
    /// Wires every component over `support`.
    pub fn new(support: DaoSupport) -> Self {
        Self {
            cache: Arc::clone(support.cache()),
            pipelines: PipelineDao::new(support.clone()),
            stages: StageDao::new(support.clone()),
            jobs: JobDao::new(support.clone()),
            users: UserDao::new(support.clone()),
            locks: ResourceLockManager::new(support.clone()),
            listeners: InvalidationListeners::new(Arc::clone(support.cache())),
        }
    }

    /// Creates an AppState backed by a fresh in-memory database.
    pub fn in_memory(config: &Config) -> Self {
        let db = Arc::new(MemoryDatabase::new());
        let reads = ReadThrough::new(
            Arc::new(CacheStore::with_stripes(config.generation_stripes)),
            Arc::new(KeyedMutexRegistry::new()),
        );
        Self::new(DaoSupport::new(db.clone(), TransactionTemplate::new(db), reads))
    }
}

/// Runs blocking cache work off the async workers.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| CoreError::Internal(format!("blocking task failed: {}", err)))?
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Handler for GET /stats
///
/// Returns current cache statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats()))
}

/// Handler for DELETE /cache
///
/// Drops every cached entry. Loads in flight are not published.
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    let dropped = state.cache.len();
    state.cache.clear();
    info!("Cache cleared through the admin API");
    Json(ClearResponse::new(dropped))
}

/// Handler for GET /locks
pub async fn locks_handler(State(state): State<AppState>) -> Result<Json<LocksResponse>> {
    let locks = blocking(move || state.locks.locked_resources()).await?;
    Ok(Json(LocksResponse::new(locks.as_ref().clone())))
}

/// Handler for GET /locks/:resource
pub async fn lock_state_handler(
    State(state): State<AppState>,
    Path(resource): Path<String>,
) -> Result<Json<LockState>> {
    let lock = blocking(move || state.locks.current_state(&resource)).await?;
    Ok(Json(lock.as_ref().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PipelineIdentifier;

    fn state() -> AppState {
        AppState::in_memory(&Config::default())
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "healthy");
    }

    #[tokio::test]
    async fn test_stats_handler_counts_lookups() {
        let state = state();
        state.cache.get::<u32>("missing");

        let response = stats_handler(State(state)).await;
        assert_eq!(response.hits, 0);
        assert_eq!(response.misses, 1);
    }

    #[tokio::test]
    async fn test_clear_handler_drops_entries() {
        let state = state();
        state.cache.put("a", Arc::new(1u32));
        state.cache.put("b", Arc::new(2u32));

        let response = clear_handler(State(state.clone())).await;
        assert_eq!(response.dropped, 2);
        assert!(state.cache.is_empty());
    }

    #[tokio::test]
    async fn test_lock_state_handler() {
        let state = state();
        state.locks.lock("up42", &PipelineIdentifier::new("up42", 3, "3")).unwrap();

        let response = lock_state_handler(State(state.clone()), Path("up42".to_string()))
            .await
            .unwrap();
        assert_eq!(response.locked_by.as_ref().map(|holder| holder.counter), Some(3));

        let listed = locks_handler(State(state)).await.unwrap();
        assert_eq!(listed.locks.len(), 1);
    }
}
