//! Resource Lock Manager
//!
//! Exclusive pipeline locks persisted through the query executor. The cached
//! lock state is only ever evicted after the lock write commits, so a failed
//! lock or unlock leaves the cache describing the state that is still
//! committed.
//!
//! Contention between holders is settled by the store's conditional
//! `lockPipeline` update. There is no in-process lock on this path because
//! other processes may contend for the same resource.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cache::{KeyBuilder, KeySegment};
use crate::dao::DaoSupport;
use crate::domain::PipelineIdentifier;
use crate::error::{CoreError, QueryFailure, Result};
use crate::persistence::rows_affected;

const KEYS: KeyBuilder = KeyBuilder::new("ResourceLockManager");

// == Lock State ==
/// Lock state of one resource as last committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockState {
    pub resource_name: String,
    pub locked_by: Option<PipelineIdentifier>,
}

impl LockState {
    pub fn unlocked(resource_name: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            locked_by: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }
}

// == Resource Lock Manager ==
#[derive(Debug, Clone)]
pub struct ResourceLockManager {
    support: DaoSupport,
}

impl ResourceLockManager {
    pub fn new(support: DaoSupport) -> Self {
        Self { support }
    }

    pub fn key_for_lock_state(resource: &str) -> String {
        KEYS.build("lockState", &[KeySegment::name(resource)])
    }

    pub fn key_for_locked_resources() -> String {
        KEYS.build("lockedResources", &[])
    }

    fn keys_for_change(resource: &str) -> Vec<String> {
        vec![Self::key_for_lock_state(resource), Self::key_for_locked_resources()]
    }

    /// Locks `resource` for the pipeline run `holder`.
    ///
    /// Locking again for the run that already holds the lock is a no-op.
    /// Fails with [`CoreError::ResourceAlreadyLocked`] when another run holds
    /// it, whether that is known from the cache or only discovered by the
    /// conditional write.
    pub fn lock(&self, resource: &str, holder: &PipelineIdentifier) -> Result<()> {
        let current = self.current_state(resource)?;
        if let Some(existing) = &current.locked_by {
            if existing.same_run(holder) {
                debug!("{} already holds the lock on {}", holder.counter, resource);
                return Ok(());
            }
            warn!("Lock on {} refused: held by counter {}", resource, existing.counter);
            return Err(CoreError::ResourceAlreadyLocked {
                resource: resource.to_string(),
                holder: existing.clone(),
            });
        }

        let cache = Arc::clone(self.support.cache());
        self.support.transactions().execute(|scope| -> Result<()> {
            let result = self.support.update_in(
                scope,
                "lockPipeline",
                json!({
                    "pipelineName": resource,
                    "counter": holder.counter,
                    "label": holder.label,
                }),
            )?;

            if rows_affected("lockPipeline", &result)? == 0 {
                let winner: Option<PipelineIdentifier> =
                    self.support
                        .query_in(scope, "lockedPipeline", json!({ "pipelineName": resource }))?;
                return match winner {
                    Some(winner) => {
                        warn!("Lock on {} lost to counter {}", resource, winner.counter);
                        Err(CoreError::ResourceAlreadyLocked {
                            resource: resource.to_string(),
                            holder: winner,
                        })
                    }
                    None => Err(CoreError::Internal(format!(
                        "lock on {} was refused but no holder is recorded",
                        resource
                    ))),
                };
            }

            scope.remove_after_commit(&cache, Self::keys_for_change(resource));
            Ok(())
        })?;

        info!("Locked {} for counter {}", resource, holder.counter);
        Ok(())
    }

    /// Releases the lock on `resource`. Returns false if it was not locked.
    pub fn unlock(&self, resource: &str) -> Result<bool> {
        let cache = Arc::clone(self.support.cache());
        let released = self.support.transactions().execute(|scope| -> Result<bool> {
            let result = self
                .support
                .update_in(scope, "unlockLockedPipeline", json!({ "pipelineName": resource }))?;
            let released = rows_affected("unlockLockedPipeline", &result)? > 0;
            if released {
                scope.remove_after_commit(&cache, Self::keys_for_change(resource));
            }
            Ok(released)
        })?;

        if released {
            info!("Unlocked {}", resource);
        }
        Ok(released)
    }

    /// Committed lock state of `resource`, read through the cache.
    pub fn current_state(&self, resource: &str) -> Result<Arc<LockState>> {
        let key = Self::key_for_lock_state(resource);
        let state = self.support.reads().fetch_exclusive(&key, || {
            let holder: Option<PipelineIdentifier> = self
                .support
                .query("lockedPipeline", json!({ "pipelineName": resource }))?;
            Ok::<_, QueryFailure>(LockState {
                resource_name: resource.to_string(),
                locked_by: holder,
            })
        })?;
        Ok(state)
    }

    /// Every locked resource, ordered by name.
    pub fn locked_resources(&self) -> Result<Arc<Vec<LockState>>> {
        let key = Self::key_for_locked_resources();
        let states = self.support.reads().fetch_exclusive(&key, || {
            let holders: Vec<PipelineIdentifier> = self.support.query("allLockedPipelines", json!({}))?;
            Ok::<_, QueryFailure>(
                holders
                    .into_iter()
                    .map(|holder| LockState {
                        resource_name: holder.name.clone(),
                        locked_by: Some(holder),
                    })
                    .collect::<Vec<_>>(),
            )
        })?;
        Ok(states)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::fixtures::Fixture;
    use crate::persistence::QueryExecutor;
    use std::sync::Barrier;
    use std::thread;

    fn manager() -> (Fixture, ResourceLockManager) {
        let fixture = Fixture::new();
        let manager = ResourceLockManager::new(fixture.support.clone());
        (fixture, manager)
    }

    fn run(counter: i32) -> PipelineIdentifier {
        PipelineIdentifier::new("up42", counter, counter.to_string())
    }

    #[test]
    fn test_lock_then_read_state() {
        let (_fixture, locks) = manager();
        assert!(!locks.current_state("up42").unwrap().is_locked());

        locks.lock("up42", &run(1)).unwrap();

        let state = locks.current_state("UP42").unwrap();
        assert_eq!(state.locked_by.as_ref().map(|holder| holder.counter), Some(1));
    }

    #[test]
    fn test_relock_by_same_run_is_noop() {
        let (fixture, locks) = manager();
        locks.lock("up42", &run(1)).unwrap();
        locks.lock("up42", &run(1)).unwrap();

        assert_eq!(fixture.db.executions("lockPipeline"), 1);
    }

    #[test]
    fn test_lock_held_by_other_run_is_refused() {
        let (_fixture, locks) = manager();
        locks.lock("up42", &run(1)).unwrap();

        let err = locks.lock("up42", &run(2)).unwrap_err();
        match err {
            CoreError::ResourceAlreadyLocked { resource, holder } => {
                assert_eq!(resource, "up42");
                assert_eq!(holder.counter, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_conflict_found_by_conditional_write() {
        let (fixture, locks) = manager();
        assert!(!locks.current_state("up42").unwrap().is_locked());

        // Another process takes the lock behind this cache's back
        fixture
            .db
            .execute("lockPipeline", &json!({"pipelineName": "up42", "counter": 7}))
            .unwrap();

        let err = locks.lock("up42", &run(1)).unwrap_err();
        assert!(matches!(err, CoreError::ResourceAlreadyLocked { holder, .. } if holder.counter == 7));
    }

    #[test]
    fn test_failed_lock_write_leaves_cached_state() {
        let (fixture, locks) = manager();
        assert!(!locks.current_state("up42").unwrap().is_locked());

        fixture.db.fail_next("lockPipeline");
        assert!(matches!(locks.lock("up42", &run(1)), Err(CoreError::Query(_))));

        assert!(!locks.current_state("up42").unwrap().is_locked());
        assert_eq!(fixture.db.executions("lockedPipeline"), 1);
    }

    #[test]
    fn test_failed_commit_leaves_cached_state() {
        let (fixture, locks) = manager();
        assert!(!locks.current_state("up42").unwrap().is_locked());

        fixture.db.fail_next_commit();
        assert!(locks.lock("up42", &run(1)).is_err());

        assert!(!locks.current_state("up42").unwrap().is_locked());
        // The lock was rolled back, so a new holder can take it
        locks.lock("up42", &run(2)).unwrap();
    }

    #[test]
    fn test_failed_unlock_keeps_lock_cached() {
        let (fixture, locks) = manager();
        locks.lock("up42", &run(1)).unwrap();
        assert!(locks.current_state("up42").unwrap().is_locked());

        fixture.db.fail_next("unlockLockedPipeline");
        assert!(locks.unlock("up42").is_err());
        assert!(locks.current_state("up42").unwrap().is_locked());

        assert!(locks.unlock("up42").unwrap());
        assert!(!locks.current_state("up42").unwrap().is_locked());
        assert!(!locks.unlock("up42").unwrap());
    }

    #[test]
    fn test_locked_resources_follow_lock_and_unlock() {
        let (_fixture, locks) = manager();
        locks.lock("up42", &run(1)).unwrap();
        locks
            .lock("deploy", &PipelineIdentifier::new("deploy", 3, "3"))
            .unwrap();

        let names: Vec<String> = locks
            .locked_resources()
            .unwrap()
            .iter()
            .map(|state| state.resource_name.clone())
            .collect();
        assert_eq!(names, vec!["deploy", "up42"]);

        locks.unlock("deploy").unwrap();
        assert_eq!(locks.locked_resources().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_locks_have_one_winner() {
        let (_fixture, locks) = manager();
        let barrier = Arc::new(Barrier::new(10));

        let handles: Vec<_> = (1..=10)
            .map(|counter| {
                let locks = locks.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    locks.lock("up42", &run(counter))
                })
            })
            .collect();

        let outcomes: Vec<Result<()>> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
        let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        let refused = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Err(CoreError::ResourceAlreadyLocked { .. })))
            .count();

        assert_eq!(winners, 1);
        assert_eq!(refused, 9);
        assert!(locks.current_state("up42").unwrap().is_locked());
    }
}
