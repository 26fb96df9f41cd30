//! DAO Module
//!
//! Cached data access for pipelines, stages, jobs and users. Each DAO owns
//! a [`KeyBuilder`](crate::cache::KeyBuilder) and exposes one `key_for_*`
//! function per cached query so invalidation code derives the exact keys
//! the read paths use.

mod job;
mod pipeline;
mod stage;
mod user;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cache::{CacheStore, ReadThrough};
use crate::error::QueryFailure;
use crate::persistence::{decode, QueryExecutor};
use crate::transaction::{TransactionScope, TransactionTemplate};

pub use job::JobDao;
pub use pipeline::PipelineDao;
pub use stage::StageDao;
pub use user::UserDao;

// == Dao Support ==
/// Collaborators shared by every DAO.
#[derive(Clone)]
pub struct DaoSupport {
    executor: Arc<dyn QueryExecutor>,
    transactions: TransactionTemplate,
    reads: ReadThrough,
}

impl DaoSupport {
    pub fn new(executor: Arc<dyn QueryExecutor>, transactions: TransactionTemplate, reads: ReadThrough) -> Self {
        Self {
            executor,
            transactions,
            reads,
        }
    }

    pub fn transactions(&self) -> &TransactionTemplate {
        &self.transactions
    }

    pub fn reads(&self) -> &ReadThrough {
        &self.reads
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        self.reads.cache()
    }

    /// Runs `name` outside a transaction and decodes its result.
    pub fn query<T: DeserializeOwned>(&self, name: &str, params: Value) -> Result<T, QueryFailure> {
        let result = self.executor.execute(name, &params)?;
        decode(name, result)
    }

    /// Runs `name` inside the transaction owning `scope` and decodes its result.
    pub fn query_in<T: DeserializeOwned>(
        &self,
        scope: &TransactionScope,
        name: &str,
        params: Value,
    ) -> Result<T, QueryFailure> {
        let result = self.executor.execute_in(scope, name, &params)?;
        decode(name, result)
    }

    /// Runs a write inside the transaction owning `scope` and returns its
    /// raw result.
    pub fn update_in(&self, scope: &TransactionScope, name: &str, params: Value) -> Result<Value, QueryFailure> {
        self.executor.execute_in(scope, name, &params)
    }
}

impl std::fmt::Debug for DaoSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaoSupport")
            .field("cache", self.cache())
            .finish_non_exhaustive()
    }
}
