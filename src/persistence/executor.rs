//! Query Executor
//!
//! The narrow boundary to the relational store. Queries are addressed by
//! name; parameters and results travel as JSON values.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::QueryFailure;
use crate::transaction::TransactionScope;

// == Query Executor ==
pub trait QueryExecutor: Send + Sync {
    /// Runs `query` outside any transaction. Reads see committed data only.
    fn execute(&self, query: &str, params: &Value) -> Result<Value, QueryFailure>;

    /// Runs `query` as part of the transaction owning `scope`.
    fn execute_in(&self, scope: &TransactionScope, query: &str, params: &Value) -> Result<Value, QueryFailure>;
}

// == Helpers ==
/// Decodes a query result (or parameter object) into `T`.
pub fn decode<T: DeserializeOwned>(query: &str, value: Value) -> Result<T, QueryFailure> {
    serde_json::from_value(value).map_err(|source| QueryFailure::Decode {
        query: query.to_string(),
        source,
    })
}

/// Encodes a row or parameter object for `query`.
pub fn encode<T: Serialize>(query: &str, value: &T) -> Result<Value, QueryFailure> {
    serde_json::to_value(value).map_err(|source| QueryFailure::Decode {
        query: query.to_string(),
        source,
    })
}

/// Reads the `rowsAffected` count returned by write queries.
pub fn rows_affected(query: &str, result: &Value) -> Result<u64, QueryFailure> {
    result
        .get("rowsAffected")
        .and_then(Value::as_u64)
        .ok_or_else(|| QueryFailure::failed(query, "result carries no rowsAffected count"))
}
