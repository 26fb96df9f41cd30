//! Error types for the caching layer
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::domain::PipelineIdentifier;
use crate::models::ErrorResponse;

// == Query Failure ==
/// Failure raised by the persistence boundary (query executor or
/// transaction coordinator). Propagated unchanged by the caching layer.
#[derive(Error, Debug)]
pub enum QueryFailure {
    /// The executor has no query with this name
    #[error("Unknown query: {0}")]
    UnknownQuery(String),

    /// The query ran and failed
    #[error("Query '{query}' failed: {reason}")]
    Failed { query: String, reason: String },

    /// Parameters or result rows did not have the expected shape
    #[error("Query '{query}' returned data that could not be decoded: {source}")]
    Decode {
        query: String,
        #[source]
        source: serde_json::Error,
    },

    /// The transaction id is not open on this coordinator
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(u64),

    /// A transaction was started while the calling thread already has one open
    #[error("Nested transaction refused: transaction {0} is still open on this thread")]
    NestedTransaction(u64),
}

impl QueryFailure {
    /// Shorthand for [`QueryFailure::Failed`].
    pub fn failed(query: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryFailure::Failed {
            query: query.into(),
            reason: reason.into(),
        }
    }
}

// == Core Error Enum ==
/// Unified error type for the caching layer.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The resource is locked by a different holder
    #[error("Pipeline '{resource}' is already locked (counter = {})", holder.counter)]
    ResourceAlreadyLocked {
        resource: String,
        holder: PipelineIdentifier,
    },

    /// A record the caller named does not exist
    #[error("{0}")]
    RecordNotFound(String),

    /// Failure from the query executor or transaction coordinator
    #[error(transparent)]
    Query(#[from] QueryFailure),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoreError::ResourceAlreadyLocked { .. } => StatusCode::CONFLICT,
            CoreError::RecordNotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Query(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching layer.
pub type Result<T> = std::result::Result<T, CoreError>;
