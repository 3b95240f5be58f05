//! Error types for query construction

use pharmaquery_document::PathError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, QueryError>;

/// Build-time query errors. None of these ever reach the network.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("empty query: supply at least one filter, a raw query or an aggregation field")]
    EmptyQuery,

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl QueryError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }
}

impl From<PathError> for QueryError {
    fn from(err: PathError) -> Self {
        Self::InvalidQuery(err.to_string())
    }
}
