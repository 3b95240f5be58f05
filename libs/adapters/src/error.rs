//! Error types for adapters

use std::fmt;

use pharmaquery_document::PathError;
use pharmaquery_query::{CompiledRequest, Provider, QueryError};
use pharmaquery_transport::TransportError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid parameters: {0}")]
    Params(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// The compiled request a failure belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub provider: Provider,
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl From<&CompiledRequest> for RequestContext {
    fn from(request: &CompiledRequest) -> Self {
        Self {
            provider: request.provider,
            url: request.url(),
            params: request.params.clone(),
        }
    }
}

/// Adapter failure. Every failure after compilation carries the request context.
#[derive(Error, Debug)]
pub struct Error {
    #[source]
    pub kind: ErrorKind,
    pub context: Option<Box<RequestContext>>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{}: {} ({})", context.provider, self.kind, context.url),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl Error {
    pub fn params(message: impl Into<String>) -> Self {
        ErrorKind::Params(message.into()).into()
    }

    pub fn config(message: impl Into<String>) -> Self {
        ErrorKind::Config(message.into()).into()
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(Box::new(context));
        self
    }

    pub fn transport(&self) -> Option<&TransportError> {
        match &self.kind {
            ErrorKind::Transport(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the caller may retry the same call later.
    pub fn is_retryable(&self) -> bool {
        self.transport().is_some_and(TransportError::is_retryable)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        ErrorKind::Query(err).into()
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        ErrorKind::Transport(err).into()
    }
}

impl From<PathError> for Error {
    fn from(err: PathError) -> Self {
        QueryError::from(err).into()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::params(err.to_string())
    }
}
