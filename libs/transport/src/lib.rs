//! HTTP execution of compiled provider requests
//!
//! [`Executor`] takes a [`CompiledRequest`](pharmaquery_query::CompiledRequest)
//! from a dialect, attaches credentials, sends it with a timeout, classifies
//! failures through the dialect and decodes the body (JSON or XML) into a generic
//! document. Retries follow a [`RetryPolicy`] and only apply to requests the
//! dialect marked as idempotent. A `CancellationToken` aborts a call at any point.

pub mod credentials;
pub mod error;
pub mod executor;
pub mod retry;

pub use credentials::{ApiKey, KeyPlacement};
pub use error::{FailureKind, Result, TransportError};
pub use executor::{Executor, ExecutorConfig, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};
pub use retry::RetryPolicy;
