//! Error types for transport

use std::time::Duration;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, TransportError>;

/// Upstream response bodies are truncated to this many characters in errors.
pub const BODY_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Connect,
    Timeout,
    Request,
    Body,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Request => "request",
            Self::Body => "body",
        };
        f.write_str(name)
    }
}

/// Failures of a single provider call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider returned HTTP {status}{}", reason_suffix(.reason))]
    UpstreamHttp {
        status: u16,
        reason: Option<String>,
        body: String,
    },

    #[error("{kind} failure: {message}")]
    TransportFailure { kind: FailureKind, message: String },

    #[error("could not decode provider response: {0}")]
    DecodeFailure(String),

    #[error("request canceled")]
    Canceled,
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

impl TransportError {
    /// Throttling, server-side faults and network failures may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::TransportFailure { .. } => true,
            Self::UpstreamHttp { status, .. } => *status >= 500,
            Self::DecodeFailure(_) | Self::Canceled => false,
        }
    }

    pub(crate) fn upstream(status: u16, reason: Option<String>, body: &str) -> Self {
        Self::UpstreamHttp {
            status,
            reason,
            body: body.chars().take(BODY_EXCERPT_CHARS).collect(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_connect() {
            FailureKind::Connect
        } else if err.is_body() || err.is_decode() {
            FailureKind::Body
        } else {
            FailureKind::Request
        };
        Self::TransportFailure {
            kind,
            message: err.to_string(),
        }
    }
}
