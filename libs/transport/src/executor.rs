//! Sends compiled requests and decodes provider responses

use std::time::Duration;

use chrono::{DateTime, Utc};
use pharmaquery_document::{xml, Document};
use pharmaquery_query::dialect::{Dialect, FaultClass, HttpFault};
use pharmaquery_query::request::{CompiledRequest, ResponseFormat, RetryEligibility};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::credentials::{ApiKey, KeyPlacement};
use crate::error::{FailureKind, Result, TransportError};
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "pharma-researcher/1.0";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    #[serde(with = "seconds")]
    pub timeout: Duration,
    pub user_agent: String,
    pub default_headers: Vec<(String, String)>,
    pub api_key: Option<ApiKey>,
    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_headers: Vec::new(),
            api_key: None,
            retry: RetryPolicy::none(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_api_key(mut self, api_key: Option<ApiKey>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// HTTP executor shared by every call to one provider.
#[derive(Debug, Clone)]
pub struct Executor {
    client: Client,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&config.user_agent)?);
        for (name, value) in &config.default_headers {
            headers.insert(header_name(name)?, header_value(value)?);
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute a compiled request, retrying per the configured policy when the
    /// request allows it, and decode the body into a document.
    ///
    /// A cancelled token aborts both in-flight sends and retry sleeps.
    pub async fn execute(
        &self,
        request: &CompiledRequest,
        dialect: &dyn Dialect,
        cancel: Option<&CancellationToken>,
    ) -> Result<Document> {
        let mut attempt = 0;
        let mut waited = Duration::ZERO;
        loop {
            let err = match cancellable(self.send(request, dialect), cancel).await {
                Ok(document) => return Ok(document),
                Err(err) => err,
            };
            if request.retry == RetryEligibility::Never {
                return Err(err);
            }
            let Some(delay) = self.config.retry.delay(&err, attempt, waited) else {
                return Err(err);
            };
            warn!(
                provider = %request.provider,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying provider call"
            );
            cancellable(
                async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                },
                cancel,
            )
            .await?;
            attempt += 1;
            waited += delay;
        }
    }

    async fn send(&self, request: &CompiledRequest, dialect: &dyn Dialect) -> Result<Document> {
        let url = request.url();
        debug!(provider = %request.provider, %url, "sending provider request");

        let mut builder = match &self.config.api_key {
            Some(key) => {
                let builder = self.client.get(key.apply_to_url(&url));
                match &key.placement {
                    KeyPlacement::Header(name) => builder.header(name.as_str(), key.value.as_str()),
                    KeyPlacement::Query(_) => builder,
                }
            }
            None => self.client.get(&url),
        };
        if request.format == ResponseFormat::Xml {
            builder = builder.header(reqwest::header::ACCEPT, "application/xml");
        }

        let response = builder.send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        if !status.is_success() {
            let fault = HttpFault {
                status: status.as_u16(),
                headers,
                body,
            };
            return Err(fault_error(dialect.classify(&fault), &fault, retry_after));
        }

        let document = decode(&body, request.format)?;
        // Some providers signal throttling inside a 200 response.
        if let Some(error) = document.get("error").and_then(|e| e.as_str()) {
            let fault = HttpFault {
                status: status.as_u16(),
                headers,
                body: error.to_string(),
            };
            if dialect.classify(&fault) == FaultClass::RateLimited {
                return Err(TransportError::RateLimited { retry_after });
            }
        }
        Ok(document)
    }
}

fn fault_error(class: FaultClass, fault: &HttpFault, retry_after: Option<Duration>) -> TransportError {
    match class {
        FaultClass::RateLimited => TransportError::RateLimited { retry_after },
        FaultClass::Upstream { reason } => TransportError::upstream(fault.status, reason, &fault.body),
    }
}

fn decode(body: &str, format: ResponseFormat) -> Result<Document> {
    match format {
        ResponseFormat::Json => {
            serde_json::from_str(body).map_err(|e| TransportError::DecodeFailure(e.to_string()))
        }
        ResponseFormat::Xml => {
            xml::parse_document(body).map_err(|e| TransportError::DecodeFailure(e.to_string()))
        }
    }
}

async fn cancellable<T>(
    future: impl std::future::Future<Output = Result<T>>,
    cancel: Option<&CancellationToken>,
) -> Result<T> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(TransportError::Canceled),
            result = future => result,
        },
        None => future.await,
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid_header(name, e))
}

/// `Retry-After` as delay-seconds or an HTTP-date. A date in the past means no wait.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| invalid_header(value, e))
}

fn invalid_header(input: &str, err: impl std::fmt::Display) -> TransportError {
    TransportError::TransportFailure {
        kind: FailureKind::Request,
        message: format!("invalid header '{input}': {err}"),
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_json_and_xml() {
        let doc = decode(r#"{"results":[1]}"#, ResponseFormat::Json).unwrap();
        assert_eq!(doc["results"][0], 1);

        let doc = decode(
            "<eSearchResult><Count>2</Count></eSearchResult>",
            ResponseFormat::Xml,
        )
        .unwrap();
        assert_eq!(doc["eSearchResult"]["Count"], "2");
    }

    #[test]
    fn test_decode_failure() {
        assert!(matches!(
            decode("<html>", ResponseFormat::Json),
            Err(TransportError::DecodeFailure(_))
        ));
    }

    #[test]
    fn test_retry_after_forms() {
        let now = DateTime::parse_from_rfc3339("2024-06-30T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(parse_retry_after(" 7 ", now), Some(Duration::from_secs(7)));
        assert_eq!(
            parse_retry_after("Sun, 30 Jun 2024 12:00:45 GMT", now),
            Some(Duration::from_secs(45))
        );
        assert_eq!(
            parse_retry_after("Sun, 30 Jun 2024 11:59:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn test_config_defaults() {
        let config: ExecutorConfig = serde_json::from_str(r#"{"timeout": 5}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.retry, RetryPolicy::none());
    }

    #[test]
    fn test_invalid_header_rejected() {
        let config = ExecutorConfig {
            default_headers: vec![("bad header".into(), "x".into())],
            ..ExecutorConfig::default()
        };
        assert!(Executor::new(config).is_err());
    }
}
