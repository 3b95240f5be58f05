//! Provider connection settings
//!
//! [`ProvidersConfig`] is deserialized by the application (see the CLI's settings
//! loader) and handed to every adapter constructor. Anything left unset falls back
//! to the provider's public endpoint and the executor defaults.

use std::time::Duration;

use pharmaquery_query::CompileOptions;
use pharmaquery_transport::{
    ApiKey, Executor, ExecutorConfig, KeyPlacement, RetryPolicy, DEFAULT_TIMEOUT,
    DEFAULT_USER_AGENT,
};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Settings for one provider.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Overrides the provider's public base URL.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Overrides the adapter's default retry policy.
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntrezConfig {
    #[serde(flatten)]
    pub provider: ProviderConfig,
    pub tool: String,
    pub email: Option<String>,
}

impl Default for EntrezConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            tool: pharmaquery_query::dialect::entrez::DEFAULT_TOOL.to_string(),
            email: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub openfda: ProviderConfig,
    pub clinicaltrials: ProviderConfig,
    pub patentsview: ProviderConfig,
    pub chembl: ProviderConfig,
    pub entrez: EntrezConfig,
    /// Compile date used for open range sentinels; today when unset.
    #[serde(skip)]
    pub compile_options: Option<CompileOptions>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            openfda: ProviderConfig::default(),
            clinicaltrials: ProviderConfig::default(),
            patentsview: ProviderConfig::default(),
            chembl: ProviderConfig::default(),
            entrez: EntrezConfig::default(),
            compile_options: None,
        }
    }
}

impl ProvidersConfig {
    pub fn compile_options(&self) -> CompileOptions {
        self.compile_options.unwrap_or_default()
    }

    /// Build an executor for one provider.
    ///
    /// `placement` says where the provider expects its key; `retry` is the
    /// adapter's default policy when the provider section does not set one.
    pub(crate) fn executor(
        &self,
        provider: &ProviderConfig,
        placement: Option<KeyPlacement>,
        retry: RetryPolicy,
    ) -> Result<Executor> {
        let api_key = match (placement, provider.api_key.as_deref()) {
            (Some(placement), Some(value)) if !value.trim().is_empty() => Some(ApiKey {
                placement,
                value: value.trim().to_string(),
            }),
            _ => None,
        };
        let timeout = provider.timeout_secs.unwrap_or(self.timeout_secs);
        if timeout == 0 {
            return Err(Error::config("timeout must be greater than zero"));
        }
        let config = ExecutorConfig {
            timeout: Duration::from_secs(timeout),
            user_agent: self.user_agent.clone(),
            retry: provider.retry.clone().unwrap_or(retry),
            api_key,
            ..ExecutorConfig::default()
        };
        Ok(Executor::new(config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_partial_config() {
        let config: ProvidersConfig = serde_json::from_value(serde_json::json!({
            "timeout_secs": 10,
            "patentsview": { "api_key": "pv-key" },
            "entrez": { "email": "ops@example.org", "retry": { "max_retries": 1, "budget": 3000 } }
        }))
        .unwrap();

        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.patentsview.api_key.as_deref(), Some("pv-key"));
        assert_eq!(config.entrez.tool, "pharma-researcher");
        assert_eq!(config.entrez.email.as_deref(), Some("ops@example.org"));
        assert_eq!(
            config.entrez.provider.retry.map(|r| r.max_retries),
            Some(1)
        );
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = ProvidersConfig {
            timeout_secs: 0,
            ..ProvidersConfig::default()
        };
        let result = config.executor(&ProviderConfig::default(), None, RetryPolicy::none());
        assert!(result.is_err());
    }
}
