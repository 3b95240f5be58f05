//! Provider API keys
//!
//! Keys are attached when a request is sent, never rendered into a
//! [`CompiledRequest`](pharmaquery_query::CompiledRequest), so URLs echoed back to
//! callers stay free of secrets.

use std::fmt;

use serde::Deserialize;

/// Where the provider expects its key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "in", content = "name")]
pub enum KeyPlacement {
    Header(String),
    Query(String),
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ApiKey {
    pub placement: KeyPlacement,
    pub value: String,
}

impl ApiKey {
    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            placement: KeyPlacement::Header(name.into()),
            value: value.into(),
        }
    }

    pub fn query(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            placement: KeyPlacement::Query(name.into()),
            value: value.into(),
        }
    }

    /// Append a query-placed key to a URL. Header keys leave the URL untouched.
    pub(crate) fn apply_to_url(&self, url: &str) -> String {
        match &self.placement {
            KeyPlacement::Query(name) => {
                let separator = if url.contains('?') { '&' } else { '?' };
                format!(
                    "{url}{separator}{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(&self.value)
                )
            }
            KeyPlacement::Header(_) => url.to_string(),
        }
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("placement", &self.placement)
            .field("value", &"<redacted>")
            .finish()
    }
}
