//! Compiled provider requests

use std::fmt;

use pharmaquery_document::FieldPath;
use serde::{Deserialize, Serialize};

use crate::page::PageState;

/// External search providers with a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenFda,
    ClinicalTrials,
    PatentsView,
    Chembl,
    Entrez,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenFda => "openfda",
            Self::ClinicalTrials => "clinicaltrials",
            Self::PatentsView => "patentsview",
            Self::Chembl => "chembl",
            Self::Entrez => "entrez",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
}

/// How parameter values are percent-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryEncoding {
    /// Every reserved character is encoded.
    Standard,
    /// The listed characters are left literal.
    Preserve(&'static str),
}

/// What the provider returns for this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    Items,
    Aggregation,
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Json,
    Xml,
}

/// Where requested fields are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionSite {
    /// The projector narrows each item after the response arrives.
    Local,
    /// The provider was asked for the fields and returns them already narrowed.
    Remote,
}

/// Whether the executor may retry this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryEligibility {
    Idempotent,
    Never,
}

/// Where the next-page cursor lives in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorLocation {
    /// A field of the response document.
    Field(FieldPath),
    /// Fields of the last returned item, one per sort key.
    LastItemFields(Vec<FieldPath>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Paging {
    Unpaged,
    Offset,
    Cursor(CursorLocation),
}

/// Locations of the interesting parts of a provider response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    /// Item list for item requests, bucket list for aggregations. `None` means the
    /// whole document is the record.
    pub items: Option<FieldPath>,
    pub total: Option<FieldPath>,
    pub paging: Paging,
}

/// A fully rendered provider request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledRequest {
    pub provider: Provider,
    pub method: Method,
    pub base_url: String,
    pub path: Vec<String>,
    pub params: Vec<(String, String)>,
    pub encoding: QueryEncoding,
    pub page: PageState,
    pub mode: RequestMode,
    pub format: ResponseFormat,
    pub envelope: Envelope,
    pub projection: ProjectionSite,
    pub retry: RetryEligibility,
    /// The provider's single textual query expression, when it has one.
    pub expression: Option<String>,
}

impl CompiledRequest {
    /// Base URL plus encoded path segments.
    pub fn endpoint(&self) -> String {
        let mut url = self.base_url.trim_end_matches('/').to_string();
        for segment in &self.path {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    /// The encoded query string, without the leading `?`.
    pub fn query_string(&self) -> String {
        render_pairs(&self.params, &self.encoding)
    }

    /// The complete request URL.
    pub fn url(&self) -> String {
        let query = self.query_string();
        if query.is_empty() {
            self.endpoint()
        } else {
            format!("{}?{}", self.endpoint(), query)
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Encode `key=value` pairs joined by `&`.
pub fn render_pairs(pairs: &[(String, String)], encoding: &QueryEncoding) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k, encoding), encode(v, encoding)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode(value: &str, encoding: &QueryEncoding) -> String {
    match encoding {
        QueryEncoding::Standard => urlencoding::encode(value).into_owned(),
        QueryEncoding::Preserve(keep) => {
            let mut out = String::with_capacity(value.len());
            let mut buf = [0u8; 4];
            for c in value.chars() {
                if keep.contains(c) {
                    out.push(c);
                } else {
                    out.push_str(&urlencoding::encode(c.encode_utf8(&mut buf)));
                }
            }
            out
        }
    }
}
