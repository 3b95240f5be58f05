//! Query metadata attached to every adapter result

use pharmaquery_document::FieldPath;
use pharmaquery_query::{Cursor, ProjectionSite, Provider};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Where the next page starts, in the provider's own pagination vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextPage {
    Cursor(Cursor),
    Offset(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMetadata {
    pub provider: Provider,
    /// Request URL without credentials.
    pub url: String,
    /// Caller parameters as received.
    pub params: Value,
    /// Compiled provider parameters, in request order.
    #[serde(serialize_with = "pairs_as_map")]
    pub compiled_params: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_field: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
    pub cursor: Option<Cursor>,
    pub total_results: Option<u64>,
    pub results_returned: usize,
    pub next_page: Option<NextPage>,
    pub fields_requested: Option<Vec<FieldPath>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<ProjectionSite>,
}

fn pairs_as_map<S: Serializer>(pairs: &[(String, String)], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(pairs.iter().map(|(k, v)| (k, v)))
}
