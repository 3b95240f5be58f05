use serde::Serialize;
use serde_json::Value;

use crate::metadata::QueryMetadata;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// Projected records, or the single record of a lookup.
    Data(Value),
    /// Aggregation buckets, returned verbatim.
    Aggregations(Vec<Value>),
}

/// Serialized as `{"data": ..., "_query_metadata": {...}}` or
/// `{"aggregations": [...], "_query_metadata": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterResponse {
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(rename = "_query_metadata")]
    pub metadata: QueryMetadata,
}

impl AdapterResponse {
    pub fn data(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Data(value) => Some(value),
            Payload::Aggregations(_) => None,
        }
    }

    pub fn aggregations(&self) -> Option<&[Value]> {
        match &self.payload {
            Payload::Aggregations(buckets) => Some(buckets),
            Payload::Data(_) => None,
        }
    }

    /// Records as a slice; a single-record payload is a one-element slice.
    pub fn records(&self) -> &[Value] {
        match &self.payload {
            Payload::Data(Value::Array(items)) => items,
            Payload::Data(record) => std::slice::from_ref(record),
            Payload::Aggregations(buckets) => buckets,
        }
    }
}
