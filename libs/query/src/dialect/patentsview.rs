//! PatentsView search API dialect
//!
//! The query is a JSON object in `q`; requested fields, sort and options go in the
//! `f`, `s` and `o` parameters, each JSON-encoded. Pagination is keyset-based: the
//! next page starts `after` the sort values of the last returned item, a single
//! value for one sort key and a list for several.

use pharmaquery_document::FieldPath;
use serde_json::{json, Map, Value};

use super::common::close_range;
use super::{Capabilities, Dialect, Disjunction, FaultClass, HttpFault};
use crate::ir::{Predicate, Query, RangeBound, RawPredicate};
use crate::page::{
    CompileOptions, Cursor, PageLimits, PageState, Pagination, ShapeHints, SortDirection,
};
use crate::request::{
    CompiledRequest, CursorLocation, Envelope, Method, Paging, ProjectionSite, Provider,
    QueryEncoding, RequestMode, ResponseFormat, RetryEligibility,
};

pub const BASE_URL: &str = "https://search.patentsview.org/api/v1";

/// Carries the reason for 4xx responses.
const STATUS_REASON_HEADER: &str = "x-status-reason";

#[derive(Debug, Clone, PartialEq)]
pub struct PatentsView {
    endpoint: String,
    exclude_withdrawn: bool,
    pad_patent_id: bool,
    base_url: String,
    limits: PageLimits,
    options: CompileOptions,
}

impl PatentsView {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            exclude_withdrawn: true,
            pad_patent_id: false,
            base_url: BASE_URL.to_string(),
            limits: PageLimits::new(1000, 100),
            options: CompileOptions::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Only sent for the `patent` endpoint.
    pub fn exclude_withdrawn(mut self, exclude: bool) -> Self {
        self.exclude_withdrawn = exclude;
        self
    }

    pub fn pad_patent_id(mut self, pad: bool) -> Self {
        self.pad_patent_id = pad;
        self
    }

    fn entity(&self) -> &str {
        self.endpoint.rsplit('/').next().unwrap_or(&self.endpoint)
    }

    /// Render a predicate as a PatentsView query object.
    pub fn query_object(&self, predicate: &Predicate) -> Value {
        match predicate {
            Predicate::Equals { field, value } => json!({ field.as_str(): value }),
            Predicate::Contains { field, value, .. } => {
                json!({ "_contains": { field.as_str(): value } })
            }
            Predicate::TextAny { field, terms } => {
                json!({ "_text_any": { field.as_str(): terms.join(" ") } })
            }
            Predicate::TextAll { field, terms } => {
                json!({ "_text_all": { field.as_str(): terms.join(" ") } })
            }
            Predicate::TextPhrase { field, phrase } => {
                json!({ "_text_phrase": { field.as_str(): phrase } })
            }
            Predicate::Range { field, gte, lte } => {
                let (lo, hi) = close_range(*gte, *lte, &self.options);
                json!({ "_and": [
                    { "_gte": { field.as_str(): bound_value(&lo) } },
                    { "_lte": { field.as_str(): bound_value(&hi) } }
                ] })
            }
            Predicate::And { children } => json!({ "_and": self.objects(children) }),
            Predicate::Or { children } => json!({ "_or": self.objects(children) }),
            Predicate::CountBy { filter, .. } => filter
                .as_deref()
                .map(|f| self.query_object(f))
                .unwrap_or_else(|| Value::Object(Map::new())),
            Predicate::Raw(RawPredicate::Structured(value)) => value.clone(),
            Predicate::Raw(RawPredicate::Text(text)) => Value::String(text.clone()),
        }
    }

    // The API expects a trailing slash after the endpoint.
    fn path(&self) -> Vec<String> {
        self.endpoint
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .chain(std::iter::once(String::new()))
            .collect()
    }

    fn objects(&self, children: &[Predicate]) -> Vec<Value> {
        children.iter().map(|c| self.query_object(c)).collect()
    }

    fn options_object(&self, size: Option<u32>, after: Option<&Cursor>) -> Value {
        let mut options = Map::new();
        if let Some(size) = size {
            options.insert("size".to_string(), json!(size));
        }
        options.insert("pad_patent_id".to_string(), json!(self.pad_patent_id));
        if let Some(after) = after {
            options.insert("after".to_string(), after.to_json());
        }
        if self.entity() == "patent" {
            options.insert("exclude_withdrawn".to_string(), json!(self.exclude_withdrawn));
        }
        Value::Object(options)
    }
}

/// Dates as ISO strings, integral numbers without a fraction.
fn bound_value(bound: &RangeBound) -> Value {
    match bound {
        RangeBound::Date(date) => json!(date.format("%Y-%m-%d").to_string()),
        RangeBound::Number(n) if n.fract() == 0.0 && n.abs() < 1e16 => json!(*n as i64),
        RangeBound::Number(n) => json!(n),
    }
}

impl Dialect for PatentsView {
    fn provider(&self) -> Provider {
        Provider::PatentsView
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            aggregation: false,
            disjunction: Disjunction::Any,
            raw_text: false,
            raw_structured: true,
            remote_projection: true,
            page: self.limits,
        }
    }

    fn compile(&self, query: &Query, page: &Pagination, hints: &ShapeHints) -> CompiledRequest {
        let q = query
            .filter()
            .map(|f| self.query_object(f))
            .unwrap_or_else(|| Value::Object(Map::new()));
        let state = page.resolve(self.limits);

        let mut params = vec![("q".to_string(), q.to_string())];
        if !hints.fields.is_empty() {
            let fields: Vec<String> = hints.fields.iter().map(|f| f.to_string()).collect();
            params.push(("f".to_string(), json!(fields).to_string()));
        }
        if !hints.sort.is_empty() {
            let sort: Vec<Value> = hints
                .sort
                .iter()
                .map(|key| {
                    let direction = key.direction.unwrap_or(SortDirection::Asc);
                    json!({ key.field.as_str(): direction.as_str() })
                })
                .collect();
            params.push(("s".to_string(), Value::Array(sort).to_string()));
        }
        let options = self.options_object(state.limit, state.cursor.as_ref());
        params.push(("o".to_string(), options.to_string()));

        let mut cursor_fields: Vec<FieldPath> = hints
            .sort
            .iter()
            .map(|key| FieldPath::key(key.field.clone()))
            .collect();
        if cursor_fields.is_empty() {
            cursor_fields.push(FieldPath::key(format!("{}_id", self.entity())));
        }

        let projection = if hints.fields.is_empty() {
            ProjectionSite::Local
        } else {
            ProjectionSite::Remote
        };

        CompiledRequest {
            provider: Provider::PatentsView,
            method: Method::Get,
            base_url: self.base_url.clone(),
            path: self.path(),
            params,
            encoding: QueryEncoding::Standard,
            page: PageState {
                limit: state.limit,
                offset: None,
                cursor: state.cursor,
            },
            mode: RequestMode::Items,
            format: ResponseFormat::Json,
            envelope: Envelope {
                items: Some(FieldPath::key(format!("{}s", self.entity()))),
                total: Some(FieldPath::key("total_hits")),
                paging: Paging::Cursor(CursorLocation::LastItemFields(cursor_fields)),
            },
            projection,
            retry: RetryEligibility::Idempotent,
            expression: Some(q.to_string()),
        }
    }

    fn classify(&self, fault: &HttpFault) -> FaultClass {
        if fault.status == 429 {
            return FaultClass::RateLimited;
        }
        let reason = fault
            .header(STATUS_REASON_HEADER)
            .map(str::to_string)
            .or_else(|| {
                let body = fault.body.trim();
                (!body.is_empty()).then(|| body.to_string())
            });
        FaultClass::Upstream { reason }
    }
}
