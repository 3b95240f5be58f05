//! Compile → execute → project, shared by every adapter
//!
//! An adapter only decides *what* to ask: it turns its parameters into a
//! [`Query`], [`Pagination`] and [`ShapeHints`] and hands them to [`Plan::new`].
//! Everything after that is provider-independent: validation against the
//! dialect, compilation, execution, envelope extraction, local projection and
//! next-page computation. An adapter may also attach a [`RecordShape`] that
//! rewrites each extracted item before projection.

use pharmaquery_document::{project, project_items, resolve, Document, FieldPath};
use pharmaquery_query::request::{CursorLocation, Paging, RequestMode};
use pharmaquery_query::{
    CompiledRequest, Cursor, DialectKind, Pagination, ProjectionSite, Query, ShapeHints,
};
use pharmaquery_transport::{Executor, TransportError};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, RequestContext, Result};
use crate::metadata::{NextPage, QueryMetadata};
use crate::response::{AdapterResponse, Payload};

/// Rewrites one extracted item into the record handed to the caller.
pub type RecordShape = fn(&Value) -> Value;

/// A validated, compiled call that has not been sent yet.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    #[serde(skip)]
    pub dialect: DialectKind,
    pub query: Query,
    pub request: CompiledRequest,
    pub fields: Vec<FieldPath>,
    /// Caller parameters, echoed in the result metadata.
    pub params: Value,
    #[serde(skip)]
    pub records: Option<RecordShape>,
}

impl Plan {
    pub fn new<P: Serialize>(
        dialect: impl Into<DialectKind>,
        query: Query,
        page: &Pagination,
        hints: ShapeHints,
        params: &P,
    ) -> Result<Self> {
        let dialect = dialect.into();
        dialect.as_dialect().validate(&query)?;
        let request = dialect.as_dialect().compile(&query, page, &hints);
        debug!(provider = %request.provider, url = %request.url(), "compiled request");

        Ok(Self {
            dialect,
            query,
            request,
            fields: hints.fields,
            params: serde_json::to_value(params)?,
            records: None,
        })
    }

    pub fn with_records(mut self, shape: RecordShape) -> Self {
        self.records = Some(shape);
        self
    }

    pub fn url(&self) -> String {
        self.request.url()
    }

    pub fn context(&self) -> RequestContext {
        RequestContext::from(&self.request)
    }

    /// Send the request and shape the response.
    pub async fn run(
        &self,
        executor: &Executor,
        cancel: Option<&CancellationToken>,
    ) -> Result<AdapterResponse> {
        let document = executor
            .execute(&self.request, self.dialect.as_dialect(), cancel)
            .await
            .map_err(|err| Error::from(err).with_context(self.context()))?;

        let response = self
            .shape(document)
            .map_err(|err| err.with_context(self.context()))?;
        info!(
            provider = %self.request.provider,
            returned = response.metadata.results_returned,
            total = ?response.metadata.total_results,
            "provider call completed"
        );
        Ok(response)
    }

    /// Extract, project and annotate a decoded provider response.
    ///
    /// A response without its item list is a decode failure; an item list that is
    /// present but null or empty is an empty result.
    pub fn shape(&self, document: Document) -> Result<AdapterResponse> {
        let request = &self.request;
        let total = request
            .envelope
            .total
            .as_ref()
            .and_then(|path| resolve(&document, path))
            .and_then(count_value);
        let local = request.projection == ProjectionSite::Local && !self.fields.is_empty();

        let (payload, returned, next_page) = match request.mode {
            RequestMode::Aggregation => {
                let buckets = self.items(&document)?;
                let returned = buckets.len();
                (Payload::Aggregations(buckets), returned, None)
            }
            RequestMode::Single => {
                let record = if local {
                    project(&document, &self.fields)
                } else {
                    document
                };
                (Payload::Data(record), 1, None)
            }
            RequestMode::Items => {
                let items = self.items(&document)?;
                let next_page = next_page(request, &document, &items, total);
                let items = match self.records {
                    Some(shape) => items.iter().map(shape).collect(),
                    None => items,
                };
                let records = if local {
                    project_items(&items, &self.fields)
                } else {
                    items
                };
                let returned = records.len();
                (Payload::Data(Value::Array(records)), returned, next_page)
            }
        };

        Ok(AdapterResponse {
            payload,
            metadata: QueryMetadata {
                provider: request.provider,
                url: request.url(),
                params: self.params.clone(),
                compiled_params: request.params.clone(),
                query: request.expression.clone(),
                count_field: self.query.count_field().map(str::to_string),
                limit: request.page.limit,
                offset: request.page.offset,
                cursor: request.page.cursor.clone(),
                total_results: total,
                results_returned: returned,
                next_page,
                fields_requested: (!self.fields.is_empty()).then(|| self.fields.clone()),
                projection: (!self.fields.is_empty()).then_some(request.projection),
            },
        })
    }

    /// Items at the envelope location; a lone value is a one-item list.
    fn items(&self, document: &Document) -> Result<Vec<Value>> {
        let found = match &self.request.envelope.items {
            Some(path) => match locate(document, path) {
                Located::Value(value) => value,
                Located::Null => return Ok(Vec::new()),
                Located::Missing => {
                    return Err(TransportError::DecodeFailure(format!(
                        "response has no '{path}'"
                    ))
                    .into())
                }
            },
            None => document,
        };
        Ok(match found {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        })
    }
}

enum Located<'a> {
    Value(&'a Value),
    /// The walk reached a null or an empty sequence, e.g. `<IdList/>`.
    Null,
    Missing,
}

/// [`resolve`] that tells a null on the way apart from a missing key.
fn locate<'a>(document: &'a Value, path: &FieldPath) -> Located<'a> {
    let mut current = document;
    for segment in path.segments() {
        while let Value::Array(items) = current {
            match items.first() {
                Some(first) => current = first,
                None => return Located::Null,
            }
        }
        current = match current {
            Value::Null => return Located::Null,
            Value::Object(map) => match map.get(segment) {
                Some(value) => value,
                None => return Located::Missing,
            },
            _ => return Located::Missing,
        };
    }
    Located::Value(current)
}

fn count_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn cursor_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn next_page(
    request: &CompiledRequest,
    document: &Document,
    items: &[Value],
    total: Option<u64>,
) -> Option<NextPage> {
    let returned = items.len() as u64;
    let full_page = request
        .page
        .limit
        .is_some_and(|limit| returned >= u64::from(limit));

    match &request.envelope.paging {
        Paging::Unpaged => None,
        Paging::Offset => {
            let next = request.page.offset.unwrap_or(0) + returned;
            let more = match total {
                Some(total) => next < total,
                None => full_page,
            };
            (returned > 0 && more).then_some(NextPage::Offset(next))
        }
        Paging::Cursor(CursorLocation::Field(path)) => resolve(document, path)
            .and_then(cursor_value)
            .map(|token| NextPage::Cursor(Cursor::Token(token))),
        Paging::Cursor(CursorLocation::LastItemFields(paths)) => {
            if !full_page || total.is_some_and(|total| total <= returned) {
                return None;
            }
            let last = items.last()?;
            let mut keys = paths
                .iter()
                .map(|path| resolve(last, path).and_then(cursor_value))
                .collect::<Option<Vec<String>>>()?;
            let cursor = match keys.len() {
                1 => Cursor::Token(keys.remove(0)),
                _ => Cursor::Keys(keys),
            };
            Some(NextPage::Cursor(cursor))
        }
    }
}
