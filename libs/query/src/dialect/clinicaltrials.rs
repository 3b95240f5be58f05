//! ClinicalTrials.gov API v2 dialect
//!
//! Top-level conjuncts are partitioned: `Equals` on a `query.*` field becomes that
//! query parameter verbatim, a raw text predicate becomes `query.term`, and every
//! other conjunct is rendered as an Essie expression joined into
//! `filter.advanced`.

use std::collections::HashSet;

use pharmaquery_document::FieldPath;

use super::common::{bound_text, close_range, escape_quotes, quote_term};
use super::{check_capabilities, Capabilities, Dialect, Disjunction, FaultClass, HttpFault};
use crate::error::{QueryError, Result};
use crate::ir::{Predicate, Query, RawPredicate};
use crate::page::{CompileOptions, PageLimits, PageState, Pagination, ShapeHints};
use crate::request::{
    CompiledRequest, CursorLocation, Envelope, Method, Paging, ProjectionSite, Provider,
    QueryEncoding, RequestMode, ResponseFormat, RetryEligibility,
};

pub const BASE_URL: &str = "https://clinicaltrials.gov/api/v2";

/// Prefix of fields sent as their own query parameter.
pub const QUERY_PARAM_PREFIX: &str = "query.";

const TERM_PARAM: &str = "query.term";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq)]
pub struct ClinicalTrials {
    base_url: String,
    limits: PageLimits,
    options: CompileOptions,
}

impl Default for ClinicalTrials {
    fn default() -> Self {
        Self::new()
    }
}

impl ClinicalTrials {
    pub fn new() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            limits: PageLimits::new(1000, 20),
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

    /// Render one node as an Essie expression.
    pub fn expression(&self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Equals { field, value } => format!("{field}:{}", quote_term(value)),
            Predicate::Contains { field, value, .. } => {
                format!("AREA[{field}]{}", quote_term(value))
            }
            Predicate::TextAny { field, terms } => {
                format!("AREA[{field}]({})", quote_terms(terms, " OR "))
            }
            Predicate::TextAll { field, terms } => {
                format!("AREA[{field}]({})", quote_terms(terms, " AND "))
            }
            Predicate::TextPhrase { field, phrase } => {
                format!("AREA[{field}]\"{}\"", escape_quotes(phrase))
            }
            Predicate::Range { field, gte, lte } => {
                let (lo, hi) = close_range(*gte, *lte, &self.options);
                format!(
                    "AREA[{field}]RANGE[{},{}]",
                    bound_text(&lo, DATE_FORMAT),
                    bound_text(&hi, DATE_FORMAT)
                )
            }
            Predicate::And { .. } | Predicate::Or { .. } => match self.bare(predicate) {
                Some(joined) => format!("({joined})"),
                None => self.same_field(predicate),
            },
            Predicate::CountBy { filter, .. } => filter
                .as_deref()
                .map(|f| self.expression(f))
                .unwrap_or_default(),
            Predicate::Raw(RawPredicate::Text(text)) => format!("({text})"),
            Predicate::Raw(RawPredicate::Structured(value)) => value.to_string(),
        }
    }

    /// A group's children joined without the outer parentheses. `None` for the
    /// same-field `Or`, which has its own compact form.
    fn bare(&self, predicate: &Predicate) -> Option<String> {
        let (children, token) = match predicate {
            Predicate::And { children } => (children, " AND "),
            Predicate::Or { children } if predicate.as_same_field_equals().is_none() => {
                (children, " OR ")
            }
            _ => return None,
        };
        let parts: Vec<String> = children.iter().map(|c| self.expression(c)).collect();
        Some(parts.join(token))
    }

    /// `field:a,b` for an `Or` of `Equals` on one field.
    fn same_field(&self, predicate: &Predicate) -> String {
        match predicate.as_same_field_equals() {
            Some((field, values)) => format!("{field}:{}", quote_terms(&values, ",")),
            None => String::new(),
        }
    }

    /// The `filter.advanced` value for the remaining top-level conjuncts.
    fn advanced_filter(&self, filters: &[&Predicate]) -> Option<String> {
        match filters {
            [] => None,
            [single] => Some(
                self.bare(single)
                    .unwrap_or_else(|| self.expression(single)),
            ),
            many => {
                let parts: Vec<String> = many.iter().map(|p| self.expression(p)).collect();
                Some(parts.join(" AND "))
            }
        }
    }
}

fn quote_terms<S: AsRef<str>>(terms: &[S], token: &str) -> String {
    terms
        .iter()
        .map(|t| quote_term(t.as_ref()))
        .collect::<Vec<_>>()
        .join(token)
}

fn is_query_param(predicate: &Predicate) -> bool {
    matches!(predicate, Predicate::Equals { field, .. } if field.starts_with(QUERY_PARAM_PREFIX))
}

impl Dialect for ClinicalTrials {
    fn provider(&self) -> Provider {
        Provider::ClinicalTrials
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            aggregation: false,
            disjunction: Disjunction::Any,
            raw_text: true,
            raw_structured: false,
            remote_projection: true,
            page: self.limits,
        }
    }

    /// `query.*` parameters and raw terms only exist as top-level conjuncts.
    fn validate(&self, query: &Query) -> Result<()> {
        check_capabilities(self.provider(), &self.capabilities(), query)?;

        let top_level: HashSet<*const Predicate> = query
            .conjuncts()
            .into_iter()
            .map(|p| p as *const Predicate)
            .collect();

        let mut failure = None;
        query.root().walk(&mut |node| {
            if failure.is_some() || top_level.contains(&(node as *const Predicate)) {
                return;
            }
            if let Some(field) = node.field().filter(|f| f.starts_with(QUERY_PARAM_PREFIX)) {
                failure = Some(format!(
                    "'{field}' is a search parameter and cannot be nested in a group"
                ));
            } else if matches!(node, Predicate::Raw(_)) {
                failure = Some("a raw search term cannot be nested in a group".to_string());
            }
        });

        for conjunct in query.conjuncts() {
            if let Some(field) = conjunct.field() {
                if field.starts_with(QUERY_PARAM_PREFIX) && !is_query_param(conjunct) {
                    return Err(QueryError::invalid(format!(
                        "'{field}' only supports exact values"
                    )));
                }
            }
        }

        match failure {
            Some(message) => Err(QueryError::InvalidQuery(message)),
            None => Ok(()),
        }
    }

    fn compile(&self, query: &Query, page: &Pagination, hints: &ShapeHints) -> CompiledRequest {
        let mut search_params = Vec::new();
        let mut terms = Vec::new();
        let mut filters = Vec::new();
        for conjunct in query.conjuncts() {
            match conjunct {
                Predicate::Equals { field, value } if is_query_param(conjunct) => {
                    search_params.push((field.clone(), value.clone()));
                }
                Predicate::Raw(RawPredicate::Text(text)) => terms.push(text.clone()),
                other => filters.push(other),
            }
        }

        let state = page.resolve(self.limits);
        let mut params = vec![("format".to_string(), "json".to_string())];
        if let Some(limit) = state.limit {
            params.push(("pageSize".to_string(), limit.to_string()));
        }
        params.push(("countTotal".to_string(), "true".to_string()));
        params.extend(search_params);
        if !terms.is_empty() {
            params.push((TERM_PARAM.to_string(), terms.join(" AND ")));
        }
        if let Some(filter) = self.advanced_filter(&filters) {
            params.push(("filter.advanced".to_string(), filter));
        }
        if !hints.fields.is_empty() {
            let fields: Vec<String> = hints.fields.iter().map(|f| f.to_string()).collect();
            params.push(("fields".to_string(), fields.join(",")));
        }
        if let Some(token) = &state.cursor {
            params.push(("pageToken".to_string(), token.to_string()));
        }
        if !hints.sort.is_empty() {
            let sort: Vec<String> = hints
                .sort
                .iter()
                .map(|key| match key.direction {
                    Some(direction) => format!("{}:{}", key.field, direction.as_str()),
                    None => key.field.clone(),
                })
                .collect();
            params.push(("sort".to_string(), sort.join(",")));
        }

        let projection = if hints.fields.is_empty() {
            ProjectionSite::Local
        } else {
            ProjectionSite::Remote
        };

        CompiledRequest {
            provider: Provider::ClinicalTrials,
            method: Method::Get,
            base_url: self.base_url.clone(),
            path: vec!["studies".to_string()],
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
                items: Some(FieldPath::key("studies")),
                total: Some(FieldPath::key("totalCount")),
                paging: Paging::Cursor(CursorLocation::Field(FieldPath::key("nextPageToken"))),
            },
            projection,
            retry: RetryEligibility::Idempotent,
            expression: None,
        }
    }

    /// Errors come back as plain text; the first line is the reason.
    fn classify(&self, fault: &HttpFault) -> FaultClass {
        if fault.status == 429 {
            return FaultClass::RateLimited;
        }
        let reason = fault
            .body
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string);
        FaultClass::Upstream { reason }
    }
}
