//! ChEMBL web services dialect
//!
//! Filters are Django-style `field__lookup=value` parameters, so conjunction is
//! repetition of distinct parameters and the only disjunction is `field__in`.
//!
//! Two pseudo-fields select the URL instead of a filter:
//! - `chembl_id`: when it is the whole query, the record is fetched directly as
//!   `<resource>/<id>.json`
//! - `smiles`: required by the `similarity` and `substructure` resources, rendered
//!   as `similarity/<smiles>/<cutoff>.json` or `substructure/<smiles>.json`
//!
//! A raw text query switches a collection request to `<resource>/search.json?q=`.

use std::collections::HashSet;

use pharmaquery_document::FieldPath;
use serde_json::Value;

use super::common::{bound_text, close_range};
use super::{check_capabilities, Capabilities, Dialect, Disjunction, FaultClass, HttpFault};
use crate::error::{QueryError, Result};
use crate::ir::{Predicate, Query, RawPredicate};
use crate::page::{CompileOptions, PageLimits, PageState, Pagination, ShapeHints, SortDirection};
use crate::request::{
    CompiledRequest, Envelope, Method, Paging, ProjectionSite, Provider, QueryEncoding,
    RequestMode, ResponseFormat, RetryEligibility,
};

pub const BASE_URL: &str = "https://www.ebi.ac.uk/chembl/api/data";

/// Pseudo-field for a single-record lookup.
pub const LOOKUP_FIELD: &str = "chembl_id";

/// Pseudo-field carrying the SMILES string of a structure search.
pub const STRUCTURE_FIELD: &str = "smiles";

pub const DEFAULT_SIMILARITY_CUTOFF: u8 = 80;

const SIMILARITY: &str = "similarity";
const SUBSTRUCTURE: &str = "substructure";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq)]
pub struct Chembl {
    resource: String,
    similarity_cutoff: u8,
    base_url: String,
    limits: PageLimits,
    options: CompileOptions,
}

/// Which URL shape a query compiles to.
enum Target<'q> {
    Lookup(&'q str),
    Structure(&'q str),
    Search(String),
    Collection,
}

impl Chembl {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            similarity_cutoff: DEFAULT_SIMILARITY_CUTOFF,
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

    /// Tanimoto cutoff for similarity searches, capped at 100.
    pub fn with_similarity_cutoff(mut self, cutoff: u8) -> Self {
        self.similarity_cutoff = cutoff.min(100);
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    fn is_structure_search(&self) -> bool {
        self.resource == SIMILARITY || self.resource == SUBSTRUCTURE
    }

    /// Key of the item list in a collection response.
    fn collection_key(&self) -> String {
        if self.is_structure_search() {
            return "molecules".to_string();
        }
        match self.resource.strip_suffix('y') {
            Some(stem) => format!("{stem}ies"),
            None => format!("{}s", self.resource),
        }
    }

    fn target<'q>(&self, conjuncts: &[&'q Predicate]) -> Target<'q> {
        if let [Predicate::Equals { field, value }] = conjuncts {
            if field == LOOKUP_FIELD {
                return Target::Lookup(value);
            }
        }
        if self.is_structure_search() {
            if let Some(smiles) = conjuncts.iter().find_map(|p| structure_value(p)) {
                return Target::Structure(smiles);
            }
        }
        let terms: Vec<&str> = conjuncts
            .iter()
            .filter_map(|p| match p {
                Predicate::Raw(RawPredicate::Text(text)) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if terms.is_empty() {
            Target::Collection
        } else {
            Target::Search(terms.join(" "))
        }
    }

    fn path(&self, target: &Target<'_>) -> Vec<String> {
        match target {
            Target::Lookup(id) => vec![self.resource.clone(), format!("{id}.json")],
            Target::Structure(smiles) if self.resource == SIMILARITY => vec![
                SIMILARITY.to_string(),
                smiles.to_string(),
                format!("{}.json", self.similarity_cutoff),
            ],
            Target::Structure(smiles) => {
                vec![SUBSTRUCTURE.to_string(), format!("{smiles}.json")]
            }
            Target::Search(_) => vec![self.resource.clone(), "search.json".to_string()],
            Target::Collection => vec![format!("{}.json", self.resource)],
        }
    }

    /// Append the filter parameters for one predicate.
    fn filters(&self, predicate: &Predicate, out: &mut Vec<(String, String)>) {
        match predicate {
            Predicate::Equals { field, .. }
                if field == LOOKUP_FIELD || field == STRUCTURE_FIELD => {}
            Predicate::Equals { field, value } => out.push((field.clone(), value.clone())),
            Predicate::Contains {
                field,
                value,
                case_sensitive,
            } => {
                let lookup = if *case_sensitive { "contains" } else { "icontains" };
                out.push((format!("{field}__{lookup}"), value.clone()));
            }
            Predicate::TextAny { field, terms } => {
                let alternatives: Vec<String> = terms.iter().map(|t| regex::escape(t)).collect();
                out.push((
                    format!("{field}__iregex"),
                    format!("({})", alternatives.join("|")),
                ));
            }
            Predicate::TextAll { field, terms } => {
                let lookaheads: String = terms
                    .iter()
                    .map(|t| format!("(?=.*{})", regex::escape(t)))
                    .collect();
                out.push((format!("{field}__iregex"), format!("^{lookaheads}")));
            }
            Predicate::TextPhrase { field, phrase } => {
                out.push((format!("{field}__icontains"), phrase.clone()));
            }
            Predicate::Range { field, gte, lte } => {
                let (lo, hi) = close_range(*gte, *lte, &self.options);
                out.push((
                    format!("{field}__range"),
                    format!(
                        "{},{}",
                        bound_text(&lo, DATE_FORMAT),
                        bound_text(&hi, DATE_FORMAT)
                    ),
                ));
            }
            Predicate::And { children } => {
                for child in children {
                    self.filters(child, out);
                }
            }
            Predicate::Or { .. } => {
                if let Some((field, values)) = predicate.as_same_field_equals() {
                    out.push((format!("{field}__in"), values.join(",")));
                }
            }
            Predicate::CountBy { filter, .. } => {
                if let Some(filter) = filter {
                    self.filters(filter, out);
                }
            }
            Predicate::Raw(RawPredicate::Structured(Value::Object(map))) => {
                for (key, value) in map {
                    out.push((key.clone(), scalar_text(value)));
                }
            }
            Predicate::Raw(_) => {}
        }
    }
}

fn structure_value(predicate: &Predicate) -> Option<&str> {
    match predicate {
        Predicate::Equals { field, value } if field == STRUCTURE_FIELD => Some(value),
        _ => None,
    }
}

/// Filter values: strings verbatim, numbers and booleans as text, arrays
/// comma-joined.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(scalar_text).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Null)
        && value
            .as_array()
            .map_or(true, |items| items.iter().all(|i| !i.is_array() && is_scalar(i)))
}

impl Dialect for Chembl {
    fn provider(&self) -> Provider {
        Provider::Chembl
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            aggregation: false,
            disjunction: Disjunction::SameFieldEquals,
            raw_text: true,
            raw_structured: true,
            remote_projection: true,
            page: self.limits,
        }
    }

    fn validate(&self, query: &Query) -> Result<()> {
        check_capabilities(self.provider(), &self.capabilities(), query)?;
        let conjuncts = query.conjuncts();

        let mut problem = None;
        query.root().walk(&mut |node| {
            if problem.is_some() {
                return;
            }
            problem = match node {
                Predicate::Raw(RawPredicate::Structured(Value::Object(map))) => map
                    .iter()
                    .find(|(_, v)| !is_scalar(v))
                    .map(|(k, _)| format!("filter '{k}' must be a scalar or a list of scalars")),
                Predicate::Raw(RawPredicate::Structured(_)) => {
                    Some("structured filters must be an object".to_string())
                }
                Predicate::Raw(RawPredicate::Text(_)) if !conjuncts.contains(&node) => {
                    Some("a search term cannot be nested in a group".to_string())
                }
                _ => None,
            };
            if problem.is_none() {
                problem = match node.field() {
                    Some(LOOKUP_FIELD) if conjuncts != [node] => Some(format!(
                        "'{LOOKUP_FIELD}' must be the only criterion of a lookup"
                    )),
                    Some(STRUCTURE_FIELD)
                        if !self.is_structure_search() || structure_value(node).is_none() =>
                    {
                        Some(format!(
                            "'{STRUCTURE_FIELD}' only applies to an exact {SIMILARITY} or {SUBSTRUCTURE} search"
                        ))
                    }
                    Some(STRUCTURE_FIELD) if !conjuncts.contains(&node) => Some(format!(
                        "'{STRUCTURE_FIELD}' cannot be nested in a group"
                    )),
                    _ => None,
                };
            }
        });
        if let Some(message) = problem {
            return Err(QueryError::InvalidQuery(message));
        }

        if self.is_structure_search() && !conjuncts.iter().any(|p| structure_value(p).is_some()) {
            return Err(QueryError::invalid(format!(
                "a {} search needs a '{STRUCTURE_FIELD}' value",
                self.resource
            )));
        }
        if self.is_structure_search() && matches!(self.target(&conjuncts), Target::Search(_)) {
            return Err(QueryError::invalid(
                "structure searches do not accept a search term",
            ));
        }

        // ChEMBL keeps only the last value of a repeated filter.
        if !matches!(self.target(&conjuncts), Target::Lookup(_)) {
            let mut params = Vec::new();
            for conjunct in &conjuncts {
                self.filters(conjunct, &mut params);
            }
            let mut seen = HashSet::new();
            if let Some((key, _)) = params.iter().find(|(key, _)| !seen.insert(key.as_str())) {
                return Err(QueryError::invalid(format!(
                    "filter '{key}' is set more than once"
                )));
            }
        }
        Ok(())
    }

    fn compile(&self, query: &Query, page: &Pagination, hints: &ShapeHints) -> CompiledRequest {
        let conjuncts = query.conjuncts();
        let target = self.target(&conjuncts);
        let path = self.path(&target);

        let mut params = Vec::new();
        if !matches!(target, Target::Lookup(_)) {
            for conjunct in &conjuncts {
                self.filters(conjunct, &mut params);
            }
        }
        if let Target::Search(terms) = &target {
            params.push(("q".to_string(), terms.clone()));
        }

        let single = matches!(target, Target::Lookup(_));
        let state = if single {
            PageState::none()
        } else {
            let state = page.resolve(self.limits);
            if let Some(limit) = state.limit {
                params.push(("limit".to_string(), limit.to_string()));
            }
            if let Some(offset) = state.offset {
                params.push(("offset".to_string(), offset.to_string()));
            }
            if !hints.sort.is_empty() {
                let order: Vec<String> = hints
                    .sort
                    .iter()
                    .map(|key| match key.direction {
                        Some(SortDirection::Desc) => format!("-{}", key.field),
                        _ => key.field.clone(),
                    })
                    .collect();
                params.push(("order_by".to_string(), order.join(",")));
            }
            PageState {
                cursor: None,
                ..state
            }
        };
        if !hints.fields.is_empty() {
            let only: Vec<String> = hints.fields.iter().map(|f| f.to_string()).collect();
            params.push(("only".to_string(), only.join(",")));
        }

        let (mode, envelope) = if single {
            let envelope = Envelope {
                items: None,
                total: None,
                paging: Paging::Unpaged,
            };
            (RequestMode::Single, envelope)
        } else {
            let envelope = Envelope {
                items: Some(FieldPath::key(self.collection_key())),
                total: Some(FieldPath::key("page_meta").join("total_count")),
                paging: Paging::Offset,
            };
            (RequestMode::Items, envelope)
        };

        // Structure searches are expensive upstream; a failure is not retried.
        let retry = if matches!(target, Target::Structure(_)) {
            RetryEligibility::Never
        } else {
            RetryEligibility::Idempotent
        };

        let projection = if hints.fields.is_empty() {
            ProjectionSite::Local
        } else {
            ProjectionSite::Remote
        };

        CompiledRequest {
            provider: Provider::Chembl,
            method: Method::Get,
            base_url: self.base_url.clone(),
            path,
            params,
            encoding: QueryEncoding::Standard,
            page: state,
            mode,
            format: ResponseFormat::Json,
            envelope,
            projection,
            retry,
            expression: None,
        }
    }

    fn classify(&self, fault: &HttpFault) -> FaultClass {
        if fault.status == 429 {
            return FaultClass::RateLimited;
        }
        let reason = fault.json_body().and_then(|body| {
            body.get("error_message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        });
        FaultClass::Upstream { reason }
    }
}
