//! NCBI Entrez E-utilities dialect
//!
//! For ESearch every predicate becomes part of a single `term=` expression using
//! `[field]` tags. ESummary, EFetch and ELink take record ids instead: the query
//! is a set of `UID` matches sent as one comma-separated `id=`. EInfo describes the
//! database named by a `DbName` match. Responses are XML.

use std::fmt;

use pharmaquery_document::FieldPath;
use serde::{Deserialize, Serialize};

use super::common::{bound_text, close_range, escape_quotes, join_group, quote_term, Op};
use super::{check_capabilities, Capabilities, Dialect, Disjunction, FaultClass, HttpFault};
use crate::error::{QueryError, Result};
use crate::ir::{Predicate, Query, RawPredicate};
use crate::page::{CompileOptions, PageLimits, PageState, Pagination, ShapeHints};
use crate::request::{
    CompiledRequest, Envelope, Method, Paging, ProjectionSite, Provider, QueryEncoding,
    RequestMode, ResponseFormat, RetryEligibility,
};

pub const BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
pub const DEFAULT_TOOL: &str = "pharma-researcher";

/// Publication date tag.
pub const PUBLICATION_DATE: &str = "pdat";

/// Record id tag.
pub const UID: &str = "UID";

/// Database name, the only criterion of an EInfo call.
pub const DATABASE_NAME: &str = "DbName";

/// Database whose EFetch records come back as `PubmedArticle` abstracts.
pub const PUBMED: &str = "pubmed";

const DATE_FORMAT: &str = "%Y/%m/%d";
const THROTTLE_MESSAGE: &str = "API rate limit exceeded";

/// The E-utilities program a request goes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Utility {
    #[default]
    ESearch,
    ESummary,
    EFetch,
    ELink,
    EInfo,
}

impl Utility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ESearch => "esearch",
            Self::ESummary => "esummary",
            Self::EFetch => "efetch",
            Self::ELink => "elink",
            Self::EInfo => "einfo",
        }
    }

    /// Whether the call is keyed by record ids rather than a search term.
    pub fn takes_ids(self) -> bool {
        matches!(self, Self::ESummary | Self::EFetch | Self::ELink)
    }
}

impl fmt::Display for Utility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entrez {
    database: String,
    utility: Utility,
    tool: String,
    email: Option<String>,
    base_url: String,
    limits: PageLimits,
    options: CompileOptions,
}

impl Entrez {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            utility: Utility::default(),
            tool: DEFAULT_TOOL.to_string(),
            email: None,
            base_url: BASE_URL.to_string(),
            limits: PageLimits::new(10_000, 20),
            options: CompileOptions::default(),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_utility(mut self, utility: Utility) -> Self {
        self.utility = utility;
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email.filter(|e| !e.is_empty());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn utility(&self) -> Utility {
        self.utility
    }

    fn search_request(
        &self,
        query: &Query,
        page: &Pagination,
        hints: &ShapeHints,
    ) -> CompiledRequest {
        let term = query.filter().map(|f| self.term(f));
        let state = page.resolve(self.limits);

        let mut params = vec![
            ("db".to_string(), self.database.clone()),
            ("retmode".to_string(), "xml".to_string()),
        ];
        if let Some(term) = &term {
            params.push(("term".to_string(), term.clone()));
        }
        if let Some(limit) = state.limit {
            params.push(("retmax".to_string(), limit.to_string()));
        }
        if let Some(offset) = state.offset {
            params.push(("retstart".to_string(), offset.to_string()));
        }
        if let Some(sort) = hints.sort.first() {
            params.push(("sort".to_string(), sort.field.clone()));
        }
        params.push(("tool".to_string(), self.tool.clone()));
        if let Some(email) = &self.email {
            params.push(("email".to_string(), email.clone()));
        }

        let result = FieldPath::key("eSearchResult");
        CompiledRequest {
            provider: Provider::Entrez,
            method: Method::Get,
            base_url: self.base_url.clone(),
            path: vec!["esearch.fcgi".to_string()],
            params,
            encoding: QueryEncoding::Standard,
            page: state,
            mode: RequestMode::Items,
            format: ResponseFormat::Xml,
            envelope: Envelope {
                items: Some(result.clone().join("IdList").join("Id")),
                total: Some(result.join("Count")),
                paging: Paging::Offset,
            },
            projection: ProjectionSite::Local,
            retry: RetryEligibility::Idempotent,
            expression: term,
        }
    }

    /// ESummary, EFetch, ELink or EInfo: unpaged, keyed by ids or a database.
    fn record_request(&self, query: &Query) -> CompiledRequest {
        let utility = self.utility;
        let database = match utility {
            Utility::EInfo => database_name(query).unwrap_or(self.database.as_str()),
            _ => self.database.as_str(),
        };

        let mut params = vec![
            ("db".to_string(), database.to_string()),
            ("retmode".to_string(), "xml".to_string()),
        ];
        if utility.takes_ids() {
            params.push(("id".to_string(), record_ids(query).join(",")));
        }
        if utility == Utility::EFetch {
            let rettype = if database == PUBMED { "abstract" } else { "full" };
            params.push(("rettype".to_string(), rettype.to_string()));
        }
        params.push(("tool".to_string(), self.tool.clone()));
        if let Some(email) = &self.email {
            params.push(("email".to_string(), email.clone()));
        }

        let items = match utility {
            Utility::ESummary => Some(FieldPath::key("eSummaryResult").join("DocSum")),
            Utility::EFetch if database == PUBMED => {
                Some(FieldPath::key("PubmedArticleSet").join("PubmedArticle"))
            }
            Utility::ELink => Some(FieldPath::key("eLinkResult").join("LinkSet")),
            _ => None,
        };
        let mode = match items {
            Some(_) => RequestMode::Items,
            None => RequestMode::Single,
        };

        CompiledRequest {
            provider: Provider::Entrez,
            method: Method::Get,
            base_url: self.base_url.clone(),
            path: vec![format!("{utility}.fcgi")],
            params,
            encoding: QueryEncoding::Standard,
            page: PageState::none(),
            mode,
            format: ResponseFormat::Xml,
            envelope: Envelope {
                items,
                total: None,
                paging: Paging::Unpaged,
            },
            projection: ProjectionSite::Local,
            retry: RetryEligibility::Idempotent,
            expression: None,
        }
    }

    /// Render a predicate as an Entrez search term.
    pub fn term(&self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Equals { field, value } => format!("\"{}\"[{field}]", escape_quotes(value)),
            Predicate::Contains { field, value, .. } => {
                if value.split_whitespace().nth(1).is_some() {
                    format!("\"{}*\"[{field}]", escape_quotes(value))
                } else {
                    format!("{}*[{field}]", quote_term(value))
                }
            }
            Predicate::TextAny { field, terms } => tagged(field, terms, " OR "),
            Predicate::TextAll { field, terms } => tagged(field, terms, " AND "),
            Predicate::TextPhrase { field, phrase } => {
                format!("\"{}\"[{field}]", escape_quotes(phrase))
            }
            Predicate::Range { field, gte, lte } => {
                let (lo, hi) = close_range(*gte, *lte, &self.options);
                format!(
                    "{}:{}[{field}]",
                    bound_text(&lo, DATE_FORMAT),
                    bound_text(&hi, DATE_FORMAT)
                )
            }
            Predicate::And { children } => join_group(Op::And, children, " AND ", |c| self.term(c)),
            Predicate::Or { children } => join_group(Op::Or, children, " OR ", |c| self.term(c)),
            Predicate::CountBy { filter, .. } => {
                filter.as_deref().map(|f| self.term(f)).unwrap_or_default()
            }
            Predicate::Raw(RawPredicate::Text(text)) => text.clone(),
            Predicate::Raw(RawPredicate::Structured(value)) => value.to_string(),
        }
    }
}

/// Record ids matched by top-level `UID` conjuncts, in query order.
pub fn record_ids(query: &Query) -> Vec<&str> {
    query
        .conjuncts()
        .into_iter()
        .filter_map(|c| matched_values(c, UID))
        .flatten()
        .collect()
}

fn database_name(query: &Query) -> Option<&str> {
    query
        .conjuncts()
        .into_iter()
        .find_map(|c| matched_values(c, DATABASE_NAME))
        .and_then(|values| values.first().copied())
}

/// Values of a predicate that only matches `field`, through any `Or` nesting.
fn matched_values<'q>(predicate: &'q Predicate, field: &str) -> Option<Vec<&'q str>> {
    match predicate {
        Predicate::Equals { field: f, value } if f == field => Some(vec![value.as_str()]),
        Predicate::TextAny { field: f, terms } | Predicate::TextAll { field: f, terms }
            if f == field =>
        {
            Some(terms.iter().map(String::as_str).collect())
        }
        Predicate::Or { children } => children
            .iter()
            .map(|c| matched_values(c, field))
            .collect::<Option<Vec<_>>>()
            .map(|groups| groups.concat()),
        _ => None,
    }
}

fn tagged(field: &str, terms: &[String], op: &str) -> String {
    let parts: Vec<String> = terms
        .iter()
        .map(|t| format!("{}[{field}]", quote_term(t)))
        .collect();
    match parts.as_slice() {
        [single] => single.clone(),
        _ => format!("({})", parts.join(op)),
    }
}

impl Dialect for Entrez {
    fn provider(&self) -> Provider {
        Provider::Entrez
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            aggregation: false,
            disjunction: Disjunction::Any,
            raw_text: true,
            raw_structured: false,
            remote_projection: false,
            page: self.limits,
        }
    }

    fn validate(&self, query: &Query) -> Result<()> {
        check_capabilities(self.provider(), &self.capabilities(), query)?;
        let utility = self.utility;
        let conjuncts = query.conjuncts();
        let allowed = match utility {
            Utility::ESearch => return Ok(()),
            Utility::EInfo => DATABASE_NAME,
            _ => UID,
        };
        if let Some(other) = conjuncts
            .iter()
            .find(|c| matched_values(c, allowed).is_none())
        {
            return Err(QueryError::invalid(format!(
                "{utility} only takes '{allowed}' matches, got {}",
                other.field().unwrap_or("a search term")
            )));
        }
        if utility.takes_ids() && record_ids(query).is_empty() {
            return Err(QueryError::invalid(format!("{utility} needs record ids")));
        }
        Ok(())
    }

    fn compile(&self, query: &Query, page: &Pagination, hints: &ShapeHints) -> CompiledRequest {
        match self.utility {
            Utility::ESearch => self.search_request(query, page, hints),
            _ => self.record_request(query),
        }
    }

    /// E-utilities answers throttled calls with 429 and a JSON `error` message,
    /// sometimes with a different status.
    fn classify(&self, fault: &HttpFault) -> FaultClass {
        if fault.status == 429 || fault.body.contains(THROTTLE_MESSAGE) {
            return FaultClass::RateLimited;
        }
        let reason = fault.json_body().and_then(|body| {
            body.get("error")
                .and_then(|e| e.as_str())
                .map(str::to_string)
        });
        FaultClass::Upstream { reason }
    }
}
