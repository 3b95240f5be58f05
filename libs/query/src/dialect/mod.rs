//! Provider dialects
//!
//! A [`Dialect`] turns a validated [`Query`] into one provider's concrete request and
//! classifies that provider's error responses. [`DialectKind`] is the closed registry
//! of dialects; adapters pick one at construction.

mod common;

pub mod chembl;
pub mod clinicaltrials;
pub mod entrez;
pub mod openfda;
pub mod patentsview;

pub use chembl::Chembl;
pub use clinicaltrials::ClinicalTrials;
pub use entrez::Entrez;
pub use openfda::OpenFda;
pub use patentsview::PatentsView;

use serde_json::Value;

use crate::error::{QueryError, Result};
use crate::ir::{Predicate, Query, RawPredicate};
use crate::page::{PageLimits, Pagination, ShapeHints};
use crate::request::{CompiledRequest, Provider};

/// Which disjunctions a provider can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disjunction {
    Any,
    /// Only `Or` of `Equals` on one field.
    SameFieldEquals,
}

/// What a dialect can compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub aggregation: bool,
    pub disjunction: Disjunction,
    pub raw_text: bool,
    pub raw_structured: bool,
    pub remote_projection: bool,
    pub page: PageLimits,
}

/// A non-2xx provider response, as seen by [`Dialect::classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFault {
    pub status: u16,
    /// Header names are lower-case.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpFault {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// How a provider fault maps onto the error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultClass {
    RateLimited,
    Upstream { reason: Option<String> },
}

/// Per-provider query compiler.
pub trait Dialect: Send + Sync {
    fn provider(&self) -> Provider;

    fn capabilities(&self) -> Capabilities;

    /// Reject queries this provider cannot express. After this succeeds,
    /// [`Dialect::compile`] cannot fail.
    fn validate(&self, query: &Query) -> Result<()> {
        check_capabilities(self.provider(), &self.capabilities(), query)
    }

    /// Render the request. Pure: equal inputs give equal requests.
    fn compile(&self, query: &Query, page: &Pagination, hints: &ShapeHints) -> CompiledRequest;

    fn classify(&self, fault: &HttpFault) -> FaultClass {
        default_classify(fault)
    }
}

/// 429 is a rate limit; everything else is an upstream error with no reason.
pub fn default_classify(fault: &HttpFault) -> FaultClass {
    if fault.status == 429 {
        FaultClass::RateLimited
    } else {
        FaultClass::Upstream { reason: None }
    }
}

/// Check a query against the generic capability flags.
pub fn check_capabilities(provider: Provider, caps: &Capabilities, query: &Query) -> Result<()> {
    if query.is_aggregation() && !caps.aggregation {
        return Err(QueryError::invalid(format!(
            "{provider} does not support aggregation"
        )));
    }

    let mut failure = None;
    query.root().walk(&mut |node| {
        if failure.is_some() {
            return;
        }
        failure = match node {
            Predicate::Or { .. }
                if caps.disjunction == Disjunction::SameFieldEquals
                    && node.as_same_field_equals().is_none() =>
            {
                Some(format!(
                    "{provider} only supports OR between values of a single field"
                ))
            }
            Predicate::Raw(RawPredicate::Text(_)) if !caps.raw_text => {
                Some(format!("{provider} does not accept a textual raw query"))
            }
            Predicate::Raw(RawPredicate::Structured(_)) if !caps.raw_structured => {
                Some(format!("{provider} does not accept a structured raw query"))
            }
            _ => None,
        };
    });

    match failure {
        Some(message) => Err(QueryError::InvalidQuery(message)),
        None => Ok(()),
    }
}

/// Closed registry of dialects.
#[derive(Debug, Clone, PartialEq)]
pub enum DialectKind {
    OpenFda(OpenFda),
    ClinicalTrials(ClinicalTrials),
    PatentsView(PatentsView),
    Chembl(Chembl),
    Entrez(Entrez),
}

impl DialectKind {
    pub fn as_dialect(&self) -> &dyn Dialect {
        match self {
            Self::OpenFda(d) => d,
            Self::ClinicalTrials(d) => d,
            Self::PatentsView(d) => d,
            Self::Chembl(d) => d,
            Self::Entrez(d) => d,
        }
    }

    pub fn provider(&self) -> Provider {
        self.as_dialect().provider()
    }
}

impl From<OpenFda> for DialectKind {
    fn from(d: OpenFda) -> Self {
        Self::OpenFda(d)
    }
}

impl From<ClinicalTrials> for DialectKind {
    fn from(d: ClinicalTrials) -> Self {
        Self::ClinicalTrials(d)
    }
}

impl From<PatentsView> for DialectKind {
    fn from(d: PatentsView) -> Self {
        Self::PatentsView(d)
    }
}

impl From<Chembl> for DialectKind {
    fn from(d: Chembl) -> Self {
        Self::Chembl(d)
    }
}

impl From<Entrez> for DialectKind {
    fn from(d: Entrez) -> Self {
        Self::Entrez(d)
    }
}
