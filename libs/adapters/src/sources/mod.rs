//! Adapter facades, one per data source
//!
//! Each adapter exposes a typed parameter struct, a pure `plan` (parameters →
//! compiled request) and an async `search` that runs the plan. [`Source`] is the
//! name-keyed registry used by callers that receive parameters as JSON.

pub mod chembl;
pub mod clinicaltrials;
pub mod entrez;
pub mod openfda;
pub mod patentsview;

use pharmaquery_document::xml::TEXT_KEY;
use pharmaquery_document::{resolve, FieldPath};
use pharmaquery_query::{RawPredicate, SortKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::ProvidersConfig;
use crate::error::{Error, Result};
use crate::pipeline::Plan;
use crate::response::AdapterResponse;

pub use chembl::{Chembl, ChemblParams};
pub use clinicaltrials::{ClinicalTrials, ClinicalTrialsParams};
pub use entrez::{Entrez, EntrezParams};
pub use openfda::{
    AdverseEventsParams, DrugsFdaParams, EnforcementParams, FdaAdverseEvents, FdaDrugsFda,
    FdaEnforcement, FdaLabel, FdaNdc, LabelParams, NdcParams,
};
pub use patentsview::{PatentsView, PatentsViewParams};

/// Inclusive date window; either side may be open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl DateRange {
    pub fn new(from: Option<&str>, to: Option<&str>) -> Self {
        Self {
            from: from.map(str::to_string),
            to: to.map(str::to_string),
        }
    }

    pub(crate) fn bounds(range: &Option<Self>) -> (Option<&str>, Option<&str>) {
        match range {
            Some(range) => (range.from.as_deref(), range.to.as_deref()),
            None => (None, None),
        }
    }
}

/// A free-text provider query, when one was given.
pub(crate) fn raw_text(query: &Option<String>) -> Option<RawPredicate> {
    query.clone().map(RawPredicate::Text)
}

/// The scalar at `path`: the first element of a sequence, an XML element's text,
/// `null` when absent.
pub(crate) fn scalar_at(record: &Value, path: &[&str]) -> Value {
    let Some((first, rest)) = path.split_first() else {
        return Value::Null;
    };
    let path = rest
        .iter()
        .fold(FieldPath::key(*first), |path, key| path.join(*key));
    let mut found = resolve(record, &path);
    while let Some(Value::Array(items)) = found {
        found = items.first();
    }
    match found {
        Some(Value::Object(map)) => map.get(TEXT_KEY).cloned().unwrap_or(Value::Null),
        Some(value) => value.clone(),
        None => Value::Null,
    }
}

/// Parse `field`, `-field`, `field:asc` or `field:desc` sort specs.
pub(crate) fn sort_keys(specs: &[String]) -> Result<Vec<SortKey>> {
    specs
        .iter()
        .filter(|s| !s.trim().is_empty())
        .map(|raw| {
            SortKey::parse(raw).ok_or_else(|| Error::params(format!("invalid sort '{raw}'")))
        })
        .collect()
}

/// Name-keyed registry of every adapter.
#[derive(Debug, Clone)]
pub enum Source {
    FdaAdverseEvents(FdaAdverseEvents),
    FdaDrugsFda(FdaDrugsFda),
    FdaEnforcement(FdaEnforcement),
    FdaNdc(FdaNdc),
    FdaLabel(FdaLabel),
    ClinicalTrials(ClinicalTrials),
    PatentsView(PatentsView),
    Chembl(Chembl),
    Entrez(Entrez),
}

impl Source {
    pub const NAMES: [&'static str; 9] = [
        "fda-adverse-events",
        "fda-drugsfda",
        "fda-enforcement",
        "fda-ndc",
        "fda-label",
        "clinicaltrials",
        "patentsview",
        "chembl",
        "entrez",
    ];

    pub fn from_name(name: &str, config: &ProvidersConfig) -> Result<Self> {
        let source = match name {
            "fda-adverse-events" => Self::FdaAdverseEvents(FdaAdverseEvents::new(config)?),
            "fda-drugsfda" => Self::FdaDrugsFda(FdaDrugsFda::new(config)?),
            "fda-enforcement" => Self::FdaEnforcement(FdaEnforcement::new(config)?),
            "fda-ndc" => Self::FdaNdc(FdaNdc::new(config)?),
            "fda-label" => Self::FdaLabel(FdaLabel::new(config)?),
            "clinicaltrials" => Self::ClinicalTrials(ClinicalTrials::new(config)?),
            "patentsview" => Self::PatentsView(PatentsView::new(config)?),
            "chembl" => Self::Chembl(Chembl::new(config)?),
            "entrez" => Self::Entrez(Entrez::new(config)?),
            other => {
                return Err(Error::params(format!(
                    "unknown source '{other}', expected one of: {}",
                    Self::NAMES.join(", ")
                )))
            }
        };
        Ok(source)
    }

    /// Plan a call from JSON parameters.
    pub fn plan(&self, params: Value) -> Result<Plan> {
        match self {
            Self::FdaAdverseEvents(a) => a.plan(&serde_json::from_value(params)?),
            Self::FdaDrugsFda(a) => a.plan(&serde_json::from_value(params)?),
            Self::FdaEnforcement(a) => a.plan(&serde_json::from_value(params)?),
            Self::FdaNdc(a) => a.plan(&serde_json::from_value(params)?),
            Self::FdaLabel(a) => a.plan(&serde_json::from_value(params)?),
            Self::ClinicalTrials(a) => a.plan(&serde_json::from_value(params)?),
            Self::PatentsView(a) => a.plan(&serde_json::from_value(params)?),
            Self::Chembl(a) => a.plan(&serde_json::from_value(params)?),
            Self::Entrez(a) => a.plan(&serde_json::from_value(params)?),
        }
    }

    /// Run a call from JSON parameters.
    pub async fn search(
        &self,
        params: Value,
        cancel: Option<&CancellationToken>,
    ) -> Result<AdapterResponse> {
        match self {
            Self::FdaAdverseEvents(a) => a.search(&serde_json::from_value(params)?, cancel).await,
            Self::FdaDrugsFda(a) => a.search(&serde_json::from_value(params)?, cancel).await,
            Self::FdaEnforcement(a) => a.search(&serde_json::from_value(params)?, cancel).await,
            Self::FdaNdc(a) => a.search(&serde_json::from_value(params)?, cancel).await,
            Self::FdaLabel(a) => a.search(&serde_json::from_value(params)?, cancel).await,
            Self::ClinicalTrials(a) => a.search(&serde_json::from_value(params)?, cancel).await,
            Self::PatentsView(a) => a.search(&serde_json::from_value(params)?, cancel).await,
            Self::Chembl(a) => a.search(&serde_json::from_value(params)?, cancel).await,
            Self::Entrez(a) => a.search(&serde_json::from_value(params)?, cancel).await,
        }
    }
}
