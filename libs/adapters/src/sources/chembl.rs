use pharmaquery_document::FieldPath;
use pharmaquery_query::dialect::chembl::{
    Chembl as ChemblDialect, DEFAULT_SIMILARITY_CUTOFF, LOOKUP_FIELD, STRUCTURE_FIELD,
};
use pharmaquery_query::ir::format_number;
use pharmaquery_query::{CompileOptions, Pagination, QueryBuilder, RawPredicate, ShapeHints};
use pharmaquery_transport::{Executor, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::{raw_text, sort_keys};
use crate::config::ProvidersConfig;
use crate::error::{Error, Result};
use crate::pipeline::Plan;
use crate::response::AdapterResponse;

pub const DEFAULT_RESOURCE: &str = "molecule";

/// JSON resources of the ChEMBL data API.
pub const RESOURCES: [&str; 31] = [
    "activity",
    "assay",
    "atc_class",
    "binding_site",
    "biotherapeutic",
    "cell_line",
    "chembl_id_lookup",
    "compound_record",
    "compound_structural_alert",
    "document",
    "document_similarity",
    "document_term",
    "drug",
    "drug_indication",
    "drug_warning",
    "go_slim",
    "mechanism",
    "metabolism",
    "molecule",
    "molecule_form",
    "organism",
    "protein_classification",
    "similarity",
    "source",
    "status",
    "substructure",
    "target",
    "target_component",
    "target_relation",
    "tissue",
    "xref_source",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChemblParams {
    pub resource: String,
    /// Fetch one record by ChEMBL identifier.
    pub chembl_id: Option<String>,
    /// Django-style filters, e.g. `{"pref_name__icontains": "cyclin"}`.
    pub filters: Option<Map<String, Value>>,
    pub search_query: Option<String>,
    pub pref_name_contains: Option<String>,
    pub max_phase: Option<f64>,
    /// Query structure for `similarity` and `substructure` searches.
    pub smiles: Option<String>,
    pub similarity_cutoff: u8,
    /// Fields to return.
    pub only: Vec<FieldPath>,
    pub order_by: Vec<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Default for ChemblParams {
    fn default() -> Self {
        Self {
            resource: DEFAULT_RESOURCE.to_string(),
            chembl_id: None,
            filters: None,
            search_query: None,
            pref_name_contains: None,
            max_phase: None,
            smiles: None,
            similarity_cutoff: DEFAULT_SIMILARITY_CUTOFF,
            only: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

/// ChEMBL data web services.
#[derive(Debug, Clone)]
pub struct Chembl {
    base_url: Option<String>,
    options: CompileOptions,
    executor: Executor,
}

impl Chembl {
    pub fn new(config: &ProvidersConfig) -> Result<Self> {
        let provider = &config.chembl;
        Ok(Self {
            base_url: provider.base_url.clone(),
            options: config.compile_options(),
            executor: config.executor(provider, None, RetryPolicy::none())?,
        })
    }

    fn dialect(&self, params: &ChemblParams) -> Result<ChemblDialect> {
        let resource = params.resource.trim();
        if !RESOURCES.contains(&resource) {
            return Err(Error::params(format!(
                "invalid ChEMBL resource '{resource}', expected one of: {}",
                RESOURCES.join(", ")
            )));
        }
        let dialect = ChemblDialect::new(resource)
            .with_options(self.options)
            .with_similarity_cutoff(params.similarity_cutoff);
        Ok(match &self.base_url {
            Some(base_url) => dialect.with_base_url(base_url.clone()),
            None => dialect,
        })
    }

    pub fn plan(&self, params: &ChemblParams) -> Result<Plan> {
        let dialect = self.dialect(params)?;
        let max_phase = params.max_phase.map(format_number);
        let query = QueryBuilder::new()
            .raw(raw_text(&params.search_query))
            .raw(params.filters.clone().map(|f| RawPredicate::Structured(Value::Object(f))))
            .equals(LOOKUP_FIELD, params.chembl_id.as_deref())
            .equals(STRUCTURE_FIELD, params.smiles.as_deref())
            .contains("pref_name", params.pref_name_contains.as_deref(), false)
            .equals("max_phase", max_phase.as_deref())
            .build()?;

        let hints = ShapeHints::default()
            .with_fields(params.only.clone())
            .with_sort(sort_keys(&params.order_by)?);
        Plan::new(
            dialect,
            query,
            &Pagination::new(params.limit, params.offset),
            hints,
            params,
        )
    }

    pub async fn search(
        &self,
        params: &ChemblParams,
        cancel: Option<&CancellationToken>,
    ) -> Result<AdapterResponse> {
        self.plan(params)?.run(&self.executor, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pharmaquery_query::{QueryError, RequestMode, RetryEligibility};
    use serde_json::json;

    fn adapter() -> Chembl {
        Chembl::new(&ProvidersConfig::default()).unwrap()
    }

    #[test]
    fn test_lookup_by_id() {
        let plan = adapter()
            .plan(&ChemblParams {
                resource: "drug".into(),
                chembl_id: Some("CHEMBL25".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(plan.request.mode, RequestMode::Single);
        assert_eq!(
            plan.url(),
            "https://www.ebi.ac.uk/chembl/api/data/drug/CHEMBL25.json"
        );
    }

    #[test]
    fn test_similarity_search() {
        let plan = adapter()
            .plan(&ChemblParams {
                resource: "similarity".into(),
                smiles: Some("CCO".into()),
                similarity_cutoff: 70,
                ..Default::default()
            })
            .unwrap();
        assert!(plan
            .url()
            .starts_with("https://www.ebi.ac.uk/chembl/api/data/similarity/CCO/70.json"));
        assert_eq!(plan.request.retry, RetryEligibility::Never);
    }

    #[test]
    fn test_filters_and_convenience_params() {
        let plan = adapter()
            .plan(&ChemblParams {
                filters: json!({"molecule_properties__mw_freebase__lte": 300})
                    .as_object()
                    .cloned(),
                pref_name_contains: Some("statin".into()),
                max_phase: Some(4.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            plan.request.param("molecule_properties__mw_freebase__lte"),
            Some("300")
        );
        assert_eq!(plan.request.param("pref_name__icontains"), Some("statin"));
        assert_eq!(plan.request.param("max_phase"), Some("4"));
        assert_eq!(plan.request.param("limit"), Some("20"));
    }

    #[test]
    fn test_filter_conflicting_with_convenience_param() {
        let err = adapter()
            .plan(&ChemblParams {
                filters: json!({"max_phase": 2}).as_object().cloned(),
                max_phase: Some(4.0),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(
            err.kind,
            ErrorKind::Query(QueryError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_keyword_search() {
        let plan = adapter()
            .plan(&ChemblParams {
                search_query: Some("aspirin".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(plan
            .url()
            .starts_with("https://www.ebi.ac.uk/chembl/api/data/molecule/search.json?"));
        assert_eq!(plan.request.param("q"), Some("aspirin"));
    }

    #[test]
    fn test_unknown_resource() {
        let err = adapter()
            .plan(&ChemblParams {
                resource: "image".into(),
                chembl_id: Some("CHEMBL25".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Params(_)));
    }

    #[test]
    fn test_smiles_needs_structure_resource() {
        let err = adapter()
            .plan(&ChemblParams {
                smiles: Some("CCO".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(
            err.kind,
            ErrorKind::Query(QueryError::InvalidQuery(_))
        ));
    }
}
