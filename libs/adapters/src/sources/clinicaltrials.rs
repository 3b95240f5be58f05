use pharmaquery_document::FieldPath;
use pharmaquery_query::dialect::ClinicalTrials as ClinicalTrialsDialect;
use pharmaquery_query::{Pagination, QueryBuilder, ShapeHints};
use pharmaquery_transport::{Executor, RetryPolicy};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{raw_text, sort_keys};
use crate::config::ProvidersConfig;
use crate::error::Result;
use crate::pipeline::Plan;
use crate::response::AdapterResponse;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClinicalTrialsParams {
    pub condition: Option<String>,
    pub intervention: Option<String>,
    /// Lead sponsor name.
    pub sponsor: Option<String>,
    pub location: Option<String>,
    pub study_type: Option<String>,
    /// Any of these phases, e.g. `PHASE2`.
    pub phase: Vec<String>,
    /// Any of these overall statuses, e.g. `RECRUITING`.
    pub status: Vec<String>,
    /// Essie expression sent as `query.term`.
    pub search_query: Option<String>,
    pub fields: Vec<FieldPath>,
    pub sort: Vec<String>,
    pub page_size: Option<i64>,
    /// `nextPageToken` of a previous page.
    pub page_token: Option<String>,
}

/// ClinicalTrials.gov v2 study search.
#[derive(Debug, Clone)]
pub struct ClinicalTrials {
    dialect: ClinicalTrialsDialect,
    executor: Executor,
}

impl ClinicalTrials {
    pub fn new(config: &ProvidersConfig) -> Result<Self> {
        let provider = &config.clinicaltrials;
        let mut dialect = ClinicalTrialsDialect::new().with_options(config.compile_options());
        if let Some(base_url) = &provider.base_url {
            dialect = dialect.with_base_url(base_url.clone());
        }
        let executor = config.executor(provider, None, RetryPolicy::none())?;
        Ok(Self { dialect, executor })
    }

    pub fn plan(&self, params: &ClinicalTrialsParams) -> Result<Plan> {
        let query = QueryBuilder::new()
            .raw(raw_text(&params.search_query))
            .equals("query.cond", params.condition.as_deref())
            .equals("query.intr", params.intervention.as_deref())
            .equals("query.lead", params.sponsor.as_deref())
            .equals("query.locn", params.location.as_deref())
            .equals("query.type", params.study_type.as_deref())
            .any_of("phase", &params.phase)
            .any_of("overallStatus", &params.status)
            .build()?;

        let page = Pagination::new(params.page_size, None).with_cursor(params.page_token.clone());
        let hints = ShapeHints::default()
            .with_fields(params.fields.clone())
            .with_sort(sort_keys(&params.sort)?);
        Plan::new(self.dialect.clone(), query, &page, hints, params)
    }

    pub async fn search(
        &self,
        params: &ClinicalTrialsParams,
        cancel: Option<&CancellationToken>,
    ) -> Result<AdapterResponse> {
        self.plan(params)?.run(&self.executor, cancel).await
    }
}
