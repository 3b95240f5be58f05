use pharmaquery_document::FieldPath;
use pharmaquery_query::dialect::PatentsView as PatentsViewDialect;
use pharmaquery_query::{
    CompileOptions, Cursor, Pagination, QueryBuilder, RawPredicate, ShapeHints,
};
use pharmaquery_transport::{Executor, KeyPlacement, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{sort_keys, DateRange};
use crate::config::ProvidersConfig;
use crate::error::{Error, Result};
use crate::pipeline::Plan;
use crate::response::AdapterResponse;

pub const DEFAULT_ENDPOINT: &str = "patent";
const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatentsViewParams {
    /// Entity endpoint, e.g. `patent` or `assignee`.
    pub endpoint: String,
    /// Query object, or its JSON text.
    pub query: Option<Value>,
    pub title_any: Option<String>,
    pub abstract_any: Option<String>,
    pub title_phrase: Option<String>,
    pub date_range: Option<DateRange>,
    /// Case-insensitive substring of an assignee organization.
    pub assignee: Option<String>,
    pub fields: Vec<FieldPath>,
    pub sort: Vec<String>,
    pub size: Option<i64>,
    /// Sort values of the last item of the previous page: one value, or a list
    /// when sorting by several keys.
    pub after: Option<Cursor>,
    pub exclude_withdrawn: bool,
    pub pad_patent_id: bool,
}

impl Default for PatentsViewParams {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            query: None,
            title_any: None,
            abstract_any: None,
            title_phrase: None,
            date_range: None,
            assignee: None,
            fields: Vec::new(),
            sort: Vec::new(),
            size: None,
            after: None,
            exclude_withdrawn: true,
            pad_patent_id: false,
        }
    }
}

impl PatentsViewParams {
    /// The query object, parsing it first when it was given as a string.
    fn query_object(&self) -> Result<Option<Value>> {
        match &self.query {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
            Some(Value::String(text)) => {
                let value: Value = serde_json::from_str(text)
                    .map_err(|err| Error::params(format!("query is not valid JSON: {err}")))?;
                Ok(Some(value))
            }
            Some(value) => Ok(Some(value.clone())),
        }
    }
}

/// PatentsView search API. Every call needs an API key.
#[derive(Debug, Clone)]
pub struct PatentsView {
    base_url: Option<String>,
    options: CompileOptions,
    has_key: bool,
    executor: Executor,
}

impl PatentsView {
    pub fn new(config: &ProvidersConfig) -> Result<Self> {
        let provider = &config.patentsview;
        let executor = config.executor(
            provider,
            Some(KeyPlacement::Header(API_KEY_HEADER.to_string())),
            RetryPolicy::none(),
        )?;
        Ok(Self {
            base_url: provider.base_url.clone(),
            options: config.compile_options(),
            has_key: executor.config().api_key.is_some(),
            executor,
        })
    }

    fn dialect(&self, params: &PatentsViewParams) -> PatentsViewDialect {
        let endpoint = match params.endpoint.trim() {
            "" => DEFAULT_ENDPOINT,
            endpoint => endpoint,
        };
        let dialect = PatentsViewDialect::new(endpoint)
            .with_options(self.options)
            .exclude_withdrawn(params.exclude_withdrawn)
            .pad_patent_id(params.pad_patent_id);
        match &self.base_url {
            Some(base_url) => dialect.with_base_url(base_url.clone()),
            None => dialect,
        }
    }

    pub fn plan(&self, params: &PatentsViewParams) -> Result<Plan> {
        let (from, to) = DateRange::bounds(&params.date_range);
        let query = QueryBuilder::new()
            .raw(params.query_object()?.map(RawPredicate::Structured))
            .text_any("patent_title", params.title_any.as_deref())
            .text_any("patent_abstract", params.abstract_any.as_deref())
            .text_phrase("patent_title", params.title_phrase.as_deref())
            .range("patent_date", from, to)
            .contains("assignees.assignee_organization", params.assignee.as_deref(), false)
            .build()?;

        let page = Pagination::new(params.size, None).with_cursor(params.after.clone());
        let hints = ShapeHints::default()
            .with_fields(params.fields.clone())
            .with_sort(sort_keys(&params.sort)?);
        Plan::new(self.dialect(params), query, &page, hints, params)
    }

    pub async fn search(
        &self,
        params: &PatentsViewParams,
        cancel: Option<&CancellationToken>,
    ) -> Result<AdapterResponse> {
        let plan = self.plan(params)?;
        if !self.has_key {
            return Err(Error::config("PatentsView requires an API key (patentsview.api_key)")
                .with_context(plan.context()));
        }
        plan.run(&self.executor, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn q(plan: &Plan) -> Value {
        serde_json::from_str(plan.request.param("q").unwrap()).unwrap()
    }

    #[test]
    fn test_query_given_as_string() {
        let adapter = PatentsView::new(&ProvidersConfig::default()).unwrap();
        let plan = adapter
            .plan(&PatentsViewParams {
                query: Some(json!(r#"{"_gte":{"patent_date":"2021-01-01"}}"#)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(q(&plan), json!({ "_gte": { "patent_date": "2021-01-01" } }));
        assert!(plan.url().starts_with("https://search.patentsview.org/api/v1/patent/?q="));
    }

    #[test]
    fn test_invalid_query_string() {
        let adapter = PatentsView::new(&ProvidersConfig::default()).unwrap();
        let err = adapter
            .plan(&PatentsViewParams {
                query: Some(json!("{not json")),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Params(_)));
    }

    #[test]
    fn test_convenience_params() {
        let adapter = PatentsView::new(&ProvidersConfig::default()).unwrap();
        let plan = adapter
            .plan(&PatentsViewParams {
                title_any: Some("glp-1 agonist".into()),
                assignee: Some("Novo Nordisk".into()),
                sort: vec!["-patent_date".into()],
                size: Some(25),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            q(&plan),
            json!({ "_and": [
                { "_text_any": { "patent_title": "glp-1 agonist" } },
                { "_contains": { "assignees.assignee_organization": "Novo Nordisk" } }
            ] })
        );
        let options: Value = serde_json::from_str(plan.request.param("o").unwrap()).unwrap();
        assert_eq!(options["size"], json!(25));
        assert_eq!(options["exclude_withdrawn"], json!(true));
    }

    #[test]
    fn test_after_accepts_a_list_of_sort_values() {
        let params: PatentsViewParams = serde_json::from_value(json!({
            "title_any": "insulin",
            "sort": ["-patent_date", "patent_id"],
            "after": ["2023-01-10", "11000002"]
        }))
        .unwrap();
        let plan = PatentsView::new(&ProvidersConfig::default())
            .unwrap()
            .plan(&params)
            .unwrap();

        let options: Value = serde_json::from_str(plan.request.param("o").unwrap()).unwrap();
        assert_eq!(options["after"], json!(["2023-01-10", "11000002"]));
        assert_eq!(
            plan.request.param("s"),
            Some(r#"[{"patent_date":"desc"},{"patent_id":"asc"}]"#)
        );
    }

    #[test]
    fn test_other_endpoint() {
        let adapter = PatentsView::new(&ProvidersConfig::default()).unwrap();
        let plan = adapter
            .plan(&PatentsViewParams {
                endpoint: "assignee".into(),
                query: Some(json!({ "assignee_organization": "Pfizer Inc." })),
                ..Default::default()
            })
            .unwrap();
        assert!(plan.url().starts_with("https://search.patentsview.org/api/v1/assignee/?q="));
    }

    #[tokio::test]
    async fn test_search_without_key_fails_before_sending() {
        let adapter = PatentsView::new(&ProvidersConfig::default()).unwrap();
        let err = adapter
            .search(
                &PatentsViewParams {
                    title_phrase: Some("insulin pump".into()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Config(_)));
        assert!(err.context.is_some());
    }
}
