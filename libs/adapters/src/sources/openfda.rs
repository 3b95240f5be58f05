//! openFDA drug endpoints: adverse events, Drugs@FDA, enforcement reports, NDC
//! directory and product labels

use pharmaquery_document::FieldPath;
use pharmaquery_query::dialect::OpenFda as OpenFdaDialect;
use pharmaquery_query::{PageLimits, Pagination, Predicate, Query, QueryBuilder, ShapeHints};
use pharmaquery_transport::{Executor, KeyPlacement, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{raw_text, scalar_at, sort_keys, DateRange};
use crate::config::ProvidersConfig;
use crate::error::Result;
use crate::pipeline::Plan;
use crate::response::AdapterResponse;

const API_KEY_PARAM: &str = "api_key";

/// One openFDA endpoint with its executor.
#[derive(Debug, Clone)]
struct Endpoint {
    dialect: OpenFdaDialect,
    executor: Executor,
}

/// Pagination and shape parameters every openFDA adapter accepts.
struct Shape<'a> {
    fields: &'a [FieldPath],
    sort: &'a [String],
    limit: Option<i64>,
    skip: Option<i64>,
}

impl Endpoint {
    fn new(config: &ProvidersConfig, path: &str, limits: Option<PageLimits>) -> Result<Self> {
        let provider = &config.openfda;
        let mut dialect = OpenFdaDialect::new(path).with_options(config.compile_options());
        if let Some(base_url) = &provider.base_url {
            dialect = dialect.with_base_url(base_url.clone());
        }
        if let Some(limits) = limits {
            dialect = dialect.with_limits(limits);
        }
        let executor = config.executor(
            provider,
            Some(KeyPlacement::Query(API_KEY_PARAM.to_string())),
            RetryPolicy::none(),
        )?;
        Ok(Self { dialect, executor })
    }

    fn plan<P: Serialize>(&self, query: Query, shape: Shape<'_>, params: &P) -> Result<Plan> {
        let hints = ShapeHints::default()
            .with_fields(shape.fields.to_vec())
            .with_sort(sort_keys(shape.sort)?);
        Plan::new(
            self.dialect.clone(),
            query,
            &Pagination::new(shape.limit, shape.skip),
            hints,
            params,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdverseEventsParams {
    /// openFDA search expression, used verbatim.
    pub search_query: Option<String>,
    pub date_range: Option<DateRange>,
    pub country: Option<String>,
    pub serious_only: bool,
    /// Count by this field instead of returning reports.
    pub count: Option<String>,
    pub fields: Vec<FieldPath>,
    pub sort: Vec<String>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
    /// Reduce each report to its commonly used fields. Ignored for counts and
    /// when `fields` are given.
    pub extract_fields: bool,
}

impl Default for AdverseEventsParams {
    fn default() -> Self {
        Self {
            search_query: None,
            date_range: None,
            country: None,
            serious_only: false,
            count: None,
            fields: Vec::new(),
            sort: Vec::new(),
            limit: None,
            skip: None,
            extract_fields: true,
        }
    }
}

/// FAERS adverse event reports (`drug/event.json`).
#[derive(Debug, Clone)]
pub struct FdaAdverseEvents {
    endpoint: Endpoint,
}

impl FdaAdverseEvents {
    pub const PATH: &'static str = "drug/event.json";

    pub fn new(config: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config, Self::PATH, None)?,
        })
    }

    pub fn plan(&self, params: &AdverseEventsParams) -> Result<Plan> {
        let (from, to) = DateRange::bounds(&params.date_range);
        let query = QueryBuilder::new()
            .raw(raw_text(&params.search_query))
            .range("receivedate", from, to)
            .equals("occurcountry", params.country.as_deref())
            .equals("serious", params.serious_only.then_some("1"))
            .count_by(params.count.as_deref())
            .build()?;
        let shape = Shape {
            fields: &params.fields,
            sort: &params.sort,
            limit: params.limit,
            skip: params.skip,
        };
        let plan = self.endpoint.plan(query, shape, params)?;
        let simplify =
            params.extract_fields && params.fields.is_empty() && !plan.query.is_aggregation();
        Ok(if simplify {
            plan.with_records(simplified_event)
        } else {
            plan
        })
    }

    pub async fn search(
        &self,
        params: &AdverseEventsParams,
        cancel: Option<&CancellationToken>,
    ) -> Result<AdapterResponse> {
        self.plan(params)?.run(&self.endpoint.executor, cancel).await
    }
}

/// An adverse event report reduced to dates, seriousness, patient, drugs,
/// reactions and country.
fn simplified_event(report: &Value) -> Value {
    let drugs: Vec<Value> = patient_list(report, "drug")
        .iter()
        .map(|drug| {
            json!({
                "name": scalar_at(drug, &["medicinalproduct"]),
                "indication": scalar_at(drug, &["drugindication"]),
                "role": scalar_at(drug, &["drugcharacterization"]),
            })
        })
        .collect();
    let reactions: Vec<Value> = patient_list(report, "reaction")
        .iter()
        .map(|reaction| {
            json!({
                "term": scalar_at(reaction, &["reactionmeddrapt"]),
                "outcome": scalar_at(reaction, &["reactionoutcome"]),
            })
        })
        .collect();

    json!({
        "safetyreportid": scalar_at(report, &["safetyreportid"]),
        "receivedate": scalar_at(report, &["receivedate"]),
        "serious": scalar_at(report, &["serious"]) == "1",
        "seriousnesscongenitalanomali": scalar_at(report, &["seriousnesscongenitalanomali"]),
        "seriousnessdeath": scalar_at(report, &["seriousnessdeath"]),
        "seriousnesshospitalization": scalar_at(report, &["seriousnesshospitalization"]),
        "patient_age": scalar_at(report, &["patient", "patientonsetage"]),
        "patient_sex": scalar_at(report, &["patient", "patientsex"]),
        "drugs": drugs,
        "reactions": reactions,
        "country": scalar_at(report, &["occurcountry"]),
    })
}

fn patient_list<'a>(report: &'a Value, key: &str) -> &'a [Value] {
    report
        .get("patient")
        .and_then(|patient| patient.get(key))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrugsFdaParams {
    pub search_query: Option<String>,
    pub brand_name: Option<String>,
    pub generic_name: Option<String>,
    /// Matches either the application sponsor or the labelled manufacturer.
    pub sponsor: Option<String>,
    pub application_type: Option<String>,
    pub fields: Vec<FieldPath>,
    pub sort: Vec<String>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

/// Drugs@FDA applications (`drug/drugsfda.json`).
#[derive(Debug, Clone)]
pub struct FdaDrugsFda {
    endpoint: Endpoint,
}

impl FdaDrugsFda {
    pub const PATH: &'static str = "drug/drugsfda.json";

    pub fn new(config: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config, Self::PATH, None)?,
        })
    }

    pub fn plan(&self, params: &DrugsFdaParams) -> Result<Plan> {
        let mut builder = QueryBuilder::new()
            .raw(raw_text(&params.search_query))
            .equals("products.brand_name", params.brand_name.as_deref())
            .equals("openfda.generic_name", params.generic_name.as_deref());
        if let Some(sponsor) = params.sponsor.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            builder = builder.group(Predicate::Or {
                children: vec![
                    Predicate::equals("sponsor_name", sponsor),
                    Predicate::equals("openfda.manufacturer_name", sponsor),
                ],
            });
        }
        let query = builder
            .equals(
                "submissions.submission_type.exact",
                params.application_type.as_deref(),
            )
            .build()?;
        let shape = Shape {
            fields: &params.fields,
            sort: &params.sort,
            limit: params.limit,
            skip: params.skip,
        };
        self.endpoint.plan(query, shape, params)
    }

    pub async fn search(
        &self,
        params: &DrugsFdaParams,
        cancel: Option<&CancellationToken>,
    ) -> Result<AdapterResponse> {
        self.plan(params)?.run(&self.endpoint.executor, cancel).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcementParams {
    pub search_query: Option<String>,
    /// Case-insensitive substring of the product description.
    pub product: Option<String>,
    pub classification: Option<String>,
    pub status: Option<String>,
    pub state: Option<String>,
    pub recalling_firm: Option<String>,
    pub date_range: Option<DateRange>,
    pub count: Option<String>,
    pub fields: Vec<FieldPath>,
    pub sort: Vec<String>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

/// Recall enforcement reports (`drug/enforcement.json`).
#[derive(Debug, Clone)]
pub struct FdaEnforcement {
    endpoint: Endpoint,
}

impl FdaEnforcement {
    pub const PATH: &'static str = "drug/enforcement.json";

    pub fn new(config: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config, Self::PATH, None)?,
        })
    }

    pub fn plan(&self, params: &EnforcementParams) -> Result<Plan> {
        let (from, to) = DateRange::bounds(&params.date_range);
        let query = QueryBuilder::new()
            .raw(raw_text(&params.search_query))
            .contains("product_description", params.product.as_deref(), false)
            .equals("classification", params.classification.as_deref())
            .equals("status", params.status.as_deref())
            .equals("state", params.state.as_deref())
            .equals("recalling_firm", params.recalling_firm.as_deref())
            .range("recall_initiation_date", from, to)
            .count_by(params.count.as_deref())
            .build()?;
        let shape = Shape {
            fields: &params.fields,
            sort: &params.sort,
            limit: params.limit,
            skip: params.skip,
        };
        self.endpoint.plan(query, shape, params)
    }

    pub async fn search(
        &self,
        params: &EnforcementParams,
        cancel: Option<&CancellationToken>,
    ) -> Result<AdapterResponse> {
        self.plan(params)?.run(&self.endpoint.executor, cancel).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NdcParams {
    pub search_query: Option<String>,
    pub generic_name: Option<String>,
    pub brand_name: Option<String>,
    pub labeler: Option<String>,
    pub route: Option<String>,
    pub dosage_form: Option<String>,
    pub marketing_status: Option<String>,
    pub package_type: Option<String>,
    pub fields: Vec<FieldPath>,
    pub sort: Vec<String>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

/// National Drug Code directory (`drug/ndc.json`).
#[derive(Debug, Clone)]
pub struct FdaNdc {
    endpoint: Endpoint,
}

impl FdaNdc {
    pub const PATH: &'static str = "drug/ndc.json";

    pub fn new(config: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config, Self::PATH, None)?,
        })
    }

    pub fn plan(&self, params: &NdcParams) -> Result<Plan> {
        // The directory stores these vocabularies upper-cased.
        let upper = |value: &Option<String>| value.as_deref().map(str::to_uppercase);
        let route = upper(&params.route);
        let dosage_form = upper(&params.dosage_form);
        let package_type = upper(&params.package_type);

        let query = QueryBuilder::new()
            .raw(raw_text(&params.search_query))
            .equals("generic_name", params.generic_name.as_deref())
            .equals("brand_name", params.brand_name.as_deref())
            .equals("labeler_name", params.labeler.as_deref())
            .equals("route", route.as_deref())
            .equals("dosage_form", dosage_form.as_deref())
            .equals("marketing_category", params.marketing_status.as_deref())
            .equals("packaging.type", package_type.as_deref())
            .build()?;
        let shape = Shape {
            fields: &params.fields,
            sort: &params.sort,
            limit: params.limit,
            skip: params.skip,
        };
        self.endpoint.plan(query, shape, params)
    }

    pub async fn search(
        &self,
        params: &NdcParams,
        cancel: Option<&CancellationToken>,
    ) -> Result<AdapterResponse> {
        self.plan(params)?.run(&self.endpoint.executor, cancel).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelParams {
    pub search_query: Option<String>,
    pub brand_name: Option<String>,
    pub generic_name: Option<String>,
    pub manufacturer: Option<String>,
    pub product_type: Option<String>,
    /// Label section to search, e.g. `indications_and_usage`.
    pub section: Option<String>,
    /// Exact phrase looked up in `section`.
    pub section_text: Option<String>,
    pub fields: Vec<FieldPath>,
    pub sort: Vec<String>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

/// Structured product labels (`drug/label.json`). Labels are large, so pages are
/// smaller than on other endpoints.
#[derive(Debug, Clone)]
pub struct FdaLabel {
    endpoint: Endpoint,
}

impl FdaLabel {
    pub const PATH: &'static str = "drug/label.json";
    pub const LIMITS: PageLimits = PageLimits::new(100, 10);

    pub fn new(config: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config, Self::PATH, Some(Self::LIMITS))?,
        })
    }

    pub fn plan(&self, params: &LabelParams) -> Result<Plan> {
        let section = params
            .section
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut builder = QueryBuilder::new()
            .raw(raw_text(&params.search_query))
            .equals("openfda.brand_name", params.brand_name.as_deref())
            .equals("openfda.generic_name", params.generic_name.as_deref())
            .equals("openfda.manufacturer_name", params.manufacturer.as_deref())
            .equals("openfda.product_type", params.product_type.as_deref());
        if let Some(section) = &section {
            builder = builder.text_phrase(section, params.section_text.as_deref());
        }
        let query = builder.build()?;
        let shape = Shape {
            fields: &params.fields,
            sort: &params.sort,
            limit: params.limit,
            skip: params.skip,
        };
        self.endpoint.plan(query, shape, params)
    }

    pub async fn search(
        &self,
        params: &LabelParams,
        cancel: Option<&CancellationToken>,
    ) -> Result<AdapterResponse> {
        self.plan(params)?.run(&self.endpoint.executor, cancel).await
    }
}
