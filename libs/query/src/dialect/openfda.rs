//! openFDA dialect
//!
//! Lucene-style `search=` expressions joined with `+AND+` / `+OR+`. The syntax
//! characters `:"[]()+%` are sent literally; openFDA reads `+` as a space, so a
//! `+` or `%` inside a value is percent-encoded while rendering. Values that are
//! not plain words are quoted.
//!
//! Precedence: nested `And` groups are inlined (associative); an `Or` under an
//! `And` is always parenthesized, as is a raw expression that contains the other
//! operator.

use pharmaquery_document::FieldPath;

use super::common::{bound_text, close_range, escape_quotes, join_group, quote_term, Op};
use super::{Capabilities, Dialect, Disjunction, FaultClass, HttpFault};
use crate::ir::{Predicate, Query, RawPredicate};
use crate::page::{CompileOptions, PageLimits, PageState, Pagination, ShapeHints, SortDirection};
use crate::request::{
    CompiledRequest, Envelope, Method, Paging, ProjectionSite, Provider, QueryEncoding,
    RequestMode, ResponseFormat, RetryEligibility,
};

pub const BASE_URL: &str = "https://api.fda.gov";

const PRESERVED: &str = ":\"[]()+%";
const AND: &str = "+AND+";
const OR: &str = "+OR+";
const DATE_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, PartialEq)]
pub struct OpenFda {
    endpoint: String,
    base_url: String,
    limits: PageLimits,
    options: CompileOptions,
}

impl OpenFda {
    /// `endpoint` is the path below the base URL, e.g. `drug/event.json`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            base_url: BASE_URL.to_string(),
            limits: PageLimits::new(1000, 100),
            options: CompileOptions::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Render a predicate as a `search=` expression.
    pub fn expression(&self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Equals { field, value } => format!("{field}:{}", quoted(value)),
            Predicate::Contains {
                field,
                value,
                case_sensitive,
            } => {
                let value = if *case_sensitive {
                    value.clone()
                } else {
                    value.to_lowercase()
                };
                format!("{field}:{}", quoted(&value))
            }
            Predicate::TextAny { field, terms } => {
                let terms: Vec<String> = terms.iter().map(|t| token(t)).collect();
                format!("{field}:({})", terms.join("+"))
            }
            Predicate::TextAll { field, terms } => {
                let parts: Vec<String> = terms
                    .iter()
                    .map(|t| format!("{field}:{}", token(t)))
                    .collect();
                if parts.len() == 1 {
                    parts.join("")
                } else {
                    format!("({})", parts.join(AND))
                }
            }
            Predicate::TextPhrase { field, phrase } => format!("{field}:{}", quoted(phrase)),
            Predicate::Range { field, gte, lte } => {
                let (lo, hi) = close_range(*gte, *lte, &self.options);
                format!(
                    "{field}:[{}+TO+{}]",
                    bound_text(&lo, DATE_FORMAT),
                    bound_text(&hi, DATE_FORMAT)
                )
            }
            Predicate::And { children } => {
                join_group(Op::And, children, AND, |c| self.expression(c))
            }
            Predicate::Or { children } => join_group(Op::Or, children, OR, |c| self.expression(c)),
            Predicate::CountBy { filter, .. } => filter
                .as_deref()
                .map(|f| self.expression(f))
                .unwrap_or_default(),
            Predicate::Raw(RawPredicate::Text(text)) => text.clone(),
            Predicate::Raw(RawPredicate::Structured(value)) => value.to_string(),
        }
    }

    fn path(&self) -> Vec<String> {
        self.endpoint
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Percent-encode the characters that would otherwise read as syntax on the wire.
fn literal(value: &str) -> String {
    value.replace('%', "%25").replace('+', "%2B")
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", literal(&escape_quotes(value)))
}

fn token(value: &str) -> String {
    literal(&quote_term(value))
}

impl Dialect for OpenFda {
    fn provider(&self) -> Provider {
        Provider::OpenFda
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            aggregation: true,
            disjunction: Disjunction::Any,
            raw_text: true,
            raw_structured: false,
            remote_projection: false,
            page: self.limits,
        }
    }

    fn compile(&self, query: &Query, page: &Pagination, hints: &ShapeHints) -> CompiledRequest {
        let expression = query.filter().map(|f| self.expression(f));

        let mut params = Vec::new();
        if let Some(search) = &expression {
            params.push(("search".to_string(), search.clone()));
        }

        let results = FieldPath::key("results");
        let (mode, state, envelope) = match query.count_field() {
            Some(field) => {
                params.push(("count".to_string(), field.to_string()));
                let envelope = Envelope {
                    items: Some(results),
                    total: None,
                    paging: Paging::Unpaged,
                };
                (RequestMode::Aggregation, PageState::none(), envelope)
            }
            None => {
                let state = page.resolve(self.limits);
                if let Some(limit) = state.limit {
                    params.push(("limit".to_string(), limit.to_string()));
                }
                if let Some(skip) = state.offset.filter(|skip| *skip > 0) {
                    params.push(("skip".to_string(), skip.to_string()));
                }
                if !hints.sort.is_empty() {
                    let sort: Vec<String> = hints
                        .sort
                        .iter()
                        .map(|key| {
                            let direction = key.direction.unwrap_or(SortDirection::Asc);
                            format!("{}:{}", key.field, direction.as_str())
                        })
                        .collect();
                    params.push(("sort".to_string(), sort.join(",")));
                }
                let envelope = Envelope {
                    items: Some(results),
                    total: Some(FieldPath::key("meta").join("results").join("total")),
                    paging: Paging::Offset,
                };
                (RequestMode::Items, state, envelope)
            }
        };

        CompiledRequest {
            provider: Provider::OpenFda,
            method: Method::Get,
            base_url: self.base_url.clone(),
            path: self.path(),
            params,
            encoding: QueryEncoding::Preserve(PRESERVED),
            page: state,
            mode,
            format: ResponseFormat::Json,
            envelope,
            projection: ProjectionSite::Local,
            retry: RetryEligibility::Idempotent,
            expression,
        }
    }

    /// openFDA reports throttling as `OVER_RATE_LIMIT` and puts a human message in
    /// `error.message`.
    fn classify(&self, fault: &HttpFault) -> FaultClass {
        let error = fault.json_body().and_then(|body| body.get("error").cloned());
        let code = error
            .as_ref()
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_str());

        if fault.status == 429 || code == Some("OVER_RATE_LIMIT") {
            return FaultClass::RateLimited;
        }
        let reason = error
            .as_ref()
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string);
        FaultClass::Upstream { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::QueryBuilder;
    use chrono::NaiveDate;

    fn dialect() -> OpenFda {
        OpenFda::new("drug/event.json").with_options(CompileOptions::fixed(
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        ))
    }

    fn compile(query: &Query) -> CompiledRequest {
        dialect().compile(query, &Pagination::default(), &ShapeHints::default())
    }

    #[test]
    fn test_and_of_equals() {
        let query = QueryBuilder::new()
            .equals("generic_name", Some("metformin"))
            .equals("route", Some("ORAL"))
            .build()
            .unwrap();
        let request = compile(&query);
        assert_eq!(
            request.param("search"),
            Some(r#"generic_name:"metformin"+AND+route:"ORAL""#)
        );
        assert_eq!(request.param("limit"), Some("100"));
        assert_eq!(request.param("skip"), None);
        assert_eq!(
            request.url(),
            r#"https://api.fda.gov/drug/event.json?search=generic_name:"metformin"+AND+route:"ORAL"&limit=100"#
        );
    }

    #[test]
    fn test_open_range_gets_today() {
        let query = QueryBuilder::new()
            .range("receivedate", Some("20200101"), None)
            .build()
            .unwrap();
        assert_eq!(
            compile(&query).param("search"),
            Some("receivedate:[20200101+TO+20240630]")
        );
    }

    #[test]
    fn test_open_range_without_pinned_date_uses_current_date() {
        let query = QueryBuilder::new()
            .range("receivedate", Some("20200101"), None)
            .build()
            .unwrap();
        let dialect = OpenFda::new("drug/event.json");
        let before = chrono::Utc::now().date_naive().format(DATE_FORMAT).to_string();
        let request = dialect.compile(&query, &Pagination::default(), &ShapeHints::default());
        let after = chrono::Utc::now().date_naive().format(DATE_FORMAT).to_string();

        let search = request.param("search").unwrap();
        assert!(
            search == format!("receivedate:[20200101+TO+{before}]")
                || search == format!("receivedate:[20200101+TO+{after}]")
        );
    }

    #[test]
    fn test_plus_and_special_characters_in_values() {
        let query = QueryBuilder::new()
            .equals("openfda.brand_name", Some("ZYRTEC-D 12 HOUR+"))
            .text_any("indications_and_usage", Some("C++ (acute) 50%"))
            .build()
            .unwrap();
        let request = compile(&query);

        assert_eq!(
            request.param("search"),
            Some(
                r#"openfda.brand_name:"ZYRTEC-D 12 HOUR%2B"+AND+indications_and_usage:("C%2B%2B"+"(acute)"+"50%25")"#
            )
        );
        assert_eq!(
            request.url(),
            r#"https://api.fda.gov/drug/event.json?search=openfda.brand_name:"ZYRTEC-D%2012%20HOUR%2B"+AND+indications_and_usage:("C%2B%2B"+"(acute)"+"50%25")&limit=100"#
        );
    }

    #[test]
    fn test_text_operators_differ() {
        let phrase = QueryBuilder::new()
            .text_phrase("indications_and_usage", Some("cancer treatment"))
            .build()
            .unwrap();
        let any = QueryBuilder::new()
            .text_any("indications_and_usage", Some("cancer treatment"))
            .build()
            .unwrap();
        let all = QueryBuilder::new()
            .text_all("indications_and_usage", Some("cancer treatment"))
            .build()
            .unwrap();

        assert_eq!(
            compile(&phrase).expression.as_deref(),
            Some(r#"indications_and_usage:"cancer treatment""#)
        );
        assert_eq!(
            compile(&any).expression.as_deref(),
            Some("indications_and_usage:(cancer+treatment)")
        );
        assert_eq!(
            compile(&all).expression.as_deref(),
            Some("(indications_and_usage:cancer+AND+indications_and_usage:treatment)")
        );
    }

    #[test]
    fn test_or_is_parenthesized_under_and() {
        let query = QueryBuilder::new()
            .equals("products.brand_name", Some("JARDIANCE"))
            .group(Predicate::Or {
                children: vec![
                    Predicate::equals("sponsor_name", "Boehringer"),
                    Predicate::equals("openfda.manufacturer_name", "Boehringer"),
                ],
            })
            .build()
            .unwrap();
        assert_eq!(
            compile(&query).param("search"),
            Some(
                r#"products.brand_name:"JARDIANCE"+AND+(sponsor_name:"Boehringer"+OR+openfda.manufacturer_name:"Boehringer")"#
            )
        );
    }

    #[test]
    fn test_quotes_are_escaped() {
        let query = QueryBuilder::new()
            .equals("brand_name", Some(r#"12" ROLL"#))
            .build()
            .unwrap();
        assert_eq!(
            compile(&query).param("search"),
            Some(r#"brand_name:"12\" ROLL""#)
        );
    }

    #[test]
    fn test_contains_lowercases() {
        let query = QueryBuilder::new()
            .contains("product_description", Some("Metformin ER"), false)
            .build()
            .unwrap();
        assert_eq!(
            compile(&query).param("search"),
            Some(r#"product_description:"metformin er""#)
        );
    }

    #[test]
    fn test_count_switches_to_aggregation() {
        let query = QueryBuilder::new()
            .raw(Some(RawPredicate::Text(
                r#"patient.drug.medicinalproduct:"jardiance""#.into(),
            )))
            .count_by(Some("patient.reaction.reactionmeddrapt.exact"))
            .build()
            .unwrap();
        let request = dialect().compile(
            &query,
            &Pagination::new(Some(50), Some(10)),
            &ShapeHints::default(),
        );

        assert_eq!(request.mode, RequestMode::Aggregation);
        assert_eq!(
            request.params,
            vec![
                (
                    "search".to_string(),
                    r#"patient.drug.medicinalproduct:"jardiance""#.to_string()
                ),
                (
                    "count".to_string(),
                    "patient.reaction.reactionmeddrapt.exact".to_string()
                ),
            ]
        );
        assert_eq!(request.page, PageState::none());
    }

    #[test]
    fn test_pagination_and_label_cap() {
        let query = QueryBuilder::new()
            .equals("openfda.brand_name", Some("OZEMPIC"))
            .build()
            .unwrap();
        let label = OpenFda::new("drug/label.json").with_limits(PageLimits::new(100, 10));
        let request = label.compile(
            &query,
            &Pagination::new(Some(5000), Some(20)),
            &ShapeHints::default(),
        );
        assert_eq!(request.param("limit"), Some("100"));
        assert_eq!(request.param("skip"), Some("20"));
        assert_eq!(request.path, vec!["drug", "label.json"]);
    }

    #[test]
    fn test_raw_with_or_is_parenthesized() {
        let query = QueryBuilder::new()
            .raw(Some(RawPredicate::Text("serious:1+OR+serious:2".into())))
            .equals("occurcountry", Some("US"))
            .build()
            .unwrap();
        assert_eq!(
            compile(&query).param("search"),
            Some(r#"(serious:1+OR+serious:2)+AND+occurcountry:"US""#)
        );
    }

    #[test]
    fn test_classify_faults() {
        let dialect = dialect();
        let throttled = HttpFault {
            status: 403,
            headers: vec![],
            body: r#"{"error":{"code":"OVER_RATE_LIMIT","message":"slow down"}}"#.into(),
        };
        assert_eq!(dialect.classify(&throttled), FaultClass::RateLimited);

        let not_found = HttpFault {
            status: 404,
            headers: vec![],
            body: r#"{"error":{"code":"NOT_FOUND","message":"No matches found!"}}"#.into(),
        };
        assert_eq!(
            dialect.classify(&not_found),
            FaultClass::Upstream {
                reason: Some("No matches found!".into())
            }
        );
    }

    #[test]
    fn test_structured_raw_is_rejected() {
        let query = QueryBuilder::new()
            .raw(Some(RawPredicate::Structured(serde_json::json!({ "a": 1 }))))
            .build()
            .unwrap();
        assert!(dialect().validate(&query).is_err());
    }
}
