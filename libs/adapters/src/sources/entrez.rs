use pharmaquery_document::xml::{ATTRIBUTE_PREFIX, TEXT_KEY};
use pharmaquery_query::dialect::entrez::{
    Entrez as EntrezDialect, Utility, DATABASE_NAME, PUBLICATION_DATE, PUBMED, UID,
};
use pharmaquery_query::{Pagination, Query, QueryBuilder, ShapeHints};
use pharmaquery_transport::{Executor, KeyPlacement, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use super::{raw_text, scalar_at, sort_keys};
use crate::config::ProvidersConfig;
use crate::error::{Error, Result};
use crate::pipeline::Plan;
use crate::response::AdapterResponse;

pub const DEFAULT_DATABASE: &str = "pubmed";
const API_KEY_PARAM: &str = "api_key";

/// Publication date window in E-utilities vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicationDates {
    pub mindate: Option<String>,
    pub maxdate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntrezParams {
    pub database: String,
    pub utility: Utility,
    /// Record ids for `esummary`, `efetch` and `elink`.
    pub ids: Vec<String>,
    /// Entrez query syntax, used verbatim.
    pub search_term: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub journal: Option<String>,
    pub date_range: Option<PublicationDates>,
    /// `relevance`, `pub_date`, `Author`, ...
    pub sort: Option<String>,
    pub retmax: Option<i64>,
    pub retstart: Option<i64>,
}

impl Default for EntrezParams {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            utility: Utility::default(),
            ids: Vec::new(),
            search_term: None,
            title: None,
            author: None,
            journal: None,
            date_range: None,
            sort: None,
            retmax: None,
            retstart: None,
        }
    }
}

/// NCBI E-utilities.
///
/// `esearch` returns matching UIDs; the whole term goes in one `term=`. `esummary`
/// returns one flat record per DocSum, `efetch` on PubMed one record per article,
/// `elink` the raw LinkSets and `einfo` the database description.
#[derive(Debug, Clone)]
pub struct Entrez {
    dialect: EntrezDialect,
    executor: Executor,
}

impl Entrez {
    pub fn new(config: &ProvidersConfig) -> Result<Self> {
        let entrez = &config.entrez;
        let mut dialect = EntrezDialect::new(DEFAULT_DATABASE)
            .with_tool(entrez.tool.clone())
            .with_email(entrez.email.clone())
            .with_options(config.compile_options());
        if let Some(base_url) = &entrez.provider.base_url {
            dialect = dialect.with_base_url(base_url.clone());
        }
        let executor = config.executor(
            &entrez.provider,
            Some(KeyPlacement::Query(API_KEY_PARAM.to_string())),
            RetryPolicy::single(),
        )?;
        Ok(Self { dialect, executor })
    }

    fn dialect(&self, params: &EntrezParams) -> EntrezDialect {
        let dialect = self.dialect.clone().with_utility(params.utility);
        match params.database.trim() {
            "" => dialect,
            database => dialect.with_database(database),
        }
    }

    pub fn plan(&self, params: &EntrezParams) -> Result<Plan> {
        let dialect = self.dialect(params);
        let utility = params.utility;
        let query = match utility {
            Utility::ESearch => search_query(params)?,
            Utility::EInfo => QueryBuilder::new()
                .equals(DATABASE_NAME, Some(dialect.database()))
                .build()?,
            _ => {
                let ids: Vec<&str> = params
                    .ids
                    .iter()
                    .map(|id| id.trim())
                    .filter(|id| !id.is_empty())
                    .collect();
                if ids.is_empty() {
                    return Err(Error::params(format!("ids are required for {utility}")));
                }
                QueryBuilder::new().any_of(UID, &ids).build()?
            }
        };

        let sort: Vec<String> = params.sort.iter().cloned().collect();
        let hints = ShapeHints::default().with_sort(sort_keys(&sort)?);
        let pubmed = dialect.database() == PUBMED;
        let plan = Plan::new(
            dialect,
            query,
            &Pagination::new(params.retmax, params.retstart),
            hints,
            params,
        )?;
        Ok(match utility {
            Utility::ESummary => plan.with_records(summary_record),
            Utility::EFetch if pubmed => plan.with_records(article_record),
            _ => plan,
        })
    }

    pub async fn search(
        &self,
        params: &EntrezParams,
        cancel: Option<&CancellationToken>,
    ) -> Result<AdapterResponse> {
        self.plan(params)?.run(&self.executor, cancel).await
    }
}

fn search_query(params: &EntrezParams) -> Result<Query> {
    let (mindate, maxdate) = match &params.date_range {
        Some(range) => (range.mindate.as_deref(), range.maxdate.as_deref()),
        None => (None, None),
    };
    Ok(QueryBuilder::new()
        .raw(raw_text(&params.search_term))
        .text_all("Title", params.title.as_deref())
        .text_all("Author", params.author.as_deref())
        .text_all("Journal", params.journal.as_deref())
        .range(PUBLICATION_DATE, mindate, maxdate)
        .build()?)
}

/// `{id, <Item Name>: text}`, with named items of nested lists flattened in.
fn summary_record(doc_sum: &Value) -> Value {
    let mut record = Map::new();
    record.insert("id".to_string(), scalar_at(doc_sum, &["Id"]));
    collect_items(doc_sum, &mut record);
    Value::Object(record)
}

fn collect_items(node: &Value, record: &mut Map<String, Value>) {
    let items = match node.get("Item") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item) => vec![item],
        None => Vec::new(),
    };
    let name_key = format!("{ATTRIBUTE_PREFIX}Name");
    for item in items {
        let name = item.get(&name_key).and_then(Value::as_str);
        let text = item.get(TEXT_KEY).and_then(Value::as_str);
        if let (Some(name), Some(text)) = (name, text) {
            record.insert(name.to_string(), Value::String(text.to_string()));
        }
        collect_items(item, record);
    }
}

fn article_record(article: &Value) -> Value {
    let citation = article.get("MedlineCitation").unwrap_or(&Value::Null);
    json!({
        "pmid": scalar_at(citation, &["PMID"]),
        "title": scalar_at(citation, &["Article", "ArticleTitle"]),
        "abstract": scalar_at(citation, &["Article", "Abstract", "AbstractText"]),
        "journal": scalar_at(citation, &["Article", "Journal", "Title"]),
        "year": scalar_at(citation, &["Article", "Journal", "JournalIssue", "PubDate", "Year"]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::NaiveDate;
    use pharmaquery_document::xml::parse_document;
    use pharmaquery_query::CompileOptions;

    fn adapter() -> Entrez {
        let config = ProvidersConfig {
            compile_options: Some(CompileOptions::fixed(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap())),
            ..ProvidersConfig::default()
        };
        Entrez::new(&config).unwrap()
    }

    #[test]
    fn test_term_from_convenience_params() {
        let plan = adapter()
            .plan(&EntrezParams {
                title: Some("semaglutide obesity".into()),
                date_range: Some(PublicationDates {
                    mindate: Some("2020/01/01".into()),
                    maxdate: None,
                }),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(
            plan.request.param("term"),
            Some("(semaglutide[Title] AND obesity[Title]) AND 2020/01/01:2024/06/30[pdat]")
        );
        assert_eq!(plan.request.param("db"), Some("pubmed"));
        assert_eq!(plan.request.param("retmax"), Some("20"));
        assert_eq!(plan.request.param("retstart"), Some("0"));
        assert_eq!(plan.request.param("tool"), Some("pharma-researcher"));
    }

    #[test]
    fn test_database_and_sort() {
        let plan = adapter()
            .plan(&EntrezParams {
                database: "pmc".into(),
                search_term: Some("asthma[Title/Abstract]".into()),
                sort: Some("pub_date".into()),
                retmax: Some(100),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(plan.request.param("db"), Some("pmc"));
        assert_eq!(plan.request.param("term"), Some("asthma[Title/Abstract]"));
        assert_eq!(plan.request.param("sort"), Some("pub_date"));
        assert_eq!(plan.request.param("retmax"), Some("100"));
    }

    #[test]
    fn test_email_from_config() {
        let mut config = ProvidersConfig::default();
        config.entrez.email = Some("ops@example.org".into());
        config.entrez.tool = "trial-scout".into();
        let plan = Entrez::new(&config)
            .unwrap()
            .plan(&EntrezParams {
                author: Some("Smith".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(plan.request.param("email"), Some("ops@example.org"));
        assert_eq!(plan.request.param("tool"), Some("trial-scout"));
        assert_eq!(plan.request.param("term"), Some("Smith[Author]"));
    }

    #[test]
    fn test_ids_required_for_record_utilities() {
        for utility in [Utility::ESummary, Utility::EFetch, Utility::ELink] {
            let err = adapter()
                .plan(&EntrezParams {
                    utility,
                    ids: vec!["  ".into()],
                    ..Default::default()
                })
                .unwrap_err();
            assert!(matches!(err.kind, ErrorKind::Params(_)), "{utility}");
        }
    }

    #[test]
    fn test_summary_records() {
        let plan = adapter()
            .plan(&EntrezParams {
                utility: Utility::ESummary,
                ids: vec!["38001234".into(), "37998877".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(plan.request.param("id"), Some("38001234,37998877"));
        assert!(plan.url().contains("/esummary.fcgi?"));

        let xml = r#"<?xml version="1.0" encoding="UTF-8" ?>
<eSummaryResult>
  <DocSum>
    <Id>38001234</Id>
    <Item Name="PubDate" Type="Date">2023 Nov 20</Item>
    <Item Name="AuthorList" Type="List">
      <Item Name="Author" Type="String">Smith J</Item>
    </Item>
    <Item Name="Title" Type="String">Metformin and aging</Item>
    <Item Name="DOI" Type="String"></Item>
  </DocSum>
  <DocSum>
    <Id>37998877</Id>
    <Item Name="Title" Type="String">Insulin pumps</Item>
  </DocSum>
</eSummaryResult>"#;
        let response = plan.shape(parse_document(xml).unwrap()).unwrap();

        assert_eq!(
            response.data(),
            Some(&json!([
                {
                    "id": "38001234",
                    "PubDate": "2023 Nov 20",
                    "Author": "Smith J",
                    "Title": "Metformin and aging"
                },
                {"id": "37998877", "Title": "Insulin pumps"}
            ]))
        );
        assert_eq!(response.metadata.results_returned, 2);
        assert_eq!(response.metadata.next_page, None);
    }

    #[test]
    fn test_pubmed_fetch_records() {
        let plan = adapter()
            .plan(&EntrezParams {
                utility: Utility::EFetch,
                ids: vec!["38001234".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(plan.request.param("rettype"), Some("abstract"));

        let xml = r#"<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE">
      <PMID Version="1">38001234</PMID>
      <Article>
        <Journal>
          <JournalIssue><PubDate><Year>2023</Year><Month>Nov</Month></PubDate></JournalIssue>
          <Title>Nature medicine</Title>
        </Journal>
        <ArticleTitle>Metformin and aging</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND">Metformin is widely used.</AbstractText>
          <AbstractText Label="RESULTS">No effect was seen.</AbstractText>
        </Abstract>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;
        let response = plan.shape(parse_document(xml).unwrap()).unwrap();

        assert_eq!(
            response.data(),
            Some(&json!([{
                "pmid": "38001234",
                "title": "Metformin and aging",
                "abstract": "Metformin is widely used.",
                "journal": "Nature medicine",
                "year": "2023"
            }]))
        );
    }

    #[test]
    fn test_fetch_outside_pubmed_is_one_document() {
        let plan = adapter()
            .plan(&EntrezParams {
                database: "protein".into(),
                utility: Utility::EFetch,
                ids: vec!["NP_000537".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(plan.request.param("rettype"), Some("full"));
        assert!(plan.records.is_none());

        let document = json!({"GBSet": {"GBSeq": {"GBSeq_locus": "NP_000537"}}});
        let response = plan.shape(document.clone()).unwrap();
        assert_eq!(response.data(), Some(&document));
    }

    #[test]
    fn test_info_for_database() {
        let plan = adapter()
            .plan(&EntrezParams {
                database: "pmc".into(),
                utility: Utility::EInfo,
                search_term: Some("ignored".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(plan.request.param("db"), Some("pmc"));
        assert_eq!(plan.request.param("term"), None);
        assert!(plan.url().contains("/einfo.fcgi?"));
    }

    #[test]
    fn test_utility_names_deserialize() {
        let params: EntrezParams =
            serde_json::from_value(json!({"utility": "elink", "ids": ["38001234"]})).unwrap();
        assert_eq!(params.utility, Utility::ELink);
        assert_eq!(params.database, DEFAULT_DATABASE);
    }
}
