//! Property-based tests for the dialect compilers using QuickCheck

use pharmaquery_query::dialect::{Chembl, ClinicalTrials, Entrez, OpenFda, PatentsView};
use pharmaquery_query::{DialectKind, Pagination, QueryBuilder, ShapeHints};
use quickcheck::{QuickCheck, TestResult};

fn dialects() -> Vec<DialectKind> {
    vec![
        OpenFda::new("drug/label.json").into(),
        ClinicalTrials::new().into(),
        PatentsView::new("patent").into(),
        Chembl::new("molecule").into(),
        Entrez::new("pubmed").into(),
    ]
}

/// Property: compiling the same query twice yields identical requests
#[test]
fn prop_compile_is_deterministic() {
    fn prop(value: String, words: String, limit: Option<i64>, offset: Option<i64>) -> TestResult {
        let query = match QueryBuilder::new()
            .equals("name", Some(&value))
            .text_any("title", Some(&words))
            .build()
        {
            Ok(query) => query,
            Err(_) => return TestResult::discard(),
        };
        let page = Pagination::new(limit, offset);
        let hints = ShapeHints::default();

        for kind in dialects() {
            let dialect = kind.as_dialect();
            if dialect.validate(&query).is_err() {
                continue;
            }
            let first = dialect.compile(&query, &page, &hints);
            let second = dialect.compile(&query, &page, &hints);
            if first != second || first.url() != second.url() {
                return TestResult::failed();
            }
        }
        TestResult::passed()
    }

    QuickCheck::new()
        .tests(100)
        .quickcheck(prop as fn(String, String, Option<i64>, Option<i64>) -> TestResult);
}

/// Property: any requested page size ends up within the provider's bounds
#[test]
fn prop_page_size_is_clamped() {
    fn prop(limit: Option<i64>, offset: Option<i64>) -> bool {
        let query = QueryBuilder::new()
            .equals("name", Some("aspirin"))
            .build()
            .unwrap();
        let page = Pagination::new(limit, offset);

        dialects().iter().all(|kind| {
            let dialect = kind.as_dialect();
            let bounds = dialect.capabilities().page;
            let request = dialect.compile(&query, &page, &ShapeHints::default());
            let size = request.page.limit.unwrap_or(bounds.default);
            size >= bounds.floor && size <= bounds.max
        })
    }

    QuickCheck::new()
        .tests(200)
        .quickcheck(prop as fn(Option<i64>, Option<i64>) -> bool);
}
