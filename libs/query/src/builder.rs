//! Builds a [`Query`] from adapter-level convenience parameters.
//!
//! Each setter takes an optional value and is a no-op for `None` or blank input, so
//! adapters can pass their parameter structs straight through.

use crate::error::{QueryError, Result};
use crate::ir::{Predicate, Query, RangeBound, RawPredicate};

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    clauses: Vec<Predicate>,
    raw: Vec<RawPredicate>,
    count_by: Option<String>,
    error: Option<QueryError>,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn terms(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: &str, value: Option<&str>) -> Self {
        if let Some(value) = present(value) {
            self.clauses.push(Predicate::equals(field, value));
        }
        self
    }

    pub fn contains(mut self, field: &str, value: Option<&str>, case_sensitive: bool) -> Self {
        if let Some(value) = present(value) {
            self.clauses.push(Predicate::Contains {
                field: field.to_string(),
                value: value.to_string(),
                case_sensitive,
            });
        }
        self
    }

    /// Match any of the whitespace-separated terms.
    pub fn text_any(mut self, field: &str, value: Option<&str>) -> Self {
        if let Some(value) = present(value) {
            self.clauses.push(Predicate::TextAny {
                field: field.to_string(),
                terms: terms(value),
            });
        }
        self
    }

    /// Match all of the whitespace-separated terms.
    pub fn text_all(mut self, field: &str, value: Option<&str>) -> Self {
        if let Some(value) = present(value) {
            self.clauses.push(Predicate::TextAll {
                field: field.to_string(),
                terms: terms(value),
            });
        }
        self
    }

    pub fn text_phrase(mut self, field: &str, value: Option<&str>) -> Self {
        if let Some(value) = present(value) {
            self.clauses.push(Predicate::TextPhrase {
                field: field.to_string(),
                phrase: value.to_string(),
            });
        }
        self
    }

    /// Add a range clause. Skipped when both bounds are absent; an unparseable bound
    /// fails the build.
    pub fn range(mut self, field: &str, gte: Option<&str>, lte: Option<&str>) -> Self {
        let (gte, lte) = (present(gte), present(lte));
        if gte.is_none() && lte.is_none() {
            return self;
        }

        let parsed = gte
            .map(RangeBound::parse)
            .transpose()
            .and_then(|lo| Ok((lo, lte.map(RangeBound::parse).transpose()?)));
        match parsed {
            Ok((gte, lte)) => self.clauses.push(Predicate::Range {
                field: field.to_string(),
                gte,
                lte,
            }),
            Err(err) => self.fail(err),
        }
        self
    }

    /// Match any of `values` on one field. A single value becomes a plain `Equals`.
    pub fn any_of<S: AsRef<str>>(mut self, field: &str, values: &[S]) -> Self {
        let mut children: Vec<Predicate> = values
            .iter()
            .filter_map(|v| present(Some(v.as_ref())))
            .map(|v| Predicate::equals(field, v))
            .collect();

        match children.len() {
            0 => {}
            1 => self.clauses.extend(children.pop()),
            _ => self.clauses.push(Predicate::Or { children }),
        }
        self
    }

    /// Add an arbitrary predicate node.
    pub fn group(mut self, predicate: Predicate) -> Self {
        self.clauses.push(predicate);
        self
    }

    pub fn raw(mut self, raw: Option<RawPredicate>) -> Self {
        match raw {
            Some(RawPredicate::Text(text)) if !text.trim().is_empty() => {
                self.raw.push(RawPredicate::Text(text.trim().to_string()));
            }
            Some(RawPredicate::Structured(value)) if !value.is_null() => {
                self.raw.push(RawPredicate::Structured(value));
            }
            _ => {}
        }
        self
    }

    pub fn count_by(mut self, field: Option<&str>) -> Self {
        if let Some(field) = present(field) {
            self.count_by = Some(field.to_string());
        }
        self
    }

    fn fail(&mut self, err: QueryError) {
        self.error.get_or_insert(err);
    }

    /// Combine everything into a validated [`Query`].
    ///
    /// Raw predicates come first, followed by convenience clauses in call order;
    /// structurally identical clauses are kept once.
    pub fn build(self) -> Result<Query> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let mut clauses: Vec<Predicate> = Vec::new();
        let candidates = self
            .raw
            .into_iter()
            .map(Predicate::Raw)
            .chain(self.clauses);
        for clause in candidates {
            if !clauses.contains(&clause) {
                clauses.push(clause);
            }
        }

        let filter = match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(Predicate::And { children: clauses }),
        };

        let root = match (self.count_by, filter) {
            (Some(field), filter) => Predicate::CountBy {
                field,
                filter: filter.map(Box::new),
            },
            (None, Some(filter)) => filter,
            (None, None) => return Err(QueryError::EmptyQuery),
        };

        tracing::trace!(?root, "built query");
        Query::from_root(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_convenience_params_become_and() {
        let query = QueryBuilder::new()
            .equals("generic_name", Some("metformin"))
            .equals("route", Some("ORAL"))
            .build()
            .unwrap();

        assert_eq!(
            query.root(),
            &Predicate::And {
                children: vec![
                    Predicate::equals("generic_name", "metformin"),
                    Predicate::equals("route", "ORAL"),
                ]
            }
        );
    }

    #[test]
    fn test_single_clause_is_not_wrapped() {
        let query = QueryBuilder::new()
            .equals("brand_name", Some("JARDIANCE"))
            .equals("route", None)
            .equals("dosage_form", Some("  "))
            .build()
            .unwrap();
        assert_eq!(query.root(), &Predicate::equals("brand_name", "JARDIANCE"));
    }

    #[test]
    fn test_empty_query() {
        assert_eq!(QueryBuilder::new().build(), Err(QueryError::EmptyQuery));
        assert_eq!(
            QueryBuilder::new()
                .raw(Some(RawPredicate::Text("   ".into())))
                .equals("route", None)
                .build(),
            Err(QueryError::EmptyQuery)
        );
    }

    #[test]
    fn test_raw_comes_first_and_is_kept() {
        let query = QueryBuilder::new()
            .equals("serious", Some("1"))
            .raw(Some(RawPredicate::Text(
                r#"patient.drug.medicinalproduct:"jardiance""#.into(),
            )))
            .build()
            .unwrap();

        let Predicate::And { children } = query.root() else {
            panic!("expected And, got {:?}", query.root());
        };
        assert!(matches!(children[0], Predicate::Raw(RawPredicate::Text(_))));
        assert_eq!(children[1], Predicate::equals("serious", "1"));
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let query = QueryBuilder::new()
            .equals("route", Some("ORAL"))
            .equals("route", Some("ORAL"))
            .build()
            .unwrap();
        assert_eq!(query.root(), &Predicate::equals("route", "ORAL"));
    }

    #[test]
    fn test_count_by_wraps_filter() {
        let query = QueryBuilder::new()
            .equals("occurcountry", Some("US"))
            .count_by(Some("patient.reaction.reactionmeddrapt.exact"))
            .build()
            .unwrap();
        assert_eq!(
            query.root(),
            &Predicate::CountBy {
                field: "patient.reaction.reactionmeddrapt.exact".into(),
                filter: Some(Box::new(Predicate::equals("occurcountry", "US"))),
            }
        );

        let bare = QueryBuilder::new().count_by(Some("serious")).build().unwrap();
        assert_eq!(bare.filter(), None);
    }

    #[test]
    fn test_grouped_count_by_is_rejected() {
        let result = QueryBuilder::new()
            .equals("serious", Some("1"))
            .group(Predicate::CountBy {
                field: "receivedate".into(),
                filter: None,
            })
            .build();
        assert!(matches!(result, Err(QueryError::InvalidQuery(_))));
    }

    #[test]
    fn test_range_parsing() {
        let query = QueryBuilder::new()
            .range("receivedate", Some("20200101"), None)
            .build()
            .unwrap();
        assert!(matches!(
            query.root(),
            Predicate::Range { gte: Some(RangeBound::Date(_)), lte: None, .. }
        ));

        let bad = QueryBuilder::new()
            .range("receivedate", Some("yesterday"), None)
            .equals("serious", Some("1"))
            .build();
        assert!(matches!(bad, Err(QueryError::InvalidQuery(_))));

        let skipped = QueryBuilder::new()
            .range("receivedate", None, Some(""))
            .equals("serious", Some("1"))
            .build()
            .unwrap();
        assert_eq!(skipped.root(), &Predicate::equals("serious", "1"));
    }

    #[test]
    fn test_any_of() {
        let query = QueryBuilder::new()
            .any_of("phase", &["PHASE2", "PHASE3"])
            .any_of("overallStatus", &["RECRUITING"])
            .any_of::<&str>("other", &[])
            .build()
            .unwrap();
        assert_eq!(
            query.conjuncts(),
            vec![
                &Predicate::Or {
                    children: vec![
                        Predicate::equals("phase", "PHASE2"),
                        Predicate::equals("phase", "PHASE3"),
                    ]
                },
                &Predicate::equals("overallStatus", "RECRUITING"),
            ]
        );
    }

    #[test]
    fn test_text_terms_split_on_whitespace() {
        let query = QueryBuilder::new()
            .text_any("patent_abstract", Some("cancer  treatment"))
            .build()
            .unwrap();
        assert_eq!(
            query.root(),
            &Predicate::TextAny {
                field: "patent_abstract".into(),
                terms: vec!["cancer".into(), "treatment".into()],
            }
        );
    }

    #[test]
    fn test_structured_raw() {
        let query = QueryBuilder::new()
            .raw(Some(RawPredicate::Structured(json!({ "patent_id": "10000000" }))))
            .build()
            .unwrap();
        assert_eq!(
            query.root(),
            &Predicate::Raw(RawPredicate::Structured(json!({ "patent_id": "10000000" })))
        );
    }
}
