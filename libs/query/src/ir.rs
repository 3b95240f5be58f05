//! Predicate IR
//!
//! A provider-agnostic description of one search request. Nodes are plain values;
//! a [`Query`] wraps a root node that has passed [`Query::validate`].

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, Result};

/// One node of the predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Equals {
        field: String,
        value: String,
    },
    Contains {
        field: String,
        value: String,
        case_sensitive: bool,
    },
    TextAny {
        field: String,
        terms: Vec<String>,
    },
    TextAll {
        field: String,
        terms: Vec<String>,
    },
    TextPhrase {
        field: String,
        phrase: String,
    },
    Range {
        field: String,
        gte: Option<RangeBound>,
        lte: Option<RangeBound>,
    },
    And {
        children: Vec<Predicate>,
    },
    Or {
        children: Vec<Predicate>,
    },
    /// Aggregation directive. Only valid at the root; `filter` narrows the
    /// population being counted.
    CountBy {
        field: String,
        filter: Option<Box<Predicate>>,
    },
    /// Caller-supplied query in the provider's own syntax.
    Raw(RawPredicate),
}

/// A raw predicate, either query text or a structured query object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RawPredicate {
    Text(String),
    Structured(Value),
}

impl Predicate {
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// The field a leaf predicate targets.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Equals { field, .. }
            | Self::Contains { field, .. }
            | Self::TextAny { field, .. }
            | Self::TextAll { field, .. }
            | Self::TextPhrase { field, .. }
            | Self::Range { field, .. }
            | Self::CountBy { field, .. } => Some(field),
            Self::And { .. } | Self::Or { .. } | Self::Raw(_) => None,
        }
    }

    /// `Some((field, values))` when this node is an `Or` of `Equals` on a single field.
    pub fn as_same_field_equals(&self) -> Option<(&str, Vec<&str>)> {
        let Self::Or { children } = self else {
            return None;
        };
        let mut field = None;
        let mut values = Vec::with_capacity(children.len());
        for child in children {
            let Self::Equals { field: f, value } = child else {
                return None;
            };
            match field {
                None => field = Some(f.as_str()),
                Some(existing) if existing != f => return None,
                Some(_) => {}
            }
            values.push(value.as_str());
        }
        field.map(|f| (f, values))
    }

    fn contains_count_by(&self) -> bool {
        match self {
            Self::CountBy { .. } => true,
            Self::And { children } | Self::Or { children } => {
                children.iter().any(Predicate::contains_count_by)
            }
            _ => false,
        }
    }

    /// Visit this node and all of its descendants, parents first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Predicate)) {
        visit(self);
        match self {
            Self::And { children } | Self::Or { children } => {
                for child in children {
                    child.walk(visit);
                }
            }
            Self::CountBy {
                filter: Some(filter),
                ..
            } => filter.walk(visit),
            _ => {}
        }
    }

    fn check(&self) -> Result<()> {
        if let Some(field) = self.field() {
            if field.trim().is_empty() {
                return Err(QueryError::invalid("predicate field name is empty"));
            }
        }

        match self {
            Self::TextAny { field, terms } | Self::TextAll { field, terms } => {
                if terms.is_empty() || terms.iter().any(|t| t.trim().is_empty()) {
                    return Err(QueryError::invalid(format!(
                        "text match on '{field}' needs non-empty terms"
                    )));
                }
            }
            Self::TextPhrase { field, phrase } if phrase.trim().is_empty() => {
                return Err(QueryError::invalid(format!(
                    "phrase match on '{field}' is empty"
                )));
            }
            Self::Range { field, gte, lte } => match (gte, lte) {
                (None, None) => {
                    return Err(QueryError::invalid(format!(
                        "range on '{field}' has no bounds"
                    )))
                }
                (Some(lo), Some(hi)) if lo.kind() != hi.kind() => {
                    return Err(QueryError::invalid(format!(
                        "range on '{field}' mixes a date and a number"
                    )))
                }
                _ => {}
            },
            Self::And { children } | Self::Or { children } => {
                if children.is_empty() {
                    return Err(QueryError::invalid("boolean group has no children"));
                }
                for child in children {
                    if child.contains_count_by() {
                        return Err(QueryError::invalid(
                            "aggregation must be the root of the query",
                        ));
                    }
                    child.check()?;
                }
            }
            Self::CountBy { filter, .. } => {
                if let Some(filter) = filter {
                    if filter.contains_count_by() {
                        return Err(QueryError::invalid(
                            "an aggregation filter cannot contain another aggregation",
                        ));
                    }
                    filter.check()?;
                }
            }
            Self::Raw(RawPredicate::Text(text)) if text.trim().is_empty() => {
                return Err(QueryError::invalid("raw query text is empty"));
            }
            Self::Raw(RawPredicate::Structured(Value::Null)) => {
                return Err(QueryError::invalid("structured raw query is null"));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Kind of a range bound; both bounds of a range share one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundKind {
    Date,
    Number,
}

/// One side of a range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeBound {
    Date(NaiveDate),
    Number(f64),
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"];

impl RangeBound {
    /// Parse `YYYY-MM-DD`, `YYYYMMDD`, `YYYY/MM/DD` or a decimal number.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(input, format) {
                return Ok(Self::Date(date));
            }
        }
        match input.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(Self::Number(n)),
            _ => Err(QueryError::invalid(format!(
                "'{input}' is neither a date nor a number"
            ))),
        }
    }

    pub fn kind(&self) -> BoundKind {
        match self {
            Self::Date(_) => BoundKind::Date,
            Self::Number(_) => BoundKind::Number,
        }
    }
}

impl From<NaiveDate> for RangeBound {
    fn from(date: NaiveDate) -> Self {
        Self::Date(date)
    }
}

impl From<f64> for RangeBound {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Self::Number(n) => f.write_str(&format_number(*n)),
        }
    }
}

/// Render a number without a trailing `.0` when it is integral.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// A validated predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    root: Predicate,
}

impl Query {
    /// Wrap a hand-built tree, checking every structural invariant.
    pub fn from_root(root: Predicate) -> Result<Self> {
        let query = Self { root };
        query.validate()?;
        Ok(query)
    }

    pub fn validate(&self) -> Result<()> {
        self.root.check()
    }

    pub fn root(&self) -> &Predicate {
        &self.root
    }

    pub fn is_aggregation(&self) -> bool {
        matches!(self.root, Predicate::CountBy { .. })
    }

    pub fn count_field(&self) -> Option<&str> {
        match &self.root {
            Predicate::CountBy { field, .. } => Some(field),
            _ => None,
        }
    }

    /// The item-selecting part of the query: the root itself, or the aggregation's
    /// filter.
    pub fn filter(&self) -> Option<&Predicate> {
        match &self.root {
            Predicate::CountBy { filter, .. } => filter.as_deref(),
            other => Some(other),
        }
    }

    /// Top-level conjuncts of the filter. A non-`And` filter is its own only conjunct.
    pub fn conjuncts(&self) -> Vec<&Predicate> {
        match self.filter() {
            None => Vec::new(),
            Some(Predicate::And { children }) => children.iter().collect(),
            Some(other) => vec![other],
        }
    }
}
