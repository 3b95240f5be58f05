//! Pagination input, result-shape hints and compile options

use std::fmt;

use chrono::{NaiveDate, Utc};
use pharmaquery_document::FieldPath;
use serde::{Deserialize, Serialize};

/// Caller-requested pagination. Out-of-range values are clamped, never rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub cursor: Option<Cursor>,
}

/// An opaque page token, or the sort-key values of the last item seen for
/// keyset pagination over several sort keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cursor {
    Token(String),
    Keys(Vec<String>),
}

impl Cursor {
    fn is_empty(&self) -> bool {
        match self {
            Self::Token(token) => token.is_empty(),
            Self::Keys(keys) => keys.is_empty(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Token(token) => serde_json::Value::from(token.as_str()),
            Self::Keys(keys) => serde_json::Value::from(keys.clone()),
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(token) => f.write_str(token),
            Self::Keys(keys) => f.write_str(&keys.join(",")),
        }
    }
}

impl From<String> for Cursor {
    fn from(token: String) -> Self {
        Self::Token(token)
    }
}

impl From<&str> for Cursor {
    fn from(token: &str) -> Self {
        Self::Token(token.to_string())
    }
}

impl From<Vec<String>> for Cursor {
    fn from(keys: Vec<String>) -> Self {
        Self::Keys(keys)
    }
}

impl Pagination {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit,
            offset,
            cursor: None,
        }
    }

    pub fn with_cursor(mut self, cursor: Option<impl Into<Cursor>>) -> Self {
        self.cursor = cursor.map(Into::into).filter(|c| !c.is_empty());
        self
    }

    /// Clamp against a provider's page-size limits.
    pub fn resolve(&self, limits: PageLimits) -> PageState {
        let limit = self.limit.unwrap_or(i64::from(limits.default));
        let limit = limit.clamp(i64::from(limits.floor), i64::from(limits.max));
        PageState {
            limit: Some(limit as u32),
            offset: Some(self.offset.unwrap_or(0).max(0) as u64),
            cursor: self.cursor.clone(),
        }
    }
}

/// A provider's page-size floor, ceiling and default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageLimits {
    pub floor: u32,
    pub max: u32,
    pub default: u32,
}

impl PageLimits {
    pub const fn new(max: u32, default: u32) -> Self {
        Self {
            floor: 1,
            max,
            default,
        }
    }
}

/// Pagination state as sent to the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

impl PageState {
    /// No pagination parameters at all (aggregations and single-record lookups).
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// One sort key. `direction` is `None` when the provider default applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: Option<SortDirection>,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Some(SortDirection::Asc),
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Some(SortDirection::Desc),
        }
    }

    /// Parse `field`, `-field`, `field:asc` or `field:desc`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if let Some(field) = input.strip_prefix('-') {
            return (!field.is_empty()).then(|| Self::desc(field));
        }
        let (field, direction) = match input.rsplit_once(':') {
            Some((field, "desc")) => (field, Some(SortDirection::Desc)),
            Some((field, "asc")) => (field, Some(SortDirection::Asc)),
            _ => (input, None),
        };
        (!field.is_empty()).then(|| Self {
            field: field.to_string(),
            direction,
        })
    }
}

/// Hints about the requested result shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeHints {
    pub fields: Vec<FieldPath>,
    pub sort: Vec<SortKey>,
}

impl ShapeHints {
    pub fn with_fields(mut self, fields: Vec<FieldPath>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }
}

/// Inputs to compilation that do not come from the query itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Upper sentinel for date ranges with no upper bound. Unset means the
    /// current UTC date at each compile.
    pub today: Option<NaiveDate>,
}

impl CompileOptions {
    /// Pin the compile date.
    pub fn fixed(today: NaiveDate) -> Self {
        Self { today: Some(today) }
    }

    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }
}
