//! Rendering helpers shared by the textual dialects

use chrono::NaiveDate;

use crate::ir::{format_number, Predicate, RangeBound, RawPredicate};
use crate::page::CompileOptions;

/// Largest integer exactly representable as a JSON number.
pub(crate) const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    And,
    Or,
}

impl Op {
    fn keyword(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    fn other(self) -> Self {
        match self {
            Self::And => Self::Or,
            Self::Or => Self::And,
        }
    }
}

fn earliest_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Fill an open side of a range with its sentinel.
pub(crate) fn close_range(
    gte: Option<RangeBound>,
    lte: Option<RangeBound>,
    options: &CompileOptions,
) -> (RangeBound, RangeBound) {
    let dated = matches!(gte.or(lte), Some(RangeBound::Date(_)));
    let (min, max) = if dated {
        (
            RangeBound::Date(earliest_date()),
            RangeBound::Date(options.today()),
        )
    } else {
        (
            RangeBound::Number(-MAX_SAFE_INTEGER),
            RangeBound::Number(MAX_SAFE_INTEGER),
        )
    };
    (gte.unwrap_or(min), lte.unwrap_or(max))
}

/// Render a bound with a provider date format.
pub(crate) fn bound_text(bound: &RangeBound, date_format: &str) -> String {
    match bound {
        RangeBound::Date(date) => date.format(date_format).to_string(),
        RangeBound::Number(n) => format_number(*n),
    }
}

pub(crate) fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// A single search token: bare when it is a plain word, otherwise quoted with
/// inner quotes escaped. Operator keywords are always quoted.
pub(crate) fn quote_term(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !matches!(value, "AND" | "OR" | "NOT");
    if plain {
        value.to_string()
    } else {
        format!("\"{}\"", escape_quotes(value))
    }
}

fn has_operator(text: &str, op: Op) -> bool {
    let keyword = op.keyword();
    text.contains(&format!(" {keyword} ")) || text.contains(&format!("+{keyword}+"))
}

/// A child of a group with operator `op` must be parenthesized when its own
/// top-level operator differs.
fn needs_parens(op: Op, child: &Predicate) -> bool {
    match (op, child) {
        (Op::And, Predicate::Or { .. }) | (Op::Or, Predicate::And { .. }) => true,
        (op, Predicate::Raw(RawPredicate::Text(text))) => has_operator(text, op.other()),
        _ => false,
    }
}

/// Join a group's rendered children with `token`. Same-operator children are
/// inlined, which is only equivalent because both operators are associative.
pub(crate) fn join_group(
    op: Op,
    children: &[Predicate],
    token: &str,
    render: impl Fn(&Predicate) -> String,
) -> String {
    children
        .iter()
        .map(|child| {
            let text = render(child);
            if children.len() > 1 && needs_parens(op, child) {
                format!("({text})")
            } else {
                text
            }
        })
        .collect::<Vec<_>>()
        .join(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CompileOptions {
        CompileOptions::fixed(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap())
    }

    #[test]
    fn test_open_date_range_uses_sentinels() {
        let from = RangeBound::parse("20200101").unwrap();
        let (lo, hi) = close_range(Some(from), None, &options());
        assert_eq!(bound_text(&lo, "%Y%m%d"), "20200101");
        assert_eq!(bound_text(&hi, "%Y%m%d"), "20240630");

        let (lo, _) = close_range(None, Some(from), &options());
        assert_eq!(bound_text(&lo, "%Y%m%d"), "19000101");
    }

    #[test]
    fn test_open_number_range_uses_sentinels() {
        let (lo, hi) = close_range(None, Some(RangeBound::Number(300.0)), &options());
        assert_eq!(bound_text(&lo, "%Y"), "-9007199254740991");
        assert_eq!(bound_text(&hi, "%Y"), "300");
    }

    #[test]
    fn test_quote_term() {
        assert_eq!(quote_term("PHASE3"), "PHASE3");
        assert_eq!(quote_term("covid-19"), "covid-19");
        assert_eq!(quote_term("Eli Lilly"), r#""Eli Lilly""#);
        assert_eq!(quote_term(r#"the "ACCORD" trial"#), r#""the \"ACCORD\" trial""#);
        assert_eq!(quote_term("C++"), r#""C++""#);
        assert_eq!(quote_term("OR"), r#""OR""#);
        assert_eq!(quote_term(""), r#""""#);
    }

    #[test]
    fn test_join_group_parenthesizes_mixed_operators() {
        let children = vec![
            Predicate::Raw(RawPredicate::Text("a OR b".into())),
            Predicate::equals("c", "d"),
        ];
        let rendered = join_group(Op::And, &children, " AND ", |p| match p {
            Predicate::Raw(RawPredicate::Text(t)) => t.clone(),
            _ => "c".into(),
        });
        assert_eq!(rendered, "(a OR b) AND c");
    }
}
