//! Backend predicates produced by the filter compiler.
//!
//! A [`Predicate`] is the filter object handed to a [`Backend`](super::Backend).
//! It renders as SQL-like text through `Display` (used in logs and tests) and
//! can be evaluated against a [`Row`] with SQL three-valued logic, which is
//! what the in-memory backend does.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use regex::{Regex, RegexBuilder};

use super::{Row, Value};

/// Binary comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    Like {
        column: String,
        pattern: String,
        case_insensitive: bool,
        negated: bool,
    },
    InArray {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    /// Composite-key membership: `(a, b) IN ((1, 2), (3, 4))`.
    InTuples {
        columns: Vec<String>,
        tuples: Vec<Vec<Value>>,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(column: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// Conjunction of `parts`; `None` when empty, the part itself when alone.
    /// Nested conjunctions are spliced into one flat list.
    pub fn and(parts: Vec<Predicate>) -> Option<Predicate> {
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Predicate::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Predicate::And(flat)),
        }
    }

    /// Disjunction of `parts`; `None` when empty, the part itself when alone.
    /// Nested disjunctions are spliced into one flat list.
    pub fn or(parts: Vec<Predicate>) -> Option<Predicate> {
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Predicate::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Predicate::Or(flat)),
        }
    }

    pub fn negate(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    /// Membership of the `columns` tuple in `tuples`. Single-column keys use
    /// a plain `IN` list.
    pub fn in_tuples(columns: Vec<String>, tuples: Vec<Vec<Value>>) -> Predicate {
        if columns.len() == 1 {
            let column = columns.into_iter().next().unwrap_or_default();
            let values = tuples
                .into_iter()
                .filter_map(|tuple| tuple.into_iter().next())
                .collect();
            Predicate::InArray {
                column,
                values,
                negated: false,
            }
        } else {
            Predicate::InTuples { columns, tuples }
        }
    }

    /// Whether `row` satisfies the predicate. Unknown (NULL) results do not match.
    ///
    /// Compiles LIKE patterns on every call; use [`Predicate::matcher`] to
    /// test many rows.
    pub fn matches(&self, row: &Row) -> bool {
        self.matcher().matches(row)
    }

    /// A row matcher with every LIKE pattern of the tree compiled once.
    pub fn matcher(&self) -> Matcher<'_> {
        let mut patterns = LikePatterns::default();
        self.collect_patterns(&mut patterns);
        Matcher {
            predicate: self,
            patterns,
        }
    }

    fn collect_patterns(&self, patterns: &mut LikePatterns) {
        match self {
            Predicate::Like {
                pattern,
                case_insensitive,
                ..
            } => {
                patterns
                    .0
                    .entry((pattern.clone(), *case_insensitive))
                    .or_insert_with(|| like_regex(pattern, *case_insensitive));
            }
            Predicate::And(parts) | Predicate::Or(parts) => {
                for part in parts {
                    part.collect_patterns(patterns);
                }
            }
            Predicate::Not(inner) => inner.collect_patterns(patterns),
            _ => {}
        }
    }

    /// Three-valued evaluation: `None` is SQL `UNKNOWN`.
    fn eval(&self, row: &Row, patterns: &LikePatterns) -> Option<bool> {
        match self {
            Predicate::Compare { column, op, value } => {
                let lhs = column_value(row, column);
                if is_null(lhs) || is_null(value) {
                    return None;
                }
                match op {
                    CompareOp::Eq => Some(values_equal(lhs, value)),
                    CompareOp::Ne => Some(!values_equal(lhs, value)),
                    CompareOp::Lt => compare_values(lhs, value).map(|o| o == Ordering::Less),
                    CompareOp::Lte => compare_values(lhs, value).map(|o| o != Ordering::Greater),
                    CompareOp::Gt => compare_values(lhs, value).map(|o| o == Ordering::Greater),
                    CompareOp::Gte => compare_values(lhs, value).map(|o| o != Ordering::Less),
                }
            }
            Predicate::Like {
                column,
                pattern,
                case_insensitive,
                negated,
            } => {
                let lhs = column_value(row, column);
                let text = value_text(lhs)?;
                let matched = patterns
                    .0
                    .get(&(pattern.clone(), *case_insensitive))
                    .and_then(Option::as_ref)
                    .is_some_and(|re| re.is_match(&text));
                Some(matched != *negated)
            }
            Predicate::InArray {
                column,
                values,
                negated,
            } => {
                let lhs = column_value(row, column);
                if is_null(lhs) {
                    return None;
                }
                let found = values.iter().any(|v| values_equal(lhs, v));
                Some(found != *negated)
            }
            Predicate::InTuples { columns, tuples } => {
                let lhs: Vec<&Value> = columns.iter().map(|c| column_value(row, c)).collect();
                if lhs.iter().any(|v| is_null(v)) {
                    return None;
                }
                Some(tuples.iter().any(|tuple| {
                    tuple.len() == lhs.len()
                        && tuple.iter().zip(&lhs).all(|(rhs, lhs)| values_equal(lhs, rhs))
                }))
            }
            Predicate::IsNull { column, negated } => {
                Some(is_null(column_value(row, column)) != *negated)
            }
            Predicate::And(parts) => {
                let mut unknown = false;
                for part in parts {
                    match part.eval(row, patterns) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                if unknown { None } else { Some(true) }
            }
            Predicate::Or(parts) => {
                let mut unknown = false;
                for part in parts {
                    match part.eval(row, patterns) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                if unknown { None } else { Some(false) }
            }
            Predicate::Not(inner) => inner.eval(row, patterns).map(|b| !b),
        }
    }
}

/// Compiled LIKE patterns keyed by (pattern, case-insensitive). `None`
/// marks a pattern that failed to compile and never matches.
#[derive(Debug, Default)]
struct LikePatterns(HashMap<(String, bool), Option<Regex>>);

/// A [`Predicate`] prepared for evaluation over many rows.
#[derive(Debug)]
pub struct Matcher<'a> {
    predicate: &'a Predicate,
    patterns: LikePatterns,
}

impl Matcher<'_> {
    pub fn matches(&self, row: &Row) -> bool {
        self.predicate.eval(row, &self.patterns) == Some(true)
    }
}

static NULL: Value = Value::Null;

fn column_value<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&NULL)
}

fn is_null(value: &Value) -> bool {
    matches!(value, Value::Null)
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Enum(name) => Some(name.to_string()),
        other => Some(other.to_string()),
    }
}

/// Equality across the value shapes a row can hold. Enum literals compare
/// equal to strings with the same text.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        (Value::String(x), Value::Enum(y)) | (Value::Enum(y), Value::String(x)) => {
            x.as_str() == y.as_str()
        }
        _ => a == b,
    }
}

/// Ordering between two comparable values; `None` for incomparable shapes.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(_) | Value::Enum(_), Value::String(_) | Value::Enum(_)) => {
            let x = value_text(a)?;
            let y = value_text(b)?;
            Some(x.cmp(&y))
        }
        (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            for (l, r) in x.iter().zip(y) {
                match compare_values(l, r)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        _ => None,
    }
}

/// Compile a SQL LIKE pattern (`%`, `_`, backslash escapes) to an anchored regex.
fn like_regex(pattern: &str, case_insensitive: bool) -> Option<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 2);
    expr.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    expr.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');

    RegexBuilder::new(&expr)
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(true)
        .build()
        .ok()
}

/// Sort direction for ordering terms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "asc" => Some(OrderDirection::Asc),
            "desc" => Some(OrderDirection::Desc),
            _ => None,
        }
    }
}

/// One `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub column: String,
    pub direction: OrderDirection,
}

impl OrderTerm {
    pub fn new(column: impl Into<String>, direction: OrderDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }

    /// Compare two rows on this term. NULL sorts as the largest value, so it
    /// comes last ascending and first descending.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let x = column_value(a, &self.column);
        let y = column_value(b, &self.column);
        let ordering = match (is_null(x), is_null(y)) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare_values(x, y).unwrap_or(Ordering::Equal),
        };
        match self.direction {
            OrderDirection::Asc => ordering,
            OrderDirection::Desc => ordering.reverse(),
        }
    }
}

impl fmt::Display for OrderTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.column, self.direction.to_sql())
    }
}

struct SqlLiteral<'a>(&'a Value);

impl fmt::Display for SqlLiteral<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::Null => f.write_str("NULL"),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Enum(name) => write!(f, "'{}'", name.as_str().replace('\'', "''")),
            Value::List(items) => {
                f.write_str("(")?;
                write_joined(f, items.iter().map(SqlLiteral))?;
                f.write_str(")")
            }
            other => write!(f, "{other}"),
        }
    }
}

fn write_joined<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: impl Iterator<Item = T>,
) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { column, op, value } => {
                write!(f, "{} {} {}", column, op.as_sql(), SqlLiteral(value))
            }
            Predicate::Like {
                column,
                pattern,
                case_insensitive,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                let like = if *case_insensitive { "ILIKE" } else { "LIKE" };
                write!(
                    f,
                    "{} {}{} {}",
                    column,
                    not,
                    like,
                    SqlLiteral(&Value::String(pattern.clone()))
                )
            }
            Predicate::InArray {
                column,
                values,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{column} {not}IN (")?;
                write_joined(f, values.iter().map(SqlLiteral))?;
                f.write_str(")")
            }
            Predicate::InTuples { columns, tuples } => {
                write!(f, "({}) IN (", columns.join(", "))?;
                for (i, tuple) in tuples.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str("(")?;
                    write_joined(f, tuple.iter().map(SqlLiteral))?;
                    f.write_str(")")?;
                }
                f.write_str(")")
            }
            Predicate::IsNull { column, negated } => {
                if *negated {
                    write!(f, "{column} IS NOT NULL")
                } else {
                    write!(f, "{column} IS NULL")
                }
            }
            Predicate::And(parts) => write_compound(f, parts, " AND "),
            Predicate::Or(parts) => write_compound(f, parts, " OR "),
            Predicate::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}

fn write_compound(f: &mut fmt::Formatter<'_>, parts: &[Predicate], sep: &str) -> fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "({part})")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    #[test]
    fn test_display_matches_sql_shape() {
        let p = Predicate::or(vec![
            Predicate::eq("name", s("Tom")),
            Predicate::eq("name", s("Tony")),
        ])
        .unwrap();
        assert_eq!(p.to_string(), "(name = 'Tom') OR (name = 'Tony')");

        let like = Predicate::Like {
            column: "name".into(),
            pattern: "T%".into(),
            case_insensitive: false,
            negated: false,
        };
        assert_eq!(like.to_string(), "name LIKE 'T%'");

        let tuples = Predicate::in_tuples(
            vec!["a".into(), "b".into()],
            vec![vec![Value::from(1), s("x")]],
        );
        assert_eq!(tuples.to_string(), "(a, b) IN ((1, 'x'))");
    }

    fn like_matches(text: &str, pattern: &str, case_insensitive: bool) -> bool {
        like_regex(pattern, case_insensitive).is_some_and(|re| re.is_match(text))
    }

    #[test]
    fn test_connectives_flatten() {
        let a = Predicate::eq("a", Value::from(1));
        let b = Predicate::eq("b", Value::from(2));
        let c = Predicate::eq("c", Value::from(3));

        let inner = Predicate::and(vec![a.clone(), b.clone()]).unwrap();
        let flat = Predicate::and(vec![inner, c.clone()]).unwrap();
        assert_eq!(flat, Predicate::And(vec![a.clone(), b.clone(), c.clone()]));
        assert_eq!(flat.to_string(), "(a = 1) AND (b = 2) AND (c = 3)");

        // a disjunction inside a conjunction keeps its grouping
        let or = Predicate::or(vec![a.clone(), b.clone()]).unwrap();
        let mixed = Predicate::and(vec![or.clone(), c.clone()]).unwrap();
        assert_eq!(mixed, Predicate::And(vec![or, c]));
    }

    #[test]
    fn test_matcher_reuses_like_patterns() {
        let p = Predicate::or(vec![
            Predicate::Like {
                column: "name".into(),
                pattern: "T%".into(),
                case_insensitive: false,
                negated: false,
            },
            Predicate::Like {
                column: "name".into(),
                pattern: "T%".into(),
                case_insensitive: false,
                negated: true,
            }
            .negate(),
        ])
        .unwrap();
        let matcher = p.matcher();
        assert_eq!(matcher.patterns.0.len(), 1);
        assert!(matcher.matches(&row(&[("name", s("Tom"))])));
        assert!(!matcher.matches(&row(&[("name", s("Ann"))])));
        assert!(!matcher.matches(&row(&[("name", Value::Null)])));
    }

    #[test]
    fn test_in_tuples_evaluation() {
        let p = Predicate::in_tuples(
            vec!["orderNo".into(), "region".into()],
            vec![vec![Value::from(1), s("eu")], vec![Value::from(2), s("us")]],
        );
        assert!(p.matches(&row(&[("orderNo", Value::from(1)), ("region", s("eu"))])));
        assert!(p.matches(&row(&[("orderNo", Value::from(2.0)), ("region", s("us"))])));
        assert!(!p.matches(&row(&[("orderNo", Value::from(1)), ("region", s("us"))])));
        assert!(!p.matches(&row(&[("orderNo", Value::from(1)), ("region", Value::Null)])));
    }

    #[test]
    fn test_like_patterns() {
        assert!(like_matches("Tom", "T%", false));
        assert!(like_matches("Tom", "T_m", false));
        assert!(!like_matches("tom", "T%", false));
        assert!(like_matches("tom", "T%", true));
        assert!(like_matches("100%", "100\\%", false));
        assert!(!like_matches("1000", "100\\%", false));
        assert!(like_matches("a.b", "a.b", false));
        assert!(!like_matches("axb", "a.b", false));
    }

    #[test]
    fn test_null_comparisons_are_unknown() {
        let r = row(&[("age", Value::Null)]);
        let gt = Predicate::compare("age", CompareOp::Gt, Value::from(3));
        assert!(!gt.matches(&r));
        // NOT(UNKNOWN) is still UNKNOWN
        assert!(!gt.clone().negate().matches(&r));
        assert!(
            Predicate::IsNull {
                column: "age".into(),
                negated: false
            }
            .matches(&r)
        );
    }

    #[test]
    fn test_three_valued_connectives() {
        let r = row(&[("age", Value::Null), ("name", s("Tom"))]);
        let unknown = Predicate::compare("age", CompareOp::Eq, Value::from(1));
        let yes = Predicate::eq("name", s("Tom"));
        let no = Predicate::eq("name", s("Tony"));

        assert!(Predicate::Or(vec![unknown.clone(), yes.clone()]).matches(&r));
        assert!(!Predicate::Or(vec![unknown.clone(), no.clone()]).matches(&r));
        assert!(!Predicate::And(vec![unknown, yes]).matches(&r));
    }

    #[test]
    fn test_numeric_and_enum_equality() {
        let r = row(&[
            ("score", Value::from(2.0)),
            ("role", Value::Enum(async_graphql::Name::new("admin"))),
        ]);
        assert!(Predicate::eq("score", Value::from(2)).matches(&r));
        assert!(Predicate::eq("role", s("admin")).matches(&r));
        assert!(
            Predicate::InArray {
                column: "role".into(),
                values: vec![s("member"), s("admin")],
                negated: false,
            }
            .matches(&r)
        );
    }

    #[test]
    fn test_order_term_nulls_last_ascending() {
        let a = row(&[("age", Value::from(3))]);
        let b = row(&[("age", Value::Null)]);
        let asc = OrderTerm::new("age", OrderDirection::Asc);
        let desc = OrderTerm::new("age", OrderDirection::Desc);
        assert_eq!(asc.compare(&a, &b), Ordering::Less);
        assert_eq!(desc.compare(&a, &b), Ordering::Greater);
    }
}
