//! Row predicate AST with three-valued evaluation.
#![forbid(unsafe_code)]

use std::cmp::Ordering;

use keel_types::{RowSnapshot, Value};

/// Logical expression over predicates.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr<F> {
    And(Vec<Expr<F>>),
    Or(Vec<Expr<F>>),
    Not(Box<Expr<F>>),
    /// Constant truth value. `Literal(true)` selects every row.
    Literal(bool),
    Pred(Filter<F>),
}

impl<F> Expr<F> {
    /// Build an AND of filters.
    #[inline]
    pub fn all_of(fs: Vec<Filter<F>>) -> Expr<F> {
        Expr::And(fs.into_iter().map(Expr::Pred).collect())
    }

    /// Build an OR of filters.
    #[inline]
    pub fn any_of(fs: Vec<Filter<F>>) -> Expr<F> {
        Expr::Or(fs.into_iter().map(Expr::Pred).collect())
    }

    /// Wrap an expression in a logical NOT.
    #[allow(clippy::should_implement_trait)]
    #[inline]
    pub fn not(e: Expr<F>) -> Expr<F> {
        Expr::Not(Box::new(e))
    }

    /// Expression that selects every row.
    #[inline]
    pub fn always() -> Expr<F> {
        Expr::Literal(true)
    }

    /// Conjunction of `self` and `other`, flattening nested ANDs.
    pub fn and(self, other: Expr<F>) -> Expr<F> {
        match (self, other) {
            (Expr::Literal(true), e) | (e, Expr::Literal(true)) => e,
            (Expr::And(mut l), Expr::And(r)) => {
                l.extend(r);
                Expr::And(l)
            }
            (Expr::And(mut l), e) => {
                l.push(e);
                Expr::And(l)
            }
            (e, Expr::And(mut r)) => {
                r.insert(0, e);
                Expr::And(r)
            }
            (l, r) => Expr::And(vec![l, r]),
        }
    }
}

impl Expr<String> {
    /// `column = value`.
    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Expr::Pred(Filter::new(column, Operator::Equals(value.into())))
    }

    /// `column IS NULL`.
    pub fn is_null(column: impl Into<String>) -> Self {
        Expr::Pred(Filter::new(column, Operator::IsNull))
    }

    /// `column IS NOT NULL`.
    pub fn is_not_null(column: impl Into<String>) -> Self {
        Expr::Pred(Filter::new(column, Operator::IsNotNull))
    }

    /// Array `column` has an element equal to `value`.
    pub fn contains(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Expr::Pred(Filter::new(column, Operator::Contains(value.into())))
    }

    /// Boolean column used directly as a condition.
    pub fn is_true(column: impl Into<String>) -> Self {
        Expr::Pred(Filter::new(column, Operator::IsTrue))
    }
}

impl<F: AsRef<str>> Expr<F> {
    /// Evaluate against `row` with Kleene logic.
    pub fn evaluate(&self, row: &RowSnapshot) -> Truth {
        match self {
            Expr::And(children) => children
                .iter()
                .fold(Truth::True, |acc, e| acc.and(e.evaluate(row))),
            Expr::Or(children) => children
                .iter()
                .fold(Truth::False, |acc, e| acc.or(e.evaluate(row))),
            Expr::Not(inner) => inner.evaluate(row).not(),
            Expr::Literal(b) => Truth::from(*b),
            Expr::Pred(filter) => filter.evaluate(row),
        }
    }

    /// True only when the expression evaluates to TRUE. UNKNOWN does not match.
    #[inline]
    pub fn matches(&self, row: &RowSnapshot) -> bool {
        self.evaluate(row).is_true()
    }

    /// Columns referenced anywhere in the expression, in first-seen order.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'s>(&'s self, out: &mut Vec<&'s str>) {
        match self {
            Expr::And(children) | Expr::Or(children) => {
                for child in children {
                    child.collect_columns(out);
                }
            }
            Expr::Not(inner) => inner.collect_columns(out),
            Expr::Literal(_) => {}
            Expr::Pred(filter) => {
                let column = filter.column.as_ref();
                if !out.contains(&column) {
                    out.push(column);
                }
            }
        }
    }
}

/// Single predicate against a column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter<F> {
    pub column: F,
    pub op: Operator,
}

impl<F> Filter<F> {
    pub fn new(column: impl Into<F>, op: Operator) -> Self {
        Self {
            column: column.into(),
            op,
        }
    }
}

impl<F: AsRef<str>> Filter<F> {
    pub fn evaluate(&self, row: &RowSnapshot) -> Truth {
        let value = row.get(self.column.as_ref());
        match &self.op {
            Operator::Equals(rhs) => Truth::from(value.sql_eq(rhs)),
            Operator::NotEquals(rhs) => Truth::from(value.sql_eq(rhs)).not(),
            Operator::GreaterThan(rhs) => compare(value, rhs, |o| o == Ordering::Greater),
            Operator::GreaterThanOrEquals(rhs) => compare(value, rhs, |o| o != Ordering::Less),
            Operator::LessThan(rhs) => compare(value, rhs, |o| o == Ordering::Less),
            Operator::LessThanOrEquals(rhs) => compare(value, rhs, |o| o != Ordering::Greater),
            Operator::In(items) => items
                .iter()
                .fold(Truth::False, |acc, item| acc.or(Truth::from(value.sql_eq(item)))),
            Operator::Contains(needle) => match value {
                Value::Null => Truth::Unknown,
                Value::Array(items) => items
                    .iter()
                    .fold(Truth::False, |acc, item| acc.or(Truth::from(item.sql_eq(needle)))),
                _ => Truth::False,
            },
            Operator::IsNull => Truth::from(value.is_null()),
            Operator::IsNotNull => Truth::from(!value.is_null()),
            Operator::IsTrue => match value {
                Value::Null => Truth::Unknown,
                Value::Boolean(b) => Truth::from(*b),
                _ => Truth::False,
            },
        }
    }
}

fn compare(lhs: &Value, rhs: &Value, accept: impl Fn(Ordering) -> bool) -> Truth {
    if lhs.is_null() || rhs.is_null() {
        return Truth::Unknown;
    }
    match lhs.sql_cmp(rhs) {
        Some(ordering) => Truth::from(accept(ordering)),
        None => Truth::False,
    }
}

/// Comparison and membership operators over row values.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    // Equality
    Equals(Value),
    NotEquals(Value),

    GreaterThan(Value),
    GreaterThanOrEquals(Value),
    LessThan(Value),
    LessThanOrEquals(Value),

    // Set membership
    In(Vec<Value>),

    /// Array column holds an element equal to the operand.
    Contains(Value),

    // Null tests
    IsNull,
    IsNotNull,

    /// The column itself is a boolean condition.
    IsTrue,
}

/// SQL three-valued truth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    #[inline]
    pub fn is_true(self) -> bool {
        self == Truth::True
    }

    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }
}

impl From<bool> for Truth {
    fn from(b: bool) -> Self {
        if b { Truth::True } else { Truth::False }
    }
}

impl From<Option<bool>> for Truth {
    fn from(b: Option<bool>) -> Self {
        b.map_or(Truth::Unknown, Truth::from)
    }
}
