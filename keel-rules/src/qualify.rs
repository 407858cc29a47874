//! Whether a row version takes part in a rule.

use keel_expr::{Expr, Relationship, Truth};
use keel_types::RowSnapshot;

/// Relationship plus optional row predicate deciding which source rows count.
///
/// A row qualifies when every relationship source column is non-NULL and the
/// predicate, if any, evaluates to TRUE on that same row version. UNKNOWN does
/// not qualify.
#[derive(Clone, Debug, PartialEq)]
pub struct Qualifier {
    relationship: Relationship,
    predicate: Option<Expr<String>>,
}

impl Qualifier {
    pub fn new(relationship: Relationship, predicate: Option<Expr<String>>) -> Self {
        Self {
            relationship,
            predicate,
        }
    }

    #[inline]
    pub fn relationship(&self) -> &Relationship {
        &self.relationship
    }

    #[inline]
    pub fn predicate(&self) -> Option<&Expr<String>> {
        self.predicate.as_ref()
    }

    /// Three-valued qualification of `row`.
    pub fn evaluate(&self, row: &RowSnapshot) -> Truth {
        let complete = Truth::from(self.relationship.is_complete(row));
        match &self.predicate {
            Some(predicate) => complete.and(predicate.evaluate(row)),
            None => complete,
        }
    }

    #[inline]
    pub fn qualifies(&self, row: &RowSnapshot) -> bool {
        self.evaluate(row).is_true()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_expr::{Filter, Operator};
    use keel_types::{Value, row};

    fn value_over_five() -> Expr<String> {
        Expr::Pred(Filter::new("value", Operator::GreaterThan(Value::from(5))))
    }

    #[test]
    fn incomplete_key_never_qualifies() {
        let q = Qualifier::new(
            Relationship::new([("id1", "counter_id1"), ("id2", "counter_id2")]).expect("rel"),
            None,
        );
        assert!(q.qualifies(&row! { "counter_id1" => 1, "counter_id2" => 1 }));
        assert!(!q.qualifies(&row! { "counter_id1" => 1, "counter_id2" => Value::Null }));
        assert!(!q.qualifies(&row! { "counter_id1" => 1 }));
    }

    #[test]
    fn unknown_predicate_does_not_qualify() {
        let q = Qualifier::new(
            Relationship::new([("id", "counter_id")]).expect("rel"),
            Some(Expr::is_true("condition").and(value_over_five())),
        );
        let r = row! { "counter_id" => 1, "condition" => true, "value" => Value::Null };
        assert_eq!(q.evaluate(&r), Truth::Unknown);
        assert!(!q.qualifies(&r));
        assert!(q.qualifies(&row! { "counter_id" => 1, "condition" => true, "value" => 6 }));
        // FALSE wins over UNKNOWN.
        let r = row! { "counter_id" => 1, "condition" => false, "value" => Value::Null };
        assert_eq!(q.evaluate(&r), Truth::False);
    }
}
