//! Column pairings between a source row and the target rows it refers to.

use keel_result::{Error, Result};
use keel_types::{RowSnapshot, Value};

use crate::expr::{Expr, Filter, Operator};

/// Ordered, non-empty list of `(target_column, source_column)` pairs.
///
/// A target row matches a source row when every target column equals the
/// corresponding source column. NULL never matches, so a source row with any
/// NULL key column has no target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    targets: Vec<String>,
    sources: Vec<String>,
}

impl Relationship {
    /// Build from `(target_column, source_column)` pairs.
    pub fn new<I, T, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (T, S)>,
        T: Into<String>,
        S: Into<String>,
    {
        let (targets, sources): (Vec<String>, Vec<String>) = pairs
            .into_iter()
            .map(|(t, s)| (t.into(), s.into()))
            .unzip();
        Self::from_columns(targets, sources)
    }

    /// Build from parallel column lists, which must have equal, non-zero length.
    pub fn from_columns<T, S>(targets: Vec<T>, sources: Vec<S>) -> Result<Self>
    where
        T: Into<String>,
        S: Into<String>,
    {
        let targets: Vec<String> = targets.into_iter().map(Into::into).collect();
        let sources: Vec<String> = sources.into_iter().map(Into::into).collect();
        if targets.is_empty() || sources.is_empty() {
            return Err(Error::configuration(
                "relationship requires at least one column pair",
            ));
        }
        if targets.len() != sources.len() {
            return Err(Error::ConfigurationError(format!(
                "relationship column count mismatch: {} target columns ({}) vs {} source columns ({})",
                targets.len(),
                targets.join(", "),
                sources.len(),
                sources.join(", ")
            )));
        }
        for side in [&targets, &sources] {
            if let Some(dup) = first_duplicate(side) {
                return Err(Error::ConfigurationError(format!(
                    "relationship lists column '{}' more than once",
                    dup
                )));
            }
        }
        Ok(Self { targets, sources })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[inline]
    pub fn target_columns(&self) -> &[String] {
        &self.targets
    }

    #[inline]
    pub fn source_columns(&self) -> &[String] {
        &self.sources
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.targets
            .iter()
            .zip(&self.sources)
            .map(|(t, s)| (t.as_str(), s.as_str()))
    }

    /// The same pairing seen from the other side.
    pub fn reversed(&self) -> Relationship {
        Relationship {
            targets: self.sources.clone(),
            sources: self.targets.clone(),
        }
    }

    /// True when every source column of `source` is non-NULL.
    #[inline]
    pub fn is_complete(&self, source: &RowSnapshot) -> bool {
        source.all_present(&self.sources)
    }

    /// Target-side equality key for `source`, or `None` if the key is
    /// incomplete.
    pub fn key_for(&self, source: &RowSnapshot) -> Option<Vec<(String, Value)>> {
        self.pairs()
            .map(|(t, s)| {
                let v = source.get(s);
                (!v.is_null()).then(|| (t.to_string(), v.clone()))
            })
            .collect()
    }

    /// Filter selecting the target rows of `source`, or `None` if the key is
    /// incomplete.
    pub fn filter_for(&self, source: &RowSnapshot) -> Option<Expr<String>> {
        let key = self.key_for(source)?;
        Some(Expr::all_of(
            key.into_iter()
                .map(|(column, value)| Filter::new(column, Operator::Equals(value)))
                .collect(),
        ))
    }

    /// True when `target` is the row `source` refers to.
    pub fn matches(&self, target: &RowSnapshot, source: &RowSnapshot) -> bool {
        self.pairs()
            .all(|(t, s)| target.get(t).sql_eq(source.get(s)) == Some(true))
    }

    /// True when any source column differs between `old` and `new`, counting a
    /// change in nullness as a difference.
    pub fn changed(&self, old: &RowSnapshot, new: &RowSnapshot) -> bool {
        self.sources
            .iter()
            .any(|c| old.get(c).is_distinct_from(new.get(c)))
    }
}

fn first_duplicate(columns: &[String]) -> Option<&str> {
    columns
        .iter()
        .enumerate()
        .find(|(idx, c)| columns[..*idx].contains(*c))
        .map(|(_, c)| c.as_str())
}
