/// Table definition registered with the store.
///
/// `key_columns` are the columns other tables may reference. Updating one of
/// them needs an exclusive row lock, while updates that leave them alone only
/// conflict with share locks and stronger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub key_columns: Vec<String>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_columns: Vec::new(),
        }
    }

    pub fn with_key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[inline]
    pub fn is_key_column(&self, column: &str) -> bool {
        self.key_columns.iter().any(|c| c == column)
    }
}
