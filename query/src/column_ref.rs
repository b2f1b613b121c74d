//! Column references.

use std::fmt;

/// A possibly-qualified column reference. Before the table plugin runs the
/// `db` and `table` parts may be empty; afterwards every reference in every
/// clause resolves to exactly one from-list entry and `table` holds that
/// entry's alias.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnRef {
    pub db: String,
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    /// Fully qualified reference.
    pub fn new(
        db: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
            column: column.into(),
        }
    }

    /// Bare column name.
    pub fn bare(column: impl Into<String>) -> Self {
        Self::new("", "", column)
    }

    /// `table.column` with empty db.
    pub fn table_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new("", table, column)
    }

    /// True when neither db nor table is set.
    pub fn is_bare(&self) -> bool {
        self.db.is_empty() && self.table.is_empty()
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.db.is_empty() {
            write!(f, "{}.{}.{}", self.db, self.table, self.column)
        } else if !self.table.is_empty() {
            write!(f, "{}.{}", self.table, self.column)
        } else {
            write!(f, "{}", self.column)
        }
    }
}
