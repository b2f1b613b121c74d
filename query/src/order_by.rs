//! ORDER BY clauses.

use crate::value_expr::ValueExpr;
use itertools::Itertools;
use std::fmt;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByTerm {
    pub expr: ValueExpr,
    pub order: Option<SortOrder>,
}

impl fmt::Display for OrderByTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr.render_value())?;
        match self.order {
            Some(SortOrder::Asc) => write!(f, " ASC"),
            Some(SortOrder::Desc) => write!(f, " DESC"),
            None => Ok(()),
        }
    }
}

/// The ORDER BY clause. Applied only in the merge phase; the parallel
/// statement drops it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderByClause {
    pub terms: Vec<OrderByTerm>,
}

impl fmt::Display for OrderByClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ORDER BY {}", self.terms.iter().join(","))
    }
}
