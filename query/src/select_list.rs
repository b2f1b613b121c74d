//! Select lists.

use crate::value_expr::ValueExpr;
use itertools::Itertools;
use std::fmt;

/// The ordered output expressions of a SELECT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectList {
    pub value_exprs: Vec<ValueExpr>,
}

impl SelectList {
    /// Build from expressions.
    pub fn new(value_exprs: Vec<ValueExpr>) -> Self {
        Self { value_exprs }
    }

    /// True when any output expression aggregates.
    pub fn has_agg(&self) -> bool {
        self.value_exprs.iter().any(|e| e.has_agg())
    }
}

impl fmt::Display for SelectList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value_exprs.iter().join(","))
    }
}
