//! Function call expressions.

use crate::value_expr::ValueExpr;
use crate::value_factor::ValueFactor;
use itertools::Itertools;
use std::fmt;

/// A function application, aggregate or scalar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuncExpr {
    pub name: String,
    pub params: Vec<ValueExpr>,
}

impl FuncExpr {
    /// `name(params...)`.
    pub fn new(name: impl Into<String>, params: Vec<ValueExpr>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Single-argument call over a bare column, e.g. `SUM(QS1_COUNT)`.
    pub fn new_arg1(name: impl Into<String>, arg: impl Into<String>) -> Self {
        Self::new(
            name,
            vec![ValueExpr::from_factor(ValueFactor::bare_column(arg))],
        )
    }

    /// Same arguments as `other` under a different function name; the
    /// aggregate decomposition uses this to turn `AVG(x)` into `SUM(x)`
    /// and `COUNT(x)`.
    pub fn new_like(other: &Self, name: impl Into<String>) -> Self {
        Self::new(name, other.params.clone())
    }
}

impl fmt::Display for FuncExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({})",
            self.name,
            self.params.iter().map(|p| p.to_string()).join(",")
        )
    }
}
