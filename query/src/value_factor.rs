//! Leaf factors of value expressions.

use crate::column_ref::ColumnRef;
use crate::func_expr::FuncExpr;
use crate::value_expr::ValueExpr;
use std::fmt;

/// The tagged factor variants a [`ValueExpr`] is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueFactor {
    /// A column reference.
    Column(ColumnRef),
    /// A literal constant, kept as source text.
    Const(String),
    /// A scalar function call.
    Func(FuncExpr),
    /// An aggregate function call; distinguished so the aggregate plugin
    /// can find and decompose these.
    AggFunc(FuncExpr),
    /// `*` or `qualifier.*`.
    Star(Option<String>),
    /// A parenthesized sub-expression.
    Expr(Box<ValueExpr>),
}

impl ValueFactor {
    /// A bare (unqualified) column factor.
    pub fn bare_column(name: impl Into<String>) -> Self {
        Self::Column(ColumnRef::bare(name))
    }

    /// A constant factor from its source text.
    pub fn constant(text: impl Into<String>) -> Self {
        Self::Const(text.into())
    }

    /// The aggregate call inside this factor, if it is one.
    pub fn agg_func(&self) -> Option<&FuncExpr> {
        match self {
            Self::AggFunc(f) => Some(f),
            _ => None,
        }
    }

    /// The column reference inside this factor, if it is one.
    pub fn column_ref(&self) -> Option<&ColumnRef> {
        match self {
            Self::Column(c) => Some(c),
            _ => None,
        }
    }

    /// Mutable column reference, if this factor is one.
    pub fn column_ref_mut(&mut self) -> Option<&mut ColumnRef> {
        match self {
            Self::Column(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for ValueFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(c) => write!(f, "{c}"),
            Self::Const(s) => write!(f, "{s}"),
            Self::Func(fe) | Self::AggFunc(fe) => write!(f, "{fe}"),
            Self::Star(None) => write!(f, "*"),
            Self::Star(Some(q)) => write!(f, "{q}.*"),
            Self::Expr(e) => write!(f, "({e})"),
        }
    }
}
