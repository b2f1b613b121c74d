//! Value expressions: factor/operator chains with an optional alias.

use crate::column_ref::ColumnRef;
use crate::value_factor::ValueFactor;
use std::fmt;

/// Arithmetic operator joining a factor to the next one in the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Op {
    /// Last factor in the chain.
    #[default]
    None,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl Op {
    fn symbol(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
        }
    }
}

/// One link of the factor chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorOp {
    pub factor: ValueFactor,
    pub op: Op,
}

/// An output or operand expression: an ordered factor chain plus an
/// optional alias. `a + b / c` is three factors with ops `+`, `/`, `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueExpr {
    pub factor_ops: Vec<FactorOp>,
    pub alias: Option<String>,
}

impl ValueExpr {
    /// An expression holding a single factor.
    pub fn from_factor(factor: ValueFactor) -> Self {
        Self {
            factor_ops: vec![FactorOp {
                factor,
                op: Op::None,
            }],
            alias: None,
        }
    }

    /// A single-factor expression carrying an alias.
    pub fn from_factor_aliased(factor: ValueFactor, alias: impl Into<String>) -> Self {
        let mut e = Self::from_factor(factor);
        e.alias = Some(alias.into());
        e
    }

    /// Single column reference expression.
    pub fn from_column(c: ColumnRef) -> Self {
        Self::from_factor(ValueFactor::Column(c))
    }

    /// The lone factor, when the chain has exactly one.
    pub fn single_factor(&self) -> Option<&ValueFactor> {
        match self.factor_ops.as_slice() {
            [only] => Some(&only.factor),
            _ => None,
        }
    }

    /// True when any factor in the chain is an aggregate call.
    pub fn has_agg(&self) -> bool {
        self.factor_ops
            .iter()
            .any(|fo| matches!(fo.factor, ValueFactor::AggFunc(_)))
    }

    /// Visit every column reference in the chain, mutably, recursing into
    /// function arguments and sub-expressions.
    pub fn visit_column_refs_mut(&mut self, visit: &mut dyn FnMut(&mut ColumnRef)) {
        for fo in &mut self.factor_ops {
            match &mut fo.factor {
                ValueFactor::Column(c) => visit(c),
                ValueFactor::Func(fe) | ValueFactor::AggFunc(fe) => {
                    for p in &mut fe.params {
                        p.visit_column_refs_mut(visit);
                    }
                }
                ValueFactor::Expr(e) => e.visit_column_refs_mut(visit),
                ValueFactor::Const(_) | ValueFactor::Star(_) => {}
            }
        }
    }

    /// The rendered expression without its alias.
    pub fn render_value(&self) -> String {
        let mut out = String::new();
        for fo in &self.factor_ops {
            out.push_str(&fo.factor.to_string());
            let sym = fo.op.symbol();
            if !sym.is_empty() {
                out.push_str(sym);
            }
        }
        out
    }
}

impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render_value())?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {alias}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_chain_and_alias() {
        let e = ValueExpr {
            factor_ops: vec![
                FactorOp {
                    factor: ValueFactor::bare_column("a"),
                    op: Op::Divide,
                },
                FactorOp {
                    factor: ValueFactor::bare_column("b"),
                    op: Op::None,
                },
            ],
            alias: Some("ratio".into()),
        };
        assert_eq!(e.to_string(), "a/b AS ratio");
        assert_eq!(e.render_value(), "a/b");
    }

    #[test]
    fn visits_nested_column_refs() {
        use crate::func_expr::FuncExpr;
        let mut e = ValueExpr::from_factor(ValueFactor::AggFunc(FuncExpr::new_arg1("SUM", "x")));
        let mut seen = vec![];
        e.visit_column_refs_mut(&mut |c| seen.push(c.column.clone()));
        assert_eq!(seen, vec!["x"]);
    }
}
