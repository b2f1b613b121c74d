//! Boolean term trees for WHERE and HAVING clauses.

use crate::column_ref::ColumnRef;
use crate::value_expr::ValueExpr;
use itertools::Itertools;
use std::fmt;

/// A comparison or membership predicate inside a boolean factor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `left <op> right`, rendered without surrounding spaces, matching the
    /// compact form the frontend reads back in.
    Comp {
        left: ValueExpr,
        op: String,
        right: ValueExpr,
    },
    /// `value [NOT] BETWEEN min AND max`.
    Between {
        value: ValueExpr,
        min: ValueExpr,
        max: ValueExpr,
        not: bool,
    },
    /// `value [NOT] IN (cands...)`.
    In {
        value: ValueExpr,
        cands: Vec<ValueExpr>,
        not: bool,
    },
    /// `value [NOT] LIKE pattern`.
    Like {
        value: ValueExpr,
        pattern: ValueExpr,
        not: bool,
    },
    /// `value IS [NOT] NULL`.
    Null { value: ValueExpr, not: bool },
}

impl Predicate {
    /// Visit every column reference in the predicate, mutably.
    pub fn visit_column_refs_mut(&mut self, visit: &mut dyn FnMut(&mut ColumnRef)) {
        match self {
            Self::Comp { left, right, .. } => {
                left.visit_column_refs_mut(visit);
                right.visit_column_refs_mut(visit);
            }
            Self::Between {
                value, min, max, ..
            } => {
                value.visit_column_refs_mut(visit);
                min.visit_column_refs_mut(visit);
                max.visit_column_refs_mut(visit);
            }
            Self::In { value, cands, .. } => {
                value.visit_column_refs_mut(visit);
                for c in cands {
                    c.visit_column_refs_mut(visit);
                }
            }
            Self::Like { value, pattern, .. } => {
                value.visit_column_refs_mut(visit);
                pattern.visit_column_refs_mut(visit);
            }
            Self::Null { value, .. } => value.visit_column_refs_mut(visit),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comp { left, op, right } => {
                write!(f, "{}{op}{}", left.render_value(), right.render_value())
            }
            Self::Between {
                value,
                min,
                max,
                not,
            } => write!(
                f,
                "{} {}BETWEEN {} AND {}",
                value.render_value(),
                if *not { "NOT " } else { "" },
                min.render_value(),
                max.render_value()
            ),
            Self::In { value, cands, not } => write!(
                f,
                "{} {}IN ({})",
                value.render_value(),
                if *not { "NOT " } else { "" },
                cands.iter().map(|c| c.render_value()).join(",")
            ),
            Self::Like {
                value,
                pattern,
                not,
            } => write!(
                f,
                "{} {}LIKE {}",
                value.render_value(),
                if *not { "NOT " } else { "" },
                pattern.render_value()
            ),
            Self::Null { value, not } => write!(
                f,
                "{} IS {}NULL",
                value.render_value(),
                if *not { "NOT " } else { "" }
            ),
        }
    }
}

/// One term within a [`BoolFactor`]; terms render space-separated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoolFactorTerm {
    /// A value expression used in boolean position.
    Value(ValueExpr),
    /// Raw SQL text passed through untouched.
    Pass(String),
    /// A parenthesized comma-joined list of raw values.
    PassList(Vec<String>),
    /// A predicate.
    Predicate(Predicate),
    /// A parenthesized sub-tree.
    Subtree(Box<BoolTerm>),
}

impl fmt::Display for BoolFactorTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{}", v.render_value()),
            Self::Pass(s) => write!(f, "{s}"),
            Self::PassList(items) => write!(f, "({})", items.iter().join(",")),
            Self::Predicate(p) => write!(f, "{p}"),
            Self::Subtree(t) => write!(f, "({t})"),
        }
    }
}

/// The leaf of the boolean tree: an ordered sequence of terms rendered with
/// single spaces between them, e.g. `[func(...)] [=] [1]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoolFactor {
    pub terms: Vec<BoolFactorTerm>,
}

impl BoolFactor {
    /// Factor holding a single predicate.
    pub fn from_predicate(p: Predicate) -> Self {
        Self {
            terms: vec![BoolFactorTerm::Predicate(p)],
        }
    }
}

impl fmt::Display for BoolFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.terms.iter().join(" "))
    }
}

/// A boolean term tree: OR of AND of factors, with pass-through variants
/// for text the analysis does not model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoolTerm {
    /// Disjunction; terms render joined by ` OR `.
    Or(Vec<BoolTerm>),
    /// Conjunction; terms render joined by ` AND `.
    And(Vec<BoolTerm>),
    /// A leaf factor.
    Factor(BoolFactor),
    /// Raw text passed through.
    Pass(String),
    /// A parenthesized raw list.
    PassList(Vec<String>),
    /// A bare value expression in boolean position.
    Value(ValueExpr),
}

impl BoolTerm {
    /// Conjunction builder that flattens single-element vectors.
    pub fn and(mut terms: Vec<BoolTerm>) -> Self {
        if terms.len() == 1 {
            terms.pop().expect("len checked")
        } else {
            Self::And(terms)
        }
    }

    /// Disjunction builder that flattens single-element vectors.
    pub fn or(mut terms: Vec<BoolTerm>) -> Self {
        if terms.len() == 1 {
            terms.pop().expect("len checked")
        } else {
            Self::Or(terms)
        }
    }

    /// Collapse nested single-child And/Or nodes, the clean-up the WHERE
    /// normalization pass applies after restrictor extraction.
    pub fn simplify(self) -> Self {
        match self {
            Self::And(terms) => {
                let mut out = Vec::with_capacity(terms.len());
                for t in terms {
                    match t.simplify() {
                        Self::And(inner) => out.extend(inner),
                        other => out.push(other),
                    }
                }
                Self::and(out)
            }
            Self::Or(terms) => {
                let mut out = Vec::with_capacity(terms.len());
                for t in terms {
                    match t.simplify() {
                        Self::Or(inner) => out.extend(inner),
                        other => out.push(other),
                    }
                }
                Self::or(out)
            }
            other => other,
        }
    }

    /// Visit every column reference in the tree, mutably.
    pub fn visit_column_refs_mut(&mut self, visit: &mut dyn FnMut(&mut ColumnRef)) {
        match self {
            Self::Or(terms) | Self::And(terms) => {
                for t in terms {
                    t.visit_column_refs_mut(visit);
                }
            }
            Self::Factor(factor) => {
                for term in &mut factor.terms {
                    match term {
                        BoolFactorTerm::Value(v) => v.visit_column_refs_mut(visit),
                        BoolFactorTerm::Predicate(p) => p.visit_column_refs_mut(visit),
                        BoolFactorTerm::Subtree(t) => t.visit_column_refs_mut(visit),
                        BoolFactorTerm::Pass(_) | BoolFactorTerm::PassList(_) => {}
                    }
                }
            }
            Self::Value(v) => v.visit_column_refs_mut(visit),
            Self::Pass(_) | Self::PassList(_) => {}
        }
    }
}

impl fmt::Display for BoolTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Or(terms) => write!(f, "{}", terms.iter().join(" OR ")),
            Self::And(terms) => write!(f, "{}", terms.iter().join(" AND ")),
            Self::Factor(factor) => write!(f, "{factor}"),
            Self::Pass(s) => write!(f, "{s}"),
            Self::PassList(items) => write!(f, "({})", items.iter().join(",")),
            Self::Value(v) => write!(f, "{}", v.render_value()),
        }
    }
}
