//! WHERE clauses.

use crate::bool_term::BoolTerm;
use crate::restrictor::QsRestrictor;
use std::fmt;

/// A WHERE clause after normalization: restrictors pulled out of the
/// boolean tree plus the remaining tree (if any).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    pub restrictors: Vec<QsRestrictor>,
    pub tree: Option<BoolTerm>,
}

impl WhereClause {
    /// Clause holding just a tree.
    pub fn from_tree(tree: BoolTerm) -> Self {
        Self {
            restrictors: vec![],
            tree: Some(tree),
        }
    }

    /// AND `term` onto the existing tree (or make it the tree).
    pub fn and_with(&mut self, term: BoolTerm) {
        self.tree = Some(match self.tree.take() {
            Some(BoolTerm::And(mut terms)) => {
                terms.push(term);
                BoolTerm::And(terms)
            }
            Some(existing) => BoolTerm::And(vec![existing, term]),
            None => term,
        });
    }

    /// True when neither restrictors nor a tree remain.
    pub fn is_empty(&self) -> bool {
        self.restrictors.is_empty() && self.tree.is_none()
    }
}

impl fmt::Display for WhereClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tree {
            Some(tree) => write!(f, "WHERE {tree}"),
            None => Ok(()),
        }
    }
}
