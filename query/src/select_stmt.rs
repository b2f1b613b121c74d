//! The SELECT statement container.

use crate::from_list::FromList;
use crate::order_by::OrderByClause;
use crate::query_template::QueryTemplate;
use crate::select_list::SelectList;
use crate::bool_term::BoolTerm;
use crate::where_clause::WhereClause;
use itertools::Itertools;
use std::fmt;

/// GROUP BY terms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupByClause {
    pub terms: Vec<crate::value_expr::ValueExpr>,
}

impl fmt::Display for GroupByClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GROUP BY {}",
            self.terms.iter().map(|t| t.render_value()).join(",")
        )
    }
}

/// HAVING condition.
#[derive(Debug, Clone, PartialEq)]
pub struct HavingClause {
    pub tree: BoolTerm,
}

impl fmt::Display for HavingClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HAVING {}", self.tree)
    }
}

/// A parsed SELECT. The session keeps three flavors alive: the original,
/// the parallel statement(s) instantiated per chunk, and the merge
/// statement applied over accumulated partials.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectStmt {
    pub distinct: bool,
    pub select_list: SelectList,
    pub from_list: FromList,
    pub where_clause: Option<WhereClause>,
    pub group_by: Option<GroupByClause>,
    pub having: Option<HavingClause>,
    pub order_by: Option<OrderByClause>,
    pub limit: Option<i64>,
}

impl SelectStmt {
    /// Render the full statement, chunk placeholders intact.
    pub fn query_template(&self) -> QueryTemplate {
        let mut t = QueryTemplate::new();
        t.append("SELECT");
        if self.distinct {
            t.append("DISTINCT");
        }
        t.append(self.select_list.to_string());
        if !self.from_list.table_refs.is_empty() {
            t.append("FROM");
            t.append(self.from_list.to_string());
        }
        if let Some(w) = &self.where_clause {
            t.append(w.to_string());
        }
        self.render_post(&mut t);
        t
    }

    /// Render everything after the WHERE clause: group/having/order/limit.
    /// This is the merge statement's fixup tail.
    pub fn post_template(&self) -> QueryTemplate {
        let mut t = QueryTemplate::new();
        self.render_post(&mut t);
        t
    }

    fn render_post(&self, t: &mut QueryTemplate) {
        if let Some(g) = &self.group_by {
            t.append(g.to_string());
        }
        if let Some(h) = &self.having {
            t.append(h.to_string());
        }
        if let Some(o) = &self.order_by {
            t.append(o.to_string());
        }
        if let Some(limit) = self.limit {
            t.append(format!("LIMIT {limit}"));
        }
    }

    /// The skeleton of the merge statement: output expressions and
    /// post-clauses survive; FROM and WHERE do not, since the merge runs
    /// over the accumulated partial-result table.
    pub fn copy_merge(&self) -> Self {
        Self {
            distinct: self.distinct,
            select_list: self.select_list.clone(),
            from_list: FromList::default(),
            where_clause: None,
            group_by: self.group_by.clone(),
            having: self.having.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
        }
    }
}

impl fmt::Display for SelectStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.query_template())
    }
}
