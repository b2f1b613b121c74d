//! Final fixups: merge-phase ORDER BY, LIMIT pass-through, and cleansing of
//! the merge statement's column qualifiers.

use crate::context::QueryContext;
use crate::plugin::{Plan, QueryPlugin};
use crate::Result;
use query::SelectStmt;

#[derive(Debug, Default)]
pub struct PostPlugin;

impl QueryPlugin for PostPlugin {
    fn name(&self) -> &'static str {
        "Post"
    }

    fn apply_physical(&mut self, plan: Plan<'_>, _ctx: &mut QueryContext) -> Result<()> {
        let ordered = plan.stmt_original.order_by.is_some();
        for stmt in plan.stmt_parallel.iter_mut() {
            // Ordering is a merge-phase concern; workers return rows in
            // whatever order the engine produces them.
            stmt.order_by = None;
            // LIMIT passes through to workers as a row-count cap, but only
            // when no global order must be established first.
            if ordered {
                stmt.limit = None;
            }
        }
        // The merge statement reads the accumulated partial table, where
        // columns go by their bare (or aliased) names.
        strip_qualifiers(plan.stmt_merge);
        Ok(())
    }
}

fn strip_qualifiers(stmt: &mut SelectStmt) {
    let mut strip = |c: &mut query::ColumnRef| {
        c.db.clear();
        c.table.clear();
    };
    for e in &mut stmt.select_list.value_exprs {
        e.visit_column_refs_mut(&mut strip);
    }
    if let Some(g) = &mut stmt.group_by {
        for t in &mut g.terms {
            t.visit_column_refs_mut(&mut strip);
        }
    }
    if let Some(h) = &mut stmt.having {
        h.tree.visit_column_refs_mut(&mut strip);
    }
    if let Some(o) = &mut stmt.order_by {
        for t in &mut o.terms {
            t.expr.visit_column_refs_mut(&mut strip);
        }
    }
}
