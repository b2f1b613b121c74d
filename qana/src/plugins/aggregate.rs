//! Aggregate decomposition across the parallel and merge select lists.

use crate::agg_op::AggOpMgr;
use crate::context::QueryContext;
use crate::plugin::{Plan, QueryPlugin};
use crate::Result;
use observability_deps::tracing::debug;
use query::{FactorOp, SelectList, ValueExpr, ValueFactor};

#[derive(Debug, Default)]
pub struct AggregatePlugin;

impl QueryPlugin for AggregatePlugin {
    fn name(&self) -> &'static str {
        "Aggregate"
    }

    fn apply_physical(&mut self, plan: Plan<'_>, ctx: &mut QueryContext) -> Result<()> {
        let mut mgr = AggOpMgr::new();
        let mut parallel = Vec::new();
        let mut merge = Vec::new();

        for expr in &plan.stmt_original.select_list.value_exprs {
            if !expr.has_agg() {
                // Plain outputs run per chunk only; the merge concatenates.
                parallel.push(expr.clone());
                continue;
            }
            // Split the chain: aggregate factors decompose into partials
            // plus a finisher; other factors pass to the parallel side and
            // reappear verbatim in the finisher chain.
            let mut merge_expr = ValueExpr {
                factor_ops: vec![],
                alias: expr.alias.clone(),
            };
            for fo in &expr.factor_ops {
                match fo.factor.agg_func() {
                    Some(func) => {
                        let rec = mgr.apply(func);
                        parallel.extend(rec.parallel);
                        merge_expr.factor_ops.push(FactorOp {
                            factor: rec.merge,
                            op: fo.op,
                        });
                    }
                    None => {
                        parallel.push(ValueExpr::from_factor(fo.factor.clone()));
                        merge_expr.factor_ops.push(FactorOp {
                            factor: fo.factor.clone(),
                            op: fo.op,
                        });
                    }
                }
            }
            merge.push(merge_expr);
        }

        if mgr.has_agg() {
            ctx.needs_merge = true;
        }
        if plan.stmt_original.distinct || plan.stmt_original.group_by.is_some() {
            ctx.needs_merge = true;
        }
        if !ctx.needs_merge {
            return Ok(());
        }

        debug!(
            parallel = parallel.len(),
            merge = merge.len(),
            "decomposed aggregates"
        );
        for stmt in plan.stmt_parallel.iter_mut() {
            stmt.select_list = SelectList::new(parallel.clone());
        }
        // A grouped query with no aggregates merges by re-selecting its
        // outputs.
        if merge.is_empty() {
            plan.stmt_merge.select_list = SelectList::new(
                plan.stmt_original
                    .select_list
                    .value_exprs
                    .iter()
                    .map(strip_for_merge)
                    .collect(),
            );
        } else {
            plan.stmt_merge.select_list = SelectList::new(merge);
        }
        Ok(())
    }
}

/// Merge-side copy of a plain output: refer to it by alias when one exists,
/// otherwise keep the expression.
fn strip_for_merge(expr: &ValueExpr) -> ValueExpr {
    match &expr.alias {
        Some(alias) => ValueExpr::from_factor(ValueFactor::bare_column(alias.clone())),
        None => expr.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use query::SelectStmt;

    fn run(sql: &str) -> (Vec<SelectStmt>, SelectStmt, bool) {
        let stmt = query_parser::parse_select(sql).unwrap();
        let mut parallel = vec![stmt.clone()];
        let mut merge = stmt.copy_merge();
        let mut ctx = QueryContext::new("LSST", "qsmaster", css::lsst_test_css());
        AggregatePlugin
            .apply_physical(
                Plan {
                    stmt_original: &stmt,
                    stmt_parallel: &mut parallel,
                    stmt_merge: &mut merge,
                },
                &mut ctx,
            )
            .unwrap();
        (parallel, merge, ctx.needs_merge)
    }

    #[test]
    fn sum_and_avg_split() {
        let (parallel, merge, needs_merge) =
            run("SELECT SUM(x), AVG(y) FROM LSST.Object GROUP BY chunkId;");
        assert!(needs_merge);
        assert_eq!(
            parallel[0].select_list.to_string(),
            "SUM(x) AS QS1_SUM,COUNT(y) AS QS2_COUNT,SUM(y) AS QS3_SUM"
        );
        assert_eq!(
            merge.select_list.to_string(),
            "SUM(QS1_SUM),(SUM(QS3_SUM)/SUM(QS2_COUNT))"
        );
        assert_eq!(merge.post_template().to_string(), "GROUP BY chunkId");
    }

    #[test]
    fn plain_select_needs_no_merge() {
        let (parallel, _merge, needs_merge) =
            run("SELECT * FROM Object WHERE someField > 5.0;");
        assert!(!needs_merge);
        assert_eq!(parallel[0].select_list.to_string(), "*");
    }

    #[test]
    fn count_star_needs_merge() {
        let (parallel, merge, needs_merge) = run("SELECT count(*) FROM Object o1;");
        assert!(needs_merge);
        assert_eq!(
            parallel[0].select_list.to_string(),
            "count(*) AS QS1_COUNT"
        );
        assert_eq!(merge.select_list.to_string(), "SUM(QS1_COUNT)");
    }
}
