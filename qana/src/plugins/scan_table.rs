//! Shared-scan classification.

use crate::context::QueryContext;
use crate::plugin::{Plan, QueryPlugin};
use crate::Result;
use data_types::{DbTable, ScanInfo};
use observability_deps::tracing::debug;
use query::{BoolFactorTerm, BoolTerm, Predicate, QsRestrictor, ValueExpr, ValueFactor};
use std::collections::BTreeSet;

/// Queries hitting fewer chunks than this are interactive, not scans.
const MIN_SCAN_CHUNKS: usize = 2;

#[derive(Debug, Default)]
pub struct ScanTablePlugin;

/// Apply `visit` to every factor of `expr`, recursing into function
/// arguments and parenthesized sub-expressions.
fn walk_factors(expr: &ValueExpr, visit: &mut dyn FnMut(&ValueFactor)) {
    for fo in &expr.factor_ops {
        visit(&fo.factor);
        match &fo.factor {
            ValueFactor::Func(f) | ValueFactor::AggFunc(f) => {
                for p in &f.params {
                    walk_factors(p, visit);
                }
            }
            ValueFactor::Expr(e) => walk_factors(e, visit),
            ValueFactor::Column(_) | ValueFactor::Const(_) | ValueFactor::Star(_) => {}
        }
    }
}

impl ScanTablePlugin {
    /// Does the SELECT list project anything out of a chunked table? A
    /// bare `*`, a qualified `alias.*`, or a column reference resolving to
    /// a chunked alias all count; a query that only projects replicated
    /// columns is not a scan no matter what its WHERE touches.
    fn select_references_chunked(
        plan: &Plan<'_>,
        ctx: &QueryContext,
        chunked_aliases: &BTreeSet<String>,
    ) -> bool {
        // Bare columns survive resolution only in single-table queries.
        let single_alias = if ctx.table_aliases.len() == 1 {
            ctx.table_aliases.keys().next().cloned()
        } else {
            None
        };
        let mut referenced = false;
        for expr in &plan.stmt_original.select_list.value_exprs {
            walk_factors(expr, &mut |factor| match factor {
                ValueFactor::Star(None) => referenced = true,
                ValueFactor::Star(Some(qualifier)) => {
                    if chunked_aliases.contains(qualifier) {
                        referenced = true;
                    }
                }
                ValueFactor::Column(c) => {
                    let alias = if c.table.is_empty() {
                        single_alias.as_deref()
                    } else {
                        Some(c.table.as_str())
                    };
                    if alias.map_or(false, |a| chunked_aliases.contains(a)) {
                        referenced = true;
                    }
                }
                _ => {}
            });
            if referenced {
                break;
            }
        }
        referenced
    }

    /// A restriction that selects a small row subset disqualifies the query
    /// from shared-scan treatment: an objectId restrictor, or an equality
    /// on a key column.
    fn has_tight_restriction(plan: &Plan<'_>, ctx: &mut QueryContext) -> Result<bool> {
        if ctx
            .restrictors
            .iter()
            .any(|r| matches!(r, QsRestrictor::ObjectId { .. }))
        {
            return Ok(true);
        }
        let mut key_cols = Vec::new();
        for (alias, table) in ctx.table_aliases.clone() {
            if let Some(info) = ctx.table_info.get(&table.db, &table.table)? {
                if let Some(k) = info.key_column() {
                    key_cols.push((alias, k.to_string()));
                }
            }
        }
        let Some(w) = &plan.stmt_original.where_clause else {
            return Ok(false);
        };
        let Some(tree) = &w.tree else {
            return Ok(false);
        };
        let conjuncts: Vec<&BoolTerm> = match tree {
            BoolTerm::And(terms) => terms.iter().collect(),
            other => vec![other],
        };
        for term in conjuncts {
            let BoolTerm::Factor(f) = term else { continue };
            for t in &f.terms {
                let BoolFactorTerm::Predicate(Predicate::Comp { left, op, right }) = t else {
                    continue;
                };
                if op != "=" {
                    continue;
                }
                for side in [left, right] {
                    if let Some(ValueFactor::Column(c)) = side.single_factor() {
                        let hit = key_cols.iter().any(|(alias, k)| {
                            (c.table.is_empty() || c.table == *alias) && c.column == *k
                        });
                        if hit {
                            return Ok(true);
                        }
                    }
                }
            }
        }
        Ok(false)
    }
}

impl QueryPlugin for ScanTablePlugin {
    fn name(&self) -> &'static str {
        "ScanTable"
    }

    fn apply_physical(&mut self, plan: Plan<'_>, ctx: &mut QueryContext) -> Result<()> {
        let mut chunked: Vec<DbTable> = Vec::new();
        let mut chunked_aliases: BTreeSet<String> = BTreeSet::new();
        for (alias, table) in ctx.table_aliases.clone() {
            if ctx.table_info.get(&table.db, &table.table)?.is_some() {
                chunked.push(table);
                chunked_aliases.insert(alias);
            }
        }
        if chunked.is_empty() {
            return Ok(());
        }
        if !Self::select_references_chunked(&plan, ctx, &chunked_aliases) {
            debug!("select list ignores the chunked tables; not a shared scan");
            return Ok(());
        }
        if Self::has_tight_restriction(&plan, ctx)? {
            debug!("tight restriction; not a shared scan");
            return Ok(());
        }
        chunked.sort();
        chunked.dedup();
        ctx.scan_rating = if ctx.has_sub_chunks() {
            ScanInfo::RATING_SLOW
        } else if chunked.len() > 1 {
            ScanInfo::RATING_MEDIUM
        } else {
            ScanInfo::RATING_FAST
        };
        ctx.scan_tables = chunked;
        debug!(tables = ctx.scan_tables.len(), rating = ctx.scan_rating, "classified as shared scan");
        Ok(())
    }

    fn apply_final(&mut self, ctx: &mut QueryContext) -> Result<()> {
        if !ctx.scan_tables.is_empty() && ctx.chunk_count < MIN_SCAN_CHUNKS {
            debug!(chunks = ctx.chunk_count, "too few chunks; dropping scan classification");
            ctx.scan_tables.clear();
            ctx.scan_rating = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{TablePlugin, WherePlugin};
    use query::SelectStmt;

    fn plan<'a>(
        o: &'a SelectStmt,
        p: &'a mut Vec<SelectStmt>,
        m: &'a mut SelectStmt,
    ) -> Plan<'a> {
        Plan {
            stmt_original: o,
            stmt_parallel: p,
            stmt_merge: m,
        }
    }

    fn classify(sql: &str, chunk_count: usize) -> QueryContext {
        let mut stmt = query_parser::parse_select(sql).unwrap();
        let mut ctx = QueryContext::new("LSST", "qsmaster", css::lsst_test_css());
        WherePlugin.apply_logical(&mut stmt, &mut ctx).unwrap();
        TablePlugin.apply_logical(&mut stmt, &mut ctx).unwrap();
        let mut parallel = vec![stmt.clone()];
        let mut merge = stmt.copy_merge();
        TablePlugin
            .apply_physical(plan(&stmt, &mut parallel, &mut merge), &mut ctx)
            .unwrap();
        ScanTablePlugin
            .apply_physical(plan(&stmt, &mut parallel, &mut merge), &mut ctx)
            .unwrap();
        ctx.chunk_count = chunk_count;
        ScanTablePlugin.apply_final(&mut ctx).unwrap();
        ctx
    }

    #[test]
    fn full_scan_classified() {
        let ctx = classify("SELECT * FROM Object WHERE someField > 5.0;", 10);
        assert_eq!(ctx.scan_tables, vec![DbTable::new("LSST", "Object")]);
        assert_eq!(ctx.scan_rating, ScanInfo::RATING_FAST);
    }

    #[test]
    fn where_only_reference_is_not_a_scan() {
        // The chunked table appears in FROM and WHERE, but the select list
        // projects replicated columns only.
        let ctx = classify(
            "SELECT f.filterName FROM Filter f, Object o WHERE o.ra_PS > 5.0;",
            10,
        );
        assert!(ctx.scan_tables.is_empty());
        assert_eq!(ctx.scan_rating, 0);
    }

    #[test]
    fn qualified_star_on_chunked_table_is_a_scan() {
        let ctx = classify(
            "SELECT o.* FROM Filter f, Object o WHERE o.ra_PS > 5.0;",
            10,
        );
        assert_eq!(ctx.scan_tables, vec![DbTable::new("LSST", "Object")]);
    }

    #[test]
    fn object_id_lookup_is_not_a_scan() {
        let ctx = classify("SELECT * FROM Object WHERE qserv_objectId(42);", 10);
        assert!(ctx.scan_tables.is_empty());
    }

    #[test]
    fn key_equality_is_not_a_scan() {
        let ctx = classify("SELECT * FROM Object WHERE objectId=42;", 10);
        assert!(ctx.scan_tables.is_empty());
    }

    #[test]
    fn few_chunks_clears_scan() {
        let ctx = classify("SELECT * FROM Object WHERE someField > 5.0;", 1);
        assert!(ctx.scan_tables.is_empty());
        assert_eq!(ctx.scan_rating, 0);
    }

    #[test]
    fn self_join_rates_slow() {
        let ctx = classify(
            "SELECT count(*) FROM Object o1, Object o2 WHERE o1.ra_PS BETWEEN 6 AND 7;",
            10,
        );
        assert_eq!(ctx.scan_tables, vec![DbTable::new("LSST", "Object")]);
        assert_eq!(ctx.scan_rating, ScanInfo::RATING_SLOW);
    }
}
