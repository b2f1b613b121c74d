//! WHERE normalization: pull restrictors out of the boolean tree.

use crate::context::QueryContext;
use crate::error;
use crate::plugin::QueryPlugin;
use crate::Result;
use observability_deps::tracing::debug;
use query::{
    BoolFactor, BoolFactorTerm, BoolTerm, QsRestrictor, SelectStmt, ValueExpr, ValueFactor,
};
use snafu::ResultExt as _;

#[derive(Debug, Default)]
pub struct WherePlugin;

/// If this factor is a lone `qserv_*` call, return the equivalent
/// restrictor.
fn as_restrictor(factor: &BoolFactor) -> Option<QsRestrictor> {
    let term = match factor.terms.as_slice() {
        [only] => only,
        _ => return None,
    };
    let expr: &ValueExpr = match term {
        BoolFactorTerm::Value(v) => v,
        _ => return None,
    };
    let func = match expr.single_factor()? {
        ValueFactor::Func(f) => f,
        _ => return None,
    };
    let params: Vec<String> = func.params.iter().map(|p| p.render_value()).collect();
    QsRestrictor::from_call(&func.name, params)
}

/// Does any `qserv_*` call survive below the top-level conjunction?
fn has_buried_restrictor(term: &BoolTerm) -> bool {
    let mut found = false;
    let mut check = |t: &BoolTerm| {
        if let BoolTerm::Factor(f) = t {
            if as_restrictor(f).is_some() {
                found = true;
            }
        }
    };
    walk(term, &mut check);
    found
}

fn walk(term: &BoolTerm, visit: &mut dyn FnMut(&BoolTerm)) {
    visit(term);
    match term {
        BoolTerm::Or(terms) | BoolTerm::And(terms) => {
            for t in terms {
                walk(t, visit);
            }
        }
        BoolTerm::Factor(f) => {
            for t in &f.terms {
                if let BoolFactorTerm::Subtree(sub) = t {
                    walk(sub, visit);
                }
            }
        }
        _ => {}
    }
}

impl QueryPlugin for WherePlugin {
    fn name(&self) -> &'static str {
        "Where"
    }

    fn apply_logical(&mut self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        let Some(where_clause) = stmt.where_clause.as_mut() else {
            return Ok(());
        };
        let Some(tree) = where_clause.tree.take() else {
            return Ok(());
        };

        // Split the top-level conjunction into restrictors and leftovers.
        let conjuncts = match tree {
            BoolTerm::And(terms) => terms,
            other => vec![other],
        };
        let mut restrictors = Vec::new();
        let mut remaining = Vec::new();
        for term in conjuncts {
            match &term {
                BoolTerm::Factor(f) => {
                    if let Some(r) = as_restrictor(f) {
                        r.validate().context(error::RestrictorSnafu)?;
                        restrictors.push(r);
                        continue;
                    }
                }
                _ => {}
            }
            if has_buried_restrictor(&term) {
                return error::RestrictorPlacementSnafu.fail();
            }
            remaining.push(term);
        }

        debug!(
            restrictors = restrictors.len(),
            conjuncts = remaining.len(),
            "normalized WHERE"
        );
        where_clause.restrictors.extend(restrictors.iter().cloned());
        ctx.restrictors.extend(restrictors);
        where_clause.tree = if remaining.is_empty() {
            None
        } else {
            Some(BoolTerm::and(remaining).simplify())
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::error::AnalysisError;

    fn analyzed(sql: &str) -> (SelectStmt, QueryContext) {
        let mut stmt = query_parser::parse_select(sql).unwrap();
        let mut ctx = QueryContext::new("LSST", "qsmaster", css::lsst_test_css());
        WherePlugin.apply_logical(&mut stmt, &mut ctx).unwrap();
        (stmt, ctx)
    }

    #[test]
    fn extracts_top_level_restrictor() {
        let (stmt, ctx) = analyzed(
            "SELECT * FROM Object WHERE qserv_areaspec_box(0,0,1,1) AND x > 5;",
        );
        assert_eq!(ctx.restrictors.len(), 1);
        assert_eq!(ctx.restrictors[0].name(), "qserv_areaspec_box");
        let w = stmt.where_clause.unwrap();
        assert_eq!(w.restrictors.len(), 1);
        assert_eq!(w.tree.unwrap().to_string(), "x>5");
    }

    #[test]
    fn lone_restrictor_leaves_empty_tree() {
        let (stmt, ctx) = analyzed("SELECT * FROM Object WHERE qserv_areaspec_circle(1,1,0.5);");
        assert_eq!(ctx.restrictors.len(), 1);
        assert!(stmt.where_clause.unwrap().tree.is_none());
    }

    #[test]
    fn buried_restrictor_rejected() {
        let mut stmt = query_parser::parse_select(
            "SELECT * FROM Object WHERE qserv_areaspec_box(0,0,1,1) OR x > 5;",
        )
        .unwrap();
        let mut ctx = QueryContext::new("LSST", "qsmaster", css::lsst_test_css());
        assert_matches!(
            WherePlugin.apply_logical(&mut stmt, &mut ctx),
            Err(AnalysisError::RestrictorPlacement)
        );
    }

    #[test]
    fn oversized_ra_extent_is_analysis_error() {
        let mut stmt = query_parser::parse_select(
            "SELECT * FROM Object WHERE qserv_areaspec_box(0,0,181,1);",
        )
        .unwrap();
        let mut ctx = QueryContext::new("LSST", "qsmaster", css::lsst_test_css());
        assert_matches!(
            WherePlugin.apply_logical(&mut stmt, &mut ctx),
            Err(AnalysisError::Restrictor { .. })
        );
    }
}
