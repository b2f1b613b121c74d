//! Turns extracted restrictors into concrete predicates over the
//! partitioning columns of each chunked table.

use crate::context::QueryContext;
use crate::plugin::{Plan, QueryPlugin};
use crate::table_info::TableInfo;
use crate::Result;
use data_types::DbTable;
use observability_deps::tracing::debug;
use query::{
    BoolFactor, BoolFactorTerm, BoolTerm, ColumnRef, FuncExpr, QsRestrictor, SelectStmt,
    ValueExpr, ValueFactor, WhereClause,
};
use std::sync::Arc;

/// Prefix of the point-in-region UDFs evaluated by the worker's engine.
const UDF_PREFIX: &str = "scisql_";

#[derive(Debug, Default)]
pub struct QservRestrictorPlugin;

/// `scisql_<udf>(<alias>.<lon>, <alias>.<lat>, <params>...) = 1`.
fn area_factor(restr: &QsRestrictor, alias: &str, lon: &str, lat: &str) -> Option<BoolTerm> {
    let udf = restr.udf_suffix()?;
    let mut params = vec![
        ValueExpr::from_column(ColumnRef::table_column(alias, lon)),
        ValueExpr::from_column(ColumnRef::table_column(alias, lat)),
    ];
    params.extend(
        restr
            .params()
            .iter()
            .map(|p| ValueExpr::from_factor(ValueFactor::constant(p.clone()))),
    );
    let func = FuncExpr::new(format!("{UDF_PREFIX}{udf}"), params);
    Some(BoolTerm::Factor(BoolFactor {
        terms: vec![
            BoolFactorTerm::Value(ValueExpr::from_factor(ValueFactor::Func(func))),
            BoolFactorTerm::Pass("=".into()),
            BoolFactorTerm::Pass("1".into()),
        ],
    }))
}

/// `<alias>.<keyCol> IN (<ids>...)`.
fn object_id_factor(ids: &[String], alias: &str, key_col: &str) -> BoolTerm {
    BoolTerm::Factor(BoolFactor {
        terms: vec![
            BoolFactorTerm::Value(ValueExpr::from_column(ColumnRef::table_column(
                alias, key_col,
            ))),
            BoolFactorTerm::Pass("IN".into()),
            BoolFactorTerm::PassList(ids.to_vec()),
        ],
    })
}

impl QservRestrictorPlugin {
    fn predicates_for(
        restrictors: &[QsRestrictor],
        alias: &str,
        info: &TableInfo,
    ) -> Vec<BoolTerm> {
        let mut out = Vec::new();
        for restr in restrictors {
            match restr {
                QsRestrictor::ObjectId { ids } => {
                    if let Some(key_col) = info.key_column() {
                        out.push(object_id_factor(ids, alias, key_col));
                    }
                }
                area => {
                    if let Some((lon, lat)) = info.spatial_columns() {
                        if let Some(f) = area_factor(area, alias, lon, lat) {
                            out.push(f);
                        }
                    }
                }
            }
        }
        out
    }
}

impl QueryPlugin for QservRestrictorPlugin {
    fn name(&self) -> &'static str {
        "QservRestrictor"
    }

    fn apply_physical(&mut self, plan: Plan<'_>, ctx: &mut QueryContext) -> Result<()> {
        if ctx.restrictors.is_empty() {
            return Ok(());
        }
        // The chunked tables, by the aliases the table plugin pinned down.
        let mut targets: Vec<(String, Arc<TableInfo>)> = Vec::new();
        let alias_map: Vec<(String, DbTable)> = ctx
            .table_aliases
            .iter()
            .map(|(a, t)| (a.clone(), t.clone()))
            .collect();
        for (alias, table) in alias_map {
            if let Some(info) = ctx.table_info.get(&table.db, &table.table)? {
                targets.push((alias, info));
            }
        }
        if targets.is_empty() {
            return Ok(());
        }

        let restrictors = ctx.restrictors.clone();
        let mut added = 0usize;
        for stmt in plan.stmt_parallel.iter_mut() {
            for (alias, info) in &targets {
                for predicate in Self::predicates_for(&restrictors, alias, info) {
                    attach(stmt, predicate);
                    added += 1;
                }
            }
        }
        debug!(predicates = added, "injected restrictor predicates");
        Ok(())
    }
}

fn attach(stmt: &mut SelectStmt, predicate: BoolTerm) {
    match &mut stmt.where_clause {
        Some(w) => w.and_with(predicate),
        None => {
            let mut w = WhereClause::default();
            w.and_with(predicate);
            stmt.where_clause = Some(w);
        }
    }
}
