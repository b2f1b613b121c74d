//! Table resolution: default database, aliases, dominant database, column
//! reference checking, and chunk templating of the physical plan.

use crate::context::QueryContext;
use crate::error::{self, AnalysisError};
use crate::plugin::{Plan, QueryPlugin};
use crate::table_info::TableInfo;
use crate::Result;
use data_types::DbTable;
use observability_deps::tracing::debug;
use query::{ColumnRef, JoinSpec, SelectStmt, TableRef};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct TablePlugin;

/// Visit every column reference in every clause of `stmt`.
fn visit_columns(stmt: &mut SelectStmt, visit: &mut dyn FnMut(&mut ColumnRef)) {
    for e in &mut stmt.select_list.value_exprs {
        e.visit_column_refs_mut(visit);
    }
    for t in &mut stmt.from_list.table_refs {
        for j in &mut t.joins {
            if let Some(JoinSpec::On(tree)) = &mut j.spec {
                tree.visit_column_refs_mut(visit);
            }
        }
    }
    if let Some(w) = &mut stmt.where_clause {
        if let Some(tree) = &mut w.tree {
            tree.visit_column_refs_mut(visit);
        }
    }
    if let Some(g) = &mut stmt.group_by {
        for t in &mut g.terms {
            t.visit_column_refs_mut(visit);
        }
    }
    if let Some(h) = &mut stmt.having {
        h.tree.visit_column_refs_mut(visit);
    }
    if let Some(o) = &mut stmt.order_by {
        for t in &mut o.terms {
            t.expr.visit_column_refs_mut(visit);
        }
    }
}

impl TablePlugin {
    fn assign_aliases(stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        let mut taken: BTreeMap<String, DbTable> = BTreeMap::new();
        let mut generated = 0u32;
        let mut failure = None;
        stmt.from_list.for_each_table_mut(|t: &mut TableRef| {
            if failure.is_some() {
                return;
            }
            if t.alias.is_empty() {
                t.alias = if taken.contains_key(&t.table) {
                    generated += 1;
                    format!("QST_{generated}_")
                } else {
                    t.table.clone()
                };
            } else if taken.contains_key(&t.alias) {
                failure = Some(AnalysisError::DuplicateSelectAlias {
                    alias: t.alias.clone(),
                });
                return;
            }
            taken.insert(t.alias.clone(), DbTable::new(t.db.clone(), t.table.clone()));
        });
        if let Some(e) = failure {
            return Err(e);
        }
        ctx.table_aliases.extend(taken);
        Ok(())
    }

    fn resolve_columns(stmt: &mut SelectStmt, ctx: &QueryContext) -> Result<()> {
        // Maps for qualifier rewriting: alias, bare table name, db.table.
        let aliases = &ctx.table_aliases;
        let mut by_table: BTreeMap<&str, &str> = BTreeMap::new();
        let mut by_db_table: BTreeMap<(String, String), &str> = BTreeMap::new();
        for (alias, table) in aliases {
            by_table.entry(table.table.as_str()).or_insert(alias.as_str());
            by_db_table
                .entry((table.db.clone(), table.table.clone()))
                .or_insert(alias.as_str());
        }
        let single_table = aliases.len() == 1;

        let mut failure: Option<AnalysisError> = None;
        let mut resolve = |c: &mut ColumnRef| {
            if failure.is_some() {
                return;
            }
            if !c.db.is_empty() {
                match by_db_table.get(&(c.db.clone(), c.table.clone())) {
                    Some(alias) => {
                        c.table = (*alias).to_string();
                        c.db.clear();
                    }
                    None => {
                        failure = Some(AnalysisError::UnresolvedColumn {
                            column: c.to_string(),
                        })
                    }
                }
            } else if !c.table.is_empty() {
                if aliases.contains_key(&c.table) {
                    // Already alias-qualified.
                } else if let Some(alias) = by_table.get(c.table.as_str()) {
                    c.table = (*alias).to_string();
                } else {
                    failure = Some(AnalysisError::UnresolvedColumn {
                        column: c.to_string(),
                    });
                }
            } else if !single_table {
                failure = Some(AnalysisError::AmbiguousColumn {
                    column: c.column.clone(),
                });
            }
        };
        visit_columns(stmt, &mut resolve);
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The chunked tables of the FROM list, as (alias, info) pairs in FROM
    /// order.
    fn chunked_refs(
        stmt: &SelectStmt,
        ctx: &mut QueryContext,
    ) -> Result<Vec<(String, Arc<TableInfo>)>> {
        let mut out = Vec::new();
        for t in stmt.from_list.all_tables() {
            if let Some(info) = ctx.table_info.get(&t.db, &t.table)? {
                out.push((t.alias.clone(), info));
            }
        }
        Ok(out)
    }

    /// True when the statement equi-joins the chunked tables on their key
    /// columns, which makes the join chunk-local without sub-chunking.
    fn has_key_equi_join(
        stmt: &SelectStmt,
        refs: &[(String, Arc<TableInfo>)],
    ) -> bool {
        use query::{BoolFactorTerm, BoolTerm, Predicate, ValueFactor};

        let key_of = |alias: &str| -> Option<String> {
            refs.iter()
                .find(|(a, _)| a == alias)
                .and_then(|(_, info)| info.key_column().map(str::to_string))
        };
        let is_key_pair = |p: &Predicate| -> bool {
            let Predicate::Comp { left, op, right } = p else {
                return false;
            };
            if op != "=" {
                return false;
            }
            let (Some(ValueFactor::Column(l)), Some(ValueFactor::Column(r))) =
                (left.single_factor(), right.single_factor())
            else {
                return false;
            };
            if l.table == r.table {
                return false;
            }
            key_of(&l.table).map_or(false, |k| k == l.column)
                && key_of(&r.table).map_or(false, |k| k == r.column)
        };

        let check_tree = |tree: &BoolTerm| -> bool {
            let conjuncts: Vec<&BoolTerm> = match tree {
                BoolTerm::And(terms) => terms.iter().collect(),
                other => vec![other],
            };
            let mut found = false;
            for term in conjuncts {
                if let BoolTerm::Factor(f) = term {
                    for t in &f.terms {
                        if let BoolFactorTerm::Predicate(p) = t {
                            if is_key_pair(p) {
                                found = true;
                            }
                        }
                    }
                }
            }
            found
        };
        let mut found = false;
        if let Some(w) = &stmt.where_clause {
            if let Some(tree) = &w.tree {
                if check_tree(tree) {
                    found = true;
                }
            }
        }
        for t in &stmt.from_list.table_refs {
            for j in &t.joins {
                match &j.spec {
                    Some(JoinSpec::On(tree)) => {
                        if check_tree(tree) {
                            found = true;
                        }
                    }
                    // USING on a key column is a key equi-join by
                    // definition.
                    Some(JoinSpec::Using(cols)) => {
                        for c in cols {
                            if refs
                                .iter()
                                .any(|(_, info)| info.key_column() == Some(c.as_str()))
                            {
                                found = true;
                            }
                        }
                    }
                    None => {}
                }
            }
        }
        found
    }
}

impl QueryPlugin for TablePlugin {
    fn name(&self) -> &'static str {
        "Table"
    }

    fn apply_logical(&mut self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        // Default-db resolution and existence checks.
        let css = Arc::clone(&ctx.css);
        let default_db = ctx.default_db.clone();
        let mut failure: Option<AnalysisError> = None;
        let mut dbs = Vec::new();
        stmt.from_list.for_each_table_mut(|t: &mut TableRef| {
            if failure.is_some() {
                return;
            }
            if t.db.is_empty() {
                t.db = default_db.clone();
            }
            if let Err(e) = css.table_meta(&t.db, &t.table) {
                failure = Some(match e {
                    css::Error::NoSuchDb { db } => AnalysisError::UnknownDb { db },
                    css::Error::NoSuchTable { db, table } => {
                        AnalysisError::UnknownTable { db, table }
                    }
                });
                return;
            }
            dbs.push(t.db.clone());
        });
        if let Some(e) = failure {
            return Err(e);
        }
        ctx.referenced_dbs.extend(dbs);

        Self::assign_aliases(stmt, ctx)?;

        // Dominant database: first chunked table wins; all other chunked
        // tables must agree.
        for t in stmt.from_list.all_tables() {
            if ctx.table_info.get(&t.db, &t.table)?.is_some() {
                if ctx.dominant_db.is_empty() {
                    ctx.dominant_db = t.db.clone();
                } else if ctx.dominant_db != t.db {
                    return error::DominantDbMismatchSnafu {
                        db: t.db.clone(),
                        table: t.table.clone(),
                        dominant: ctx.dominant_db.clone(),
                    }
                    .fail();
                }
            }
        }
        if ctx.dominant_db.is_empty() {
            ctx.dominant_db = ctx.default_db.clone();
        }

        Self::resolve_columns(stmt, ctx)?;
        debug!(dominant_db = %ctx.dominant_db, tables = ctx.table_aliases.len(), "resolved tables");
        Ok(())
    }

    fn apply_physical(&mut self, plan: Plan<'_>, ctx: &mut QueryContext) -> Result<()> {
        let base = match plan.stmt_parallel.first() {
            Some(s) => s.clone(),
            None => {
                return error::BugSnafu {
                    message: "empty parallel statement family",
                }
                .fail()
            }
        };
        let refs = Self::chunked_refs(&base, ctx)?;
        if refs.is_empty() {
            return Ok(());
        }

        let sub_chunked = refs.len() >= 2 && !Self::has_key_equi_join(&base, &refs);
        if !sub_chunked {
            for stmt in plan.stmt_parallel.iter_mut() {
                for (alias, info) in &refs {
                    rename_ref(stmt, alias, None, info.chunk_template());
                }
            }
            ctx.query_mapping.insert_chunk_entry();
            return Ok(());
        }

        // Sub-chunked: the family becomes (sub x sub) plus (sub x overlap).
        if refs.len() > 2 {
            return error::TooManySubChunkedTablesSnafu.fail();
        }
        for (alias, info) in &refs {
            if !info.is_sub_chunkable() {
                return error::NotSubChunkableSnafu {
                    table: format!("{}.{} ({alias})", info.db(), info.table()),
                }
                .fail();
            }
        }
        let (first_alias, first) = &refs[0];
        let (second_alias, second) = &refs[1];

        let mut both_sub = base.clone();
        rename_ref(
            &mut both_sub,
            first_alias,
            Some(first.sub_chunk_db_template()),
            first.sub_chunk_template(),
        );
        rename_ref(
            &mut both_sub,
            second_alias,
            Some(second.sub_chunk_db_template()),
            second.sub_chunk_template(),
        );

        let mut sub_overlap = base;
        rename_ref(
            &mut sub_overlap,
            first_alias,
            Some(first.sub_chunk_db_template()),
            first.sub_chunk_template(),
        );
        rename_ref(
            &mut sub_overlap,
            second_alias,
            Some(second.sub_chunk_db_template()),
            second.overlap_template(),
        );

        *plan.stmt_parallel = vec![both_sub, sub_overlap];
        ctx.query_mapping
            .insert_sub_chunk_table(first.table().to_string());
        ctx.query_mapping
            .insert_sub_chunk_table(second.table().to_string());
        debug!("sub-chunked plan with overlap companion");
        Ok(())
    }
}

/// Rewrite the table (and optionally database) of the from-list entry
/// named `alias`.
fn rename_ref(stmt: &mut SelectStmt, alias: &str, db: Option<String>, table: String) {
    stmt.from_list.for_each_table_mut(|t: &mut TableRef| {
        if t.alias == alias {
            if let Some(db) = &db {
                t.db = db.clone();
            }
            t.table = table.clone();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn logical(sql: &str) -> (SelectStmt, QueryContext) {
        let mut stmt = query_parser::parse_select(sql).unwrap();
        let mut ctx = QueryContext::new("LSST", "qsmaster", css::lsst_test_css());
        TablePlugin.apply_logical(&mut stmt, &mut ctx).unwrap();
        (stmt, ctx)
    }

    fn physical(sql: &str) -> (Vec<SelectStmt>, QueryContext) {
        let (stmt, mut ctx) = logical(sql);
        let mut parallel = vec![stmt.clone()];
        let mut merge = stmt.copy_merge();
        TablePlugin
            .apply_physical(
                Plan {
                    stmt_original: &stmt,
                    stmt_parallel: &mut parallel,
                    stmt_merge: &mut merge,
                },
                &mut ctx,
            )
            .unwrap();
        (parallel, ctx)
    }

    #[test]
    fn default_db_and_self_alias() {
        let (stmt, ctx) = logical("SELECT * FROM Object WHERE someField > 5.0;");
        assert_eq!(stmt.from_list.table_refs[0].db, "LSST");
        assert_eq!(stmt.from_list.table_refs[0].alias, "Object");
        assert_eq!(ctx.dominant_db, "LSST");
        // The implicit self-alias does not change the rendered text.
        assert_eq!(
            stmt.query_template().to_string(),
            "SELECT * FROM LSST.Object WHERE someField>5.0"
        );
    }

    #[test]
    fn unknown_table_rejected() {
        let mut stmt = query_parser::parse_select("SELECT * FROM Nope;").unwrap();
        let mut ctx = QueryContext::new("LSST", "qsmaster", css::lsst_test_css());
        assert_matches!(
            TablePlugin.apply_logical(&mut stmt, &mut ctx),
            Err(AnalysisError::UnknownTable { .. })
        );
    }

    #[test]
    fn chunk_templates_simple_scan() {
        let (parallel, ctx) = physical("SELECT * FROM Object WHERE someField > 5.0;");
        assert_eq!(parallel.len(), 1);
        assert_eq!(
            parallel[0].query_template().to_string(),
            "SELECT * FROM LSST.Object_%CC% AS Object WHERE someField>5.0"
        );
        assert!(ctx.has_chunks());
        assert!(!ctx.has_sub_chunks());
    }

    #[test]
    fn replicated_table_untouched() {
        let (parallel, ctx) = physical("SELECT * FROM Filter WHERE filterId=4;");
        assert_eq!(
            parallel[0].query_template().to_string(),
            "SELECT * FROM LSST.Filter WHERE filterId=4"
        );
        assert!(!ctx.has_chunks());
    }

    #[test]
    fn near_neighbor_self_join_sub_chunks() {
        let (parallel, ctx) = physical(
            "SELECT count(*) FROM Object o1, Object o2 \
             WHERE o1.ra_PS BETWEEN 6 AND 7 AND o1.decl_PS BETWEEN 6 AND 7;",
        );
        assert_eq!(parallel.len(), 2);
        let a = parallel[0].query_template().to_string();
        let b = parallel[1].query_template().to_string();
        assert!(
            a.contains("Subchunks_LSST_%CC%.Object_%CC%_%SS% AS o1"),
            "{a}"
        );
        assert!(
            a.contains("Subchunks_LSST_%CC%.Object_%CC%_%SS% AS o2"),
            "{a}"
        );
        assert!(
            b.contains("Subchunks_LSST_%CC%.ObjectFullOverlap_%CC%_%SS% AS o2"),
            "{b}"
        );
        assert!(ctx.has_sub_chunks());
        assert_eq!(
            ctx.query_mapping.sub_chunk_tables().iter().next().unwrap(),
            "Object"
        );
    }

    #[test]
    fn key_equi_join_stays_chunked() {
        let (parallel, ctx) = physical(
            "SELECT o.objectId FROM Object o, Source s WHERE o.objectId=s.objectId;",
        );
        assert_eq!(parallel.len(), 1);
        let sql = parallel[0].query_template().to_string();
        assert!(sql.contains("LSST.Object_%CC% AS o"), "{sql}");
        assert!(sql.contains("LSST.Source_%CC% AS s"), "{sql}");
        assert!(!ctx.has_sub_chunks());
    }

    #[test]
    fn bare_column_with_two_tables_rejected() {
        let mut stmt =
            query_parser::parse_select("SELECT ra FROM Object o1, Object o2;").unwrap();
        let mut ctx = QueryContext::new("LSST", "qsmaster", css::lsst_test_css());
        assert_matches!(
            TablePlugin.apply_logical(&mut stmt, &mut ctx),
            Err(AnalysisError::AmbiguousColumn { .. })
        );
    }
}
