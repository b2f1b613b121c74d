//! Match-table validation and join handling.

use crate::context::QueryContext;
use crate::error;
use crate::plugin::{Plan, QueryPlugin};
use crate::table_info::TableInfo;
use crate::Result;
use query::SelectStmt;

/// Checks every match table in the FROM list: its two directors must exist,
/// be distinct, and share a partitioning (the classification pool enforces
/// those), and a match table can never participate in a sub-chunked join
/// since it has no position of its own.
#[derive(Debug, Default)]
pub struct MatchTablePlugin;

impl QueryPlugin for MatchTablePlugin {
    fn name(&self) -> &'static str {
        "MatchTable"
    }

    fn apply_logical(&mut self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        // Force classification now so a broken match table surfaces as an
        // analysis error before any plan is built.
        for t in stmt.from_list.all_tables() {
            let _ = ctx.table_info.get(&t.db, &t.table)?;
        }
        Ok(())
    }

    fn apply_physical(&mut self, plan: Plan<'_>, ctx: &mut QueryContext) -> Result<()> {
        if !ctx.has_sub_chunks() {
            return Ok(());
        }
        let stmt = match plan.stmt_parallel.first() {
            Some(s) => s,
            None => return Ok(()),
        };
        for t in stmt.from_list.all_tables() {
            // Templated names no longer resolve in the catalog; consult the
            // pre-rewrite alias map instead.
            if let Some(table) = ctx.table_for_alias(&t.alias).cloned() {
                let info = ctx.table_info.get(&table.db, &table.table)?;
                if let Some(info) = info {
                    if matches!(*info, TableInfo::Match { .. }) {
                        return error::NotSubChunkableSnafu {
                            table: table.to_string(),
                        }
                        .fail();
                    }
                }
            }
        }
        Ok(())
    }
}
