//! Rejects duplicated output-expression aliases.

use crate::context::QueryContext;
use crate::error;
use crate::plugin::QueryPlugin;
use crate::Result;
use query::SelectStmt;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct DuplicateSelectExprPlugin;

impl QueryPlugin for DuplicateSelectExprPlugin {
    fn name(&self) -> &'static str {
        "DuplicateSelectExpr"
    }

    fn apply_logical(&mut self, stmt: &mut SelectStmt, _ctx: &mut QueryContext) -> Result<()> {
        let mut seen = BTreeSet::new();
        for expr in &stmt.select_list.value_exprs {
            if let Some(alias) = &expr.alias {
                if !seen.insert(alias.to_ascii_lowercase()) {
                    return error::DuplicateSelectAliasSnafu {
                        alias: alias.clone(),
                    }
                    .fail();
                }
            }
        }
        Ok(())
    }
}
