//! The plugin interface and the fixed pipeline.

use crate::context::QueryContext;
use crate::plugins;
use crate::Result;
use query::SelectStmt;

/// The concrete plan under construction: the untouched original statement,
/// the parallel statement family (one entry unless sub-chunking splits it),
/// and the merge statement.
#[derive(Debug)]
pub struct Plan<'a> {
    pub stmt_original: &'a SelectStmt,
    pub stmt_parallel: &'a mut Vec<SelectStmt>,
    pub stmt_merge: &'a mut SelectStmt,
}

/// One stage of the analysis pipeline. `prepare` runs once per session;
/// `apply_logical` sees the statement before the concrete plan exists;
/// `apply_physical` rewrites the plan; `apply_final` observes the whole
/// session just before iteration starts.
pub trait QueryPlugin: Send + std::fmt::Debug {
    /// Stable name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Once-per-session setup.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Rewrite the logical statement.
    fn apply_logical(&mut self, _stmt: &mut SelectStmt, _ctx: &mut QueryContext) -> Result<()> {
        Ok(())
    }

    /// Rewrite the concrete plan.
    fn apply_physical(&mut self, _plan: Plan<'_>, _ctx: &mut QueryContext) -> Result<()> {
        Ok(())
    }

    /// Whole-plan observation after chunks are known.
    fn apply_final(&mut self, _ctx: &mut QueryContext) -> Result<()> {
        Ok(())
    }
}

/// The fixed pipeline, in invocation order.
pub fn default_pipeline() -> Vec<Box<dyn QueryPlugin>> {
    vec![
        Box::new(plugins::DuplicateSelectExprPlugin::default()),
        Box::new(plugins::WherePlugin::default()),
        Box::new(plugins::AggregatePlugin::default()),
        Box::new(plugins::TablePlugin::default()),
        Box::new(plugins::MatchTablePlugin::default()),
        Box::new(plugins::QservRestrictorPlugin::default()),
        Box::new(plugins::PostPlugin::default()),
        Box::new(plugins::ScanTablePlugin::default()),
    ]
}
