//! The fixed plugin set, in pipeline order.

mod aggregate;
mod duplicate_select_expr;
mod match_table;
mod post;
mod qserv_restrictor;
mod scan_table;
mod table;
mod where_plugin;

pub use aggregate::AggregatePlugin;
pub use duplicate_select_expr::DuplicateSelectExprPlugin;
pub use match_table::MatchTablePlugin;
pub use post::PostPlugin;
pub use qserv_restrictor::QservRestrictorPlugin;
pub use scan_table::ScanTablePlugin;
pub use table::TablePlugin;
pub use where_plugin::WherePlugin;
