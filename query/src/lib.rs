//! The parsed-statement model.
//!
//! A user SELECT is held as trees of value expressions and boolean terms
//! plus clause containers; the analysis plugins rewrite these trees in
//! place, and [`QueryTemplate`] renders a statement back to SQL text with
//! chunk placeholders intact.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod bool_term;
mod column_ref;
mod from_list;
mod func_expr;
mod order_by;
mod query_template;
mod restrictor;
mod select_list;
mod select_stmt;
mod value_expr;
mod value_factor;
mod where_clause;

pub use bool_term::{BoolFactor, BoolFactorTerm, BoolTerm, Predicate};
pub use column_ref::ColumnRef;
pub use from_list::{FromList, JoinRef, JoinSpec, JoinType, TableRef};
pub use func_expr::FuncExpr;
pub use order_by::{OrderByClause, OrderByTerm, SortOrder};
pub use query_template::{QueryTemplate, CHUNK_TAG, SUBCHUNK_TAG};
pub use restrictor::{QsRestrictor, RestrictorError};
pub use select_list::SelectList;
pub use select_stmt::{GroupByClause, HavingClause, SelectStmt};
pub use value_expr::{FactorOp, Op, ValueExpr};
pub use value_factor::ValueFactor;
pub use where_clause::WhereClause;
