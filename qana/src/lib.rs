//! Query analysis.
//!
//! A fixed pipeline of plugins rewrites the parsed statement into a
//! parallel (per-chunk) statement family and a merge statement, while
//! accumulating ambient facts in a [`QueryContext`]: the dominant database,
//! extracted restrictors, scan-table classification, and the
//! [`QueryMapping`] that later turns templates into concrete chunk SQL.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod agg_op;
mod context;
mod error;
mod mapping;
mod plugin;
mod plugins;
mod table_info;

pub use agg_op::{AggOpMgr, AggRecord};
pub use context::QueryContext;
pub use error::AnalysisError;
pub use mapping::QueryMapping;
pub use plugin::{default_pipeline, Plan, QueryPlugin};
pub use table_info::{DirTableInfo, TableInfo, TableInfoPool};

/// Analysis result type.
pub type Result<T, E = AnalysisError> = std::result::Result<T, E>;
