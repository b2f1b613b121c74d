//! User-query control.
//!
//! Glues the analysis session, the dispatch executive, and the result
//! merger into one [`UserQuery`] lifecycle: analyze, submit a job per
//! chunk, join, merge.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod config;
mod error;
mod merging_handler;
mod user_query;

pub use config::ClientConfig;
pub use error::Error;
pub use merging_handler::MergingHandler;
pub use user_query::{Result, UserQuery, UserQueryFactory};
