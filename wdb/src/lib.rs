//! The worker execution core.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod chunk_resource;
mod query_runner;
mod query_sql;

pub use chunk_resource::{
    Backend, BackendRef, ChunkResource, ChunkResourceMgr, FakeBackend, ResourceError, ScTable,
    SqlBackend,
};
pub use query_runner::{QueryRunner, QueryRunnerConfig};
pub use query_sql::{split_into_pieces, PIECE_TARGET_BYTES};
