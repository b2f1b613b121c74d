//! Worker-side task base.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod base;
mod send_channel;
mod task;

pub use base::{
    cleanup_sub_chunk_stmt, create_sub_chunk_stmt, sub_chunk_db, sub_chunk_table, overlap_table,
    SUBCHUNKDB_PREFIX, SUB_CHUNK_COLUMN,
};
pub use send_channel::{MemSendChannel, SendChannel, SendChannelRef};
pub use task::{Task, TaskFragment};
