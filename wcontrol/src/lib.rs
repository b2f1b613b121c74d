//! Worker control.
//!
//! [`Foreman`] owns the worker thread pool: it admits incoming per-chunk
//! task messages through the blend scheduler, executes fragments under the
//! memory gate, and streams results back on each task's reply channel.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod config;
mod error;
mod foreman;

pub use config::{MemManKind, WorkerConfig};
pub use error::Error;
pub use foreman::Foreman;
