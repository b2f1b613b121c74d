//! Re-exports the tracing ecosystem so every workspace crate pulls one
//! pinned version and upgrades happen in a single place.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(missing_docs)]

pub use tracing;
