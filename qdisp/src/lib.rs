//! The dispatch executive.
//!
//! [`Executive`] owns per-query dispatch of N chunk requests over a
//! streaming transport: it tracks each job's state, retries transient
//! failures under a bounded per-job counter, coordinates query-wide squash
//! on the first unrecoverable error, and guarantees that [`Executive::join`]
//! returns only after every tracked request reached a terminal state.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod executive;
mod job_status;
mod mock;
mod resource;
mod response;
mod service;

pub use executive::{Executive, ExecutiveConfig, JobDescription, MultiError};
pub use job_status::{JobInfo, JobState, JobStatus};
pub use mock::{mock_service, MockQueryService, MockScript};
pub use resource::ResourceUnit;
pub use response::{CollectingHandler, HandlerError, ResponseHandler, ResponseHandlerRef};
pub use service::{DispatchErrorKind, DispatchOutcome, QueryService};
