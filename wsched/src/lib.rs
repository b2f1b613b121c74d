//! Worker task scheduling.
//!
//! Two scheduler classes share the worker pool: a FIFO [`GroupScheduler`]
//! with same-chunk coalescing for interactive tasks, and a three-tier
//! [`ScanScheduler`] with reserved-thread floors and a memory-manager gate
//! for shared scans. The [`BlendScheduler`] routes each incoming task to
//! one of them by its scan classification.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod blend;
mod group;
mod scan;

pub use blend::BlendScheduler;
pub use group::GroupScheduler;
pub use scan::{ScanScheduler, ScanSchedulerConfig};

use std::fmt;
use std::sync::Arc;
use wbase::Task;

/// The surface the foreman drives. All methods are called from pool
/// threads; implementations guard their queues internally.
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Scheduler name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Admit a task to the queue.
    fn queue_task(&self, task: Arc<Task>);

    /// Hand out the next batch of runnable tasks given `free_threads`
    /// currently idle pool threads. An empty result means nothing is
    /// admissible right now.
    fn take_batch(&self, free_threads: usize) -> Vec<Arc<Task>>;

    /// A pool thread began executing `task`.
    fn mark_started(&self, task: &Arc<Task>);

    /// `task` finished (successfully or not); release anything held for
    /// it.
    fn mark_finished(&self, task: &Arc<Task>);

    /// Cancel the task with `hash`: remove it if queued, poison it if
    /// running. `true` when a task was found.
    fn remove_by_hash(&self, hash: &str) -> bool;

    /// Tasks waiting in the queue.
    fn queue_len(&self) -> usize;
}

/// Shared scheduler handle.
pub type SchedulerRef = Arc<dyn Scheduler>;
