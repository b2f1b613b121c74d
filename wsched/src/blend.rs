//! Routing between the group and scan schedulers.

use crate::{Scheduler, SchedulerRef};
use observability_deps::tracing::debug;
use std::sync::Arc;
use wbase::Task;

/// Routes each incoming task by the presence of scan tables: scans go to
/// the scan scheduler, everything else to the group scheduler. Dequeues
/// favor interactive (group) work; the pool size cap is the foreman's,
/// enforced through the `free_threads` argument.
#[derive(Debug)]
pub struct BlendScheduler {
    group: SchedulerRef,
    scan: SchedulerRef,
}

impl BlendScheduler {
    /// Build over the two sub-schedulers.
    pub fn new(group: SchedulerRef, scan: SchedulerRef) -> Self {
        Self { group, scan }
    }

    fn lookup(&self, task: &Task) -> &SchedulerRef {
        if task.is_scan() {
            &self.scan
        } else {
            &self.group
        }
    }
}

impl Scheduler for BlendScheduler {
    fn name(&self) -> &'static str {
        "BlendSched"
    }

    fn queue_task(&self, task: Arc<Task>) {
        let target = self.lookup(&task);
        debug!(scheduler = target.name(), chunk_id = task.chunk_id, "routing task");
        target.queue_task(task);
    }

    fn take_batch(&self, free_threads: usize) -> Vec<Arc<Task>> {
        let batch = self.group.take_batch(free_threads);
        if !batch.is_empty() {
            return batch;
        }
        self.scan.take_batch(free_threads)
    }

    fn mark_started(&self, task: &Arc<Task>) {
        self.lookup(task).mark_started(task);
    }

    fn mark_finished(&self, task: &Arc<Task>) {
        self.lookup(task).mark_finished(task);
    }

    fn remove_by_hash(&self, hash: &str) -> bool {
        self.group.remove_by_hash(hash) || self.scan.remove_by_hash(hash)
    }

    fn queue_len(&self) -> usize {
        self.group.queue_len() + self.scan.queue_len()
    }
}
