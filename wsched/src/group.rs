//! FIFO scheduling with same-chunk coalescing.

use crate::Scheduler;
use observability_deps::tracing::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use wbase::Task;

#[derive(Debug, Default)]
struct GroupState {
    queue: VecDeque<Arc<Task>>,
    running: HashMap<String, Arc<Task>>,
}

/// Interactive-task scheduler: FIFO, but a dequeue opportunistically pulls
/// up to `max_group_size` queued tasks for the same chunk so one thread
/// amortizes that chunk's table access over a run of tasks.
#[derive(Debug)]
pub struct GroupScheduler {
    max_group_size: usize,
    state: Mutex<GroupState>,
}

impl GroupScheduler {
    /// `max_group_size` of 1 disables coalescing.
    pub fn new(max_group_size: usize) -> Self {
        Self {
            max_group_size: max_group_size.max(1),
            state: Mutex::new(GroupState::default()),
        }
    }
}

impl Scheduler for GroupScheduler {
    fn name(&self) -> &'static str {
        "GroupSched"
    }

    fn queue_task(&self, task: Arc<Task>) {
        self.state.lock().queue.push_back(task);
    }

    fn take_batch(&self, free_threads: usize) -> Vec<Arc<Task>> {
        if free_threads == 0 {
            return vec![];
        }
        let mut state = self.state.lock();
        let Some(first) = state.queue.pop_front() else {
            return vec![];
        };
        let chunk_id = first.chunk_id;
        let mut batch = vec![first];
        while batch.len() < self.max_group_size {
            let Some(pos) = state.queue.iter().position(|t| t.chunk_id == chunk_id) else {
                break;
            };
            let task = state
                .queue
                .remove(pos)
                .expect("position found in queue above");
            batch.push(task);
        }
        if batch.len() > 1 {
            debug!(chunk_id, batched = batch.len(), "coalesced same-chunk tasks");
        }
        batch
    }

    fn mark_started(&self, task: &Arc<Task>) {
        self.state
            .lock()
            .running
            .insert(task.hash.clone(), Arc::clone(task));
    }

    fn mark_finished(&self, task: &Arc<Task>) {
        self.state.lock().running.remove(&task.hash);
    }

    fn remove_by_hash(&self, hash: &str) -> bool {
        // Queued tasks are poisoned in place rather than dropped: they
        // still owe the client a (cancelled) reply envelope.
        let state = self.state.lock();
        if let Some(task) = state.queue.iter().find(|t| t.hash == hash) {
            task.poison();
            return true;
        }
        if let Some(task) = state.running.get(hash) {
            task.poison();
            return true;
        }
        false
    }

    fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::TaskMsg;
    use wbase::MemSendChannel;

    fn task(chunk_id: i32, marker: &str) -> Arc<Task> {
        let msg = TaskMsg {
            db: "LSST".into(),
            chunk_id,
            protocol: proto::PROTOCOL_VERSION,
            session: marker.into(),
            ..Default::default()
        };
        Task::new(&msg, Arc::new(MemSendChannel::new()))
    }

    #[test]
    fn coalesces_same_chunk_up_to_group_size() {
        let sched = GroupScheduler::new(2);
        sched.queue_task(task(1, "a"));
        sched.queue_task(task(2, "b"));
        sched.queue_task(task(1, "c"));
        sched.queue_task(task(1, "d"));

        let batch = sched.take_batch(4);
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|t| t.chunk_id == 1));

        let batch = sched.take_batch(4);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].chunk_id, 2);

        // The remaining chunk-1 task was left for a later dequeue.
        assert_eq!(sched.queue_len(), 1);
    }

    #[test]
    fn remove_by_hash_poisons_queued_and_running() {
        let sched = GroupScheduler::new(1);
        let queued = task(1, "q");
        let running = task(2, "r");
        sched.queue_task(Arc::clone(&queued));
        sched.mark_started(&running);

        assert!(sched.remove_by_hash(&queued.hash));
        assert!(queued.is_poisoned());
        // Poisoned but still queued: it owes the client an envelope.
        assert_eq!(sched.queue_len(), 1);

        assert!(sched.remove_by_hash(&running.hash));
        assert!(running.is_poisoned());

        assert!(!sched.remove_by_hash("no-such-hash"));
    }
}
