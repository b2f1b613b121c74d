//! Tiered shared-scan scheduling with a memory gate.

use crate::Scheduler;
use data_types::ScanInfo;
use memman::{Handle, MemManRef, Priority};
use metric::{Registry, U64Gauge};
use observability_deps::tracing::{debug, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use wbase::Task;

/// The three scan tiers, fastest first.
const TIER_COUNT: usize = 3;
const TIER_NAMES: [&str; TIER_COUNT] = ["fast", "medium", "slow"];

/// Scan-scheduler tuning.
#[derive(Debug, Clone)]
pub struct ScanSchedulerConfig {
    /// Minimum pool threads kept available per tier so a heavy slow scan
    /// cannot starve fast queries. Order: fast, medium, slow.
    pub reserved_threads: [usize; TIER_COUNT],
    /// Resident-byte estimate per scanned table, fed to the memory gate.
    pub bytes_per_table: u64,
}

impl Default for ScanSchedulerConfig {
    fn default() -> Self {
        Self {
            reserved_threads: [1, 1, 1],
            bytes_per_table: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Default)]
struct Tier {
    queue: VecDeque<Arc<Task>>,
    running: usize,
}

#[derive(Debug, Default)]
struct ScanState {
    tiers: [Tier; TIER_COUNT],
    running: HashMap<String, (usize, Arc<Task>, Handle)>,
}

/// Shared-scan scheduler: tasks join the tier matching their declared scan
/// rating; dequeues go fastest-tier-first, honor the other tiers' reserved
/// thread floors, and pass the memory gate before a task is released.
#[derive(Debug)]
pub struct ScanScheduler {
    config: ScanSchedulerConfig,
    memman: MemManRef,
    state: Mutex<ScanState>,
    queue_depth: U64Gauge,
}

impl ScanScheduler {
    /// Build over a memory manager.
    pub fn new(config: ScanSchedulerConfig, memman: MemManRef, registry: &Registry) -> Self {
        let queue_depth = registry
            .register_metric::<U64Gauge>("wsched_scan_queued", "queued scan tasks")
            .recorder([("scheduler", "scan")]);
        Self {
            config,
            memman,
            state: Mutex::new(ScanState::default()),
            queue_depth,
        }
    }

    fn tier_of(task: &Task) -> usize {
        let rating = task.scan_info.scan_rating;
        if rating <= ScanInfo::RATING_FAST {
            0
        } else if rating <= ScanInfo::RATING_MEDIUM {
            1
        } else {
            2
        }
    }

    fn update_depth(&self, state: &ScanState) {
        let total: usize = state.tiers.iter().map(|t| t.queue.len()).sum();
        self.queue_depth.set(total as u64);
    }
}

impl Scheduler for ScanScheduler {
    fn name(&self) -> &'static str {
        "ScanSched"
    }

    fn queue_task(&self, task: Arc<Task>) {
        let tier = Self::tier_of(&task);
        let mut state = self.state.lock();
        state.tiers[tier].queue.push_back(task);
        self.update_depth(&state);
        debug!(tier = TIER_NAMES[tier], "scan task queued");
    }

    fn take_batch(&self, free_threads: usize) -> Vec<Arc<Task>> {
        if free_threads == 0 {
            return vec![];
        }
        let mut state = self.state.lock();
        for tier in 0..TIER_COUNT {
            if state.tiers[tier].queue.is_empty() {
                continue;
            }
            // Respect the reserved floors of faster tiers that still have
            // pending work: taking this thread must leave them enough.
            let owed: usize = (0..tier)
                .filter(|&t| !state.tiers[t].queue.is_empty())
                .map(|t| {
                    self.config.reserved_threads[t].saturating_sub(state.tiers[t].running)
                })
                .sum();
            if free_threads <= owed {
                continue;
            }

            let task = state.tiers[tier]
                .queue
                .pop_front()
                .expect("tier queue checked non-empty");
            // Memory gate: slow scans must fit; faster tiers run
            // unreserved when the budget is exhausted.
            let priority = if tier == TIER_COUNT - 1 {
                Priority::Required
            } else {
                Priority::Flexible
            };
            let bytes = self.config.bytes_per_table * task.scan_info.tables.len() as u64;
            let handle = match self
                .memman
                .reserve(&task.scan_info.tables, task.chunk_id, bytes, priority)
            {
                Ok(h) => h,
                Err(e) => {
                    warn!(tier = TIER_NAMES[tier], error = %e, "reservation denied; task re-queued");
                    state.tiers[tier].queue.push_front(task);
                    continue;
                }
            };
            state.tiers[tier].running += 1;
            state
                .running
                .insert(task.hash.clone(), (tier, Arc::clone(&task), handle));
            self.update_depth(&state);
            return vec![task];
        }
        vec![]
    }

    fn mark_started(&self, _task: &Arc<Task>) {
        // Accounting happened at take time; releasing a task and running
        // it are one step for this scheduler.
    }

    fn mark_finished(&self, task: &Arc<Task>) {
        let mut state = self.state.lock();
        if let Some((tier, _, handle)) = state.running.remove(&task.hash) {
            state.tiers[tier].running = state.tiers[tier].running.saturating_sub(1);
            self.memman.release(handle);
        }
    }

    fn remove_by_hash(&self, hash: &str) -> bool {
        // Poison in place; a queued task still owes the client a reply
        // envelope, which it sends when it aborts on dequeue.
        let state = self.state.lock();
        for tier in &state.tiers {
            if let Some(task) = tier.queue.iter().find(|t| t.hash == hash) {
                task.poison();
                return true;
            }
        }
        if let Some((_, task, _)) = state.running.get(hash) {
            task.poison();
            return true;
        }
        false
    }

    fn queue_len(&self) -> usize {
        let state = self.state.lock();
        state.tiers.iter().map(|t| t.queue.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memman::{MemMan, MemManNone, MemManReal};
    use proto::{ScanInfoMsg, ScanTableMsg, TaskMsg};
    use wbase::MemSendChannel;

    fn scan_task(chunk_id: i32, rating: i32, marker: &str) -> Arc<Task> {
        let msg = TaskMsg {
            db: "LSST".into(),
            chunk_id,
            protocol: proto::PROTOCOL_VERSION,
            session: marker.into(),
            scan_info: Some(ScanInfoMsg {
                scan_rating: rating,
                tables: vec![ScanTableMsg {
                    db: "LSST".into(),
                    table: "Object".into(),
                }],
            }),
            ..Default::default()
        };
        Task::new(&msg, Arc::new(MemSendChannel::new()))
    }

    fn scheduler(memman: MemManRef) -> ScanScheduler {
        ScanScheduler::new(ScanSchedulerConfig::default(), memman, &Registry::new())
    }

    #[test]
    fn fast_tier_preferred() {
        let sched = scheduler(Arc::new(MemManNone));
        sched.queue_task(scan_task(1, ScanInfo::RATING_SLOW, "slow"));
        sched.queue_task(scan_task(2, ScanInfo::RATING_FAST, "fast"));

        let batch = sched.take_batch(8);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].chunk_id, 2);
    }

    #[test]
    fn reserved_floor_blocks_starvation() {
        let sched = scheduler(Arc::new(MemManNone));
        sched.queue_task(scan_task(1, ScanInfo::RATING_SLOW, "slow"));
        sched.queue_task(scan_task(2, ScanInfo::RATING_FAST, "fast"));

        // With a single free thread and a fast task pending, the slow tier
        // may not take it; the fast tier may.
        let batch = sched.take_batch(1);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].chunk_id, 2);

        // Now only the slow task remains; one thread is enough.
        let batch = sched.take_batch(1);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].chunk_id, 1);
    }

    #[test]
    fn slow_tier_requires_memory() {
        let memman = Arc::new(MemManReal::new(1));
        let sched = scheduler(memman);
        sched.queue_task(scan_task(1, ScanInfo::RATING_SLOW, "slow"));
        // Required reservation cannot fit: the task stays queued.
        assert!(sched.take_batch(8).is_empty());
        assert_eq!(sched.queue_len(), 1);
    }

    #[test]
    fn finish_releases_reservation() {
        let memman = Arc::new(MemManReal::new(u64::MAX));
        let mm: MemManRef = Arc::clone(&memman) as _;
        let sched = ScanScheduler::new(
            ScanSchedulerConfig::default(),
            mm,
            &Registry::new(),
        );
        sched.queue_task(scan_task(1, ScanInfo::RATING_FAST, "t"));
        let batch = sched.take_batch(4);
        assert_eq!(batch.len(), 1);
        assert!(memman.bytes_reserved() > 0);
        sched.mark_finished(&batch[0]);
        assert_eq!(memman.bytes_reserved(), 0);
    }
}
