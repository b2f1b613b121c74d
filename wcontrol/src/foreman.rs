//! The foreman: accepts task messages and drives the worker pool.

use crate::config::{MemManKind, WorkerConfig};
use crate::error::{self, Error};
use memman::{MemManNone, MemManReal, MemManRef};
use metric::{Registry, U64Gauge};
use observability_deps::tracing::{debug, info};
use parking_lot::{Condvar, Mutex};
use proto::TaskMsg;
use snafu::ResultExt as _;
use sql::SqlConnectionRef;
use std::sync::Arc;
use std::thread::JoinHandle;
use wbase::{SendChannelRef, Task};
use wdb::{BackendRef, ChunkResourceMgr, QueryRunner, QueryRunnerConfig, SqlBackend};
use wsched::{
    BlendScheduler, GroupScheduler, ScanScheduler, ScanSchedulerConfig, Scheduler, SchedulerRef,
};

#[derive(Debug)]
struct PoolState {
    free_threads: usize,
    shutdown: bool,
}

#[derive(Debug)]
struct Shared {
    scheduler: SchedulerRef,
    mgr: Arc<ChunkResourceMgr>,
    conn: SqlConnectionRef,
    runner_config: QueryRunnerConfig,
    state: Mutex<PoolState>,
    work_available: Condvar,
    running_gauge: U64Gauge,
}

/// Accepts per-chunk task messages, queues them through the blend
/// scheduler, and executes them on a bounded thread pool. Pool threads
/// recycle: a thread finishing a batch immediately asks the scheduler for
/// follow-on work, which is what makes same-chunk coalescing pay off.
#[derive(Debug)]
pub struct Foreman {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    pool_size: usize,
}

impl Foreman {
    /// Build the pool and its scheduler stack from a worker config. The
    /// scratch database is dropped and re-created so no stale result or
    /// sub-chunk tables survive a restart.
    pub fn new(config: &WorkerConfig, conn: SqlConnectionRef, registry: &Registry) -> Self {
        if !config.scratch_db.is_empty() {
            for stmt in [
                format!("DROP DATABASE IF EXISTS {}", config.scratch_db),
                format!("CREATE DATABASE {}", config.scratch_db),
            ] {
                if let Err(e) = conn.run_statement(&stmt) {
                    info!(error = %e, "scratch database reset failed");
                }
            }
        }
        let memman: MemManRef = match config.memman {
            MemManKind::Real => Arc::new(MemManReal::with_budget_mb(config.memman_mb)),
            MemManKind::None => Arc::new(MemManNone),
        };
        let group: SchedulerRef = Arc::new(GroupScheduler::new(config.group_size));
        let scan: SchedulerRef = Arc::new(ScanScheduler::new(
            ScanSchedulerConfig {
                reserved_threads: [
                    config.reserve_fast,
                    config.reserve_medium,
                    config.reserve_slow,
                ],
                ..Default::default()
            },
            memman,
            registry,
        ));
        let scheduler: SchedulerRef = Arc::new(BlendScheduler::new(group, scan));
        let backend: BackendRef = Arc::new(SqlBackend::new(Arc::clone(&conn)));
        let running_gauge = registry
            .register_metric::<U64Gauge>("wcontrol_running_tasks", "tasks executing on the pool")
            .recorder([("pool", "worker")]);

        let shared = Arc::new(Shared {
            scheduler,
            mgr: ChunkResourceMgr::new(backend),
            conn,
            runner_config: QueryRunnerConfig::default(),
            state: Mutex::new(PoolState {
                free_threads: config.pool_size,
                shutdown: false,
            }),
            work_available: Condvar::new(),
            running_gauge,
        });

        let mut threads = Vec::with_capacity(config.pool_size);
        for i in 0..config.pool_size {
            let shared = Arc::clone(&shared);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("qsw-pool-{i}"))
                    .spawn(move || pool_thread(shared))
                    .expect("spawn worker pool thread"),
            );
        }
        info!(pool_size = config.pool_size, "foreman started");
        Self {
            shared,
            threads: Mutex::new(threads),
            pool_size: config.pool_size,
        }
    }

    /// Pool size in threads.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Decode a wire payload and admit it.
    pub fn accept_bytes(
        &self,
        payload: &[u8],
        channel: SendChannelRef,
    ) -> Result<Arc<Task>, Error> {
        let msg = TaskMsg::from_bytes(payload).context(error::BadTaskMsgSnafu)?;
        self.accept(&msg, channel)
    }

    /// Admit a decoded task message.
    pub fn accept(&self, msg: &TaskMsg, channel: SendChannelRef) -> Result<Arc<Task>, Error> {
        if self.shared.state.lock().shutdown {
            return error::ShutDownSnafu.fail();
        }
        let task = Task::new(msg, channel);
        debug!(chunk_id = task.chunk_id, scan = task.is_scan(), "task accepted");
        self.shared.scheduler.queue_task(Arc::clone(&task));
        self.shared.work_available.notify_all();
        Ok(task)
    }

    /// Client-originated squash: poison the matching queued or running
    /// task.
    pub fn squash_by_hash(&self, hash: &str) -> bool {
        let found = self.shared.scheduler.remove_by_hash(hash);
        if found {
            info!(hash, "task poisoned by squash");
        }
        found
    }

    /// Tasks waiting for a pool thread.
    pub fn queue_len(&self) -> usize {
        self.shared.scheduler.queue_len()
    }

    /// Stop accepting work, finish nothing more, and join the pool.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.work_available.notify_all();
        let mut threads = self.threads.lock();
        for t in threads.drain(..) {
            let _ = t.join();
        }
    }
}

impl Drop for Foreman {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pool_thread(shared: Arc<Shared>) {
    loop {
        // Wait for admissible work while registered as a free thread.
        let batch = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                let batch = shared.scheduler.take_batch(state.free_threads);
                if !batch.is_empty() {
                    state.free_threads -= 1;
                    break batch;
                }
                shared.work_available.wait(&mut state);
            }
        };

        for task in batch {
            shared.scheduler.mark_started(&task);
            shared.running_gauge.inc(1);
            let runner = QueryRunner::new(
                Arc::clone(&task),
                Arc::clone(&shared.mgr),
                Arc::clone(&shared.conn),
                shared.runner_config.clone(),
            );
            let ok = runner.run();
            debug!(chunk_id = task.chunk_id, ok, "task finished");
            shared.running_gauge.dec(1);
            shared.scheduler.mark_finished(&task);
        }

        {
            let mut state = shared.state.lock();
            state.free_threads += 1;
        }
        // Freed capacity (and possibly a released reservation) may unblock
        // queued scans.
        shared.work_available.notify_all();
    }
}
