//! The executive proper.

use crate::job_status::{JobState, JobStatus};
use crate::resource::ResourceUnit;
use crate::response::{HandlerError, ResponseHandlerRef};
use crate::service::{DispatchErrorKind, DispatchOutcome, QueryService};
use data_types::JobId;
use metric::{Registry, U64Counter};
use observability_deps::tracing::{debug, error, info, warn};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Dispatch tuning.
#[derive(Debug, Clone)]
pub struct ExecutiveConfig {
    /// Retries allowed per job after the first attempt.
    pub max_retries: u32,
    /// Base delay between attempts; jittered and scaled by attempt count.
    pub retry_delay: Duration,
}

impl Default for ExecutiveConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Everything needed to dispatch one chunk job.
#[derive(Debug, Clone)]
pub struct JobDescription {
    pub resource: ResourceUnit,
    pub request: proto::TaskMsg,
    pub handler: ResponseHandlerRef,
}

/// Accumulates per-job errors so the caller can report them together.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<(JobId, HandlerError)>,
}

impl MultiError {
    /// Record one job's error.
    pub fn push(&mut self, job_id: JobId, error: HandlerError) {
        self.errors.push((job_id, error));
    }

    /// No errors recorded?
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Recorded errors, in arrival order.
    pub fn errors(&self) -> &[(JobId, HandlerError)] {
        &self.errors
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (job_id, e)) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "job {job_id}: {e}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct ExecutiveMetrics {
    dispatch_total: U64Counter,
    retry_total: U64Counter,
    error_total: U64Counter,
}

impl ExecutiveMetrics {
    fn new(registry: &Registry) -> Self {
        let requests = registry
            .register_metric::<U64Counter>("qdisp_requests", "chunk requests by disposition");
        Self {
            dispatch_total: requests.recorder([("disposition", "dispatched")]),
            retry_total: requests.recorder([("disposition", "retried")]),
            error_total: requests.recorder([("disposition", "errored")]),
        }
    }
}

/// Asynchronous per-query dispatcher. One instance per user query.
#[derive(Debug)]
pub struct Executive {
    config: ExecutiveConfig,
    service: Arc<dyn QueryService>,
    statuses: Mutex<HashMap<JobId, Arc<JobStatus>>>,
    handlers: Mutex<HashMap<JobId, ResponseHandlerRef>>,
    retries: Mutex<HashMap<JobId, u32>>,
    cancelled: Mutex<bool>,
    cancel_token: CancellationToken,
    handlers_empty: Notify,
    errors: Mutex<MultiError>,
    request_count: AtomicUsize,
    metrics: ExecutiveMetrics,
}

impl Executive {
    /// Build an executive over a transport.
    pub fn new(
        config: ExecutiveConfig,
        service: Arc<dyn QueryService>,
        registry: &Registry,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            service,
            statuses: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            retries: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(false),
            cancel_token: CancellationToken::new(),
            handlers_empty: Notify::new(),
            errors: Mutex::new(MultiError::default()),
            request_count: AtomicUsize::new(0),
            metrics: ExecutiveMetrics::new(registry),
        })
    }

    /// Register a job and start dispatching it. Idempotent on duplicate
    /// job ids; silently rejected after cancellation.
    pub fn add(self: &Arc<Self>, job_id: JobId, desc: JobDescription) {
        if *self.cancelled.lock() {
            info!(%job_id, "executive already cancelled, ignoring add");
            return;
        }
        if !self.track(job_id, Arc::clone(&desc.handler)) {
            warn!(%job_id, "ignoring duplicate add");
            return;
        }
        let status = Arc::new(JobStatus::new());
        self.statuses.lock().insert(job_id, Arc::clone(&status));
        self.request_count.fetch_add(1, Ordering::SeqCst);
        info!(%job_id, path = %desc.resource.path(), "dispatching job");

        let executive = Arc::clone(self);
        tokio::spawn(async move {
            executive.run_job(job_id, desc, status).await;
        });
    }

    async fn run_job(self: Arc<Self>, job_id: JobId, desc: JobDescription, status: Arc<JobStatus>) {
        loop {
            status.update(JobState::Provisioning);
            self.metrics.dispatch_total.inc(1);
            let outcome = self
                .service
                .dispatch(
                    &desc.resource,
                    desc.request.clone(),
                    Arc::clone(&desc.handler),
                    self.cancel_token.child_token(),
                )
                .await;

            match outcome {
                DispatchOutcome::Success => {
                    status.update(JobState::ResponseDone);
                    self.mark_completed(job_id, true);
                    return;
                }
                DispatchOutcome::Error {
                    kind,
                    code,
                    message,
                } => {
                    let state = match kind {
                        DispatchErrorKind::Provision | DispatchErrorKind::Stream => {
                            JobState::ProvisionError
                        }
                        DispatchErrorKind::Result => JobState::ResultError,
                        DispatchErrorKind::Cancelled => JobState::Cancelled,
                    };
                    status.update_info(state, code, message.clone());

                    if kind == DispatchErrorKind::Cancelled {
                        debug!(%job_id, "job cancelled");
                        self.untrack(job_id);
                        return;
                    }
                    let may_retry = kind.is_retryable()
                        && !*self.cancelled.lock()
                        && self.should_retry(job_id);
                    if may_retry {
                        if desc.handler.reset() {
                            let attempt = self.attempts(job_id);
                            let delay = self.retry_delay(attempt);
                            warn!(
                                %job_id, %kind, code, attempt,
                                delay_ms = delay.as_millis() as u64,
                                "transient dispatch failure, retrying",
                            );
                            self.metrics.retry_total.inc(1);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        // A handler that cannot reset has already delivered
                        // data; the job is finished as errored.
                        warn!(%job_id, "handler reset failed, finalizing as error");
                    } else {
                        error!(%job_id, %kind, code, message = %message, "job failed");
                    }
                    self.mark_completed(job_id, false);
                    return;
                }
            }
        }
    }

    /// Block until every tracked job reached a terminal state; `true` iff
    /// all of them succeeded.
    pub async fn join(&self) -> bool {
        // Re-check on a coarse timer as well as on the empty signal, so a
        // wake-up racing the emptiness check is never lost.
        let recheck = Duration::from_secs(5);
        loop {
            let inflight = self.handlers.lock().len();
            if inflight == 0 {
                break;
            }
            debug!(inflight, "still in flight");
            let _ = tokio::time::timeout(recheck, self.handlers_empty.notified()).await;
        }
        let requested = self.request_count.load(Ordering::SeqCst);
        let succeeded = self
            .statuses
            .lock()
            .values()
            .filter(|s| s.info().state.is_success())
            .count();
        info!(requested, succeeded, "query dispatch finished");
        succeeded == requested
    }

    /// Mark one job's completion. The first call for a job wins; later
    /// calls are no-ops.
    pub fn mark_completed(&self, job_id: JobId, success: bool) {
        let Some(handler) = self.untrack(job_id) else {
            return;
        };
        if success {
            return;
        }
        let mut err = handler.error();
        if err.is_none() {
            let info = self
                .statuses
                .lock()
                .get(&job_id)
                .map(|s| s.info())
                .unwrap_or_default();
            err = HandlerError {
                code: info.code,
                message: info.description,
            };
        }
        error!(%job_id, error = %err, "job errored; requesting squash");
        self.metrics.error_total.inc(1);
        if let Some(status) = self.statuses.lock().get(&job_id) {
            let state = status.info().state;
            if !matches!(state, JobState::ProvisionError | JobState::Cancelled) {
                status.update_info(JobState::ResultError, err.code, err.message.clone());
            }
        }
        self.errors.lock().push(job_id, err);
        self.squash();
    }

    /// Cancel a single job.
    pub fn request_squash(&self, job_id: JobId) {
        let handler = {
            let handlers = self.handlers.lock();
            match handlers.get(&job_id) {
                Some(h) => {
                    let e = h.error();
                    if !e.is_none() {
                        warn!(%job_id, error = %e, "request_squash on already-failed job");
                        return;
                    }
                    Arc::clone(h)
                }
                None => {
                    warn!(%job_id, "request_squash on unknown job");
                    return;
                }
            }
        };
        // Cancel outside the lock; the transport may call back inline.
        handler.cancel();
    }

    /// Cancel every in-flight job. Idempotent.
    pub fn squash(&self) {
        {
            let mut cancelled = self.cancelled.lock();
            if *cancelled {
                debug!("squash: already cancelled");
                return;
            }
            *cancelled = true;
        }
        info!("squashing all in-flight jobs");
        let pending: Vec<ResponseHandlerRef> =
            self.handlers.lock().values().map(Arc::clone).collect();
        // Signal the transport first so blocked dispatches unwind, then
        // cancel handlers, all outside the handlers lock: a transport
        // thread may be trying to mark a job complete right now.
        self.cancel_token.cancel();
        for handler in pending {
            handler.cancel();
        }
    }

    /// Jobs still tracked.
    pub fn num_inflight(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Accumulated errors, rendered.
    pub fn execution_error(&self) -> String {
        self.errors.lock().to_string()
    }

    /// Errors as data.
    pub fn errors(&self) -> Vec<(JobId, HandlerError)> {
        self.errors.lock().errors().to_vec()
    }

    /// One line per job, for diagnostics.
    pub fn progress_desc(&self) -> String {
        let statuses = self.statuses.lock();
        let mut lines: Vec<String> = statuses
            .iter()
            .map(|(id, s)| format!("{id}: {s}"))
            .collect();
        lines.sort();
        lines.join("\n")
    }

    fn track(&self, job_id: JobId, handler: ResponseHandlerRef) -> bool {
        let mut handlers = self.handlers.lock();
        if handlers.contains_key(&job_id) {
            return false;
        }
        handlers.insert(job_id, handler);
        true
    }

    fn untrack(&self, job_id: JobId) -> Option<ResponseHandlerRef> {
        let mut handlers = self.handlers.lock();
        let removed = handlers.remove(&job_id);
        if removed.is_some() && handlers.is_empty() {
            self.handlers_empty.notify_waiters();
        }
        removed
    }

    /// Retry budgeting: check-then-increment under one mutex. The counter
    /// belongs to the job id, never to a handler instance, and is never
    /// decremented.
    fn should_retry(&self, job_id: JobId) -> bool {
        let mut retries = self.retries.lock();
        let attempts = retries.entry(job_id).or_insert(0);
        if *attempts < self.config.max_retries {
            *attempts += 1;
            true
        } else {
            false
        }
    }

    fn attempts(&self, job_id: JobId) -> u32 {
        *self.retries.lock().get(&job_id).unwrap_or(&0)
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_delay.as_millis() as u64;
        let scaled = base.saturating_mul(1 << attempt.min(6));
        let jitter = rand::thread_rng().gen_range(0..=base.max(1));
        Duration::from_millis(scaled + jitter)
    }
}
