//! Response acceptors.

use parking_lot::Mutex;
use proto::{ResponseSummaryMsg, RowBundleMsg};
use std::fmt;
use std::sync::Arc;

/// The first error a handler saw, surfaced to the executive when a job is
/// marked failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerError {
    pub code: i32,
    pub message: String,
}

impl HandlerError {
    /// True when no error was recorded.
    pub fn is_none(&self) -> bool {
        self.code == 0 && self.message.is_empty()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Accepts one chunk's response stream. Implementations route rows into the
/// result accumulator; the executive only consults the error/reset/cancel
/// surface.
pub trait ResponseHandler: Send + Sync + fmt::Debug {
    /// A batch of rows arrived.
    fn accept_bundle(&self, bundle: RowBundleMsg) -> Result<(), HandlerError>;

    /// The stream finished; `summary` carries success or the worker error.
    fn accept_summary(&self, summary: ResponseSummaryMsg);

    /// First recorded error, if any.
    fn error(&self) -> HandlerError;

    /// Forget partial state before a retry. Returning `false` vetoes the
    /// retry (data was already delivered downstream).
    fn reset(&self) -> bool;

    /// Cooperative cancel; the handler must stop accepting rows.
    fn cancel(&self);
}

/// Shared handler handle.
pub type ResponseHandlerRef = Arc<dyn ResponseHandler>;

#[derive(Debug, Default)]
struct CollectingState {
    bundles: Vec<RowBundleMsg>,
    summary: Option<ResponseSummaryMsg>,
    error: HandlerError,
    cancelled: bool,
    delivered: bool,
}

/// A buffering handler: keeps everything in memory. The dispatch tests and
/// the merger's feeder both use it.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    state: Mutex<CollectingState>,
}

impl CollectingHandler {
    /// New empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows received so far.
    pub fn bundles(&self) -> Vec<RowBundleMsg> {
        self.state.lock().bundles.clone()
    }

    /// Final summary, when the stream completed.
    pub fn summary(&self) -> Option<ResponseSummaryMsg> {
        self.state.lock().summary.clone()
    }

    /// Mark the collected data as delivered downstream; a later `reset`
    /// will veto retries.
    pub fn mark_delivered(&self) {
        self.state.lock().delivered = true;
    }

    /// Was `cancel` called?
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

impl ResponseHandler for CollectingHandler {
    fn accept_bundle(&self, bundle: RowBundleMsg) -> Result<(), HandlerError> {
        let mut state = self.state.lock();
        if state.cancelled {
            return Err(HandlerError {
                code: -1,
                message: "cancelled".into(),
            });
        }
        state.bundles.push(bundle);
        Ok(())
    }

    fn accept_summary(&self, summary: ResponseSummaryMsg) {
        let mut state = self.state.lock();
        if !summary.success() && state.error.is_none() {
            state.error = HandlerError {
                code: summary.error_code,
                message: summary.error_msg.clone(),
            };
        }
        state.summary = Some(summary);
    }

    fn error(&self) -> HandlerError {
        self.state.lock().error.clone()
    }

    fn reset(&self) -> bool {
        let mut state = self.state.lock();
        if state.delivered {
            return false;
        }
        state.bundles.clear();
        state.summary = None;
        state.error = HandlerError::default();
        true
    }

    fn cancel(&self) {
        self.state.lock().cancelled = true;
    }
}
