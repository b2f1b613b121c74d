//! Routes one chunk's response stream into the merger.

use parking_lot::Mutex;
use proto::{ResponseSummaryMsg, RowBundleMsg};
use qdisp::{HandlerError, ResponseHandler};
use rproc::InfileMerger;
use std::sync::Arc;

#[derive(Debug, Default)]
struct HandlerState {
    merged_bundles: u64,
    error: HandlerError,
    cancelled: bool,
}

/// A [`ResponseHandler`] that feeds rows straight into the shared
/// [`InfileMerger`]. Once any bundle reached the merger a retry can no
/// longer be permitted, since merged rows cannot be recalled.
#[derive(Debug)]
pub struct MergingHandler {
    merger: Arc<InfileMerger>,
    state: Mutex<HandlerState>,
}

impl MergingHandler {
    /// New handler over the query's merger.
    pub fn new(merger: Arc<InfileMerger>) -> Self {
        Self {
            merger,
            state: Mutex::new(HandlerState::default()),
        }
    }
}

impl ResponseHandler for MergingHandler {
    fn accept_bundle(&self, bundle: RowBundleMsg) -> Result<(), HandlerError> {
        {
            let state = self.state.lock();
            if state.cancelled {
                return Err(HandlerError {
                    code: -1,
                    message: "cancelled".into(),
                });
            }
        }
        match self.merger.merge(&bundle) {
            Ok(()) => {
                self.state.lock().merged_bundles += 1;
                Ok(())
            }
            Err(e) => {
                let err = HandlerError {
                    code: -2,
                    message: e.to_string(),
                };
                let mut state = self.state.lock();
                if state.error.is_none() {
                    state.error = err.clone();
                }
                Err(err)
            }
        }
    }

    fn accept_summary(&self, summary: ResponseSummaryMsg) {
        if !summary.success() {
            let mut state = self.state.lock();
            if state.error.is_none() {
                state.error = HandlerError {
                    code: summary.error_code,
                    message: summary.error_msg,
                };
            }
        }
    }

    fn error(&self) -> HandlerError {
        self.state.lock().error.clone()
    }

    fn reset(&self) -> bool {
        let mut state = self.state.lock();
        if state.merged_bundles > 0 {
            return false;
        }
        state.error = HandlerError::default();
        true
    }

    fn cancel(&self) {
        self.state.lock().cancelled = true;
    }
}
