//! Reply channels for streaming task responses.

use parking_lot::Mutex;
use proto::{ResponseSummaryMsg, RowBundleMsg};
use std::fmt;
use std::sync::Arc;

/// The reply side of one task: row batches followed by exactly one final
/// envelope. Implementations bridge to the transport; [`MemSendChannel`]
/// buffers for tests.
pub trait SendChannel: Send + Sync + fmt::Debug {
    /// Stream one batch of rows. `false` means the peer is gone and the
    /// task should stop producing.
    fn send_bundle(&self, bundle: RowBundleMsg) -> bool;

    /// Close the stream with a success or error envelope.
    fn send_summary(&self, summary: ResponseSummaryMsg);
}

/// Shared reply-channel handle.
pub type SendChannelRef = Arc<dyn SendChannel>;

#[derive(Debug, Default)]
struct MemState {
    bundles: Vec<RowBundleMsg>,
    summary: Option<ResponseSummaryMsg>,
    closed: bool,
}

/// Buffering [`SendChannel`].
#[derive(Debug, Default)]
pub struct MemSendChannel {
    state: Mutex<MemState>,
}

impl MemSendChannel {
    /// New open channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the peer going away.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// Bundles streamed so far.
    pub fn bundles(&self) -> Vec<RowBundleMsg> {
        self.state.lock().bundles.clone()
    }

    /// The final envelope, once sent.
    pub fn summary(&self) -> Option<ResponseSummaryMsg> {
        self.state.lock().summary.clone()
    }
}

impl SendChannel for MemSendChannel {
    fn send_bundle(&self, bundle: RowBundleMsg) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.bundles.push(bundle);
        true
    }

    fn send_summary(&self, summary: ResponseSummaryMsg) {
        let mut state = self.state.lock();
        if state.summary.is_none() {
            state.summary = Some(summary);
        }
    }
}
