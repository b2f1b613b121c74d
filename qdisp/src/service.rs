//! The transport interface the executive dispatches through.

use crate::resource::ResourceUnit;
use crate::response::ResponseHandlerRef;
use async_trait::async_trait;
use proto::TaskMsg;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// How one dispatch attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The worker streamed a complete, successful response into the
    /// handler.
    Success,
    /// The attempt failed; `kind` decides retryability.
    Error {
        kind: DispatchErrorKind,
        code: i32,
        message: String,
    },
}

/// Failure classes of a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchErrorKind {
    /// Could not reach or bind a worker session; retryable.
    Provision,
    /// The response stream broke mid-flight; retryable.
    Stream,
    /// The worker ran the task and reported failure; not retryable.
    Result,
    /// Cancelled cooperatively; never retried.
    Cancelled,
}

impl DispatchErrorKind {
    /// May the executive re-dispatch after this failure?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provision | Self::Stream)
    }
}

impl fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Provision => "provision-error",
            Self::Stream => "stream-error",
            Self::Result => "result-error",
            Self::Cancelled => "cancel",
        };
        write!(f, "{s}")
    }
}

/// A streaming request transport: sends one per-chunk request and pushes
/// the response into the caller's handler. One call is one attempt; the
/// executive owns retries.
#[async_trait]
pub trait QueryService: Send + Sync + fmt::Debug {
    /// Dispatch `request` to the worker owning `resource`. Rows and the
    /// final envelope go to `handler`; `cancel` is the cooperative squash
    /// signal.
    async fn dispatch(
        &self,
        resource: &ResourceUnit,
        request: TaskMsg,
        handler: ResponseHandlerRef,
        cancel: CancellationToken,
    ) -> DispatchOutcome;
}
