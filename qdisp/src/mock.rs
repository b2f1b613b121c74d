//! A scripted transport for tests.

use crate::resource::ResourceUnit;
use crate::response::ResponseHandlerRef;
use crate::service::{DispatchErrorKind, DispatchOutcome, QueryService};
use async_trait::async_trait;
use data_types::ChunkId;
use parking_lot::Mutex;
use proto::{ResponseSummaryMsg, RowBundleMsg, TaskMsg};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-chunk behavior of the mock transport.
#[derive(Debug, Clone)]
pub enum MockScript {
    /// Stream `rows` single-column rows, then a success envelope.
    Rows(Vec<String>),
    /// Fail with a result error from the worker.
    ResultError { code: i32, message: String },
    /// Fail provisioning `failures` times, then stream `rows`.
    FlakyProvision { failures: u32, rows: Vec<String>},
    /// Never answer; resolves only through cancellation.
    Hang,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<ChunkId, MockScript>,
    attempts: HashMap<ChunkId, u32>,
    dispatches: u32,
}

/// Scripted [`QueryService`]: each chunk id runs its configured script.
/// Unconfigured chunks succeed with no rows.
#[derive(Debug, Default)]
pub struct MockQueryService {
    state: Mutex<MockState>,
}

impl MockQueryService {
    /// Empty mock; every dispatch succeeds with zero rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the script for `chunk`.
    pub fn script(&self, chunk: ChunkId, script: MockScript) {
        self.state.lock().scripts.insert(chunk, script);
    }

    /// Attempts made against `chunk`.
    pub fn attempts(&self, chunk: ChunkId) -> u32 {
        *self.state.lock().attempts.get(&chunk).unwrap_or(&0)
    }

    /// Total dispatch calls.
    pub fn dispatches(&self) -> u32 {
        self.state.lock().dispatches
    }

    fn stream_rows(handler: &ResponseHandlerRef, rows: &[String]) -> DispatchOutcome {
        let bundle = RowBundleMsg {
            columns: vec!["value".into()],
            cells: rows.to_vec(),
            nulls: vec![false; rows.len()],
            row_width: 1,
        };
        if let Err(e) = handler.accept_bundle(bundle) {
            return DispatchOutcome::Error {
                kind: DispatchErrorKind::Stream,
                code: e.code,
                message: e.message,
            };
        }
        handler.accept_summary(ResponseSummaryMsg {
            error_code: 0,
            error_msg: String::new(),
            row_count: rows.len() as u64,
        });
        DispatchOutcome::Success
    }
}

#[async_trait]
impl QueryService for MockQueryService {
    async fn dispatch(
        &self,
        resource: &ResourceUnit,
        _request: TaskMsg,
        handler: ResponseHandlerRef,
        cancel: CancellationToken,
    ) -> DispatchOutcome {
        let chunk = resource.chunk();
        let script = {
            let mut state = self.state.lock();
            state.dispatches += 1;
            *state.attempts.entry(chunk).or_insert(0) += 1;
            state.scripts.get(&chunk).cloned()
        };
        // A short yield keeps dispatch genuinely asynchronous.
        tokio::time::sleep(Duration::from_millis(1)).await;
        if cancel.is_cancelled() {
            return DispatchOutcome::Error {
                kind: DispatchErrorKind::Cancelled,
                code: 0,
                message: "cancelled".into(),
            };
        }
        match script {
            None => Self::stream_rows(&handler, &[]),
            Some(MockScript::Rows(rows)) => Self::stream_rows(&handler, &rows),
            Some(MockScript::ResultError { code, message }) => {
                handler.accept_summary(ResponseSummaryMsg {
                    error_code: code,
                    error_msg: message.clone(),
                    row_count: 0,
                });
                DispatchOutcome::Error {
                    kind: DispatchErrorKind::Result,
                    code,
                    message,
                }
            }
            Some(MockScript::FlakyProvision { failures, rows }) => {
                let attempt = self.attempts(chunk);
                if attempt <= failures {
                    DispatchOutcome::Error {
                        kind: DispatchErrorKind::Provision,
                        code: 111,
                        message: "mock provision failure".into(),
                    }
                } else {
                    Self::stream_rows(&handler, &rows)
                }
            }
            Some(MockScript::Hang) => {
                cancel.cancelled().await;
                DispatchOutcome::Error {
                    kind: DispatchErrorKind::Cancelled,
                    code: 0,
                    message: "cancelled".into(),
                }
            }
        }
    }
}

/// Convenience for tests elsewhere in the workspace.
pub fn mock_service() -> Arc<MockQueryService> {
    Arc::new(MockQueryService::new())
}
