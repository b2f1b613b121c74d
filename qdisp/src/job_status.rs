//! Per-job state tracking.

use std::fmt;
use std::time::SystemTime;

use parking_lot::Mutex;

/// Dispatch states of one chunk job. Transitions are monotonic except for
/// retry, which moves a provision or stream error back to `Provisioning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Unknown,
    Provisioning,
    RequestSent,
    Streaming,
    ResponseDone,
    Complete,
    ResultError,
    ProvisionError,
    Cancelled,
}

impl JobState {
    /// True for states counted as success by `join`.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::ResponseDone | Self::Complete)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "UNKNOWN",
            Self::Provisioning => "PROVISIONING",
            Self::RequestSent => "REQUEST_SENT",
            Self::Streaming => "STREAMING",
            Self::ResponseDone => "RESPONSE_DONE",
            Self::Complete => "COMPLETE",
            Self::ResultError => "RESULT_ERROR",
            Self::ProvisionError => "PROVISION_ERROR",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// A state snapshot with the worker-supplied code/description and the time
/// of the last transition.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub state: JobState,
    pub code: i32,
    pub description: String,
    pub updated: SystemTime,
}

impl Default for JobInfo {
    fn default() -> Self {
        Self {
            state: JobState::Unknown,
            code: 0,
            description: String::new(),
            updated: SystemTime::now(),
        }
    }
}

/// Shared, lock-guarded job state.
#[derive(Debug, Default)]
pub struct JobStatus {
    info: Mutex<JobInfo>,
}

impl JobStatus {
    /// Fresh status in `Unknown`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition with no worker code.
    pub fn update(&self, state: JobState) {
        self.update_info(state, 0, String::new());
    }

    /// Transition carrying the worker's code and description.
    pub fn update_info(&self, state: JobState, code: i32, description: String) {
        let mut info = self.info.lock();
        info.state = state;
        info.code = code;
        info.description = description;
        info.updated = SystemTime::now();
    }

    /// Snapshot.
    pub fn info(&self) -> JobInfo {
        self.info.lock().clone()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.info();
        write!(f, "{} {}", info.state, info.code)?;
        if !info.description.is_empty() {
            write!(f, " ({})", info.description)?;
        }
        Ok(())
    }
}
