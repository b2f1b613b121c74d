//! The memory gate.
//!
//! Scan tasks reserve an estimate of the table bytes they keep resident
//! before running; reservations are held for the task's duration. A task
//! may ask for its reservation as `Required` (denied means do not run yet)
//! or `Flexible` (denied means run anyway, unreserved).
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use data_types::{ChunkId, DbTable};
use observability_deps::tracing::{debug, warn};
use parking_lot::Mutex;
use snafu::Snafu;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Reservation failures.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum MemManError {
    #[snafu(display("reservation of {requested} bytes exceeds free budget {free}"))]
    NoRoom { requested: u64, free: u64 },

    #[snafu(display("unknown reservation handle {handle}"))]
    UnknownHandle { handle: u64 },
}

/// How to treat a denied reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// The task must not run until the reservation fits.
    Required,
    /// The task runs regardless; the reservation is best-effort.
    Flexible,
}

/// Identifies one granted reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    /// The sentinel handle granted when a flexible reservation was denied
    /// but the task proceeds unreserved.
    pub const UNRESERVED: Self = Self(0);

    /// Did this reservation actually claim budget?
    pub fn is_reserved(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The reservation interface.
pub trait MemMan: Send + Sync + fmt::Debug {
    /// Reserve `bytes` for scanning `tables` of `chunk`. Flexible denials
    /// return [`Handle::UNRESERVED`] rather than an error.
    fn reserve(
        &self,
        tables: &[DbTable],
        chunk: ChunkId,
        bytes: u64,
        priority: Priority,
    ) -> Result<Handle, MemManError>;

    /// Release a reservation; unknown or unreserved handles are no-ops.
    fn release(&self, handle: Handle);

    /// Bytes currently reserved.
    fn bytes_reserved(&self) -> u64;
}

/// Shared memory-manager handle.
pub type MemManRef = Arc<dyn MemMan>;

#[derive(Debug, Default)]
struct RealState {
    reserved: u64,
    next_handle: u64,
    handles: HashMap<u64, u64>,
}

/// Size-bounded accounting against a fixed byte budget.
#[derive(Debug)]
pub struct MemManReal {
    budget: u64,
    state: Mutex<RealState>,
}

impl MemManReal {
    /// Budget in bytes.
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            state: Mutex::new(RealState {
                reserved: 0,
                next_handle: 1,
                handles: HashMap::new(),
            }),
        }
    }

    /// Budget from the conventional megabyte configuration unit.
    pub fn with_budget_mb(mb: u64) -> Self {
        Self::new(mb * 1024 * 1024)
    }
}

impl MemMan for MemManReal {
    fn reserve(
        &self,
        tables: &[DbTable],
        chunk: ChunkId,
        bytes: u64,
        priority: Priority,
    ) -> Result<Handle, MemManError> {
        let mut state = self.state.lock();
        let free = self.budget.saturating_sub(state.reserved);
        if bytes > free {
            match priority {
                Priority::Required => {
                    return NoRoomSnafu {
                        requested: bytes,
                        free,
                    }
                    .fail();
                }
                Priority::Flexible => {
                    warn!(chunk, bytes, free, "flexible reservation denied; running unreserved");
                    return Ok(Handle::UNRESERVED);
                }
            }
        }
        state.reserved += bytes;
        let id = state.next_handle;
        state.next_handle += 1;
        state.handles.insert(id, bytes);
        debug!(chunk, bytes, tables = tables.len(), handle = id, "reserved");
        Ok(Handle(id))
    }

    fn release(&self, handle: Handle) {
        if !handle.is_reserved() {
            return;
        }
        let mut state = self.state.lock();
        if let Some(bytes) = state.handles.remove(&handle.0) {
            state.reserved = state.reserved.saturating_sub(bytes);
        }
    }

    fn bytes_reserved(&self) -> u64 {
        self.state.lock().reserved
    }
}

/// No gating: every reservation is granted and nothing is tracked.
#[derive(Debug, Default)]
pub struct MemManNone;

impl MemMan for MemManNone {
    fn reserve(
        &self,
        _tables: &[DbTable],
        _chunk: ChunkId,
        _bytes: u64,
        _priority: Priority,
    ) -> Result<Handle, MemManError> {
        Ok(Handle::UNRESERVED)
    }

    fn release(&self, _handle: Handle) {}

    fn bytes_reserved(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn tables() -> Vec<DbTable> {
        vec![DbTable::new("LSST", "Object")]
    }

    #[test]
    fn reserve_and_release() {
        let mm = MemManReal::new(1000);
        let h1 = mm.reserve(&tables(), 1, 400, Priority::Required).unwrap();
        let h2 = mm.reserve(&tables(), 2, 600, Priority::Required).unwrap();
        assert_eq!(mm.bytes_reserved(), 1000);

        assert_matches!(
            mm.reserve(&tables(), 3, 1, Priority::Required),
            Err(MemManError::NoRoom { requested: 1, free: 0 })
        );

        mm.release(h1);
        assert_eq!(mm.bytes_reserved(), 600);
        mm.release(h2);
        assert_eq!(mm.bytes_reserved(), 0);

        // Double release is harmless.
        mm.release(h2);
        assert_eq!(mm.bytes_reserved(), 0);
    }

    #[test]
    fn flexible_denial_runs_unreserved() {
        let mm = MemManReal::new(100);
        let h = mm.reserve(&tables(), 1, 500, Priority::Flexible).unwrap();
        assert!(!h.is_reserved());
        assert_eq!(mm.bytes_reserved(), 0);
        mm.release(h);
    }

    #[test]
    fn none_never_gates() {
        let mm = MemManNone;
        let h = mm
            .reserve(&tables(), 1, u64::MAX, Priority::Required)
            .unwrap();
        assert!(!h.is_reserved());
        assert_eq!(mm.bytes_reserved(), 0);
    }
}
