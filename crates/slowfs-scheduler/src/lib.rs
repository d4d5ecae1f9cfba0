#![forbid(unsafe_code)]
//! The SlowFS I/O scheduler.
//!
//! Models a single-spindle device. An adapter intercepts real file
//! operations, stamps each with the wall-clock instant the call started,
//! and hands it to [`Scheduler::schedule`]; the returned delay is how long
//! the caller must sleep (measured from that timestamp) so the operation
//! appears to take as long as the modeled device needs.
//!
//! Requests are serialized into a single device context behind one lock;
//! the computation inside the lock is bounded and does no I/O or sleeping.

mod cache;
mod context;
mod request;

pub use request::{Request, RequestKind};

use context::DeviceContext;
use parking_lot::Mutex;
use slowfs_config::DeviceConfig;
use slowfs_types::Timestamp;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Thread-safe front end over the device context.
///
/// Concurrent callers see a total order: requests apply to the device in
/// the order they acquire the lock, and the returned delay is relative to
/// the request's own timestamp. `schedule` never fails and never blocks
/// beyond lock contention; the sleeping happens in the caller.
#[derive(Debug)]
pub struct Scheduler {
    context: Mutex<DeviceContext>,
}

impl Scheduler {
    /// Create a scheduler for a validated device config.
    #[must_use]
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            context: Mutex::new(DeviceContext::new(Arc::new(config))),
        }
    }

    /// Apply `req` to the device and return how long the caller must
    /// sleep, measured from `req.timestamp`.
    ///
    /// Always finite and non-negative.
    pub fn schedule(&self, req: &Request) -> Duration {
        let mut context = self.context.lock();
        context.execute(req);
        context.busy_until().saturating_duration_since(req.timestamp)
    }
}

/// Anchors [`Timestamp`]s to a process-local epoch.
///
/// Adapters sample `now()` at the call boundary, before performing the
/// real operation, so the causal relation between real elapsed time and
/// modeled time is preserved.
#[derive(Debug, Clone)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    #[must_use]
    pub fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
