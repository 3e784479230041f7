//! One-way latch deciding when the discovered schema set is committed
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Result, WriterError};
use crate::sink::Sink;

/// Phase of the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Discovering schemas, samples are dropped
    Warming,
    /// Schemas committed, samples are forwarded
    Streaming,
}

/// Time-windowed latch in front of the sink's `begin_streaming`.
///
/// `committed` only ever goes from false to true, and `begin_streaming` is
/// called on the sink at most once successfully.
pub struct StartupGate {
    committed: AtomicBool,
    commit_lock: Mutex<()>,
    start_time: i64,
    startup_delay: u64,
    sink: Arc<dyn Sink>,
}

impl StartupGate {
    /// Create a gate that opens `startup_delay` seconds after `start_time`
    pub fn new(start_time: i64, startup_delay: u64, sink: Arc<dyn Sink>) -> Self {
        Self {
            committed: AtomicBool::new(false),
            commit_lock: Mutex::new(()),
            start_time,
            startup_delay,
            sink,
        }
    }

    /// Whether the gate has committed. Never blocks.
    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> GateState {
        if self.is_committed() {
            GateState::Streaming
        } else {
            GateState::Warming
        }
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn startup_delay(&self) -> u64 {
        self.startup_delay
    }

    /// Commit if the warm-up window has passed.
    ///
    /// Returns `Ok(false)` while still warming up. If the sink refuses to
    /// start, the gate stays open for another attempt on a later call.
    pub fn try_commit(&self, now: i64) -> Result<bool> {
        if self.is_committed() {
            return Ok(true);
        }

        let elapsed = now.saturating_sub(self.start_time);
        if elapsed < 0 || (elapsed as u64) < self.startup_delay {
            return Ok(false);
        }

        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| WriterError::poisoned("startup gate"))?;

        // Someone else may have committed while we waited for the lock
        if self.is_committed() {
            return Ok(true);
        }

        debug!("Warm-up of {}s elapsed, starting stream", self.startup_delay);
        if let Err(e) = self.sink.begin_streaming() {
            error!("Sink {} failed to start streaming: {}", self.sink.name(), e);
            return Err(match e {
                WriterError::SinkUnavailable(_) => e,
                other => WriterError::SinkUnavailable(other.to_string()),
            });
        }

        self.committed.store(true, Ordering::Release);
        info!("Committed measurement schemas after {}s", elapsed);
        Ok(true)
    }
}
