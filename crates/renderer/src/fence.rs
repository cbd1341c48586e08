//! CPU-side tracking of the queue's completion fence.

use std::cell::Cell;
use std::time::Duration;

use tracing::trace;

use frameloop_rhi::{CompletionFence, FenceValue, RhiError, RhiResult, WaitStatus};

/// Owns the completion fence and the last value signaled on it.
///
/// Values handed out by [`signal`](Self::signal) increase by one each call,
/// starting at 1. The completed value observed through the tracker never
/// decreases, even if the underlying fence reports a stale value.
pub struct FenceTracker<F> {
    fence: F,
    last_signaled: FenceValue,
    observed: Cell<FenceValue>,
}

impl<F: CompletionFence> FenceTracker<F> {
    pub fn new(fence: F) -> Self {
        Self {
            fence,
            last_signaled: 0,
            observed: Cell::new(0),
        }
    }

    /// Enqueues a signal of the next value after all submitted work and
    /// returns that value.
    ///
    /// # Errors
    ///
    /// Submission failures, including device loss, are returned as is and
    /// leave the counter unchanged.
    pub fn signal(&mut self) -> RhiResult<FenceValue> {
        let value = self.last_signaled + 1;
        self.fence.enqueue_signal(value)?;
        self.last_signaled = value;
        trace!("Fence signal enqueued: {}", value);
        Ok(value)
    }

    /// Waits until `value` is completed.
    ///
    /// Returns immediately when the value is already completed. `None`
    /// waits without a timeout; waiting that way for a value that was never
    /// signaled is rejected because it could not return.
    pub fn wait_for(
        &self,
        value: FenceValue,
        timeout: Option<Duration>,
    ) -> RhiResult<WaitStatus> {
        if self.completed_value()? >= value {
            return Ok(WaitStatus::Reached);
        }

        if timeout.is_none() && value > self.last_signaled {
            return Err(RhiError::InvalidState(format!(
                "waiting for fence value {} but only {} was signaled",
                value, self.last_signaled
            )));
        }

        trace!("Waiting for fence value {}", value);
        let status = self.fence.block_until(value, timeout)?;
        if status == WaitStatus::Reached {
            self.observe(value);
        }
        Ok(status)
    }

    /// Signals a new value and waits for it, draining the queue.
    pub fn flush(&mut self) -> RhiResult<FenceValue> {
        let value = self.signal()?;
        match self.wait_for(value, None)? {
            WaitStatus::Reached => Ok(value),
            WaitStatus::TimedOut => Err(RhiError::InvalidState(format!(
                "unbounded wait for fence value {} timed out",
                value
            ))),
        }
    }

    /// Highest completed value seen so far.
    pub fn completed_value(&self) -> RhiResult<FenceValue> {
        let value = self.fence.completed_value()?;
        Ok(self.observe(value))
    }

    pub fn is_reached(&self, value: FenceValue) -> RhiResult<bool> {
        Ok(self.completed_value()? >= value)
    }

    /// Value of the most recent [`signal`](Self::signal); 0 before the first.
    pub fn last_signaled(&self) -> FenceValue {
        self.last_signaled
    }

    fn observe(&self, value: FenceValue) -> FenceValue {
        let observed = self.observed.get().max(value);
        self.observed.set(observed);
        observed
    }
}
