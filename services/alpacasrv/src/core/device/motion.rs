//! Slew / move lifecycle shared by motion-capable devices
//!
//! A device registers a motion with [`MotionTracker::begin`] while holding
//! its write lock, then hands the returned ticket to a background task that
//! waits for the driver. Each `begin` bumps a generation counter; a
//! completion only clears the busy flag if its ticket is still the current
//! generation, so a late completion from an aborted motion can never end a
//! newer one.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::driver::{DriverError, DriverResult};

/// Generation of a registered motion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionTicket(u64);

#[derive(Debug, Default)]
struct MotionState {
    generation: u64,
    active: bool,
}

#[derive(Debug, Default)]
pub struct MotionTracker {
    inner: Mutex<MotionState>,
}

impl MotionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    /// Register a new motion; `None` when one is already in progress
    pub fn begin(&self) -> Option<MotionTicket> {
        let mut state = self.inner.lock();
        if state.active {
            return None;
        }
        state.generation += 1;
        state.active = true;
        Some(MotionTicket(state.generation))
    }

    /// Complete the motion identified by `ticket`
    ///
    /// Returns `false` if the motion was cancelled or superseded.
    pub fn finish(&self, ticket: MotionTicket) -> bool {
        let mut state = self.inner.lock();
        if state.active && state.generation == ticket.0 {
            state.active = false;
            true
        } else {
            false
        }
    }

    /// Whether `ticket` is the motion still in progress
    pub fn is_current(&self, ticket: MotionTicket) -> bool {
        let state = self.inner.lock();
        state.active && state.generation == ticket.0
    }

    /// Drop whatever motion is active; returns whether one was
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.lock();
        std::mem::replace(&mut state.active, false)
    }
}

/// How a background motion ended
#[derive(Debug, Clone, PartialEq)]
pub enum MotionOutcome<P> {
    Completed(P),
    Aborted,
    Failed(DriverError),
    TimedOut,
}

/// Await a driver's completion future, bounded by `limit`
pub async fn await_motion<P, F>(limit: Duration, completion: F) -> MotionOutcome<P>
where
    F: Future<Output = DriverResult<P>>,
{
    match tokio::time::timeout(limit, completion).await {
        Ok(Ok(position)) => MotionOutcome::Completed(position),
        Ok(Err(DriverError::Aborted)) => MotionOutcome::Aborted,
        Ok(Err(err)) => MotionOutcome::Failed(err),
        Err(_) => MotionOutcome::TimedOut,
    }
}
