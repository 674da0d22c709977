//! Per-service sliding-window restart quota

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Restarts issued for one service within the trailing window.
#[derive(Debug)]
pub struct RestartWindow {
    window: Duration,
    issued: VecDeque<Instant>,
}

impl RestartWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            issued: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.issued.front() {
            if now.duration_since(oldest) >= self.window {
                self.issued.pop_front();
            } else {
                break;
            }
        }
    }

    /// Restarts still inside the window at `now`.
    pub fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.issued.len()
    }

    /// Claim a restart slot.
    ///
    /// Returns `Err(count)` with the number of restarts already in the window
    /// when the quota `max` is used up; nothing is recorded in that case.
    pub fn try_acquire(&mut self, now: Instant, max: u32) -> Result<(), usize> {
        self.prune(now);
        if self.issued.len() >= max as usize {
            return Err(self.issued.len());
        }
        self.issued.push_back(now);
        Ok(())
    }
}
