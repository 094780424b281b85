use std::time::Duration;

use tracing::warn;

/// Hard ceiling on consecutive execution errors. Reaching it parks the
/// strategy in `Error` with no further restarts.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// What the lifecycle should do after an execution error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Start a fresh session after the delay.
    Restart(Duration),
    /// Too many consecutive errors; stay in `Error` for good.
    HardStop,
    /// Auto-restart disabled; stay in `Error` until an operator acts.
    Park,
}

/// Counts consecutive execution errors for one strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorTracker {
    consecutive: u32,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.consecutive
    }

    /// A completed trade cycle clears the streak.
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Count one error and decide how to recover.
    pub fn record(&mut self, auto_restart: bool, retry_delay: Duration) -> RestartDecision {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive >= MAX_CONSECUTIVE_ERRORS {
            warn!(errors = self.consecutive, "Consecutive error limit reached");
            RestartDecision::HardStop
        } else if auto_restart {
            RestartDecision::Restart(retry_delay)
        } else {
            RestartDecision::Park
        }
    }
}
