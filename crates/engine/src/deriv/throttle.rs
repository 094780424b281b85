use std::time::Duration;

use tokio::time::Instant;

/// Minimum gap between forwarded ticks on one symbol.
pub const DEFAULT_TICK_THROTTLE: Duration = Duration::from_millis(100);

/// Drops ticks that arrive sooner than `min_gap` after the last admitted one.
#[derive(Debug, Clone)]
pub struct TickThrottle {
    min_gap: Duration,
    last: Option<Instant>,
}

impl TickThrottle {
    pub fn new(min_gap: Duration) -> Self {
        Self { min_gap, last: None }
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.min_gap => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

impl Default for TickThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_THROTTLE)
    }
}
