use common::StopReason;
use tracing::info;

/// Session-level profit limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionLimits {
    pub target_profit: f64,
    /// Maximum tolerated session loss, as a positive amount.
    pub stop_loss: f64,
}

/// Accumulates realized profit for one session and reports when a limit
/// has been crossed.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionGuard {
    limits: SessionLimits,
    profit: f64,
    wins: u32,
    losses: u32,
}

impl SessionGuard {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            limits,
            profit: 0.0,
            wins: 0,
            losses: 0,
        }
    }

    pub fn profit(&self) -> f64 {
        self.profit
    }

    pub fn wins(&self) -> u32 {
        self.wins
    }

    pub fn losses(&self) -> u32 {
        self.losses
    }

    /// Wins over settled trades, in percent. 0 before the first settlement.
    pub fn win_rate(&self) -> f64 {
        let settled = self.wins + self.losses;
        if settled == 0 {
            0.0
        } else {
            self.wins as f64 / settled as f64 * 100.0
        }
    }

    pub fn set_limits(&mut self, limits: SessionLimits) {
        self.limits = limits;
    }

    /// Forget all profit and counters.
    pub fn reset(&mut self) {
        self.profit = 0.0;
        self.wins = 0;
        self.losses = 0;
    }

    /// Book a settled trade and check the limits.
    pub fn record(&mut self, won: bool, profit: f64) -> Option<StopReason> {
        self.profit += profit;
        if won {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.check()
    }

    /// `Some` once the session profit reached the target or fell to the
    /// stop-loss floor.
    pub fn check(&self) -> Option<StopReason> {
        if self.profit >= self.limits.target_profit {
            info!(profit = self.profit, target = self.limits.target_profit, "Target profit reached");
            Some(StopReason::TargetProfit)
        } else if self.profit <= -self.limits.stop_loss {
            info!(profit = self.profit, stop_loss = self.limits.stop_loss, "Stop loss hit");
            Some(StopReason::StopLoss)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> SessionGuard {
        SessionGuard::new(SessionLimits {
            target_profit: 10.0,
            stop_loss: 20.0,
        })
    }

    #[test]
    fn target_profit_stops_session() {
        let mut g = guard();
        assert_eq!(g.record(true, 6.0), None);
        assert_eq!(g.record(true, 4.0), Some(StopReason::TargetProfit));
    }

    #[test]
    fn stop_loss_only_fires_on_losses() {
        let mut g = guard();
        // A large gain must never be mistaken for a stop-loss breach.
        assert_eq!(g.record(true, 9.0), None);
        assert_eq!(g.record(false, -29.0), Some(StopReason::StopLoss));
        assert_eq!(g.profit(), -20.0);
    }

    #[test]
    fn win_rate_tracks_settlements() {
        let mut g = guard();
        assert_eq!(g.win_rate(), 0.0);
        g.record(true, 0.9);
        g.record(false, -1.0);
        g.record(false, -2.5);
        g.record(true, 2.0);
        assert_eq!(g.wins(), 2);
        assert_eq!(g.losses(), 2);
        assert_eq!(g.win_rate(), 50.0);
        g.reset();
        assert_eq!(g.profit(), 0.0);
        assert_eq!(g.wins() + g.losses(), 0);
    }
}
