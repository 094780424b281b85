use tracing::debug;

/// Stake progression for one strategy session.
///
/// A loss multiplies the current stake; a win returns it to the base stake.
/// When a ceiling is configured the stake never grows past it.
#[derive(Debug, Clone, PartialEq)]
pub struct MartingaleController {
    base: f64,
    multiplier: f64,
    max_stake: Option<f64>,
    current: f64,
}

impl MartingaleController {
    pub fn new(base: f64, multiplier: f64, max_stake: Option<f64>) -> Self {
        let mut controller = Self {
            base,
            multiplier,
            max_stake,
            current: base,
        };
        controller.current = controller.capped(base);
        controller
    }

    /// Stake to use for the next contract.
    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn on_loss(&mut self) -> f64 {
        let next = self.capped(self.current * self.multiplier);
        debug!(from = self.current, to = next, "Martingale step after loss");
        self.current = next;
        next
    }

    pub fn on_win(&mut self) -> f64 {
        self.reset();
        self.current
    }

    /// Apply a settled result. `won == false` means the contract lost.
    pub fn on_result(&mut self, won: bool) -> f64 {
        if won {
            self.on_win()
        } else {
            self.on_loss()
        }
    }

    /// Back to the base stake, as at the start of a fresh session.
    pub fn reset(&mut self) {
        self.current = self.capped(self.base);
    }

    /// Adopt new parameters. The current stake restarts from the new base.
    pub fn reconfigure(&mut self, base: f64, multiplier: f64, max_stake: Option<f64>) {
        self.base = base;
        self.multiplier = multiplier;
        self.max_stake = max_stake;
        self.reset();
    }

    fn capped(&self, stake: f64) -> f64 {
        match self.max_stake {
            Some(ceiling) => stake.min(ceiling),
            None => stake,
        }
    }
}
