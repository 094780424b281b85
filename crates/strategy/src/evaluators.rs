use common::{ContractSignal, ContractType, Momentum, StrategyKind, StrategyStats};

/// Parity share needed by EVEN_ODD.
pub const EVEN_ODD_THRESHOLD: f64 = 56.0;
/// Share above the over-barrier needed by OVER3_UNDER6 and OVER2_UNDER7.
pub const OVER_UNDER_THRESHOLD: f64 = 55.0;
/// Power needed by OVER1_UNDER8.
pub const OVER1_POWER_THRESHOLD: f64 = 58.0;
/// DIFFERS candidates must hold less than this share of the window.
pub const DIFFERS_MAX_SHARE: f64 = 10.0;
/// DIFFERS candidates must be absent from this many trailing ticks.
pub const DIFFERS_ABSENCE_TICKS: usize = 3;
pub const DIFFERS_CANDIDATES: std::ops::RangeInclusive<u8> = 2..=7;

/// Trade-entry heuristic for one strategy family.
///
/// Evaluators are pure: the same statistics always produce the same signal.
pub trait Evaluator: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// The contract to buy now, or `None` if the heuristic does not fire.
    fn evaluate(&self, stats: &StrategyStats) -> Option<ContractSignal>;
}

pub fn evaluator_for(kind: StrategyKind) -> Box<dyn Evaluator> {
    match kind {
        StrategyKind::Differs => Box::new(DiffersEvaluator),
        StrategyKind::Over3Under6 => Box::new(OverUnderEvaluator::over3_under6()),
        StrategyKind::Over2Under7 => Box::new(OverUnderEvaluator::over2_under7()),
        StrategyKind::Over1Under8 => Box::new(Over1Evaluator),
        StrategyKind::EvenOdd => Box::new(EvenOddEvaluator),
    }
}

/// Fires on a digit in 2..=7 that is rare in the window and absent from the
/// last three ticks; bets the next digit differs from it.
pub struct DiffersEvaluator;

impl DiffersEvaluator {
    /// Lowest-frequency qualifying digit, ties going to the smaller digit.
    pub fn target_digit(stats: &StrategyStats) -> Option<u8> {
        let n = stats.last_digits.len();
        if n < DIFFERS_ABSENCE_TICKS {
            return None;
        }
        let recent = &stats.last_digits[n - DIFFERS_ABSENCE_TICKS..];

        DIFFERS_CANDIDATES
            .filter(|&d| stats.digit_percent(d) < DIFFERS_MAX_SHARE)
            .filter(|d| !recent.contains(d))
            .min_by_key(|&d| (stats.digit_frequencies[d as usize], d))
    }
}

impl Evaluator for DiffersEvaluator {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Differs
    }

    fn evaluate(&self, stats: &StrategyStats) -> Option<ContractSignal> {
        let digit = Self::target_digit(stats)?;
        Some(ContractSignal::new(ContractType::DigitDiff, Some(digit)))
    }
}

/// Shared shape of OVER3_UNDER6 and OVER2_UNDER7: fire on the share above the
/// over-barrier with rising momentum, then take the dominant half.
pub struct OverUnderEvaluator {
    kind: StrategyKind,
    over_barrier: u8,
    under_barrier: u8,
}

impl OverUnderEvaluator {
    pub fn over3_under6() -> Self {
        Self {
            kind: StrategyKind::Over3Under6,
            over_barrier: 3,
            under_barrier: 6,
        }
    }

    pub fn over2_under7() -> Self {
        Self {
            kind: StrategyKind::Over2Under7,
            over_barrier: 2,
            under_barrier: 7,
        }
    }
}

impl Evaluator for OverUnderEvaluator {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn evaluate(&self, stats: &StrategyStats) -> Option<ContractSignal> {
        let fires = stats.percent_above(self.over_barrier) >= OVER_UNDER_THRESHOLD
            && stats.momentum == Momentum::Rising;
        if !fires {
            return None;
        }

        let signal = if stats.over_percent > stats.under_percent {
            ContractSignal::new(ContractType::DigitOver, Some(self.over_barrier))
        } else {
            ContractSignal::new(ContractType::DigitUnder, Some(self.under_barrier))
        };
        Some(signal)
    }
}

pub struct Over1Evaluator;

impl Evaluator for Over1Evaluator {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Over1Under8
    }

    fn evaluate(&self, stats: &StrategyStats) -> Option<ContractSignal> {
        (stats.power >= OVER1_POWER_THRESHOLD && stats.momentum == Momentum::Rising)
            .then(|| ContractSignal::new(ContractType::DigitOver, Some(1)))
    }
}

pub struct EvenOddEvaluator;

impl Evaluator for EvenOddEvaluator {
    fn kind(&self) -> StrategyKind {
        StrategyKind::EvenOdd
    }

    fn evaluate(&self, stats: &StrategyStats) -> Option<ContractSignal> {
        let dominant = stats.even_percent.max(stats.odd_percent);
        if dominant < EVEN_ODD_THRESHOLD || stats.momentum != Momentum::Rising {
            return None;
        }
        let contract_type = if stats.even_percent > stats.odd_percent {
            ContractType::DigitEven
        } else {
            ContractType::DigitOdd
        };
        Some(ContractSignal::new(contract_type, None))
    }
}
