use common::{DecisionState, Momentum, StrategyStats};

use crate::ingest::TickBuffer;

/// Size of each momentum sub-window.
pub const MOMENTUM_WINDOW: usize = 10;
/// Power difference (percentage points) treated as noise.
pub const MOMENTUM_DEADBAND: f64 = 2.0;
pub const STRONG_POWER: f64 = 60.0;
pub const TRADE_NOW_POWER: f64 = 55.0;
/// Number of trailing digits reported verbatim.
pub const LAST_DIGITS_LEN: usize = 20;

/// Statistics over a strategy's tick window.
pub fn compute_stats(buffer: &TickBuffer) -> StrategyStats {
    stats_from_digits(&buffer.digits())
}

/// Statistics over a digit sequence, oldest first. Pure and O(N).
pub fn stats_from_digits(digits: &[u8]) -> StrategyStats {
    let n = digits.len();
    let digit_frequencies = frequencies(digits);

    let over = digits.iter().filter(|&&d| d >= 5).count();
    let even = digits.iter().filter(|&&d| d % 2 == 0).count();

    let (over_percent, under_percent, even_percent, odd_percent) = if n == 0 {
        (0.0, 0.0, 0.0, 0.0)
    } else {
        let over_percent = percent(over, n);
        let even_percent = percent(even, n);
        (
            over_percent,
            100.0 - over_percent,
            even_percent,
            100.0 - even_percent,
        )
    };

    let power = power_of(digits);

    StrategyStats {
        sample_size: n,
        digit_frequencies,
        over_percent,
        under_percent,
        even_percent,
        odd_percent,
        power,
        momentum: momentum(digits),
        decision_state: decision_for(power),
        last_digits: digits[n.saturating_sub(LAST_DIGITS_LEN)..].to_vec(),
    }
}

/// Compare the power of the last 10 digits against the 10 before them.
/// A missing sub-window counts as power 0.
pub fn momentum(digits: &[u8]) -> Momentum {
    let n = digits.len();
    let recent = &digits[n.saturating_sub(MOMENTUM_WINDOW)..];
    let older = &digits[n.saturating_sub(2 * MOMENTUM_WINDOW)..n.saturating_sub(MOMENTUM_WINDOW)];
    classify_momentum(power_of(recent), power_of(older))
}

pub fn classify_momentum(recent_power: f64, older_power: f64) -> Momentum {
    if recent_power > older_power + MOMENTUM_DEADBAND {
        Momentum::Rising
    } else if recent_power < older_power - MOMENTUM_DEADBAND {
        Momentum::Falling
    } else {
        Momentum::Stable
    }
}

pub fn decision_for(power: f64) -> DecisionState {
    if power >= STRONG_POWER {
        DecisionState::Strong
    } else if power >= TRADE_NOW_POWER {
        DecisionState::TradeNow
    } else {
        DecisionState::Wait
    }
}

/// Share of the most frequent digit, in percent. 0 for an empty slice.
pub fn power_of(digits: &[u8]) -> f64 {
    if digits.is_empty() {
        return 0.0;
    }
    let max = frequencies(digits).into_iter().max().unwrap_or(0);
    percent(max as usize, digits.len())
}

fn frequencies(digits: &[u8]) -> [u32; 10] {
    let mut freq = [0u32; 10];
    for &d in digits {
        freq[usize::from(d % 10)] += 1;
    }
    freq
}

fn percent(count: usize, total: usize) -> f64 {
    count as f64 / total as f64 * 100.0
}
