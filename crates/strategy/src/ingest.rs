use std::collections::VecDeque;

use tracing::warn;

use common::{RawTick, Tick};

/// Synthetic indices are quoted with this many decimals.
pub const QUOTE_DECIMALS: usize = 5;

/// Final digit of `quote` formatted to [`QUOTE_DECIMALS`] places.
///
/// Non-finite quotes fall back to digit 0.
pub fn last_digit(quote: f64) -> u8 {
    if !quote.is_finite() {
        warn!(quote, "Malformed quote, using digit 0");
        return 0;
    }
    format!("{:.*}", QUOTE_DECIMALS, quote)
        .bytes()
        .last()
        .filter(u8::is_ascii_digit)
        .map(|b| b - b'0')
        .unwrap_or(0)
}

/// Derive the digit for a raw broker tick.
pub fn normalize(raw: &RawTick) -> Tick {
    Tick {
        epoch: raw.epoch,
        quote: raw.quote,
        digit: last_digit(raw.quote),
        symbol: raw.symbol.clone(),
    }
}

/// Fixed-capacity rolling window of ticks. Oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct TickBuffer {
    ticks: VecDeque<Tick>,
    capacity: usize,
}

impl TickBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ticks: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Append a tick, returning the evicted one when the window was full.
    pub fn push(&mut self, tick: Tick) -> Option<Tick> {
        self.ticks.push_back(tick);
        if self.ticks.len() > self.capacity {
            self.ticks.pop_front()
        } else {
            None
        }
    }

    /// Normalize and append a raw broker tick.
    pub fn ingest(&mut self, raw: &RawTick) -> Option<Tick> {
        self.push(normalize(raw))
    }

    /// Re-bound the window, dropping the oldest ticks if it shrank.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.ticks.len() > self.capacity {
            self.ticks.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tick> {
        self.ticks.iter()
    }

    /// Digits oldest first.
    pub fn digits(&self) -> Vec<u8> {
        self.ticks.iter().map(|t| t.digit).collect()
    }

    pub fn latest(&self) -> Option<&Tick> {
        self.ticks.back()
    }
}
