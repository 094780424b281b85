//! Digit analysis for synthetic-index ticks: last-digit extraction, the
//! rolling tick window, window statistics and the five entry heuristics.

pub mod config;
pub mod evaluators;
pub mod ingest;
pub mod stats;

pub use config::{
    default_roster, ConfigError, StrategyConfig, StrategyFileConfig, StrategyPatch, TradeLatch,
};
pub use evaluators::{evaluator_for, Evaluator};
pub use ingest::{last_digit, normalize, TickBuffer};
pub use stats::{compute_stats, stats_from_digits};
