use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use common::StrategyKind;

/// Default market: Volatility 100 Index.
pub const DEFAULT_SYMBOL: &str = "R_100";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read strategy config at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse strategy config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Strategy '{id}' is invalid: {reason}")]
    Invalid { id: String, reason: String },

    #[error("Duplicate strategy id '{0}'")]
    DuplicateId(String),
}

impl From<ConfigError> for common::Error {
    fn from(e: ConfigError) -> Self {
        common::Error::Config(e.to_string())
    }
}

/// How an instance behaves while one of its trades is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TradeLatch {
    /// No evaluation while a submission is in flight or a trade is unsettled.
    #[default]
    Latched,
    /// Only the in-flight submission blocks evaluation; unsettled trades do not.
    FreeRunning,
}

/// Identity and tunables for one strategy instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: StrategyKind,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub market_symbol: String,
    /// Length of the rolling tick window, assuming one tick per second.
    pub analysis_minutes: u32,
    /// Base stake in USD.
    pub stake: f64,
    pub martingale_multiplier: f64,
    /// Contract duration in ticks.
    pub ticks_per_trade: u32,
    pub target_profit: f64,
    pub stop_loss: f64,
    pub auto_restart: bool,
    pub retry_delay_secs: u64,
    /// Ceiling for martingale growth. `None` leaves it unbounded.
    pub max_stake: Option<f64>,
    pub trade_latch: TradeLatch,
    pub settlement_timeout_secs: u64,
}

impl StrategyConfig {
    /// A disabled strategy with the stock settings for `kind`.
    pub fn new(id: impl Into<String>, kind: StrategyKind) -> Self {
        let (name, description, multiplier) = stock_profile(kind);
        Self {
            id: id.into(),
            kind,
            name: name.to_string(),
            description: description.to_string(),
            enabled: false,
            market_symbol: DEFAULT_SYMBOL.to_string(),
            analysis_minutes: 2,
            stake: 1.0,
            martingale_multiplier: multiplier,
            ticks_per_trade: 1,
            target_profit: 10.0,
            stop_loss: 20.0,
            auto_restart: true,
            retry_delay_secs: 5,
            max_stake: None,
            trade_latch: TradeLatch::default(),
            settlement_timeout_secs: 60,
        }
    }

    /// Rolling window bound: `analysis_minutes × 60` ticks.
    pub fn max_ticks(&self) -> usize {
        (self.analysis_minutes as usize * 60).max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.market_symbol.trim().is_empty() {
            return Err(invalid("market_symbol must not be empty"));
        }
        if self.analysis_minutes == 0 {
            return Err(invalid("analysis_minutes must be at least 1"));
        }
        if !(self.stake.is_finite() && self.stake > 0.0) {
            return Err(invalid("stake must be positive"));
        }
        if !(self.martingale_multiplier.is_finite() && self.martingale_multiplier >= 1.0) {
            return Err(invalid("martingale_multiplier must be >= 1"));
        }
        if !(1..=10).contains(&self.ticks_per_trade) {
            return Err(invalid("ticks_per_trade must be between 1 and 10"));
        }
        if self.target_profit <= 0.0 || self.stop_loss <= 0.0 {
            return Err(invalid("target_profit and stop_loss must be positive"));
        }
        if let Some(max) = self.max_stake {
            if max < self.stake {
                return Err(invalid("max_stake must not be below stake"));
            }
        }
        if self.settlement_timeout_secs == 0 {
            return Err(invalid("settlement_timeout_secs must be at least 1"));
        }
        Ok(())
    }
}

fn stock_profile(kind: StrategyKind) -> (&'static str, &'static str, f64) {
    match kind {
        StrategyKind::Differs => (
            "Differs Bot",
            "Targets digits 2-7 with <10% frequency. Trades after 3 consecutive absences.",
            2.6,
        ),
        StrategyKind::Over3Under6 => (
            "Over3/Under6 Bot",
            "Over3={4-9}, Under6={0-5}. Trades at 55%+ power with momentum.",
            3.6,
        ),
        StrategyKind::Over2Under7 => (
            "Over2/Under7 Bot",
            "Over2={3-9}, Under7={0-6}. Trades at 55%+ share with momentum.",
            4.5,
        ),
        StrategyKind::Over1Under8 => (
            "Over1/Under8 Bot",
            "Over1={2-9}. Trades when a single digit holds 58%+ power and is rising.",
            6.5,
        ),
        StrategyKind::EvenOdd => (
            "Even/Odd Advanced",
            "Trades the dominant parity at 56%+ with rising momentum.",
            2.1,
        ),
    }
}

/// The five stock strategies, all disabled, ids `strategy-0` .. `strategy-4`.
pub fn default_roster() -> Vec<StrategyConfig> {
    StrategyKind::ALL
        .iter()
        .enumerate()
        .map(|(i, kind)| StrategyConfig::new(format!("strategy-{i}"), *kind))
        .collect()
}

/// Top-level strategy roster file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// id = "differs-r100"
/// type = "DIFFERS"
/// enabled = true
/// market_symbol = "R_100"
/// stake = 0.5
/// max_stake = 20.0
/// ```
/// Every field except `id` and `type` falls back to the stock settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy", default)]
    pub strategies: Vec<StrategyEntry>,
}

/// One `[[strategy]]` table.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategyEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: Option<StrategyKind>,
    #[serde(flatten)]
    pub overrides: StrategyPatch,
}

impl StrategyFileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve every entry against the stock settings and validate the roster.
    pub fn into_configs(self) -> Result<Vec<StrategyConfig>, ConfigError> {
        let mut seen = HashSet::new();
        let mut configs = Vec::with_capacity(self.strategies.len());

        for entry in self.strategies {
            if !seen.insert(entry.id.clone()) {
                return Err(ConfigError::DuplicateId(entry.id));
            }
            let kind = entry.kind.ok_or_else(|| ConfigError::Invalid {
                id: entry.id.clone(),
                reason: "missing strategy type".to_string(),
            })?;
            let mut config = StrategyConfig::new(entry.id, kind);
            entry.overrides.apply(&mut config)?;
            configs.push(config);
        }

        Ok(configs)
    }
}

/// Partial update of a strategy's tunables. Absent fields stay untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StrategyPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stake: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub martingale_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticks_per_trade: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_profit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_restart: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stake: Option<f64>,
    /// Removes the stake ceiling when true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear_max_stake: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_latch: Option<TradeLatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_timeout_secs: Option<u64>,
}

impl StrategyPatch {
    /// Apply onto `config`, leaving it untouched if the result would be invalid.
    pub fn apply(&self, config: &mut StrategyConfig) -> Result<(), ConfigError> {
        let mut next = config.clone();

        if let Some(v) = &self.name {
            next.name = v.clone();
        }
        if let Some(v) = &self.description {
            next.description = v.clone();
        }
        if let Some(v) = self.enabled {
            next.enabled = v;
        }
        if let Some(v) = &self.market_symbol {
            next.market_symbol = v.clone();
        }
        if let Some(v) = self.analysis_minutes {
            next.analysis_minutes = v;
        }
        if let Some(v) = self.stake {
            next.stake = v;
        }
        if let Some(v) = self.martingale_multiplier {
            next.martingale_multiplier = v;
        }
        if let Some(v) = self.ticks_per_trade {
            next.ticks_per_trade = v;
        }
        if let Some(v) = self.target_profit {
            next.target_profit = v;
        }
        if let Some(v) = self.stop_loss {
            next.stop_loss = v;
        }
        if let Some(v) = self.auto_restart {
            next.auto_restart = v;
        }
        if let Some(v) = self.retry_delay_secs {
            next.retry_delay_secs = v;
        }
        if self.clear_max_stake == Some(true) {
            next.max_stake = None;
        }
        if let Some(v) = self.max_stake {
            next.max_stake = Some(v);
        }
        if let Some(v) = self.trade_latch {
            next.trade_latch = v;
        }
        if let Some(v) = self.settlement_timeout_secs {
            next.settlement_timeout_secs = v;
        }

        next.validate()?;
        *config = next;
        Ok(())
    }
}
