use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A price update as delivered by the broker, before digit extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTick {
    pub symbol: String,
    pub epoch: i64,
    pub quote: f64,
}

/// One normalized market observation held in a strategy's rolling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub epoch: i64,
    pub quote: f64,
    /// Final digit of the quote formatted to 5 decimal places.
    pub digit: u8,
    pub symbol: String,
}

/// The five digit-strategy families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "DIFFERS")]
    Differs,
    #[serde(rename = "OVER3_UNDER6")]
    Over3Under6,
    #[serde(rename = "OVER2_UNDER7")]
    Over2Under7,
    #[serde(rename = "OVER1_UNDER8")]
    Over1Under8,
    #[serde(rename = "EVEN_ODD")]
    EvenOdd,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Differs,
        StrategyKind::Over3Under6,
        StrategyKind::Over2Under7,
        StrategyKind::Over1Under8,
        StrategyKind::EvenOdd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Differs => "DIFFERS",
            StrategyKind::Over3Under6 => "OVER3_UNDER6",
            StrategyKind::Over2Under7 => "OVER2_UNDER7",
            StrategyKind::Over1Under8 => "OVER1_UNDER8",
            StrategyKind::EvenOdd => "EVEN_ODD",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one strategy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyState {
    #[default]
    Idle,
    Analysing,
    Trading,
    Paused,
    Error,
}

impl StrategyState {
    /// True while a session (timer + tick subscription) is alive.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            StrategyState::Analysing | StrategyState::Trading | StrategyState::Paused
        )
    }
}

impl std::fmt::Display for StrategyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyState::Idle => write!(f, "idle"),
            StrategyState::Analysing => write!(f, "analysing"),
            StrategyState::Trading => write!(f, "trading"),
            StrategyState::Paused => write!(f, "paused"),
            StrategyState::Error => write!(f, "error"),
        }
    }
}

/// Short-term trend of digit power across two adjacent 10-tick windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Momentum {
    Rising,
    Falling,
    #[default]
    Stable,
}

impl std::fmt::Display for Momentum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Momentum::Rising => write!(f, "rising"),
            Momentum::Falling => write!(f, "falling"),
            Momentum::Stable => write!(f, "stable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionState {
    #[default]
    Wait,
    TradeNow,
    Strong,
    /// A contract submission is in flight.
    Trading,
}

/// Snapshot of digit statistics over a strategy's tick window.
/// Recomputed from scratch on every analysis tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StrategyStats {
    pub sample_size: usize,
    pub digit_frequencies: [u32; 10],
    pub over_percent: f64,
    pub under_percent: f64,
    pub even_percent: f64,
    pub odd_percent: f64,
    /// Percentage share of the single most frequent digit.
    pub power: f64,
    pub momentum: Momentum,
    pub decision_state: DecisionState,
    /// Up to the last 20 digits, oldest first.
    pub last_digits: Vec<u8>,
}

impl StrategyStats {
    /// Share of the sample taken by `digit`, in percent.
    pub fn digit_percent(&self, digit: u8) -> f64 {
        if self.sample_size == 0 {
            return 0.0;
        }
        self.digit_frequencies[digit as usize] as f64 / self.sample_size as f64 * 100.0
    }

    /// Share of the sample with a digit strictly above `barrier`, in percent.
    pub fn percent_above(&self, barrier: u8) -> f64 {
        if self.sample_size == 0 {
            return 0.0;
        }
        let count: u32 = self.digit_frequencies[(barrier as usize + 1).min(10)..]
            .iter()
            .sum();
        count as f64 / self.sample_size as f64 * 100.0
    }
}

/// Broker contract types used by the digit strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractType {
    #[serde(rename = "DIGITEVEN")]
    DigitEven,
    #[serde(rename = "DIGITODD")]
    DigitOdd,
    #[serde(rename = "DIGITOVER")]
    DigitOver,
    #[serde(rename = "DIGITUNDER")]
    DigitUnder,
    #[serde(rename = "DIGITDIFF")]
    DigitDiff,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::DigitEven => "DIGITEVEN",
            ContractType::DigitOdd => "DIGITODD",
            ContractType::DigitOver => "DIGITOVER",
            ContractType::DigitUnder => "DIGITUNDER",
            ContractType::DigitDiff => "DIGITDIFF",
        }
    }
}

impl std::fmt::Display for ContractType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an evaluator wants to buy when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSignal {
    pub contract_type: ContractType,
    pub barrier: Option<String>,
}

impl ContractSignal {
    pub fn new(contract_type: ContractType, barrier: Option<u8>) -> Self {
        Self {
            contract_type,
            barrier: barrier.map(|b| b.to_string()),
        }
    }
}

/// Price proposal request for a prospective contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRequest {
    pub amount: f64,
    pub basis: String,
    pub contract_type: ContractType,
    pub currency: String,
    pub duration: u32,
    pub duration_unit: String,
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barrier: Option<String>,
}

impl ProposalRequest {
    /// A stake-basis USD request with a duration counted in ticks.
    pub fn stake_in_ticks(
        amount: f64,
        signal: &ContractSignal,
        ticks: u32,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            amount,
            basis: "stake".to_string(),
            contract_type: signal.contract_type,
            currency: "USD".to_string(),
            duration: ticks,
            duration_unit: "t".to_string(),
            symbol: symbol.into(),
            barrier: signal.barrier.clone(),
        }
    }
}

/// Broker-quoted price for a proposal request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub ask_price: f64,
    pub payout: f64,
}

/// Confirmation of a bought contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyReceipt {
    pub contract_id: String,
    pub buy_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Open,
    Won,
    Lost,
    Sold,
}

impl ContractStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ContractStatus::Open)
    }
}

/// Lifecycle push for an open contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractUpdate {
    pub contract_id: String,
    pub status: ContractStatus,
    /// Broker-reported profit; may be absent on losses.
    pub profit: Option<f64>,
    pub exit_tick: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TradeResult {
    #[default]
    Pending,
    Win,
    Loss,
    /// No terminal status arrived before the settlement deadline.
    TimedOut,
}

impl TradeResult {
    pub fn is_settled(&self) -> bool {
        !matches!(self, TradeResult::Pending)
    }
}

impl std::fmt::Display for TradeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeResult::Pending => write!(f, "pending"),
            TradeResult::Win => write!(f, "win"),
            TradeResult::Loss => write!(f, "loss"),
            TradeResult::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// One trade attempt, created pending at buy time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLog {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub strategy_id: String,
    pub contract_id: String,
    pub proposal_id: String,
    pub contract_type: ContractType,
    pub barrier: Option<String>,
    /// Price paid; equals the stake for stake-basis proposals.
    pub buy_price: f64,
    pub payout: f64,
    /// Last digit observed when the trade was submitted.
    pub entry_tick: Option<u8>,
    pub result: TradeResult,
    /// Realized profit; 0 while pending.
    pub profit: f64,
    pub exit_tick: Option<f64>,
}

impl TradeLog {
    pub fn is_pending(&self) -> bool {
        self.result == TradeResult::Pending
    }

    /// Settle a pending trade. Returns false (and changes nothing) when the
    /// trade already left the pending state.
    pub fn settle(&mut self, result: TradeResult, profit: f64, exit_tick: Option<f64>) -> bool {
        if !self.is_pending() || result == TradeResult::Pending {
            return false;
        }
        self.result = result;
        self.profit = profit;
        self.exit_tick = exit_tick;
        true
    }

    /// Mark a pending trade as abandoned after its settlement deadline.
    pub fn time_out(&mut self) -> bool {
        self.settle(TradeResult::TimedOut, 0.0, None)
    }
}

/// Whether the bot is running against the real broker or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// Why a strategy session ended in `Idle` (or permanently in `Error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Manual,
    TargetProfit,
    StopLoss,
    TooManyErrors,
    /// Errored without auto-restart enabled.
    ErrorParked,
    Shutdown,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Manual => write!(f, "stopped by operator"),
            StopReason::TargetProfit => write!(f, "target profit reached"),
            StopReason::StopLoss => write!(f, "stop loss hit"),
            StopReason::TooManyErrors => write!(f, "too many consecutive errors"),
            StopReason::ErrorParked => write!(f, "error with auto-restart disabled"),
            StopReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Events emitted by running strategies.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StrategyEvent {
    StateChanged {
        strategy_id: String,
        from: StrategyState,
        to: StrategyState,
    },
    TradeOpened {
        trade: TradeLog,
    },
    TradeSettled {
        trade: TradeLog,
        session_profit: f64,
        next_stake: f64,
    },
    TradeTimedOut {
        trade: TradeLog,
    },
    ExecutionFailed {
        strategy_id: String,
        error: String,
        consecutive_errors: u32,
    },
    RestartScheduled {
        strategy_id: String,
        delay_secs: u64,
    },
    Stopped {
        strategy_id: String,
        reason: StopReason,
    },
}

impl StrategyEvent {
    pub fn strategy_id(&self) -> &str {
        match self {
            StrategyEvent::StateChanged { strategy_id, .. }
            | StrategyEvent::ExecutionFailed { strategy_id, .. }
            | StrategyEvent::RestartScheduled { strategy_id, .. }
            | StrategyEvent::Stopped { strategy_id, .. } => strategy_id,
            StrategyEvent::TradeOpened { trade }
            | StrategyEvent::TradeSettled { trade, .. }
            | StrategyEvent::TradeTimedOut { trade } => &trade.strategy_id,
        }
    }
}
