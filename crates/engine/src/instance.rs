use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use common::{
    BrokerClient, ContractSignal, ContractUpdate, DecisionState, Error, RawTick, Result,
    StopReason, StrategyEvent, StrategyState, StrategyStats, SubscriptionId, TradeLog,
};
use risk::{ErrorTracker, MartingaleController, RestartDecision, SessionGuard, SessionLimits};
use strategy::{compute_stats, evaluator_for, Evaluator, StrategyConfig, TickBuffer, TradeLatch};

use crate::executor::{Submission, TradeExecutor, TradeTicket};
use crate::settlement;

/// Cadence of the statistics refresh and evaluation pass.
pub const ANALYSIS_INTERVAL: Duration = Duration::from_secs(1);

const TICK_CHANNEL_CAPACITY: usize = 256;
const SETTLEMENT_CHANNEL_CAPACITY: usize = 64;

/// Point-in-time view of one strategy for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StrategySnapshot {
    pub config: StrategyConfig,
    pub state: StrategyState,
    pub stats: StrategyStats,
    pub current_stake: f64,
    pub session_profit: f64,
    pub consecutive_errors: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub open_trades: usize,
}

/// Everything the manager and the session task share about one strategy.
pub(crate) struct InstanceRecord {
    pub config: StrategyConfig,
    pub state: StrategyState,
    pub stats: StrategyStats,
    pub trades: Vec<TradeLog>,
    pub martingale: MartingaleController,
    pub session: SessionGuard,
    pub errors: ErrorTracker,
}

impl InstanceRecord {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            martingale: MartingaleController::new(
                config.stake,
                config.martingale_multiplier,
                config.max_stake,
            ),
            session: SessionGuard::new(limits_of(&config)),
            errors: ErrorTracker::new(),
            state: StrategyState::Idle,
            stats: StrategyStats::default(),
            trades: Vec::new(),
            config,
        }
    }

    /// Fresh stake, profit and error streak for an operator-initiated start.
    pub fn reset_session(&mut self) {
        let c = &self.config;
        self.martingale
            .reconfigure(c.stake, c.martingale_multiplier, c.max_stake);
        self.session.set_limits(limits_of(c));
        self.session.reset();
        self.errors.reset();
        self.stats = StrategyStats::default();
    }

    pub fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot {
            config: self.config.clone(),
            state: self.state,
            stats: self.stats.clone(),
            current_stake: self.martingale.current(),
            session_profit: self.session.profit(),
            consecutive_errors: self.errors.count(),
            wins: self.session.wins(),
            losses: self.session.losses(),
            win_rate: self.session.win_rate(),
            open_trades: self.trades.iter().filter(|t| t.is_pending()).count(),
        }
    }
}

pub(crate) fn limits_of(config: &StrategyConfig) -> SessionLimits {
    SessionLimits {
        target_profit: config.target_profit,
        stop_loss: config.stop_loss,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionCommand {
    Stop,
    Pause,
    Resume,
}

pub(crate) struct SessionControl {
    pub commands: mpsc::Sender<SessionCommand>,
    pub task: JoinHandle<()>,
}

impl SessionControl {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// One registered strategy: its record plus the handle of its session task.
pub(crate) struct Instance {
    pub id: String,
    pub record: RwLock<InstanceRecord>,
    pub control: Mutex<Option<SessionControl>>,
}

impl Instance {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            id: config.id.clone(),
            record: RwLock::new(InstanceRecord::new(config)),
            control: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.control
            .lock()
            .await
            .as_ref()
            .is_some_and(SessionControl::is_running)
    }
}

/// Shared services handed to every session task.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub broker: Arc<dyn BrokerClient>,
    pub executor: Arc<TradeExecutor>,
    pub events: broadcast::Sender<StrategyEvent>,
}

pub(crate) async fn set_state(
    inst: &Instance,
    events: &broadcast::Sender<StrategyEvent>,
    to: StrategyState,
) {
    let from = std::mem::replace(&mut inst.record.write().await.state, to);
    if from != to {
        info!(strategy = %inst.id, %from, %to, "State change");
        let _ = events.send(StrategyEvent::StateChanged {
            strategy_id: inst.id.clone(),
            from,
            to,
        });
    }
}

enum SessionEnd {
    Stopped(StopReason),
    Failed(Error),
}

/// Drive one strategy until it stops for good.
///
/// Runs sessions back to back: a failed session goes through the error
/// policy and, when a restart is due, a fresh session begins after the retry
/// delay with stake and session profit carried over.
pub(crate) async fn supervise(
    inst: Arc<Instance>,
    ctx: SessionContext,
    mut commands: mpsc::Receiver<SessionCommand>,
) {
    loop {
        let err = match run_session(&inst, &ctx, &mut commands).await {
            SessionEnd::Stopped(reason) => {
                finish(&inst, &ctx, StrategyState::Idle, reason).await;
                return;
            }
            SessionEnd::Failed(err) => err,
        };

        let (decision, consecutive_errors) = {
            let mut guard = inst.record.write().await;
            let rec = &mut *guard;
            let delay = Duration::from_secs(rec.config.retry_delay_secs);
            let decision = rec.errors.record(rec.config.auto_restart, delay);
            (decision, rec.errors.count())
        };
        error!(strategy = %inst.id, error = %err, consecutive_errors, "Strategy session failed");
        set_state(&inst, &ctx.events, StrategyState::Error).await;
        let _ = ctx.events.send(StrategyEvent::ExecutionFailed {
            strategy_id: inst.id.clone(),
            error: err.to_string(),
            consecutive_errors,
        });

        match decision {
            RestartDecision::HardStop => {
                finish(&inst, &ctx, StrategyState::Error, StopReason::TooManyErrors).await;
                return;
            }
            RestartDecision::Park => {
                finish(&inst, &ctx, StrategyState::Error, StopReason::ErrorParked).await;
                return;
            }
            RestartDecision::Restart(delay) => {
                info!(strategy = %inst.id, delay_secs = delay.as_secs(), "Restart scheduled");
                let _ = ctx.events.send(StrategyEvent::RestartScheduled {
                    strategy_id: inst.id.clone(),
                    delay_secs: delay.as_secs(),
                });
                if let Some(reason) = wait_for_restart(&mut commands, delay).await {
                    finish(&inst, &ctx, StrategyState::Idle, reason).await;
                    return;
                }
                info!(strategy = %inst.id, "Restarting strategy");
            }
        }
    }
}

async fn finish(inst: &Instance, ctx: &SessionContext, state: StrategyState, reason: StopReason) {
    set_state(inst, &ctx.events, state).await;
    info!(strategy = %inst.id, %reason, "Strategy stopped");
    let _ = ctx.events.send(StrategyEvent::Stopped {
        strategy_id: inst.id.clone(),
        reason,
    });
}

/// Sleep out the retry delay. `Some` means the strategy was stopped meanwhile.
async fn wait_for_restart(
    commands: &mut mpsc::Receiver<SessionCommand>,
    delay: Duration,
) -> Option<StopReason> {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return None,
            cmd = commands.recv() => match cmd {
                Some(SessionCommand::Stop) => return Some(StopReason::Manual),
                None => return Some(StopReason::Shutdown),
                Some(other) => debug!(command = ?other, "Ignoring command while waiting to restart"),
            },
        }
    }
}

async fn run_session(
    inst: &Arc<Instance>,
    ctx: &SessionContext,
    commands: &mut mpsc::Receiver<SessionCommand>,
) -> SessionEnd {
    let config = inst.record.read().await.config.clone();

    if let Err(e) = ctx.broker.connect().await {
        return SessionEnd::Failed(e);
    }

    let mut buffer = TickBuffer::new(config.max_ticks());
    match ctx
        .broker
        .ticks_history(&config.market_symbol, config.max_ticks())
        .await
    {
        Ok(history) => {
            for raw in &history {
                buffer.ingest(raw);
            }
            debug!(strategy = %inst.id, seeded = buffer.len(), "Tick window seeded from history");
        }
        Err(e) => {
            warn!(
                strategy = %inst.id,
                error = %e,
                "Tick history unavailable, warming up from live ticks"
            );
        }
    }

    let (tick_tx, mut tick_rx) = mpsc::channel::<RawTick>(TICK_CHANNEL_CAPACITY);
    let tick_sub = match ctx.broker.subscribe_ticks(&config.market_symbol, tick_tx).await {
        Ok(id) => id,
        Err(e) => return SessionEnd::Failed(e),
    };

    let (exec_tx, mut exec_rx) = mpsc::channel::<Result<Submission>>(4);
    let (settle_tx, mut settle_rx) = mpsc::channel::<ContractUpdate>(SETTLEMENT_CHANNEL_CAPACITY);

    let mut session = Session {
        inst,
        ctx,
        symbol: config.market_symbol.clone(),
        buffer,
        evaluator: evaluator_for(config.kind),
        in_flight: false,
        watching: HashMap::new(),
        early: HashMap::new(),
        exec_tx,
        settle_tx,
    };

    info!(
        strategy = %inst.id,
        kind = %config.kind,
        symbol = %config.market_symbol,
        window = config.max_ticks(),
        "Session started"
    );
    set_state(inst, &ctx.events, StrategyState::Analysing).await;

    let mut analysis = tokio::time::interval(ANALYSIS_INTERVAL);
    analysis.set_missed_tick_behavior(MissedTickBehavior::Delay);
    analysis.tick().await;

    let end = loop {
        tokio::select! {
            tick = tick_rx.recv() => match tick {
                Some(raw) => session.on_tick(&raw),
                None => break SessionEnd::Failed(Error::Connection(format!(
                    "tick stream for {} closed", session.symbol
                ))),
            },

            _ = analysis.tick() => {
                if let Err(e) = session.on_analysis().await {
                    break SessionEnd::Failed(e);
                }
            }

            Some(outcome) = exec_rx.recv() => match session.on_submission(outcome).await {
                Ok(Some(reason)) => break SessionEnd::Stopped(reason),
                Ok(None) => {}
                Err(e) => break SessionEnd::Failed(e),
            },

            Some(update) = settle_rx.recv() => {
                if let Some(reason) = session.on_contract_update(update).await {
                    break SessionEnd::Stopped(reason);
                }
            }

            cmd = commands.recv() => match cmd {
                Some(SessionCommand::Stop) => break SessionEnd::Stopped(StopReason::Manual),
                Some(SessionCommand::Pause) => session.pause().await,
                Some(SessionCommand::Resume) => session.resume().await,
                None => break SessionEnd::Stopped(StopReason::Shutdown),
            },
        }
    };

    session.teardown(&tick_sub, &mut exec_rx).await;
    end
}

/// Close out a contract whose purchase completed after its session ended.
/// No session is left to watch it, so it is recorded as timed out.
async fn record_unwatched(inst: &Instance, ctx: &SessionContext, submission: Submission) {
    let Submission {
        mut trade,
        subscription_id,
    } = submission;
    if let Some(id) = &subscription_id {
        let _ = ctx.broker.forget(id).await;
    }
    trade.time_out();
    warn!(
        strategy = %inst.id,
        contract_id = %trade.contract_id,
        buy_price = trade.buy_price,
        "Contract bought after its session ended"
    );
    inst.record.write().await.trades.push(trade.clone());
    let _ = ctx.events.send(StrategyEvent::TradeTimedOut { trade });
}

/// A contract waiting for its terminal update.
struct Watch {
    subscription_id: Option<SubscriptionId>,
    deadline: Instant,
    timeout_secs: u64,
}

/// State owned by one running session. A submission still in flight when it
/// ends is recorded by its own task through `record_unwatched`.
struct Session<'a> {
    inst: &'a Arc<Instance>,
    ctx: &'a SessionContext,
    symbol: String,
    buffer: TickBuffer,
    evaluator: Box<dyn Evaluator>,
    in_flight: bool,
    watching: HashMap<String, Watch>,
    /// Terminal updates that beat their submission result back.
    early: HashMap<String, ContractUpdate>,
    exec_tx: mpsc::Sender<Result<Submission>>,
    settle_tx: mpsc::Sender<ContractUpdate>,
}

impl Session<'_> {
    fn on_tick(&mut self, raw: &RawTick) {
        if raw.symbol != self.symbol {
            return;
        }
        self.buffer.ingest(raw);
    }

    async fn on_analysis(&mut self) -> Result<()> {
        let (capacity, latch) = {
            let rec = self.inst.record.read().await;
            (rec.config.max_ticks(), rec.config.trade_latch)
        };
        if capacity != self.buffer.capacity() {
            debug!(strategy = %self.inst.id, capacity, "Resizing tick window");
            self.buffer.set_capacity(capacity);
        }

        let mut stats = compute_stats(&self.buffer);
        if self.in_flight {
            stats.decision_state = DecisionState::Trading;
        }
        let state = {
            let mut rec = self.inst.record.write().await;
            rec.stats = stats.clone();
            rec.state
        };

        self.sweep_overdue().await?;

        if state != StrategyState::Analysing || self.in_flight || self.buffer.is_empty() {
            return Ok(());
        }
        if latch == TradeLatch::Latched && !self.watching.is_empty() {
            return Ok(());
        }

        if let Some(signal) = self.evaluator.evaluate(&stats) {
            debug!(
                strategy = %self.inst.id,
                power = stats.power,
                momentum = %stats.momentum,
                "Evaluator fired"
            );
            self.submit(signal).await;
        }
        Ok(())
    }

    async fn submit(&mut self, signal: ContractSignal) {
        let ticket = {
            let mut rec = self.inst.record.write().await;
            rec.stats.decision_state = DecisionState::Trading;
            TradeTicket {
                strategy_id: self.inst.id.clone(),
                signal,
                stake: rec.martingale.current(),
                ticks: rec.config.ticks_per_trade,
                symbol: self.symbol.clone(),
                entry_digit: self.buffer.latest().map(|t| t.digit),
            }
        };
        self.in_flight = true;
        set_state(self.inst, &self.ctx.events, StrategyState::Trading).await;

        let inst = self.inst.clone();
        let ctx = self.ctx.clone();
        let settlements = self.settle_tx.clone();
        let results = self.exec_tx.clone();
        tokio::spawn(async move {
            let outcome = ctx.executor.execute(&ticket, settlements).await;
            if let Err(mpsc::error::SendError(Ok(submission))) = results.send(outcome).await {
                record_unwatched(&inst, &ctx, submission).await;
            }
        });
    }

    async fn on_submission(&mut self, outcome: Result<Submission>) -> Result<Option<StopReason>> {
        self.in_flight = false;
        let Submission {
            trade,
            subscription_id,
        } = outcome?;

        let timeout_secs = {
            let mut rec = self.inst.record.write().await;
            rec.trades.push(trade.clone());
            rec.config.settlement_timeout_secs
        };
        self.watching.insert(
            trade.contract_id.clone(),
            Watch {
                subscription_id,
                deadline: Instant::now() + Duration::from_secs(timeout_secs),
                timeout_secs,
            },
        );

        let _ = self.ctx.events.send(StrategyEvent::TradeOpened {
            trade: trade.clone(),
        });
        if self.inst.record.read().await.state == StrategyState::Trading {
            set_state(self.inst, &self.ctx.events, StrategyState::Analysing).await;
        }

        match self.early.remove(&trade.contract_id) {
            Some(update) => Ok(self.on_contract_update(update).await),
            None => Ok(None),
        }
    }

    async fn on_contract_update(&mut self, update: ContractUpdate) -> Option<StopReason> {
        if !update.status.is_terminal() {
            return None;
        }
        let Some(watch) = self.watching.remove(&update.contract_id) else {
            let known = self
                .inst
                .record
                .read()
                .await
                .trades
                .iter()
                .any(|t| t.contract_id == update.contract_id);
            if known {
                debug!(contract_id = %update.contract_id, "Ignoring update for settled contract");
            } else {
                self.early.insert(update.contract_id.clone(), update);
            }
            return None;
        };

        let settled = {
            let mut guard = self.inst.record.write().await;
            let rec = &mut *guard;
            rec.trades
                .iter_mut()
                .rev()
                .find(|t| t.contract_id == update.contract_id)
                .and_then(|trade| {
                    let outcome = settlement::resolve(&update, trade)?;
                    trade
                        .settle(outcome.result, outcome.profit, outcome.exit_tick)
                        .then(|| (trade.clone(), outcome))
                })
                .map(|(trade, outcome)| {
                    let next_stake = rec.martingale.on_result(outcome.is_win());
                    rec.errors.reset();
                    let stop = rec.session.record(outcome.is_win(), outcome.profit);
                    (trade, rec.session.profit(), next_stake, stop)
                })
        };

        if let Some(id) = &watch.subscription_id {
            let _ = self.ctx.broker.forget(id).await;
        }

        let (trade, session_profit, next_stake, stop) = settled?;
        info!(
            strategy = %self.inst.id,
            contract_id = %trade.contract_id,
            result = %trade.result,
            profit = trade.profit,
            session_profit,
            next_stake,
            "Trade settled"
        );
        let _ = self.ctx.events.send(StrategyEvent::TradeSettled {
            trade,
            session_profit,
            next_stake,
        });
        stop
    }

    /// Time out every contract past its deadline. The first one is reported
    /// as the session's error.
    async fn sweep_overdue(&mut self) -> Result<()> {
        let now = Instant::now();
        let overdue: Vec<String> = self
            .watching
            .iter()
            .filter(|(_, w)| w.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut first = None;
        for contract_id in overdue {
            let Some(watch) = self.watching.remove(&contract_id) else {
                continue;
            };
            if self.abandon(&contract_id, &watch).await {
                warn!(
                    strategy = %self.inst.id,
                    contract_id = %contract_id,
                    waited_secs = watch.timeout_secs,
                    "Contract never settled"
                );
            }

            first.get_or_insert(Error::SettlementTimeout {
                contract_id,
                waited_secs: watch.timeout_secs,
            });
        }

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stop watching a contract and mark its trade timed out. Returns whether
    /// a pending trade was closed.
    async fn abandon(&self, contract_id: &str, watch: &Watch) -> bool {
        if let Some(id) = &watch.subscription_id {
            let _ = self.ctx.broker.forget(id).await;
        }
        let timed_out = self
            .inst
            .record
            .write()
            .await
            .trades
            .iter_mut()
            .rev()
            .find(|t| t.contract_id == contract_id)
            .and_then(|t| t.time_out().then(|| t.clone()));
        match timed_out {
            Some(trade) => {
                let _ = self.ctx.events.send(StrategyEvent::TradeTimedOut { trade });
                true
            }
            None => false,
        }
    }

    async fn pause(&mut self) {
        let state = self.inst.record.read().await.state;
        if matches!(state, StrategyState::Analysing | StrategyState::Trading) {
            set_state(self.inst, &self.ctx.events, StrategyState::Paused).await;
        }
    }

    async fn resume(&mut self) {
        let state = self.inst.record.read().await.state;
        if state == StrategyState::Paused {
            let to = if self.in_flight {
                StrategyState::Trading
            } else {
                StrategyState::Analysing
            };
            set_state(self.inst, &self.ctx.events, to).await;
        }
    }

    /// Release every subscription and close out what the session still
    /// owns. Open contracts can no longer be watched, so they time out.
    async fn teardown(
        &mut self,
        tick_sub: &str,
        exec_rx: &mut mpsc::Receiver<Result<Submission>>,
    ) {
        if let Err(e) = self.ctx.broker.forget(tick_sub).await {
            warn!(strategy = %self.inst.id, error = %e, "Failed to release tick subscription");
        }

        // Results queued but not yet handled; later ones bounce to their task.
        exec_rx.close();
        while let Ok(outcome) = exec_rx.try_recv() {
            if let Ok(submission) = outcome {
                record_unwatched(self.inst, self.ctx, submission).await;
            }
        }

        let watched: Vec<(String, Watch)> = self.watching.drain().collect();
        for (contract_id, watch) in watched {
            if self.abandon(&contract_id, &watch).await {
                info!(
                    strategy = %self.inst.id,
                    contract_id = %contract_id,
                    "Open contract abandoned at session end"
                );
            }
        }
        debug!(strategy = %self.inst.id, "Session torn down");
    }
}
