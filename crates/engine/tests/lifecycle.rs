use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use common::{
    BrokerClient, BuyReceipt, ContractStatus, ContractType, ContractUpdate, Error, Proposal,
    ProposalRequest, RawTick, Result, StopReason, StrategyEvent, StrategyKind, StrategyState,
    SubscriptionId, TradeResult,
};
use engine::StrategyManager;
use strategy::{StrategyConfig, StrategyPatch, TradeLatch};

/// Quote whose fifth decimal is 2.
const EVEN_QUOTE: f64 = 1000.00002;

/// Scripted broker: preloads a tick burst on subscribe and hands out
/// sequential contract ids.
struct FakeBroker {
    authorized: AtomicBool,
    fail_buys: AtomicBool,
    /// Milliseconds each buy takes.
    buy_delay: AtomicU64,
    feed: Vec<f64>,
    history: Mutex<Vec<f64>>,
    history_requests: Mutex<Vec<usize>>,
    tick_sink: Mutex<Option<mpsc::Sender<RawTick>>>,
    contract_sinks: Mutex<HashMap<String, mpsc::Sender<ContractUpdate>>>,
    buys: AtomicU32,
    proposals: Mutex<Vec<ProposalRequest>>,
    forgotten: Mutex<Vec<String>>,
}

impl FakeBroker {
    fn new(feed: Vec<f64>) -> Arc<Self> {
        Arc::new(Self {
            authorized: AtomicBool::new(true),
            fail_buys: AtomicBool::new(false),
            buy_delay: AtomicU64::new(0),
            feed,
            history: Mutex::new(Vec::new()),
            history_requests: Mutex::new(Vec::new()),
            tick_sink: Mutex::new(None),
            contract_sinks: Mutex::new(HashMap::new()),
            buys: AtomicU32::new(0),
            proposals: Mutex::new(Vec::new()),
            forgotten: Mutex::new(Vec::new()),
        })
    }

    fn even_feed() -> Arc<Self> {
        Self::new(vec![EVEN_QUOTE; 10])
    }

    async fn settle(&self, contract_id: &str, status: ContractStatus, profit: Option<f64>) {
        let sink = self
            .contract_sinks
            .lock()
            .unwrap()
            .get(contract_id)
            .cloned()
            .expect("contract is watched");
        sink.send(ContractUpdate {
            contract_id: contract_id.to_string(),
            status,
            profit,
            exit_tick: Some(1000.00007),
        })
        .await
        .unwrap();
    }

    fn close_ticks(&self) {
        self.tick_sink.lock().unwrap().take();
    }

    fn buys(&self) -> u32 {
        self.buys.load(Ordering::SeqCst)
    }

    fn forgotten(&self) -> Vec<String> {
        self.forgotten.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerClient for FakeBroker {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    async fn subscribe_ticks(
        &self,
        symbol: &str,
        sink: mpsc::Sender<RawTick>,
    ) -> Result<SubscriptionId> {
        for (i, quote) in self.feed.iter().enumerate() {
            let _ = sink.try_send(RawTick {
                symbol: symbol.to_string(),
                epoch: 1_700_000_000 + i as i64,
                quote: *quote,
            });
        }
        *self.tick_sink.lock().unwrap() = Some(sink);
        Ok("ticks".into())
    }

    async fn ticks_history(&self, symbol: &str, count: usize) -> Result<Vec<RawTick>> {
        self.history_requests.lock().unwrap().push(count);
        let history = self.history.lock().unwrap();
        let skip = history.len().saturating_sub(count);
        Ok(history
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, quote)| RawTick {
                symbol: symbol.to_string(),
                epoch: 1_699_999_000 + i as i64,
                quote: *quote,
            })
            .collect())
    }

    async fn get_proposal(&self, request: &ProposalRequest) -> Result<Proposal> {
        let mut proposals = self.proposals.lock().unwrap();
        proposals.push(request.clone());
        Ok(Proposal {
            id: format!("p{}", proposals.len()),
            ask_price: request.amount,
            payout: request.amount * 1.95,
        })
    }

    async fn buy_contract(&self, _proposal_id: &str, price: f64) -> Result<BuyReceipt> {
        let delay = self.buy_delay.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let n = self.buys.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_buys.load(Ordering::SeqCst) {
            return Err(Error::Buy("InsufficientBalance".into()));
        }
        Ok(BuyReceipt {
            contract_id: format!("c{n}"),
            buy_price: price,
        })
    }

    async fn subscribe_open_contract(
        &self,
        contract_id: &str,
        sink: mpsc::Sender<ContractUpdate>,
    ) -> Result<SubscriptionId> {
        self.contract_sinks
            .lock()
            .unwrap()
            .insert(contract_id.to_string(), sink);
        Ok(format!("poc-{contract_id}"))
    }

    async fn forget(&self, subscription_id: &str) -> Result<()> {
        self.forgotten
            .lock()
            .unwrap()
            .push(subscription_id.to_string());
        Ok(())
    }
}

fn even_odd(id: &str) -> StrategyConfig {
    let mut config = StrategyConfig::new(id, StrategyKind::EvenOdd);
    config.enabled = true;
    config.analysis_minutes = 1;
    config
}

async fn manager_with(broker: Arc<FakeBroker>, config: StrategyConfig) -> StrategyManager {
    let manager = StrategyManager::new(broker);
    manager.register(config).await.unwrap();
    manager
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<StrategyEvent>, pred: F) -> StrategyEvent
where
    F: Fn(&StrategyEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let event = rx.recv().await.expect("event channel open");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event arrived in time")
}

fn is_opened(e: &StrategyEvent) -> bool {
    matches!(e, StrategyEvent::TradeOpened { .. })
}

fn is_settled(e: &StrategyEvent) -> bool {
    matches!(e, StrategyEvent::TradeSettled { .. })
}

fn is_stopped(e: &StrategyEvent) -> bool {
    matches!(e, StrategyEvent::Stopped { .. })
}

fn entered(state: StrategyState) -> impl Fn(&StrategyEvent) -> bool {
    move |e| matches!(e, StrategyEvent::StateChanged { to, .. } if *to == state)
}

#[tokio::test(start_paused = true)]
async fn loss_compounds_stake_and_win_resets_it() {
    let broker = FakeBroker::even_feed();
    let manager = manager_with(broker.clone(), even_odd("s1")).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();

    let StrategyEvent::TradeOpened { trade } = wait_for(&mut events, is_opened).await else {
        unreachable!()
    };
    assert_eq!(trade.contract_id, "c1");
    assert_eq!(trade.contract_type, ContractType::DigitEven);
    assert_eq!(trade.buy_price, 1.0);
    assert_eq!(trade.entry_tick, Some(2));

    broker.settle("c1", ContractStatus::Lost, None).await;
    let StrategyEvent::TradeSettled {
        trade,
        session_profit,
        next_stake,
    } = wait_for(&mut events, is_settled).await
    else {
        unreachable!()
    };
    assert_eq!(trade.result, TradeResult::Loss);
    assert_eq!(trade.profit, -1.0);
    assert_eq!(session_profit, -1.0);
    assert!((next_stake - 2.1).abs() < 1e-9);

    let StrategyEvent::TradeOpened { trade } = wait_for(&mut events, is_opened).await else {
        unreachable!()
    };
    assert_eq!(trade.contract_id, "c2");
    assert!((trade.buy_price - 2.1).abs() < 1e-9);

    broker.settle("c2", ContractStatus::Won, Some(1.99)).await;
    let StrategyEvent::TradeSettled { next_stake, .. } = wait_for(&mut events, is_settled).await
    else {
        unreachable!()
    };
    assert_eq!(next_stake, 1.0);

    let snap = manager.snapshot("s1").await.unwrap();
    assert_eq!(snap.wins, 1);
    assert_eq!(snap.losses, 1);
    assert_eq!(snap.win_rate, 50.0);
    assert!((snap.session_profit - 0.99).abs() < 1e-9);

    manager.stop("s1").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn latched_strategy_waits_for_settlement() {
    let broker = FakeBroker::even_feed();
    let manager = manager_with(broker.clone(), even_odd("s1")).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();

    wait_for(&mut events, is_opened).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(broker.buys(), 1);
    assert_eq!(manager.snapshot("s1").await.unwrap().open_trades, 1);

    manager.stop("s1").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn free_running_strategy_trades_while_contracts_are_open() {
    let broker = FakeBroker::even_feed();
    broker.buy_delay.store(2_500, Ordering::SeqCst);
    let mut config = even_odd("s1");
    config.trade_latch = TradeLatch::FreeRunning;
    config.settlement_timeout_secs = 600;
    let manager = manager_with(broker.clone(), config).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();

    let StrategyEvent::TradeOpened { trade } = wait_for(&mut events, is_opened).await else {
        unreachable!()
    };
    assert_eq!(trade.contract_id, "c1");
    // Analysis passes during the purchase did not ask for another quote.
    assert_eq!(broker.proposals.lock().unwrap().len(), 1);

    let StrategyEvent::TradeOpened { trade } = wait_for(&mut events, is_opened).await else {
        unreachable!()
    };
    assert_eq!(trade.contract_id, "c2");
    assert_eq!(manager.snapshot("s1").await.unwrap().open_trades, 2);

    manager.stop("s1").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn window_is_seeded_from_history() {
    let broker = FakeBroker::new(Vec::new());
    *broker.history.lock().unwrap() = vec![EVEN_QUOTE; 10];
    let manager = manager_with(broker.clone(), even_odd("s1")).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();

    let StrategyEvent::TradeOpened { trade } = wait_for(&mut events, is_opened).await else {
        unreachable!()
    };
    assert_eq!(trade.contract_type, ContractType::DigitEven);
    assert_eq!(*broker.history_requests.lock().unwrap(), vec![60]);
    assert_eq!(manager.stats("s1").await.unwrap().sample_size, 10);

    manager.stop("s1").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn target_profit_stops_strategy() {
    let broker = FakeBroker::even_feed();
    let mut config = even_odd("s1");
    config.target_profit = 1.0;
    let manager = manager_with(broker.clone(), config).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();

    wait_for(&mut events, is_opened).await;
    broker.settle("c1", ContractStatus::Won, Some(1.5)).await;

    let StrategyEvent::Stopped { reason, .. } = wait_for(&mut events, is_stopped).await else {
        unreachable!()
    };
    assert_eq!(reason, StopReason::TargetProfit);
    let snap = manager.snapshot("s1").await.unwrap();
    assert_eq!(snap.state, StrategyState::Idle);
    assert!(broker.forgotten().contains(&"ticks".to_string()));
}

#[tokio::test(start_paused = true)]
async fn stop_loss_stops_strategy() {
    let broker = FakeBroker::even_feed();
    let mut config = even_odd("s1");
    config.stop_loss = 1.0;
    let manager = manager_with(broker.clone(), config).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();

    wait_for(&mut events, is_opened).await;
    broker.settle("c1", ContractStatus::Lost, Some(-1.0)).await;

    let StrategyEvent::Stopped { reason, .. } = wait_for(&mut events, is_stopped).await else {
        unreachable!()
    };
    assert_eq!(reason, StopReason::StopLoss);
}

#[tokio::test(start_paused = true)]
async fn five_consecutive_errors_are_final() {
    let broker = FakeBroker::even_feed();
    broker.fail_buys.store(true, Ordering::SeqCst);
    let manager = manager_with(broker.clone(), even_odd("s1")).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();

    let mut restarts = 0;
    let reason = loop {
        match wait_for(&mut events, |_| true).await {
            StrategyEvent::RestartScheduled { delay_secs, .. } => {
                assert_eq!(delay_secs, 5);
                restarts += 1;
            }
            StrategyEvent::Stopped { reason, .. } => break reason,
            _ => {}
        }
    };

    assert_eq!(reason, StopReason::TooManyErrors);
    assert_eq!(restarts, 4);
    assert_eq!(broker.buys(), 5);
    let snap = manager.snapshot("s1").await.unwrap();
    assert_eq!(snap.state, StrategyState::Error);
    assert_eq!(snap.consecutive_errors, 5);

    // An operator start begins a clean streak.
    broker.fail_buys.store(false, Ordering::SeqCst);
    manager.start("s1").await.unwrap();
    wait_for(&mut events, is_opened).await;
    assert_eq!(manager.snapshot("s1").await.unwrap().consecutive_errors, 0);
    manager.stop("s1").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn error_without_auto_restart_parks() {
    let broker = FakeBroker::even_feed();
    broker.fail_buys.store(true, Ordering::SeqCst);
    let mut config = even_odd("s1");
    config.auto_restart = false;
    let manager = manager_with(broker.clone(), config).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();

    let StrategyEvent::Stopped { reason, .. } = wait_for(&mut events, is_stopped).await else {
        unreachable!()
    };
    assert_eq!(reason, StopReason::ErrorParked);
    assert_eq!(manager.snapshot("s1").await.unwrap().state, StrategyState::Error);

    manager.stop("s1").await.unwrap();
    assert_eq!(manager.snapshot("s1").await.unwrap().state, StrategyState::Idle);
}

#[tokio::test(start_paused = true)]
async fn restart_keeps_stake_progression() {
    let broker = FakeBroker::even_feed();
    let mut config = even_odd("s1");
    config.settlement_timeout_secs = 600;
    let manager = manager_with(broker.clone(), config).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();

    wait_for(&mut events, is_opened).await;
    broker.settle("c1", ContractStatus::Lost, None).await;
    wait_for(&mut events, is_settled).await;
    wait_for(&mut events, is_opened).await;

    // Losing the tick stream fails the session; the restart resumes at the
    // compounded stake.
    broker.close_ticks();
    wait_for(&mut events, |e| matches!(e, StrategyEvent::RestartScheduled { .. })).await;
    let StrategyEvent::TradeOpened { trade } = wait_for(&mut events, is_opened).await else {
        unreachable!()
    };
    assert!((trade.buy_price - 2.1).abs() < 1e-9);
    manager.stop("s1").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn lost_tick_stream_times_out_open_trades() {
    let broker = FakeBroker::even_feed();
    let mut config = even_odd("s1");
    config.settlement_timeout_secs = 600;
    let manager = manager_with(broker.clone(), config).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();
    wait_for(&mut events, is_opened).await;

    broker.close_ticks();
    let StrategyEvent::TradeTimedOut { trade } =
        wait_for(&mut events, |e| matches!(e, StrategyEvent::TradeTimedOut { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(trade.contract_id, "c1");
    wait_for(&mut events, |e| matches!(e, StrategyEvent::RestartScheduled { .. })).await;

    let trades = manager.trades("s1").await.unwrap();
    assert_eq!(trades[0].result, TradeResult::TimedOut);
    assert_eq!(manager.snapshot("s1").await.unwrap().open_trades, 0);
    assert!(broker.forgotten().contains(&"poc-c1".to_string()));

    // The restarted session is not latched behind the abandoned contract.
    let StrategyEvent::TradeOpened { trade } = wait_for(&mut events, is_opened).await else {
        unreachable!()
    };
    assert_eq!(trade.contract_id, "c2");
    manager.stop("s1").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_during_purchase_still_records_contract() {
    let broker = FakeBroker::even_feed();
    broker.buy_delay.store(5_000, Ordering::SeqCst);
    let manager = manager_with(broker.clone(), even_odd("s1")).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();

    wait_for(&mut events, entered(StrategyState::Trading)).await;
    manager.stop("s1").await.unwrap();
    assert_eq!(manager.snapshot("s1").await.unwrap().state, StrategyState::Idle);

    let StrategyEvent::TradeTimedOut { trade } =
        wait_for(&mut events, |e| matches!(e, StrategyEvent::TradeTimedOut { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(trade.contract_id, "c1");
    assert_eq!(broker.buys(), 1);

    let trades = manager.trades("s1").await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].result, TradeResult::TimedOut);
    assert_eq!(trades[0].buy_price, 1.0);
    assert_eq!(broker.forgotten().iter().filter(|id| *id == "poc-c1").count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unsettled_contract_times_out() {
    let broker = FakeBroker::even_feed();
    let mut config = even_odd("s1");
    config.settlement_timeout_secs = 3;
    config.auto_restart = false;
    let manager = manager_with(broker.clone(), config).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();

    wait_for(&mut events, is_opened).await;
    let StrategyEvent::TradeTimedOut { trade } =
        wait_for(&mut events, |e| matches!(e, StrategyEvent::TradeTimedOut { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(trade.result, TradeResult::TimedOut);
    assert_eq!(trade.profit, 0.0);

    let StrategyEvent::ExecutionFailed { error, .. } = wait_for(&mut events, |e| {
        matches!(e, StrategyEvent::ExecutionFailed { .. })
    })
    .await
    else {
        unreachable!()
    };
    assert!(error.contains("timed out"));
    assert!(broker.forgotten().contains(&"poc-c1".to_string()));

    let snap = manager.snapshot("s1").await.unwrap();
    // Timed-out trades leave the stake alone.
    assert_eq!(snap.current_stake, 1.0);
    assert_eq!(snap.session_profit, 0.0);
    let trades = manager.trades("s1").await.unwrap();
    assert_eq!(trades[0].result, TradeResult::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn paused_strategy_keeps_stats_but_does_not_trade() {
    let broker = FakeBroker::even_feed();
    let manager = manager_with(broker.clone(), even_odd("s1")).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();

    wait_for(&mut events, entered(StrategyState::Analysing)).await;
    manager.pause("s1").await.unwrap();
    wait_for(&mut events, entered(StrategyState::Paused)).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(broker.buys(), 0);
    let stats = manager.stats("s1").await.unwrap();
    assert_eq!(stats.sample_size, 10);
    assert_eq!(stats.even_percent, 100.0);

    assert!(matches!(
        manager.pause("s1").await,
        Err(Error::InvalidTransition { .. })
    ));

    manager.resume("s1").await.unwrap();
    wait_for(&mut events, is_opened).await;
    assert_eq!(broker.buys(), 1);
    manager.stop("s1").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_releases_subscriptions() {
    let broker = FakeBroker::even_feed();
    let manager = manager_with(broker.clone(), even_odd("s1")).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();
    wait_for(&mut events, is_opened).await;

    manager.stop("s1").await.unwrap();
    let forgotten = broker.forgotten();
    assert!(forgotten.contains(&"ticks".to_string()));
    assert!(forgotten.contains(&"poc-c1".to_string()));
    let StrategyEvent::Stopped { reason, .. } = wait_for(&mut events, is_stopped).await else {
        unreachable!()
    };
    assert_eq!(reason, StopReason::Manual);
    assert_eq!(manager.snapshot("s1").await.unwrap().state, StrategyState::Idle);
}

#[tokio::test(start_paused = true)]
async fn start_waits_for_a_concurrent_stop() {
    let broker = FakeBroker::even_feed();
    let manager = manager_with(broker.clone(), even_odd("s1")).await;
    let mut events = manager.subscribe_events();
    manager.start("s1").await.unwrap();
    wait_for(&mut events, entered(StrategyState::Analysing)).await;

    let (stopped, started) = tokio::join!(manager.stop("s1"), manager.start("s1"));
    stopped.unwrap();
    started.unwrap();

    // The old session finished before the new one began, so its teardown
    // cannot knock the new session back to Idle.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.snapshot("s1").await.unwrap().state, StrategyState::Analysing);
    assert_eq!(broker.forgotten().iter().filter(|id| *id == "ticks").count(), 1);

    manager.stop("s1").await.unwrap();
}

#[tokio::test]
async fn start_preconditions() {
    let broker = FakeBroker::new(Vec::new());
    let manager = StrategyManager::new(broker.clone());
    let mut disabled = even_odd("off");
    disabled.enabled = false;
    manager.register(disabled).await.unwrap();
    manager.register(even_odd("on")).await.unwrap();

    assert!(matches!(
        manager.start("missing").await,
        Err(Error::UnknownStrategy(_))
    ));
    assert!(matches!(
        manager.start("off").await,
        Err(Error::StrategyDisabled(_))
    ));

    broker.authorized.store(false, Ordering::SeqCst);
    assert!(matches!(manager.start("on").await, Err(Error::NotAuthorized)));

    broker.authorized.store(true, Ordering::SeqCst);
    manager.start("on").await.unwrap();
    assert!(matches!(
        manager.start("on").await,
        Err(Error::AlreadyRunning(_))
    ));
    manager.stop_all().await;
    assert_eq!(manager.snapshot("on").await.unwrap().state, StrategyState::Idle);
}

#[tokio::test]
async fn roster_management() {
    let manager = StrategyManager::new(FakeBroker::new(Vec::new()));
    manager
        .register_all(strategy::config::default_roster())
        .await
        .unwrap();
    assert_eq!(manager.snapshots().await.len(), 5);
    assert!(matches!(
        manager.register(StrategyConfig::new("strategy-0", StrategyKind::Differs)).await,
        Err(Error::Config(_))
    ));

    let patch = StrategyPatch {
        stake: Some(2.0),
        max_stake: Some(8.0),
        ..StrategyPatch::default()
    };
    let snap = manager.update("strategy-1", &patch).await.unwrap();
    assert_eq!(snap.current_stake, 2.0);
    assert_eq!(snap.config.max_stake, Some(8.0));

    let bad = StrategyPatch {
        stake: Some(-1.0),
        ..StrategyPatch::default()
    };
    assert!(matches!(
        manager.update("strategy-1", &bad).await,
        Err(Error::Config(_))
    ));
    assert_eq!(manager.snapshot("strategy-1").await.unwrap().config.stake, 2.0);

    manager.remove("strategy-4").await.unwrap();
    assert!(matches!(
        manager.snapshot("strategy-4").await,
        Err(Error::UnknownStrategy(_))
    ));
    assert_eq!(manager.snapshots().await.len(), 4);
}
