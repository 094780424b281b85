//! In-process broker for paper trading.
//!
//! `PaperBroker` implements [`BrokerClient`] against a simulated market: each
//! subscribed symbol gets a random-walk feed, proposals are priced from a
//! fixed payout ratio, and bought contracts settle after their tick duration
//! using the same digit rules the live broker applies. Nothing leaves the
//! process, so the engine can be exercised end to end without an account.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::{
    BrokerClient, BuyReceipt, ContractStatus, ContractType, ContractUpdate, Error, Proposal,
    ProposalRequest, RawTick, Result, SubscriptionId,
};
use strategy::last_digit;

/// Virtual account balance every paper session starts with.
pub const DEFAULT_BALANCE: f64 = 10_000.0;

const START_QUOTE: f64 = 1000.0;
/// Largest single random-walk step as a fraction of the quote.
const MAX_STEP: f64 = 0.0005;
/// Ticks remembered per market for history requests.
const HISTORY_CAPACITY: usize = 5000;
/// Unbought proposals are discarded after this long.
pub const PROPOSAL_TTL: Duration = Duration::from_secs(60);
/// How long a settled, unwatched contract stays queryable.
pub const SETTLED_RETENTION: Duration = Duration::from_secs(60);

/// Simulated broker. Cheap to clone; clones share one market.
#[derive(Clone)]
pub struct PaperBroker {
    inner: Arc<Inner>,
}

struct Inner {
    payout_ratio: f64,
    /// `None` means ticks only arrive through [`PaperBroker::inject_tick`].
    tick_interval: Option<Duration>,
    ledger: RwLock<Ledger>,
    rng: Mutex<StdRng>,
    next_id: AtomicU64,
}

struct Ledger {
    balance: f64,
    markets: HashMap<String, Market>,
    proposals: HashMap<String, PendingProposal>,
    contracts: HashMap<String, Contract>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
}

struct Market {
    quote: f64,
    /// Printed ticks, oldest first.
    history: VecDeque<RawTick>,
    subscribers: HashMap<SubscriptionId, mpsc::Sender<RawTick>>,
    feed: Option<JoinHandle<()>>,
}

impl Market {
    fn new() -> Self {
        Self {
            quote: START_QUOTE,
            history: VecDeque::new(),
            subscribers: HashMap::new(),
            feed: None,
        }
    }

    fn record(&mut self, tick: RawTick) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(tick);
    }
}

struct PendingProposal {
    request: ProposalRequest,
    barrier: Option<u8>,
    ask_price: f64,
    payout: f64,
    created_at: Instant,
}

struct Contract {
    symbol: String,
    contract_type: ContractType,
    barrier: Option<u8>,
    buy_price: f64,
    payout: f64,
    ticks_left: u32,
    outcome: Option<ContractUpdate>,
    settled_at: Option<Instant>,
    watchers: HashMap<SubscriptionId, mpsc::Sender<ContractUpdate>>,
}

impl Contract {
    fn open_update(&self, contract_id: &str) -> ContractUpdate {
        ContractUpdate {
            contract_id: contract_id.to_string(),
            status: ContractStatus::Open,
            profit: Some(0.0),
            exit_tick: None,
        }
    }

    /// Settled long enough ago with nobody left listening.
    fn is_stale(&self, now: Instant) -> bool {
        self.watchers.is_empty()
            && self
                .settled_at
                .is_some_and(|at| now.duration_since(at) >= SETTLED_RETENTION)
    }
}

enum Subscription {
    Ticks(String),
    Contract(String),
}

impl PaperBroker {
    /// Broker with a random-walk feed ticking every `tick_interval`.
    pub fn new(tick_interval: Duration, payout_ratio: f64) -> Self {
        Self::build(Some(tick_interval), payout_ratio, StdRng::from_entropy())
    }

    /// Deterministic feed for reproducible runs.
    pub fn with_seed(tick_interval: Duration, payout_ratio: f64, seed: u64) -> Self {
        Self::build(Some(tick_interval), payout_ratio, StdRng::seed_from_u64(seed))
    }

    /// Broker without a feed. Ticks arrive only via [`inject_tick`](Self::inject_tick).
    pub fn manual(payout_ratio: f64) -> Self {
        Self::build(None, payout_ratio, StdRng::seed_from_u64(0))
    }

    fn build(tick_interval: Option<Duration>, payout_ratio: f64, rng: StdRng) -> Self {
        Self {
            inner: Arc::new(Inner {
                payout_ratio,
                tick_interval,
                ledger: RwLock::new(Ledger {
                    balance: DEFAULT_BALANCE,
                    markets: HashMap::new(),
                    proposals: HashMap::new(),
                    contracts: HashMap::new(),
                    subscriptions: HashMap::new(),
                }),
                rng: Mutex::new(rng),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub async fn balance(&self) -> f64 {
        self.inner.ledger.read().await.balance
    }

    /// Publish a tick as if the market printed `quote`, settling any
    /// contracts on `symbol` whose duration has elapsed.
    pub async fn inject_tick(&self, symbol: &str, quote: f64) {
        self.inner.process_tick(symbol, quote).await;
    }
}

impl Inner {
    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn next_quote(&self, symbol: &str) -> f64 {
        let current = self
            .ledger
            .read()
            .await
            .markets
            .get(symbol)
            .map_or(START_QUOTE, |m| m.quote);
        let step = self.rng.lock().await.gen_range(-MAX_STEP..MAX_STEP);
        (current * (1.0 + step)).max(1.0)
    }

    async fn process_tick(&self, symbol: &str, quote: f64) {
        let mut guard = self.ledger.write().await;
        let ledger = &mut *guard;

        let market = ledger
            .markets
            .entry(symbol.to_string())
            .or_insert_with(Market::new);
        market.quote = quote;
        let tick = RawTick {
            symbol: symbol.to_string(),
            epoch: Utc::now().timestamp(),
            quote,
        };
        market.record(tick.clone());
        market.subscribers.retain(|_, sink| match sink.try_send(tick.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(symbol, "Tick subscriber lagging, dropping tick");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        let digit = last_digit(quote);
        for (contract_id, contract) in ledger.contracts.iter_mut() {
            if contract.symbol != symbol || contract.outcome.is_some() {
                continue;
            }
            contract.ticks_left = contract.ticks_left.saturating_sub(1);
            if contract.ticks_left > 0 {
                continue;
            }

            let won = digit_contract_wins(contract.contract_type, contract.barrier, digit);
            let (status, profit) = if won {
                ledger.balance += contract.payout;
                (ContractStatus::Won, round_cents(contract.payout - contract.buy_price))
            } else {
                (ContractStatus::Lost, -contract.buy_price)
            };
            let update = ContractUpdate {
                contract_id: contract_id.clone(),
                status,
                profit: Some(profit),
                exit_tick: Some(quote),
            };
            info!(
                contract = %contract_id,
                contract_type = %contract.contract_type,
                exit_digit = digit,
                won,
                profit,
                "Paper contract settled"
            );
            for sink in contract.watchers.values() {
                let _ = sink.try_send(update.clone());
            }
            contract.outcome = Some(update);
            contract.settled_at = Some(Instant::now());
        }

        let now = Instant::now();
        let before = ledger.contracts.len();
        ledger.contracts.retain(|_, c| !c.is_stale(now));
        let pruned = before - ledger.contracts.len();
        if pruned > 0 {
            debug!(pruned, open = ledger.contracts.len(), "Pruned settled paper contracts");
        }
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn connect(&self) -> Result<()> {
        debug!("Paper broker connect (no-op)");
        Ok(())
    }

    fn is_authorized(&self) -> bool {
        true
    }

    async fn subscribe_ticks(
        &self,
        symbol: &str,
        sink: mpsc::Sender<RawTick>,
    ) -> Result<SubscriptionId> {
        let id = self.inner.next_id("ticks");
        let mut ledger = self.inner.ledger.write().await;
        ledger
            .subscriptions
            .insert(id.clone(), Subscription::Ticks(symbol.to_string()));

        let market = ledger
            .markets
            .entry(symbol.to_string())
            .or_insert_with(Market::new);
        market.subscribers.insert(id.clone(), sink);

        if market.feed.is_none() {
            if let Some(every) = self.inner.tick_interval {
                market.feed = Some(tokio::spawn(run_feed(
                    self.inner.clone(),
                    symbol.to_string(),
                    every,
                )));
                info!(symbol, interval_ms = every.as_millis() as u64, "Paper feed started");
            }
        }
        Ok(id)
    }

    /// Ticks this market has printed. With a feed running, any shortfall is
    /// filled by walking the random walk backwards from the oldest known
    /// quote, and the filled ticks are kept so later requests agree.
    async fn ticks_history(&self, symbol: &str, count: usize) -> Result<Vec<RawTick>> {
        let mut ledger = self.inner.ledger.write().await;
        let market = ledger
            .markets
            .entry(symbol.to_string())
            .or_insert_with(Market::new);

        let wanted = count.min(HISTORY_CAPACITY);
        if let Some(every) = self.inner.tick_interval {
            let missing = wanted.saturating_sub(market.history.len());
            if missing > 0 {
                let (mut quote, mut epoch) = market
                    .history
                    .front()
                    .map_or((market.quote, Utc::now().timestamp()), |t| (t.quote, t.epoch));
                let spacing = every.as_secs().max(1) as i64;
                let mut rng = self.inner.rng.lock().await;
                for _ in 0..missing {
                    quote = (quote / (1.0 + rng.gen_range(-MAX_STEP..MAX_STEP))).max(1.0);
                    epoch -= spacing;
                    market.history.push_front(RawTick {
                        symbol: symbol.to_string(),
                        epoch,
                        quote,
                    });
                }
                debug!(symbol, filled = missing, "Synthesized paper tick history");
            }
        }

        let skip = market.history.len().saturating_sub(wanted);
        Ok(market.history.iter().skip(skip).cloned().collect())
    }

    async fn get_proposal(&self, request: &ProposalRequest) -> Result<Proposal> {
        if !(request.amount.is_finite() && request.amount > 0.0) {
            return Err(Error::Proposal(format!("invalid stake {}", request.amount)));
        }
        if request.duration == 0 {
            return Err(Error::Proposal("duration must be at least one tick".into()));
        }
        let barrier = validate_barrier(request.contract_type, request.barrier.as_deref())?;

        let ask_price = round_cents(request.amount);
        let payout = round_cents(request.amount * (1.0 + self.inner.payout_ratio));
        let id = self.inner.next_id("proposal");
        let mut ledger = self.inner.ledger.write().await;
        ledger
            .proposals
            .retain(|_, p| p.created_at.elapsed() < PROPOSAL_TTL);
        ledger.proposals.insert(
            id.clone(),
            PendingProposal {
                request: request.clone(),
                barrier,
                ask_price,
                payout,
                created_at: Instant::now(),
            },
        );
        debug!(proposal = %id, contract_type = %request.contract_type, ask_price, payout, "Paper proposal");
        Ok(Proposal {
            id,
            ask_price,
            payout,
        })
    }

    async fn buy_contract(&self, proposal_id: &str, price: f64) -> Result<BuyReceipt> {
        let mut ledger = self.inner.ledger.write().await;
        let proposal = ledger
            .proposals
            .remove(proposal_id)
            .ok_or_else(|| Error::Buy(format!("unknown or expired proposal {proposal_id}")))?;
        if proposal.created_at.elapsed() >= PROPOSAL_TTL {
            return Err(Error::Buy(format!("proposal {proposal_id} expired")));
        }
        if price < proposal.ask_price {
            return Err(Error::Buy(format!(
                "price {price} below ask {}",
                proposal.ask_price
            )));
        }
        if proposal.ask_price > ledger.balance {
            return Err(Error::Buy(format!(
                "InsufficientBalance: {:.2} available",
                ledger.balance
            )));
        }

        ledger.balance -= proposal.ask_price;
        let contract_id = self.inner.next_id("contract");
        ledger.contracts.insert(
            contract_id.clone(),
            Contract {
                symbol: proposal.request.symbol.clone(),
                contract_type: proposal.request.contract_type,
                barrier: proposal.barrier,
                buy_price: proposal.ask_price,
                payout: proposal.payout,
                ticks_left: proposal.request.duration,
                outcome: None,
                settled_at: None,
                watchers: HashMap::new(),
            },
        );
        info!(
            contract = %contract_id,
            contract_type = %proposal.request.contract_type,
            stake = proposal.ask_price,
            balance = ledger.balance,
            "Paper contract bought"
        );
        Ok(BuyReceipt {
            contract_id,
            buy_price: proposal.ask_price,
        })
    }

    async fn subscribe_open_contract(
        &self,
        contract_id: &str,
        sink: mpsc::Sender<ContractUpdate>,
    ) -> Result<SubscriptionId> {
        let id = self.inner.next_id("poc");
        let mut ledger = self.inner.ledger.write().await;
        let contract = ledger
            .contracts
            .get_mut(contract_id)
            .ok_or_else(|| Error::Broker {
                code: "InvalidContractId".into(),
                message: format!("unknown contract {contract_id}"),
            })?;

        let current = contract
            .outcome
            .clone()
            .unwrap_or_else(|| contract.open_update(contract_id));
        let _ = sink.try_send(current);
        contract.watchers.insert(id.clone(), sink);
        ledger
            .subscriptions
            .insert(id.clone(), Subscription::Contract(contract_id.to_string()));
        Ok(id)
    }

    async fn forget(&self, subscription_id: &str) -> Result<()> {
        let mut ledger = self.inner.ledger.write().await;
        match ledger.subscriptions.remove(subscription_id) {
            Some(Subscription::Ticks(symbol)) => {
                if let Some(market) = ledger.markets.get_mut(&symbol) {
                    market.subscribers.remove(subscription_id);
                    if market.subscribers.is_empty() {
                        if let Some(feed) = market.feed.take() {
                            feed.abort();
                            info!(symbol = %symbol, "Paper feed stopped");
                        }
                    }
                }
            }
            Some(Subscription::Contract(contract_id)) => {
                if let Some(contract) = ledger.contracts.get_mut(&contract_id) {
                    contract.watchers.remove(subscription_id);
                }
            }
            None => debug!(subscription = subscription_id, "Forget for unknown subscription"),
        }
        Ok(())
    }
}

async fn run_feed(inner: Arc<Inner>, symbol: String, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        let quote = inner.next_quote(&symbol).await;
        inner.process_tick(&symbol, quote).await;
    }
}

/// Whether a digit contract wins given the exit digit.
pub fn digit_contract_wins(contract_type: ContractType, barrier: Option<u8>, exit_digit: u8) -> bool {
    match contract_type {
        ContractType::DigitEven => exit_digit % 2 == 0,
        ContractType::DigitOdd => exit_digit % 2 == 1,
        ContractType::DigitOver => barrier.is_some_and(|b| exit_digit > b),
        ContractType::DigitUnder => barrier.is_some_and(|b| exit_digit < b),
        ContractType::DigitDiff => barrier.is_some_and(|b| exit_digit != b),
    }
}

fn validate_barrier(contract_type: ContractType, barrier: Option<&str>) -> Result<Option<u8>> {
    let parsed = match barrier {
        None => None,
        Some(raw) => match raw.trim().parse::<u8>() {
            Ok(d) if d <= 9 => Some(d),
            _ => return Err(Error::Proposal(format!("invalid barrier '{raw}'"))),
        },
    };
    match (contract_type, parsed) {
        (ContractType::DigitEven | ContractType::DigitOdd, _) => Ok(None),
        (_, None) => Err(Error::Proposal(format!("{contract_type} requires a barrier"))),
        (ContractType::DigitOver, Some(b @ 9)) | (ContractType::DigitUnder, Some(b @ 0)) => Err(
            Error::Proposal(format!("barrier {b} cannot win for {contract_type}")),
        ),
        (_, digit) => Ok(digit),
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
