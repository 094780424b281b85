use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use common::{
    BrokerClient, BuyReceipt, Config, ContractUpdate, Error, Proposal, ProposalRequest, RawTick,
    Result, SubscriptionId,
};

use super::messages;
use super::throttle::{TickThrottle, DEFAULT_TICK_THROTTLE};

/// Timing knobs for the Deriv connection.
#[derive(Debug, Clone)]
pub struct DerivSettings {
    /// How long a request waits for its correlated reply.
    pub request_timeout: Duration,
    pub tick_throttle: Duration,
    /// Pace at which messages queued while disconnected are sent once open.
    pub queue_flush_interval: Duration,
    pub keepalive_interval: Duration,
}

impl Default for DerivSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            tick_throttle: DEFAULT_TICK_THROTTLE,
            queue_flush_interval: Duration::from_millis(500),
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

/// Live broker client over the Deriv WebSocket API.
///
/// One socket is shared by every strategy. Tick subscriptions are
/// deduplicated per symbol: strategies watching the same market share a
/// single upstream stream, and the upstream `forget` is only sent once the
/// last local subscriber is released. Requests are correlated with replies
/// by `req_id`.
///
/// When the socket drops, pending requests fail with `Error::Connection`
/// and every subscriber channel is closed. The next `connect()` opens a
/// fresh socket and re-authorizes.
#[derive(Clone)]
pub struct DerivClient {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: String,
    api_token: Option<String>,
    settings: DerivSettings,
    next_req_id: AtomicU64,
    authorized: AtomicBool,
    connect_lock: Mutex<()>,
    session: Mutex<Session>,
}

struct TickStream {
    requested: bool,
    upstream_id: Option<String>,
    throttle: TickThrottle,
    sinks: HashMap<SubscriptionId, mpsc::Sender<RawTick>>,
}

struct ContractStream {
    upstream_id: Option<String>,
    sink: mpsc::Sender<ContractUpdate>,
}

enum LocalSub {
    Ticks(String),
    Contract(String),
}

#[derive(Default)]
struct Session {
    writer: Option<mpsc::UnboundedSender<String>>,
    /// Outbound messages produced while the socket was not open.
    queue: VecDeque<String>,
    pending: HashMap<u64, oneshot::Sender<Result<Value>>>,
    tick_streams: HashMap<String, TickStream>,
    contracts: HashMap<String, ContractStream>,
    local: HashMap<SubscriptionId, LocalSub>,
}

impl DerivClient {
    pub fn new(endpoint: impl Into<String>, api_token: Option<String>) -> Self {
        Self::with_settings(endpoint, api_token, DerivSettings::default())
    }

    pub fn with_settings(
        endpoint: impl Into<String>,
        api_token: Option<String>,
        settings: DerivSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.into(),
                api_token,
                settings,
                next_req_id: AtomicU64::new(1),
                authorized: AtomicBool::new(false),
                connect_lock: Mutex::new(()),
                session: Mutex::new(Session::default()),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.deriv_endpoint(), config.deriv_api_token.clone())
    }

    async fn open_socket(&self) -> Result<()> {
        let url = Url::parse(&self.inner.endpoint).map_err(|e| Error::Connection(e.to_string()))?;
        info!(endpoint = %self.inner.endpoint, "Connecting to Deriv WebSocket");

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        // ── Writer: outbound messages plus keepalive pings ───────────────
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let keepalive = self.inner.settings.keepalive_interval;
        tokio::spawn(async move {
            let mut ping = tokio::time::interval(keepalive);
            ping.tick().await;
            loop {
                let text = tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(text) => text,
                        None => break,
                    },
                    _ = ping.tick() => messages::ping().to_string(),
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(error = %e, "Deriv write failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        self.inner.session.lock().await.writer = Some(tx);

        // ── Reader: replies and subscription pushes ──────────────────────
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => inner.dispatch(&text).await,
                    Ok(Message::Close(frame)) => {
                        info!(?frame, "Deriv closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Deriv read failed");
                        break;
                    }
                }
            }
            inner.on_disconnect().await;
        });

        self.spawn_queue_flush();
        Ok(())
    }

    fn spawn_queue_flush(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.settings.queue_flush_interval);
            loop {
                interval.tick().await;
                let mut session = inner.session.lock().await;
                if !session.is_open() {
                    break;
                }
                let Some(text) = session.queue.pop_front() else {
                    break;
                };
                debug!(remaining = session.queue.len(), "Flushing queued Deriv message");
                session.send(text);
            }
        });
    }
}

impl Inner {
    fn stamp(&self, payload: &mut Value) -> u64 {
        let id = self.next_req_id.fetch_add(1, Ordering::Relaxed);
        payload["req_id"] = Value::from(id);
        id
    }

    /// Send `payload` and wait for the reply carrying the same `req_id`.
    async fn request(&self, mut payload: Value) -> Result<Value> {
        let id = self.stamp(&mut payload);
        let (tx, rx) = oneshot::channel();
        {
            let mut session = self.session.lock().await;
            session.pending.insert(id, tx);
            session.send(payload.to_string());
        }

        match tokio::time::timeout(self.settings.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(Error::Connection("connection closed before reply".into())),
            Err(_) => {
                self.session.lock().await.pending.remove(&id);
                Err(Error::Connection(format!(
                    "request {id} timed out after {:?}",
                    self.settings.request_timeout
                )))
            }
        }
    }

    /// Send without waiting for a reply. Dropped when the socket is down.
    async fn notify(&self, mut payload: Value) {
        self.stamp(&mut payload);
        let mut session = self.session.lock().await;
        if session.is_open() {
            session.send(payload.to_string());
        }
    }

    async fn dispatch(&self, text: &str) {
        let msg: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Unparseable Deriv message");
                return;
            }
        };

        let mut session = self.session.lock().await;

        let waiter = messages::req_id(&msg).and_then(|id| session.pending.remove(&id));
        match (waiter, messages::broker_error(&msg)) {
            (Some(waiter), Some(err)) => {
                let _ = waiter.send(Err(err));
                return;
            }
            (Some(waiter), None) => {
                let _ = waiter.send(Ok(msg.clone()));
            }
            (None, Some(err)) => {
                warn!(error = %err, msg_type = ?messages::msg_type(&msg), "Unsolicited Deriv error");
                return;
            }
            (None, None) => {}
        }

        match messages::msg_type(&msg) {
            Some("tick") => session.route_tick(&msg),
            Some("proposal_open_contract") => session.route_contract(&msg),
            _ => {}
        }
    }

    async fn on_disconnect(&self) {
        self.authorized.store(false, Ordering::SeqCst);
        let mut session = self.session.lock().await;
        session.writer = None;
        session.queue.clear();

        let failed = session.pending.len();
        for (_, waiter) in session.pending.drain() {
            let _ = waiter.send(Err(Error::Connection("connection lost".into())));
        }

        // Dropping the sinks closes every subscriber's channel.
        let streams = session.tick_streams.len() + session.contracts.len();
        session.tick_streams.clear();
        session.contracts.clear();
        session.local.clear();

        warn!(
            pending_failed = failed,
            streams_closed = streams,
            "Deriv connection lost"
        );
    }
}

impl Session {
    fn is_open(&self) -> bool {
        self.writer.as_ref().is_some_and(|w| !w.is_closed())
    }

    fn send(&mut self, text: String) {
        match &self.writer {
            Some(writer) if !writer.is_closed() => {
                if let Err(e) = writer.send(text) {
                    self.queue.push_back(e.0);
                }
            }
            _ => self.queue.push_back(text),
        }
    }

    fn route_tick(&mut self, msg: &Value) {
        let Some(tick) = messages::parse_tick(msg) else {
            return;
        };
        let Some(stream) = self.tick_streams.get_mut(&tick.symbol) else {
            return;
        };
        if stream.upstream_id.is_none() {
            stream.upstream_id = messages::subscription_id(msg);
        }
        if !stream.throttle.admit(Instant::now()) {
            return;
        }
        for (id, sink) in &stream.sinks {
            if let Err(mpsc::error::TrySendError::Full(_)) = sink.try_send(tick.clone()) {
                debug!(subscription = %id, symbol = %tick.symbol, "Tick sink full, dropping tick");
            }
        }
    }

    fn route_contract(&mut self, msg: &Value) {
        let Some(update) = messages::parse_open_contract(msg) else {
            return;
        };
        let Some(stream) = self.contracts.get_mut(&update.contract_id) else {
            return;
        };
        if stream.upstream_id.is_none() {
            stream.upstream_id = messages::subscription_id(msg);
        }
        if let Err(e) = stream.sink.try_send(update) {
            debug!(error = %e, "Contract update not delivered");
        }
    }

    fn drop_tick_stream(&mut self, symbol: &str) {
        self.tick_streams.remove(symbol);
        self.local
            .retain(|_, sub| !matches!(sub, LocalSub::Ticks(s) if s == symbol));
    }
}

#[async_trait]
impl BrokerClient for DerivClient {
    async fn connect(&self) -> Result<()> {
        let _guard = self.inner.connect_lock.lock().await;

        let open = self.inner.session.lock().await.is_open();
        if open && (self.inner.api_token.is_none() || self.is_authorized()) {
            return Ok(());
        }
        if !open {
            self.open_socket().await?;
        }

        if let Some(token) = &self.inner.api_token {
            let reply = self
                .inner
                .request(messages::authorize(token))
                .await
                .map_err(|e| Error::Connection(format!("authorization failed: {e}")))?;
            let account = reply["authorize"]["loginid"].as_str().unwrap_or("unknown");
            let balance = reply["authorize"]["balance"].as_f64().unwrap_or_default();
            info!(account, balance, "Deriv session authorized");
            self.inner.authorized.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_authorized(&self) -> bool {
        self.inner.authorized.load(Ordering::SeqCst)
    }

    async fn subscribe_ticks(
        &self,
        symbol: &str,
        sink: mpsc::Sender<RawTick>,
    ) -> Result<SubscriptionId> {
        let local_id = Uuid::new_v4().to_string();
        let first = {
            let mut session = self.inner.session.lock().await;
            session
                .local
                .insert(local_id.clone(), LocalSub::Ticks(symbol.to_string()));
            let throttle = self.inner.settings.tick_throttle;
            let stream = session
                .tick_streams
                .entry(symbol.to_string())
                .or_insert_with(|| TickStream {
                    requested: false,
                    upstream_id: None,
                    throttle: TickThrottle::new(throttle),
                    sinks: HashMap::new(),
                });
            stream.sinks.insert(local_id.clone(), sink);
            !std::mem::replace(&mut stream.requested, true)
        };

        if !first {
            debug!(symbol, subscription = %local_id, "Joined existing tick stream");
            return Ok(local_id);
        }

        match self.inner.request(messages::ticks(symbol)).await {
            Ok(reply) => {
                let mut session = self.inner.session.lock().await;
                if let Some(stream) = session.tick_streams.get_mut(symbol) {
                    if stream.upstream_id.is_none() {
                        stream.upstream_id = messages::subscription_id(&reply);
                    }
                }
                info!(symbol, "Subscribed to ticks");
                Ok(local_id)
            }
            Err(e) => {
                self.inner.session.lock().await.drop_tick_stream(symbol);
                Err(Error::Connection(format!(
                    "tick subscription for {symbol} failed: {e}"
                )))
            }
        }
    }

    async fn ticks_history(&self, symbol: &str, count: usize) -> Result<Vec<RawTick>> {
        let reply = self
            .inner
            .request(messages::ticks_history(symbol, count))
            .await?;
        let ticks = messages::parse_history(symbol, &reply)?;
        debug!(symbol, requested = count, received = ticks.len(), "Fetched tick history");
        Ok(ticks)
    }

    async fn get_proposal(&self, request: &ProposalRequest) -> Result<Proposal> {
        let reply = self
            .inner
            .request(messages::proposal(request))
            .await
            .map_err(|e| match e {
                Error::Broker { code, message } => Error::Proposal(format!("{code}: {message}")),
                other => other,
            })?;
        messages::parse_proposal(&reply)
    }

    async fn buy_contract(&self, proposal_id: &str, price: f64) -> Result<BuyReceipt> {
        let reply = self
            .inner
            .request(messages::buy(proposal_id, price))
            .await
            .map_err(|e| match e {
                Error::Broker { code, message } => Error::Buy(format!("{code}: {message}")),
                other => other,
            })?;
        messages::parse_buy(&reply)
    }

    async fn subscribe_open_contract(
        &self,
        contract_id: &str,
        sink: mpsc::Sender<ContractUpdate>,
    ) -> Result<SubscriptionId> {
        let local_id = Uuid::new_v4().to_string();
        {
            let mut session = self.inner.session.lock().await;
            session
                .local
                .insert(local_id.clone(), LocalSub::Contract(contract_id.to_string()));
            session.contracts.insert(
                contract_id.to_string(),
                ContractStream {
                    upstream_id: None,
                    sink,
                },
            );
        }

        match self.inner.request(messages::open_contract(contract_id)).await {
            Ok(reply) => {
                let mut session = self.inner.session.lock().await;
                if let Some(stream) = session.contracts.get_mut(contract_id) {
                    if stream.upstream_id.is_none() {
                        stream.upstream_id = messages::subscription_id(&reply);
                    }
                }
                debug!(contract_id, "Watching contract");
                Ok(local_id)
            }
            Err(e) => {
                let mut session = self.inner.session.lock().await;
                session.contracts.remove(contract_id);
                session.local.remove(&local_id);
                Err(e)
            }
        }
    }

    async fn forget(&self, subscription_id: &str) -> Result<()> {
        let upstream = {
            let mut session = self.inner.session.lock().await;
            match session.local.remove(subscription_id) {
                Some(LocalSub::Ticks(symbol)) => {
                    let now_empty = session
                        .tick_streams
                        .get_mut(&symbol)
                        .map(|stream| {
                            stream.sinks.remove(subscription_id);
                            stream.sinks.is_empty()
                        })
                        .unwrap_or(false);
                    if now_empty {
                        debug!(symbol = %symbol, "Last tick subscriber gone");
                        session
                            .tick_streams
                            .remove(&symbol)
                            .and_then(|stream| stream.upstream_id)
                    } else {
                        None
                    }
                }
                Some(LocalSub::Contract(contract_id)) => session
                    .contracts
                    .remove(&contract_id)
                    .and_then(|stream| stream.upstream_id),
                None => None,
            }
        };

        if let Some(upstream_id) = upstream {
            self.inner.notify(messages::forget(&upstream_id)).await;
        }
        Ok(())
    }
}
