use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{info, warn};

use common::{
    BrokerClient, Error, Result, StopReason, StrategyEvent, StrategyState, StrategyStats, TradeLog,
};
use strategy::{StrategyConfig, StrategyPatch};

use crate::executor::TradeExecutor;
use crate::instance::{
    limits_of, set_state, supervise, Instance, SessionCommand, SessionContext, SessionControl,
    StrategySnapshot,
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Cloneable handle to the strategy roster, passed to the API and the binary.
///
/// Each registered strategy is an isolated instance with its own tick
/// window, stake progression and session task. Nothing is shared between
/// strategies except the broker connection.
#[derive(Clone)]
pub struct StrategyManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    ctx: SessionContext,
    instances: RwLock<BTreeMap<String, Arc<Instance>>>,
}

impl StrategyManager {
    pub fn new(broker: Arc<dyn BrokerClient>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let executor = Arc::new(TradeExecutor::new(broker.clone()));
        Self {
            inner: Arc::new(ManagerInner {
                ctx: SessionContext {
                    broker,
                    executor,
                    events,
                },
                instances: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    pub fn broker(&self) -> Arc<dyn BrokerClient> {
        self.inner.ctx.broker.clone()
    }

    /// Subscribe to lifecycle and trade events from every strategy.
    pub fn subscribe_events(&self) -> broadcast::Receiver<StrategyEvent> {
        self.inner.ctx.events.subscribe()
    }

    pub async fn register(&self, config: StrategyConfig) -> Result<()> {
        config.validate()?;
        let mut instances = self.inner.instances.write().await;
        if instances.contains_key(&config.id) {
            return Err(Error::Config(format!("duplicate strategy id '{}'", config.id)));
        }
        info!(strategy = %config.id, kind = %config.kind, enabled = config.enabled, "Strategy registered");
        instances.insert(config.id.clone(), Arc::new(Instance::new(config)));
        Ok(())
    }

    pub async fn register_all(&self, configs: impl IntoIterator<Item = StrategyConfig>) -> Result<()> {
        for config in configs {
            self.register(config).await?;
        }
        Ok(())
    }

    /// Apply a partial config update.
    ///
    /// Window length and profit limits take effect immediately. Stake and
    /// martingale parameters are re-bounded only while the strategy is not
    /// running; a running session picks them up on its next start. Market
    /// and kind changes likewise apply from the next start.
    pub async fn update(&self, id: &str, patch: &StrategyPatch) -> Result<StrategySnapshot> {
        let inst = self.get(id).await?;
        let running = inst.is_running().await;

        let mut guard = inst.record.write().await;
        let rec = &mut *guard;
        patch.apply(&mut rec.config)?;
        rec.session.set_limits(limits_of(&rec.config));
        if !running {
            rec.martingale.reconfigure(
                rec.config.stake,
                rec.config.martingale_multiplier,
                rec.config.max_stake,
            );
        }
        info!(strategy = %id, running, "Strategy config updated");
        Ok(rec.snapshot())
    }

    /// Stop (if needed) and unregister a strategy.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.stop(id).await?;
        self.inner.instances.write().await.remove(id);
        info!(strategy = %id, "Strategy removed");
        Ok(())
    }

    pub async fn snapshot(&self, id: &str) -> Result<StrategySnapshot> {
        let inst = self.get(id).await?;
        let snapshot = inst.record.read().await.snapshot();
        Ok(snapshot)
    }

    pub async fn snapshots(&self) -> Vec<StrategySnapshot> {
        let instances: Vec<Arc<Instance>> =
            self.inner.instances.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(instances.len());
        for inst in instances {
            out.push(inst.record.read().await.snapshot());
        }
        out
    }

    /// Trade history, oldest first.
    pub async fn trades(&self, id: &str) -> Result<Vec<TradeLog>> {
        let inst = self.get(id).await?;
        let trades = inst.record.read().await.trades.clone();
        Ok(trades)
    }

    pub async fn stats(&self, id: &str) -> Result<StrategyStats> {
        let inst = self.get(id).await?;
        let stats = inst.record.read().await.stats.clone();
        Ok(stats)
    }

    /// Begin a fresh session: base stake, zero session profit, no error streak.
    pub async fn start(&self, id: &str) -> Result<()> {
        let inst = self.get(id).await?;
        let mut control = inst.control.lock().await;
        if control.as_ref().is_some_and(SessionControl::is_running) {
            return Err(Error::AlreadyRunning(id.to_string()));
        }
        if !inst.record.read().await.config.enabled {
            return Err(Error::StrategyDisabled(id.to_string()));
        }
        if !self.inner.ctx.broker.is_authorized() {
            return Err(Error::NotAuthorized);
        }

        inst.record.write().await.reset_session();

        let (commands, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let task = tokio::spawn(supervise(inst.clone(), self.inner.ctx.clone(), rx));
        *control = Some(SessionControl { commands, task });
        info!(strategy = %id, "Strategy starting");
        Ok(())
    }

    /// Stop a strategy and wait for its session to be torn down.
    /// Stopping a strategy that is not running only clears a parked `Error`.
    ///
    /// The control slot stays locked until the session task has finished, so
    /// a concurrent `start` cannot spawn a second session alongside it.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let inst = self.get(id).await?;
        let mut control = inst.control.lock().await;

        match control.take() {
            Some(running) if running.is_running() => {
                let _ = running.commands.send(SessionCommand::Stop).await;
                if let Err(e) = running.task.await {
                    warn!(strategy = %id, error = %e, "Session task ended abnormally");
                }
            }
            _ => {
                let state = inst.record.read().await.state;
                if state == StrategyState::Error {
                    set_state(&inst, &self.inner.ctx.events, StrategyState::Idle).await;
                    let _ = self.inner.ctx.events.send(StrategyEvent::Stopped {
                        strategy_id: id.to_string(),
                        reason: StopReason::Manual,
                    });
                }
            }
        }
        Ok(())
    }

    pub async fn pause(&self, id: &str) -> Result<()> {
        let inst = self.get(id).await?;
        let state = inst.record.read().await.state;
        if !matches!(state, StrategyState::Analysing | StrategyState::Trading) {
            return Err(invalid(id, "pause", state));
        }
        self.send(&inst, SessionCommand::Pause, "pause").await
    }

    pub async fn resume(&self, id: &str) -> Result<()> {
        let inst = self.get(id).await?;
        let state = inst.record.read().await.state;
        if state != StrategyState::Paused {
            return Err(invalid(id, "resume", state));
        }
        self.send(&inst, SessionCommand::Resume, "resume").await
    }

    /// Start every enabled strategy. Failures are logged and returned.
    pub async fn start_enabled(&self) -> Vec<(String, Error)> {
        let mut failures = Vec::new();
        for snapshot in self.snapshots().await {
            if !snapshot.config.enabled {
                continue;
            }
            let id = snapshot.config.id;
            if let Err(e) = self.start(&id).await {
                warn!(strategy = %id, error = %e, "Could not start strategy");
                failures.push((id, e));
            }
        }
        failures
    }

    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.inner.instances.read().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.stop(&id).await {
                warn!(strategy = %id, error = %e, "Failed to stop strategy");
            }
        }
        info!("All strategies stopped");
    }

    async fn get(&self, id: &str) -> Result<Arc<Instance>> {
        self.inner
            .instances
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownStrategy(id.to_string()))
    }

    async fn send(&self, inst: &Instance, cmd: SessionCommand, action: &str) -> Result<()> {
        let control = inst.control.lock().await;
        match control.as_ref().filter(|c| c.is_running()) {
            Some(c) => c
                .commands
                .send(cmd)
                .await
                .map_err(|_| invalid(&inst.id, action, StrategyState::Idle)),
            None => {
                let state = inst.record.read().await.state;
                Err(invalid(&inst.id, action, state))
            }
        }
    }
}

fn invalid(id: &str, action: &str, state: StrategyState) -> Error {
    Error::InvalidTransition {
        id: id.to_string(),
        action: action.to_string(),
        state: state.to_string(),
    }
}
