use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{BrokerClient, Config, StrategyEvent, TradingMode};
use engine::{DerivClient, StrategyManager};
use paper::PaperBroker;
use strategy::{default_roster, StrategyConfig, StrategyFileConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.trading_mode, "DigitBot starting");

    let roster = load_roster(&cfg.strategy_config_path)?;

    // ── Broker (injected based on TRADING_MODE) ───────────────────────────────
    let mut paper = None;
    let broker: Arc<dyn BrokerClient> = match cfg.trading_mode {
        TradingMode::Live => {
            info!(endpoint = %cfg.deriv_endpoint(), "Live trading mode, using DerivClient");
            let client = DerivClient::from_config(&cfg);
            client
                .connect()
                .await
                .context("could not connect to the Deriv API")?;
            Arc::new(client)
        }
        TradingMode::Paper => {
            info!(
                tick_interval_ms = cfg.paper_tick_interval_ms,
                payout_ratio = cfg.paper_payout_ratio,
                "Paper trading mode, using PaperBroker"
            );
            let broker = PaperBroker::new(
                Duration::from_millis(cfg.paper_tick_interval_ms),
                cfg.paper_payout_ratio,
            );
            paper = Some(broker.clone());
            Arc::new(broker)
        }
    };

    // ── Strategies ────────────────────────────────────────────────────────────
    let manager = StrategyManager::new(broker);
    manager.register_all(roster).await?;
    tokio::spawn(log_events(manager.clone()));

    // ── Control API ───────────────────────────────────────────────────────────
    let api_state = api::AppState {
        manager: manager.clone(),
        trading_mode: cfg.trading_mode,
        dashboard_token: cfg.dashboard_token.clone(),
        paper,
    };
    let port = cfg.dashboard_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(error = %e, "Control API stopped");
        }
    });

    // ── Start enabled strategies ──────────────────────────────────────────────
    let failures = manager.start_enabled().await;
    if !failures.is_empty() {
        warn!(count = failures.len(), "Some strategies failed to start");
    }

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutdown signal received. Stopping strategies.");
    manager.stop_all().await;
    Ok(())
}

/// Roster file when present, otherwise the built-in five strategies.
fn load_roster(path: &str) -> anyhow::Result<Vec<StrategyConfig>> {
    if !Path::new(path).exists() {
        info!(path, "No strategy file, using the default roster");
        return Ok(default_roster());
    }
    let configs = StrategyFileConfig::load(path)
        .and_then(StrategyFileConfig::into_configs)
        .with_context(|| format!("invalid strategy file {path}"))?;
    info!(path, count = configs.len(), "Strategy roster loaded");
    Ok(configs)
}

async fn log_events(manager: StrategyManager) {
    let mut events = manager.subscribe_events();
    loop {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(n)) => warn!(dropped = n, "Event logger lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &StrategyEvent) {
    match event {
        StrategyEvent::StateChanged { strategy_id, from, to } => {
            info!(strategy = %strategy_id, %from, %to, "State changed");
        }
        StrategyEvent::TradeOpened { trade } => {
            info!(
                strategy = %trade.strategy_id,
                contract = %trade.contract_id,
                contract_type = %trade.contract_type,
                barrier = trade.barrier.as_deref().unwrap_or("-"),
                stake = trade.buy_price,
                "Trade opened"
            );
        }
        StrategyEvent::TradeSettled { trade, session_profit, next_stake } => {
            info!(
                strategy = %trade.strategy_id,
                contract = %trade.contract_id,
                result = %trade.result,
                profit = trade.profit,
                session_profit,
                next_stake,
                "Trade settled"
            );
        }
        StrategyEvent::TradeTimedOut { trade } => {
            warn!(strategy = %trade.strategy_id, contract = %trade.contract_id, "Trade settlement timed out");
        }
        StrategyEvent::ExecutionFailed { strategy_id, error, consecutive_errors } => {
            warn!(strategy = %strategy_id, %error, consecutive_errors, "Execution failed");
        }
        StrategyEvent::RestartScheduled { strategy_id, delay_secs } => {
            info!(strategy = %strategy_id, delay_secs, "Restart scheduled");
        }
        StrategyEvent::Stopped { strategy_id, reason } => {
            info!(strategy = %strategy_id, %reason, "Strategy stopped");
        }
    }
}
