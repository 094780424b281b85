use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use common::{
    BrokerClient, ContractSignal, ContractUpdate, ProposalRequest, Result, SubscriptionId,
    TradeLog, TradeResult,
};

/// Everything needed to place one contract for a strategy.
#[derive(Debug, Clone)]
pub struct TradeTicket {
    pub strategy_id: String,
    pub signal: ContractSignal,
    pub stake: f64,
    pub ticks: u32,
    pub symbol: String,
    /// Last digit seen when the evaluator fired.
    pub entry_digit: Option<u8>,
}

/// A bought contract and the subscription watching it.
#[derive(Debug, Clone)]
pub struct Submission {
    pub trade: TradeLog,
    /// `None` when the contract could not be watched; the settlement
    /// deadline then resolves it.
    pub subscription_id: Option<SubscriptionId>,
}

/// Turns an evaluator signal into a bought contract: proposal, buy, then a
/// subscription that streams the contract's lifecycle into the settlement
/// sink.
///
/// This is the ONLY component that calls `BrokerClient::buy_contract`.
/// Failures are returned as-is; retry policy belongs to the lifecycle.
pub struct TradeExecutor {
    broker: Arc<dyn BrokerClient>,
}

impl TradeExecutor {
    pub fn new(broker: Arc<dyn BrokerClient>) -> Self {
        Self { broker }
    }

    pub async fn execute(
        &self,
        ticket: &TradeTicket,
        settlements: mpsc::Sender<ContractUpdate>,
    ) -> Result<Submission> {
        let request = ProposalRequest::stake_in_ticks(
            round_stake(ticket.stake),
            &ticket.signal,
            ticket.ticks,
            ticket.symbol.clone(),
        );
        info!(
            strategy = %ticket.strategy_id,
            contract_type = %request.contract_type,
            barrier = ?request.barrier,
            stake = request.amount,
            "Requesting proposal"
        );

        let proposal = self.broker.get_proposal(&request).await?;
        let receipt = self
            .broker
            .buy_contract(&proposal.id, proposal.ask_price)
            .await?;

        let trade = TradeLog {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            strategy_id: ticket.strategy_id.clone(),
            contract_id: receipt.contract_id.clone(),
            proposal_id: proposal.id.clone(),
            contract_type: ticket.signal.contract_type,
            barrier: ticket.signal.barrier.clone(),
            buy_price: receipt.buy_price,
            payout: proposal.payout,
            entry_tick: ticket.entry_digit,
            result: TradeResult::Pending,
            profit: 0.0,
            exit_tick: None,
        };
        info!(
            strategy = %ticket.strategy_id,
            contract_id = %trade.contract_id,
            buy_price = trade.buy_price,
            payout = trade.payout,
            "Contract bought"
        );

        let subscription_id = match self
            .broker
            .subscribe_open_contract(&trade.contract_id, settlements)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(contract_id = %trade.contract_id, error = %e, "Could not watch contract");
                None
            }
        };

        Ok(Submission {
            trade,
            subscription_id,
        })
    }
}

/// Broker stakes are quoted in cents.
pub fn round_stake(stake: f64) -> f64 {
    (stake * 100.0).round() / 100.0
}
