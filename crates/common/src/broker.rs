use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{BuyReceipt, ContractUpdate, Proposal, ProposalRequest, RawTick, Result};

/// Opaque handle returned by the subscribe calls, passed back to `forget`.
pub type SubscriptionId = String;

/// Abstraction over the broker connection.
///
/// `DerivClient` implements this for live trading.
/// `PaperBroker` implements this for simulation.
///
/// Push streams are delivered through the `mpsc::Sender` sinks handed to the
/// subscribe calls. Dropping the receiving side is how a subscriber stops
/// listening; `forget` additionally releases the broker-side subscription.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Open (or reuse) the connection and authorize the session.
    async fn connect(&self) -> Result<()>;

    /// Whether the account session is authorized to trade.
    fn is_authorized(&self) -> bool;

    /// Stream ticks for `symbol` into `sink`.
    async fn subscribe_ticks(
        &self,
        symbol: &str,
        sink: mpsc::Sender<RawTick>,
    ) -> Result<SubscriptionId>;

    /// The most recent `count` ticks for `symbol`, oldest first. Used to
    /// fill a strategy's window before live ticks arrive.
    async fn ticks_history(&self, symbol: &str, count: usize) -> Result<Vec<RawTick>>;

    /// Request a price quote for a prospective contract.
    async fn get_proposal(&self, request: &ProposalRequest) -> Result<Proposal>;

    /// Buy the contract behind `proposal_id` at no more than `price`.
    async fn buy_contract(&self, proposal_id: &str, price: f64) -> Result<BuyReceipt>;

    /// Stream lifecycle updates for a bought contract into `sink`.
    async fn subscribe_open_contract(
        &self,
        contract_id: &str,
        sink: mpsc::Sender<ContractUpdate>,
    ) -> Result<SubscriptionId>;

    /// Release a tick or contract subscription.
    async fn forget(&self, subscription_id: &str) -> Result<()>;
}
