use common::{ContractStatus, ContractUpdate, TradeLog, TradeResult};

/// Final outcome of a contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settlement {
    pub result: TradeResult,
    pub profit: f64,
    pub exit_tick: Option<f64>,
}

impl Settlement {
    pub fn is_win(&self) -> bool {
        self.result == TradeResult::Win
    }
}

/// Resolve a contract update against the trade it belongs to.
/// Returns `None` while the contract is still open.
///
/// A win books the broker's profit (payout minus price when absent). A loss
/// books the broker's negative profit, or the full buy price. A contract
/// sold before expiry is a win only if it sold at a profit.
pub fn resolve(update: &ContractUpdate, trade: &TradeLog) -> Option<Settlement> {
    let (result, profit) = match update.status {
        ContractStatus::Open => return None,
        ContractStatus::Won => (
            TradeResult::Win,
            update.profit.unwrap_or(trade.payout - trade.buy_price),
        ),
        ContractStatus::Lost => (TradeResult::Loss, loss_amount(update.profit, trade)),
        ContractStatus::Sold => match update.profit {
            Some(p) if p > 0.0 => (TradeResult::Win, p),
            Some(p) => (TradeResult::Loss, p),
            None => (TradeResult::Loss, -trade.buy_price),
        },
    };
    Some(Settlement {
        result,
        profit,
        exit_tick: update.exit_tick,
    })
}

fn loss_amount(reported: Option<f64>, trade: &TradeLog) -> f64 {
    match reported {
        Some(p) if p < 0.0 => p,
        _ => -trade.buy_price,
    }
}
