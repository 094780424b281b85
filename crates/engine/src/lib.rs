pub mod deriv;
pub mod executor;
pub mod instance;
pub mod lifecycle;
pub mod settlement;

pub use deriv::{DerivClient, DerivSettings};
pub use executor::{TradeExecutor, TradeTicket};
pub use instance::{StrategySnapshot, ANALYSIS_INTERVAL};
pub use lifecycle::StrategyManager;
