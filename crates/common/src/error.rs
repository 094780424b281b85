use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Socket not open, closed unexpectedly, or a request went unanswered.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Broker rejected the contract specification.
    #[error("Proposal rejected: {0}")]
    Proposal(String),

    /// Proposal expired, insufficient balance, or other purchase failure.
    #[error("Buy failed: {0}")]
    Buy(String),

    #[error("Settlement timed out for contract {contract_id} after {waited_secs}s")]
    SettlementTimeout { contract_id: String, waited_secs: u64 },

    /// Application-level error returned by the broker for any other call.
    #[error("Broker error [{code}]: {message}")]
    Broker { code: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Strategy {0} is disabled")]
    StrategyDisabled(String),

    #[error("Strategy {0} is already running")]
    AlreadyRunning(String),

    #[error("Cannot {action} strategy {id} while it is {state}")]
    InvalidTransition {
        id: String,
        action: String,
        state: String,
    },

    #[error("Broker session is not authorized")]
    NotAuthorized,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

