//! Money management for strategy sessions: martingale stake progression,
//! take-profit / stop-loss limits and the consecutive-error restart policy.

pub mod martingale;
pub mod restart;
pub mod session;

pub use martingale::MartingaleController;
pub use restart::{ErrorTracker, RestartDecision, MAX_CONSECUTIVE_ERRORS};
pub use session::{SessionGuard, SessionLimits};
