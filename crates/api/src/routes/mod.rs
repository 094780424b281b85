mod health;
mod strategies;
mod ws;

pub use health::health_router;
pub use strategies::strategy_router;
pub use ws::ws_router;
