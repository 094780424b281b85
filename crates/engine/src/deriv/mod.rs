pub mod client;
pub mod messages;
pub mod throttle;

pub use client::{DerivClient, DerivSettings};
