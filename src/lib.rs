pub mod arbitrage;
pub mod config;
pub mod context;
pub mod error;
pub mod feed;
pub mod identity;
pub mod market_data;
pub mod persist;
pub mod rate_limit;
pub mod registry;
pub mod telemetry;
pub mod trading;
pub mod usage;

pub use context::GatewayContext;
pub use error::{GatewayError, GatewayResult};
