pub mod keys;
pub mod pipeline;
pub mod positions;

pub use pipeline::{ExecuteResponse, PrepareResponse, PricedQuote, TradePipeline, TradeRequest};
pub use positions::PositionLedger;
