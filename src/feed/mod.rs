pub mod aggregator;
pub mod canary;
pub mod odds;

pub use aggregator::{ChannelSubscriber, FeedAggregator, FeedQuery, FeedSubscriber, MarketSnapshot, SubscriptionId};
pub use canary::{CanaryGenerator, CanaryMarket};
pub use odds::{FeedResponse, MarketOdds};
