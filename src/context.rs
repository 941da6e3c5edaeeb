//! Process-wide wiring: stores, registry, limiter, pipeline, feed.
//!
//! Callers holding an [`Identity`] go through the guarded methods here so every trade or read
//! spends the right rate-limit tokens before any venue is contacted.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::arbitrage::{ArbitrageOpportunity, ArbitrageScanner};
use crate::config::Settings;
use crate::error::GatewayResult;
use crate::feed::FeedAggregator;
use crate::identity::Identity;
use crate::market_data::fees::FeeTable;
use crate::persist::{MemoryStore, Position, PositionFilter, PositionStore, PostgresStore, TradeStore, UsageStore};
use crate::rate_limit::RateLimiterStore;
use crate::registry::VenueRegistry;
use crate::trading::{ExecuteResponse, PositionLedger, PrepareResponse, PricedQuote, TradePipeline, TradeRequest};
use crate::usage::{UsageSummary, UsageTracker};

pub struct GatewayContext {
    pub settings: Settings,
    pub registry: Arc<VenueRegistry>,
    pub rate_limiter: RateLimiterStore,
    pub fees: Arc<FeeTable>,
    pub pipeline: TradePipeline,
    pub positions: PositionLedger,
    pub usage: UsageTracker,
    pub arbitrage: ArbitrageScanner,
    pub feed: Arc<FeedAggregator>,
}

impl GatewayContext {
    /// Postgres when `database_url` is set, in-memory stores otherwise.
    pub async fn build(settings: Settings) -> GatewayResult<Self> {
        match settings.database_url.clone() {
            Some(url) => {
                let store = Arc::new(PostgresStore::connect(&url).await?);
                Ok(Self::with_stores(settings, store.clone(), store.clone(), store))
            }
            None => {
                info!("no database_url configured, using in-memory stores");
                Ok(Self::in_memory(settings))
            }
        }
    }

    pub fn in_memory(settings: Settings) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::with_stores(settings, store.clone(), store.clone(), store)
    }

    pub fn with_stores(
        settings: Settings,
        trades: Arc<dyn TradeStore>,
        positions: Arc<dyn PositionStore>,
        usage: Arc<dyn UsageStore>,
    ) -> Self {
        let registry = Arc::new(VenueRegistry::new(&settings));
        let fees = Arc::new(FeeTable::from_settings(&settings));
        let positions = PositionLedger::new(positions);
        let pipeline = TradePipeline::new(
            registry.clone(),
            trades.clone(),
            positions.clone(),
            fees.clone(),
            settings.require_trade_persistence,
        );
        let feed = Arc::new(FeedAggregator::new(registry.clone(), &settings.feed));

        Self {
            rate_limiter: RateLimiterStore::new(settings.rate_limit.period),
            usage: UsageTracker::new(usage, trades),
            arbitrage: ArbitrageScanner::new(registry.clone()),
            registry,
            fees,
            pipeline,
            positions,
            feed,
            settings,
        }
    }

    pub async fn start(&self) {
        self.registry.initialize_all().await;
        info!(venues = self.registry.len(), "gateway started");
    }

    pub async fn shutdown(&self) {
        self.registry.close_all().await;
        info!("gateway stopped");
    }

    pub async fn quote(&self, identity: &Identity, req: &TradeRequest) -> GatewayResult<PricedQuote> {
        self.rate_limiter.check_trade(identity)?;
        self.pipeline.quote(req).await
    }

    pub async fn prepare(&self, identity: &Identity, req: &TradeRequest, wallet_address: &str) -> GatewayResult<PrepareResponse> {
        self.rate_limiter.check_trade(identity)?;
        self.pipeline.prepare(identity, req, wallet_address).await
    }

    pub async fn execute(
        &self,
        identity: &Identity,
        req: &TradeRequest,
        wallet_address: &str,
        private_key: &str,
    ) -> GatewayResult<ExecuteResponse> {
        self.rate_limiter.check_trade(identity)?;
        self.pipeline.execute(identity, req, wallet_address, private_key).await
    }

    pub async fn positions(
        &self,
        identity: &Identity,
        filter: &PositionFilter,
        limit: usize,
        offset: usize,
    ) -> GatewayResult<Vec<Position>> {
        self.rate_limiter.check_request(identity)?;
        Ok(self.positions.list(identity.key_id, filter, limit, offset).await?)
    }

    pub async fn arbitrage(
        &self,
        identity: &Identity,
        min_spread: Option<Decimal>,
        limit: Option<usize>,
    ) -> GatewayResult<Vec<ArbitrageOpportunity>> {
        self.rate_limiter.check_request(identity)?;
        Ok(self.arbitrage.scan(min_spread, limit).await)
    }

    /// Usage is read across every key of the caller's account.
    pub async fn usage(&self, identity: &Identity, account_key_ids: &[Uuid]) -> GatewayResult<UsageSummary> {
        self.rate_limiter.check_request(identity)?;
        self.usage.current_usage(account_key_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::market_data::types::{Outcome, Side, VenueSlug};
    use crate::persist::{PositionKey, PositionStatus};
    use crate::rate_limit::LimitClass;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn context() -> GatewayContext {
        let mut settings = Settings::default();
        settings.rate_limit.period = Duration::from_secs(60);
        GatewayContext::in_memory(settings)
    }

    fn request(amount: Decimal) -> TradeRequest {
        TradeRequest {
            venue: "nowhere".into(),
            market_id: "m".into(),
            outcome: Outcome::Yes,
            side: Side::Buy,
            amount,
        }
    }

    #[test]
    fn test_wires_every_venue() {
        let ctx = context();
        assert_eq!(ctx.registry.len(), 5);
        assert_eq!(ctx.feed.venues(), ctx.settings.feed.venues.as_slice());
        assert_eq!(ctx.fees.fee_bps, ctx.settings.fees.platform_fee_bps);
    }

    #[tokio::test]
    async fn test_trade_limit_checked_before_pipeline() {
        let ctx = context();
        let identity = Identity::new(Uuid::new_v4(), Uuid::new_v4(), 100, 1);

        // First call spends the only trade token, then fails on the unknown venue.
        let first = ctx.quote(&identity, &request(dec!(1))).await;
        assert!(matches!(first, Err(GatewayError::VenueNotFound(_))));

        let second = ctx.quote(&identity, &request(dec!(1))).await;
        assert!(matches!(
            second,
            Err(GatewayError::RateLimitExceeded { class: LimitClass::Trade, .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_request_rate_blocks_reads() {
        let ctx = context();
        let identity = Identity::new(Uuid::new_v4(), Uuid::new_v4(), 0, 10);
        let err = ctx
            .positions(&identity, &PositionFilter::default(), 10, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RateLimitExceeded { class: LimitClass::Request, .. }));
    }

    #[tokio::test]
    async fn test_positions_scoped_to_caller() {
        let ctx = context();
        let identity = Identity::new(Uuid::new_v4(), Uuid::new_v4(), 100, 10);
        let key = PositionKey {
            key_id: identity.key_id,
            wallet_address: "0xabc".into(),
            venue: VenueSlug::Limitless,
            market_id: "m1".into(),
            outcome: Outcome::Yes,
        };
        ctx.positions
            .record_fill(&key, Side::Buy, dec!(10), dec!(0.5), None)
            .await
            .unwrap();

        let mine = ctx.positions(&identity, &PositionFilter::default(), 10, 0).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].status, PositionStatus::Open);

        let other = Identity::new(Uuid::new_v4(), Uuid::new_v4(), 100, 10);
        assert!(ctx.positions(&other, &PositionFilter::default(), 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_usage_counts_logged_requests() {
        let ctx = context();
        let identity = Identity::new(Uuid::new_v4(), Uuid::new_v4(), 100, 10);
        ctx.usage
            .log_request(&identity, "/markets", "GET", 200, Some(12))
            .await
            .unwrap();
        let summary = ctx.usage(&identity, &[identity.key_id]).await.unwrap();
        assert_eq!(summary.total_requests, 1);
        assert_eq!(summary.total_trades, 0);
    }
}
