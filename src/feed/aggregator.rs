//! Periodic market snapshots across the feed venues, pulled on demand or pushed to subscribers.

use ahash::AHashMap;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::canary::{CanaryGenerator, CanaryMarket};
use super::odds::{
    market_to_metadata, market_to_odds, market_to_resolution, now_ms, orderbook_to_feed, FeedOrderBook, FeedResponse,
    MarketMetadata, MarketOdds, ResolutionStatus, VenueHealth,
};
use crate::config::FeedCfg;
use crate::error::{GatewayError, GatewayResult};
use crate::market_data::adapters::{Adapter, VenueAdapter};
use crate::market_data::types::{Market, Outcome, VenueSlug};
use crate::registry::VenueRegistry;

pub const MAX_LIST_LIMIT: usize = 2000;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("subscriber closed")]
    Closed,
    #[error("send failed: {0}")]
    Transport(String),
}

/// Push side of the feed. A send error marks the subscriber dead and it is dropped.
#[async_trait]
pub trait FeedSubscriber: Send + Sync {
    async fn send(&self, payload: Arc<str>) -> Result<(), SendError>;
}

/// Subscriber backed by a bounded channel. A full channel skips this snapshot; a closed one is dead.
pub struct ChannelSubscriber {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSubscriber {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl FeedSubscriber for ChannelSubscriber {
    async fn send(&self, payload: Arc<str>) -> Result<(), SendError> {
        match self.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("feed subscriber lagging, snapshot skipped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data_timestamp: i64,
    pub markets: Vec<MarketOdds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanaryMarket>,
}

#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    pub venue: Option<String>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub active: Option<bool>,
    pub limit: usize,
    pub offset: usize,
}

pub struct FeedAggregator {
    registry: Arc<VenueRegistry>,
    venues: Vec<VenueSlug>,
    canary: Option<CanaryGenerator>,
    sync_limit: usize,
    broadcast_interval: Duration,
    subscribers: Mutex<AHashMap<SubscriptionId, Arc<dyn FeedSubscriber>>>,
    next_id: AtomicU64,
}

impl FeedAggregator {
    pub fn new(registry: Arc<VenueRegistry>, cfg: &FeedCfg) -> Self {
        Self {
            registry,
            venues: cfg.venues.clone(),
            canary: cfg.canary_enabled.then(|| CanaryGenerator::new(cfg.canary_interval)),
            sync_limit: cfg.sync_limit,
            broadcast_interval: cfg.broadcast_interval,
            subscribers: Mutex::new(AHashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn venues(&self) -> &[VenueSlug] {
        &self.venues
    }

    pub fn canary(&self) -> Option<CanaryMarket> {
        self.canary.as_ref().map(CanaryGenerator::current)
    }

    fn feed_adapter(&self, venue: &str) -> GatewayResult<Arc<Adapter>> {
        let slug: VenueSlug = venue.parse()?;
        if !self.venues.contains(&slug) {
            return Err(GatewayError::VenueNotFound(venue.to_string()));
        }
        self.registry.resolve(venue)
    }

    /// Odds for every active market on every feed venue. Failing venues are skipped.
    pub async fn sync_all_markets(&self) -> Vec<MarketOdds> {
        let fetches = self.venues.iter().map(|&slug| async move {
            let Some(adapter) = self.registry.get(slug) else {
                return Vec::new();
            };
            match adapter.get_markets(self.sync_limit, 0, true).await {
                Ok(markets) => markets.iter().map(market_to_odds).collect(),
                Err(e) => {
                    warn!(venue = %slug, error = %e, "feed sync failed");
                    Vec::new()
                }
            }
        });
        join_all(fetches).await.into_iter().flatten().collect()
    }

    fn with_canary(&self, mut odds: Vec<MarketOdds>) -> Vec<MarketOdds> {
        if let Some(canary) = self.canary() {
            odds.push(MarketOdds::from(&canary));
        }
        odds
    }

    pub async fn sync(&self) -> FeedResponse<Vec<MarketOdds>> {
        let odds = self.sync_all_markets().await;
        FeedResponse::now(self.with_canary(odds))
    }

    pub async fn snapshot(&self) -> MarketSnapshot {
        MarketSnapshot {
            kind: "market_snapshot",
            markets: self.sync_all_markets().await,
            canary: self.canary(),
            data_timestamp: now_ms(),
        }
    }

    /// Filtered listing across feed venues, canary appended, then paged.
    pub async fn list_markets(&self, query: &FeedQuery) -> GatewayResult<FeedResponse<Vec<MarketOdds>>> {
        let limit = query.limit.clamp(1, MAX_LIST_LIMIT);
        let slugs = match &query.venue {
            Some(v) => vec![self.feed_adapter(v)?.slug()],
            None => self.venues.clone(),
        };
        let active_only = query.active.unwrap_or(true);

        let mut odds = Vec::new();
        for slug in slugs {
            let Some(adapter) = self.registry.get(slug) else {
                continue;
            };
            let fetched = match &query.search {
                Some(q) => adapter.search_markets(q, limit).await,
                None => adapter.get_markets(query.offset + limit, 0, active_only).await,
            };
            let markets = match fetched {
                Ok(m) => m,
                Err(e) => {
                    debug!(venue = %slug, error = %e, "feed listing skipped venue");
                    continue;
                }
            };
            odds.extend(
                markets
                    .iter()
                    .filter(|m| category_matches(m, query.category.as_deref()))
                    .map(market_to_odds),
            );
        }

        let odds = self.with_canary(odds);
        let offset = if query.search.is_some() { 0 } else { query.offset };
        let page = odds.into_iter().skip(offset).take(limit).collect();
        Ok(FeedResponse::now(page))
    }

    async fn require_market(&self, venue: &str, market_id: &str) -> GatewayResult<Market> {
        self.feed_adapter(venue)?
            .get_market(market_id)
            .await?
            .ok_or_else(|| GatewayError::market_not_found(venue, market_id))
    }

    pub async fn market(&self, venue: &str, market_id: &str) -> GatewayResult<FeedResponse<MarketOdds>> {
        let m = self.require_market(venue, market_id).await?;
        Ok(FeedResponse::now(market_to_odds(&m)))
    }

    pub async fn metadata(&self, venue: &str, market_id: &str) -> GatewayResult<FeedResponse<MarketMetadata>> {
        let m = self.require_market(venue, market_id).await?;
        Ok(FeedResponse::now(market_to_metadata(&m)))
    }

    pub async fn resolution(&self, venue: &str, market_id: &str) -> GatewayResult<FeedResponse<ResolutionStatus>> {
        let m = self.require_market(venue, market_id).await?;
        Ok(FeedResponse::now(market_to_resolution(&m)))
    }

    pub async fn orderbook(&self, venue: &str, market_id: &str, outcome: Outcome) -> GatewayResult<FeedResponse<FeedOrderBook>> {
        let adapter = self.feed_adapter(venue)?;
        let book = adapter.get_orderbook(market_id, outcome).await?;
        Ok(FeedResponse::now(orderbook_to_feed(&book, adapter.slug())))
    }

    /// One-market health check per feed venue.
    pub async fn venue_status(&self) -> Vec<VenueHealth> {
        let checks = self.venues.iter().map(|&slug| async move {
            let last_check = now_ms();
            let sample = match self.registry.get(slug) {
                Some(adapter) => adapter.get_markets(1, 0, true).await.ok(),
                None => None,
            };
            VenueHealth {
                platform: slug,
                is_healthy: sample.is_some(),
                last_check,
                market_count: sample.map_or(0, |m| m.len()),
            }
        });
        join_all(checks).await
    }

    pub fn subscribe(&self, subscriber: Arc<dyn FeedSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let count = {
            let mut subs = self.subscribers.lock();
            subs.insert(id, subscriber);
            subs.len()
        };
        metrics::gauge!("gateway_feed_subscribers").set(count as f64);
        info!(subscribers = count, "feed subscriber added");
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let (removed, count) = {
            let mut subs = self.subscribers.lock();
            let removed = subs.remove(&id).is_some();
            (removed, subs.len())
        };
        metrics::gauge!("gateway_feed_subscribers").set(count as f64);
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Take a snapshot and push it to every subscriber. Returns how many accepted it.
    /// Subscribers whose send fails are removed.
    pub async fn broadcast_once(&self) -> GatewayResult<usize> {
        let targets: Vec<(SubscriptionId, Arc<dyn FeedSubscriber>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let snapshot = self.snapshot().await;
        let payload: Arc<str> = serde_json::to_string(&snapshot)
            .map_err(|e| GatewayError::Config(format!("snapshot encoding: {e}")))?
            .into();

        let results = join_all(targets.iter().map(|(id, sub)| {
            let payload = payload.clone();
            async move { (*id, sub.send(payload).await) }
        }))
        .await;

        let dead: Vec<SubscriptionId> = results
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| {
                debug!(error = %e, "dropping feed subscriber");
                *id
            }))
            .collect();
        let delivered = results.len() - dead.len();
        if !dead.is_empty() {
            let count = {
                let mut subs = self.subscribers.lock();
                for id in &dead {
                    subs.remove(id);
                }
                subs.len()
            };
            metrics::counter!("gateway_feed_pruned_total").increment(dead.len() as u64);
            metrics::gauge!("gateway_feed_subscribers").set(count as f64);
        }
        metrics::counter!("gateway_feed_broadcasts_total").increment(1);
        debug!(delivered, pruned = dead.len(), markets = snapshot.markets.len(), "feed broadcast");
        Ok(delivered)
    }

    /// Broadcast every interval until `cancel` fires. Never returns an error.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval = ?self.broadcast_interval, venues = self.venues.len(), "feed broadcaster started");
        let mut ticker = tokio::time::interval(self.broadcast_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // A slow venue must not hold shutdown until its fetch times out.
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = self.broadcast_once() => {
                            if let Err(e) = sent {
                                error!(error = %e, "feed broadcast failed");
                            }
                        }
                    }
                }
            }
        }
        info!("feed broadcaster stopped");
    }
}

fn category_matches(m: &Market, category: Option<&str>) -> bool {
    match (category, m.category.as_deref()) {
        (Some(want), Some(have)) => want.eq_ignore_ascii_case(have),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::feed::canary::CANARY_MARKET_ID;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn limitless_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"slug": "btc-100k", "title": "BTC above 100k", "yes_price": "0.62", "category_id": "2"},
                {"slug": "nfl-final", "title": "Chiefs win", "yes_price": "0.48", "category_id": "1"},
                {"slug": "eth-5k", "title": "ETH above 5k", "yes_price": "0.20", "category_id": "2"}
            ])))
            .mount(&server)
            .await;
        server
    }

    fn aggregator(settings: &Settings, canary: bool) -> FeedAggregator {
        let mut cfg = settings.feed.clone();
        cfg.venues = vec![VenueSlug::Limitless, VenueSlug::Opinion];
        cfg.canary_enabled = canary;
        cfg.broadcast_interval = Duration::from_millis(10);
        let registry = VenueRegistry::with_venues(settings, &[VenueSlug::Limitless, VenueSlug::Opinion]);
        FeedAggregator::new(Arc::new(registry), &cfg)
    }

    fn settings(limitless: &MockServer) -> Settings {
        let mut settings = Settings::default();
        settings.limitless.api_url = limitless.uri();
        settings.opinion.api_url = format!("{}/offline", limitless.uri());
        settings
    }

    struct Broken;

    #[async_trait]
    impl FeedSubscriber for Broken {
        async fn send(&self, _payload: Arc<str>) -> Result<(), SendError> {
            Err(SendError::Transport("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn test_sync_appends_canary_and_skips_dead_venue() {
        let server = limitless_server().await;
        let feed = aggregator(&settings(&server), true);

        let resp = feed.sync().await;
        assert_eq!(resp.data.len(), 4);
        assert_eq!(resp.data.last().unwrap().market_id, CANARY_MARKET_ID);
        assert_eq!(resp.data[0].outcomes["yes"], dec!(0.62));

        let without = aggregator(&settings(&server), false).sync().await;
        assert_eq!(without.data.len(), 3);
    }

    #[tokio::test]
    async fn test_listing_filters_and_pages() {
        let server = limitless_server().await;
        let feed = aggregator(&settings(&server), false);

        let crypto = feed
            .list_markets(&FeedQuery {
                category: Some("crypto".into()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(crypto.data.len(), 2);

        let paged = feed
            .list_markets(&FeedQuery {
                venue: Some("limitless".into()),
                limit: 1,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paged.data.len(), 1);
        assert_eq!(paged.data[0].market_id, "nfl-final");

        let outside = feed
            .list_markets(&FeedQuery {
                venue: Some("kalshi".into()),
                limit: 10,
                ..Default::default()
            })
            .await;
        assert!(matches!(outside, Err(GatewayError::VenueNotFound(_))));
    }

    #[tokio::test]
    async fn test_venue_status() {
        let server = limitless_server().await;
        let feed = aggregator(&settings(&server), false);
        let status = feed.venue_status().await;
        assert_eq!(status.len(), 2);
        assert!(status[0].is_healthy);
        assert_eq!(status[0].market_count, 1);
        assert!(!status[1].is_healthy);
    }

    #[tokio::test]
    async fn test_broadcast_prunes_dead_subscribers() {
        let server = limitless_server().await;
        let feed = aggregator(&settings(&server), true);
        assert_eq!(feed.broadcast_once().await.unwrap(), 0);

        let (live, mut rx) = ChannelSubscriber::new(4);
        let (gone, gone_rx) = ChannelSubscriber::new(4);
        drop(gone_rx);
        feed.subscribe(Arc::new(live));
        feed.subscribe(Arc::new(gone));
        feed.subscribe(Arc::new(Broken));
        assert_eq!(feed.subscriber_count(), 3);

        assert_eq!(feed.broadcast_once().await.unwrap(), 1);
        assert_eq!(feed.subscriber_count(), 1);

        let payload: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(payload["type"], "market_snapshot");
        assert_eq!(payload["markets"].as_array().unwrap().len(), 3);
        assert_eq!(payload["canary"]["market_id"], CANARY_MARKET_ID);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let server = limitless_server().await;
        let feed = Arc::new(aggregator(&settings(&server), false));
        let (live, mut rx) = ChannelSubscriber::new(16);
        let id = feed.subscribe(Arc::new(live));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(feed.clone().run(cancel.clone()));
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(first.is_some());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(feed.unsubscribe(id));
        assert!(!feed.unsubscribe(id));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_slow_broadcast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;
        let feed = Arc::new(aggregator(&settings(&server), false));
        let (live, mut rx) = ChannelSubscriber::new(16);
        feed.subscribe(Arc::new(live));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(feed.clone().run(cancel.clone()));
        // Let the first broadcast start and stall on the venue.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
