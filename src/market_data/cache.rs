//! Per-venue market list cache.
//!
//! Readers take the fast path under a read lock. On a miss or expiry, refills go through a
//! single-flight guard: the first caller fetches, the rest wait on the guard and then re-read
//! whatever the first caller stored.

use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::types::Market;
use crate::error::GatewayResult;

struct CacheEntry {
    markets: Arc<Vec<Market>>,
    fetched_at: Instant,
}

pub struct MarketCache {
    ttl: Duration,
    entry: RwLock<Option<CacheEntry>>,
    refresh: Mutex<()>,
}

impl MarketCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    fn fresh(&self) -> Option<Arc<Vec<Market>>> {
        let entry = self.entry.read();
        entry
            .as_ref()
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.markets.clone())
    }

    /// Cached markets regardless of age.
    pub fn peek(&self) -> Option<Arc<Vec<Market>>> {
        self.entry.read().as_ref().map(|e| e.markets.clone())
    }

    pub fn find(&self, market_id: &str) -> Option<Market> {
        self.peek()?.iter().find(|m| m.market_id == market_id).cloned()
    }

    pub fn store(&self, markets: Vec<Market>) -> Arc<Vec<Market>> {
        let markets = Arc::new(markets);
        *self.entry.write() = Some(CacheEntry {
            markets: markets.clone(),
            fetched_at: Instant::now(),
        });
        markets
    }

    /// Drop the cached list; the next read refetches.
    pub fn invalidate(&self) {
        *self.entry.write() = None;
    }

    /// Return fresh cached markets, or run `fetch` once to refill.
    /// A failed refill serves the stale list if one exists, otherwise the error.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> GatewayResult<Arc<Vec<Market>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<Vec<Market>>>,
    {
        if let Some(markets) = self.fresh() {
            return Ok(markets);
        }

        let _guard = self.refresh.lock().await;
        // Someone else may have refilled while we waited.
        if let Some(markets) = self.fresh() {
            return Ok(markets);
        }

        match fetch().await {
            Ok(markets) => {
                debug!(count = markets.len(), "market cache refilled");
                Ok(self.store(markets))
            }
            Err(e) => match self.peek() {
                Some(stale) => {
                    warn!(error = %e, "refresh failed, serving stale markets");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::market_data::types::{Chain, VenueSlug};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn market(id: &str) -> Market {
        Market::new(VenueSlug::Limitless, Chain::Base, id, id)
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let cache = Arc::new(MarketCache::new(Duration::from_secs(60)));
        let fetches = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let fetches = fetches.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_refresh(|| async {
                            fetches.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(vec![market("a"), market("b")])
                        })
                        .await
                        .unwrap()
                        .len()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap(), 2);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.find("b").map(|m| m.market_id), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_expired_entry_refetches() {
        let cache = MarketCache::new(Duration::ZERO);
        cache.get_or_refresh(|| async { Ok(vec![market("a")]) }).await.unwrap();
        let second = cache
            .get_or_refresh(|| async { Ok(vec![market("a"), market("c")]) })
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache = MarketCache::new(Duration::from_secs(60));
        cache.store(vec![market("a")]);
        cache.invalidate();
        assert!(cache.peek().is_none());
        let markets = cache
            .get_or_refresh(|| async { Ok(vec![market("a"), market("b")]) })
            .await
            .unwrap();
        assert_eq!(markets.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale() {
        let cache = MarketCache::new(Duration::ZERO);
        let err = cache
            .get_or_refresh(|| async { Err(GatewayError::unavailable("limitless", "down")) })
            .await;
        assert!(err.is_err());

        cache.store(vec![market("a")]);
        let stale = cache
            .get_or_refresh(|| async { Err(GatewayError::unavailable("limitless", "down")) })
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
    }
}
