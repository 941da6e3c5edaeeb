//! Synthetic always-present market. Consumers that see its price stop changing know the feed froze.

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub const CANARY_MARKET_ID: &str = "canary-staleness-check";
pub const CANARY_PLATFORM: &str = "canary";
pub const CANARY_TITLE: &str = "Canary Staleness Check";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanaryMarket {
    pub market_id: String,
    pub platform: String,
    pub title: String,
    pub outcomes: BTreeMap<String, Decimal>,
    pub expected_price: Decimal,
    /// Epoch milliseconds.
    pub injected_at: i64,
}

impl CanaryMarket {
    fn new(price: Decimal, injected_at: i64) -> Self {
        let outcomes = BTreeMap::from([
            ("yes".to_string(), price),
            ("no".to_string(), Decimal::ONE - price),
        ]);
        Self {
            market_id: CANARY_MARKET_ID.to_string(),
            platform: CANARY_PLATFORM.to_string(),
            title: CANARY_TITLE.to_string(),
            outcomes,
            expected_price: price,
            injected_at,
        }
    }
}

/// Uniform on [0.0100, 0.9900] at 4 decimal places.
fn random_price() -> Decimal {
    Decimal::new(rand::thread_rng().gen_range(100..=9_900), 4)
}

pub struct CanaryGenerator {
    interval: Duration,
    state: Mutex<Option<(CanaryMarket, Instant)>>,
}

impl CanaryGenerator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(None),
        }
    }

    /// Current canary, rotated first if the interval has elapsed.
    pub fn current(&self) -> CanaryMarket {
        self.current_at(Instant::now())
    }

    pub fn current_at(&self, now: Instant) -> CanaryMarket {
        let mut state = self.state.lock();
        match state.as_ref() {
            Some((market, rotated)) if now.saturating_duration_since(*rotated) < self.interval => market.clone(),
            previous => {
                let last_price = previous.map(|(m, _)| m.expected_price);
                // A rotation always moves the price.
                let mut price = random_price();
                while Some(price) == last_price {
                    price = random_price();
                }
                let last_injected = previous.map_or(0, |(m, _)| m.injected_at);
                let injected_at = Utc::now().timestamp_millis().max(last_injected + 1);
                let market = CanaryMarket::new(price, injected_at);
                *state = Some((market.clone(), now));
                market
            }
        }
    }
}
