// Normalized feed shapes and the conversions from venue market data into them.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::canary::CanaryMarket;
use crate::market_data::normaliser::string_field;
use crate::market_data::order_book::{Level, OrderBook};
use crate::market_data::types::{Market, VenueSlug};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketOdds {
    pub market_id: String,
    pub platform: String,
    pub title: String,
    /// Outcome name to probability in [0, 1]. Unknown prices are omitted.
    pub outcomes: BTreeMap<String, Decimal>,
    pub volume_24h: Option<Decimal>,
    pub liquidity: Option<Decimal>,
    pub last_updated: i64,
}

impl From<&CanaryMarket> for MarketOdds {
    fn from(canary: &CanaryMarket) -> Self {
        Self {
            market_id: canary.market_id.clone(),
            platform: canary.platform.clone(),
            title: canary.title.clone(),
            outcomes: canary.outcomes.clone(),
            volume_24h: None,
            liquidity: None,
            last_updated: canary.injected_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedOrderBookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedOrderBook {
    pub market_id: String,
    pub platform: String,
    pub outcome: String,
    pub bids: Vec<FeedOrderBookLevel>,
    pub asks: Vec<FeedOrderBookLevel>,
    pub last_updated: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Active,
    Closed,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketMetadata {
    pub market_id: String,
    pub platform: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub resolution_source: Option<String>,
    pub end_date: Option<String>,
    pub created_date: Option<String>,
    pub status: MarketStatus,
    pub resolution_outcome: Option<String>,
    pub volume_total: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionStatus {
    pub market_id: String,
    pub platform: String,
    pub is_resolved: bool,
    pub winning_outcome: Option<String>,
    pub resolution_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueHealth {
    pub platform: VenueSlug,
    pub is_healthy: bool,
    pub last_check: i64,
    pub market_count: usize,
}

/// Envelope for every pull response.
#[derive(Debug, Clone, Serialize)]
pub struct FeedResponse<T> {
    pub data_timestamp: i64,
    pub data: T,
}

impl<T> FeedResponse<T> {
    pub fn now(data: T) -> Self {
        Self {
            data_timestamp: now_ms(),
            data,
        }
    }
}

pub fn market_to_odds(m: &Market) -> MarketOdds {
    let mut outcomes = BTreeMap::new();
    if let Some(p) = m.yes_price {
        outcomes.insert("yes".to_string(), p);
    }
    if let Some(p) = m.no_price {
        outcomes.insert("no".to_string(), p);
    }
    MarketOdds {
        market_id: m.market_id.clone(),
        platform: m.venue.to_string(),
        title: m.title.clone(),
        outcomes,
        volume_24h: m.volume_24h,
        liquidity: m.liquidity,
        last_updated: now_ms(),
    }
}

fn is_resolved(raw: &Value) -> bool {
    ["is_resolved", "resolved"]
        .iter()
        .any(|k| raw.get(*k).and_then(Value::as_bool).unwrap_or(false))
}

fn winning_outcome(raw: &Value) -> Option<String> {
    string_field(raw, &["resolution", "winning_outcome"])
}

fn timestamp(raw: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| match raw.get(*k)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

pub fn market_to_metadata(m: &Market) -> MarketMetadata {
    let status = if is_resolved(&m.raw) {
        MarketStatus::Resolved
    } else if m.is_active {
        MarketStatus::Active
    } else {
        MarketStatus::Closed
    };
    MarketMetadata {
        market_id: m.market_id.clone(),
        platform: m.venue.to_string(),
        title: m.title.clone(),
        description: m.description.clone(),
        category: m.category.clone(),
        resolution_source: string_field(&m.raw, &["resolution_source", "resolutionSource"]),
        end_date: m.close_time.clone(),
        created_date: string_field(&m.raw, &["created_at", "created_date", "createdAt"]),
        status,
        resolution_outcome: winning_outcome(&m.raw),
        volume_total: m.volume_24h,
    }
}

pub fn market_to_resolution(m: &Market) -> ResolutionStatus {
    ResolutionStatus {
        market_id: m.market_id.clone(),
        platform: m.venue.to_string(),
        is_resolved: is_resolved(&m.raw),
        winning_outcome: winning_outcome(&m.raw),
        resolution_timestamp: timestamp(&m.raw, &["resolution_timestamp", "resolved_at"]),
    }
}

fn levels(side: &[Level]) -> Vec<FeedOrderBookLevel> {
    side.iter()
        .map(|l| FeedOrderBookLevel {
            price: l.price,
            quantity: l.size,
        })
        .collect()
}

pub fn orderbook_to_feed(book: &OrderBook, venue: VenueSlug) -> FeedOrderBook {
    FeedOrderBook {
        market_id: book.market_id.clone(),
        platform: venue.to_string(),
        outcome: book.outcome.to_string(),
        bids: levels(&book.bids),
        asks: levels(&book.asks),
        last_updated: now_ms(),
    }
}
