use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
}

/// Venue order book for one outcome. Bids are sorted descending, asks ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub market_id: String,
    pub outcome: Outcome,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

impl OrderBook {
    pub fn empty(market_id: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            market_id: market_id.into(),
            outcome,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Build from raw (price, size) levels. Duplicate prices are aggregated.
    pub fn from_levels(
        market_id: impl Into<String>,
        outcome: Outcome,
        bids: impl IntoIterator<Item = (Decimal, Decimal)>,
        asks: impl IntoIterator<Item = (Decimal, Decimal)>,
    ) -> Self {
        let mut book = Self::empty(market_id, outcome);
        book.apply_snapshot(bids, asks);
        book
    }

    // Replace the whole book with a fresh snapshot
    pub fn apply_snapshot(
        &mut self,
        bids: impl IntoIterator<Item = (Decimal, Decimal)>,
        asks: impl IntoIterator<Item = (Decimal, Decimal)>,
    ) {
        let mut bid_map: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        let mut ask_map: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        for (p, s) in bids {
            *bid_map.entry(p).or_default() += s;
        }
        for (p, s) in asks {
            *ask_map.entry(p).or_default() += s;
        }

        self.bids = bid_map
            .into_iter()
            .rev()
            .map(|(price, size)| Level { price, size })
            .collect();
        self.asks = ask_map
            .into_iter()
            .map(|(price, size)| Level { price, size })
            .collect();
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}
