// In-process stores used when no database is configured, and in tests.

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    PersistError, PersistResult, Position, PositionFill, PositionFilter, PositionKey, PositionStore, TradeRecord,
    TradeStore, TradeTotals, TradeUpdate, UsageRecord, UsageStore,
};
use crate::trading::positions::apply_fill;

#[derive(Default)]
pub struct MemoryStore {
    trades: Mutex<AHashMap<Uuid, TradeRecord>>,
    positions: Mutex<AHashMap<PositionKey, Position>>,
    usage: Mutex<Vec<UsageRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trade_count(&self) -> usize {
        self.trades.lock().len()
    }

    /// Every stored trade, oldest first.
    pub fn trades(&self) -> Vec<TradeRecord> {
        let mut rows: Vec<TradeRecord> = self.trades.lock().values().cloned().collect();
        rows.sort_by_key(|t| t.created_at);
        rows
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn create_trade(&self, trade: &TradeRecord) -> PersistResult<()> {
        let mut trades = self.trades.lock();
        if trades.contains_key(&trade.id) {
            return Err(PersistError::Other(format!("trade {} already exists", trade.id)));
        }
        trades.insert(trade.id, trade.clone());
        Ok(())
    }

    async fn get_trade(&self, id: Uuid) -> PersistResult<Option<TradeRecord>> {
        Ok(self.trades.lock().get(&id).cloned())
    }

    async fn update_trade(&self, id: Uuid, update: TradeUpdate) -> PersistResult<TradeRecord> {
        let mut trades = self.trades.lock();
        let trade = trades.get_mut(&id).ok_or(PersistError::NotFound)?;
        update.apply(trade, Utc::now())?;
        Ok(trade.clone())
    }

    async fn trade_totals(&self, key_ids: &[Uuid], from: DateTime<Utc>, to: DateTime<Utc>) -> PersistResult<TradeTotals> {
        let trades = self.trades.lock();
        let totals = trades
            .values()
            .filter(|t| key_ids.contains(&t.key_id) && t.created_at >= from && t.created_at < to)
            .fold(TradeTotals::default(), |mut acc, t| {
                acc.count += 1;
                acc.volume += t.input_amount;
                acc.fees += t.fee_amount.unwrap_or(Decimal::ZERO);
                acc
            });
        Ok(totals)
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn upsert_position(&self, key: &PositionKey, fill: PositionFill) -> PersistResult<Position> {
        let mut positions = self.positions.lock();
        let updated = apply_fill(positions.get(key).cloned(), key, fill, Utc::now());
        positions.insert(key.clone(), updated.clone());
        Ok(updated)
    }

    async fn get_position(&self, key: &PositionKey) -> PersistResult<Option<Position>> {
        Ok(self.positions.lock().get(key).cloned())
    }

    async fn list_positions(&self, key_id: Uuid, filter: &PositionFilter, limit: usize, offset: usize) -> PersistResult<Vec<Position>> {
        let positions = self.positions.lock();
        let mut rows: Vec<Position> = positions
            .values()
            .filter(|p| p.key.key_id == key_id && filter.matches(p))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn insert_usage(&self, record: &UsageRecord) -> PersistResult<()> {
        self.usage.lock().push(record.clone());
        Ok(())
    }

    async fn count_requests(&self, key_ids: &[Uuid], from: DateTime<Utc>, to: DateTime<Utc>) -> PersistResult<u64> {
        let usage = self.usage.lock();
        Ok(usage
            .iter()
            .filter(|u| key_ids.contains(&u.key_id) && u.created_at >= from && u.created_at < to)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::types::{Outcome, VenueSlug};
    use crate::persist::PositionStatus;
    use rust_decimal_macros::dec;

    fn key(market: &str, wallet: &str) -> PositionKey {
        PositionKey {
            key_id: Uuid::nil(),
            wallet_address: wallet.into(),
            venue: VenueSlug::Kalshi,
            market_id: market.into(),
            outcome: Outcome::No,
        }
    }

    #[tokio::test]
    async fn test_list_positions_filters_and_pages() {
        let store = MemoryStore::new();
        for (m, w) in [("a", "w1"), ("b", "w1"), ("c", "w2")] {
            store
                .upsert_position(
                    &key(m, w),
                    PositionFill {
                        amount: dec!(1),
                        price: dec!(0.3),
                        current_price: None,
                    },
                )
                .await
                .unwrap();
        }
        store
            .upsert_position(
                &key("b", "w1"),
                PositionFill {
                    amount: dec!(-1),
                    price: dec!(0.3),
                    current_price: None,
                },
            )
            .await
            .unwrap();

        let all = store.list_positions(Uuid::nil(), &PositionFilter::default(), 10, 0).await.unwrap();
        assert_eq!(all.len(), 3);

        let open_w1 = PositionFilter {
            wallet_address: Some("w1".into()),
            status: Some(PositionStatus::Open),
            ..Default::default()
        };
        let rows = store.list_positions(Uuid::nil(), &open_w1, 10, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.market_id, "a");

        let paged = store.list_positions(Uuid::nil(), &PositionFilter::default(), 1, 1).await.unwrap();
        assert_eq!(paged.len(), 1);
        assert!(store.list_positions(Uuid::new_v4(), &PositionFilter::default(), 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_trade_is_not_found() {
        let store = MemoryStore::new();
        let err = store.update_trade(Uuid::new_v4(), TradeUpdate::failed("x")).await.unwrap_err();
        assert!(matches!(err, PersistError::NotFound));
    }
}
