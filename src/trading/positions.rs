//! Position ledger: volume-weighted average entry per (identity, wallet, venue, market, outcome).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::market_data::types::Side;
use crate::persist::{Position, PositionFill, PositionFilter, PositionKey, PositionStatus, PositionStore, PersistResult};

/// Fold one fill into the existing row (or create it). Pure; stores call this under their per-key lock.
pub fn apply_fill(existing: Option<Position>, key: &PositionKey, fill: PositionFill, now: DateTime<Utc>) -> Position {
    match existing {
        None => {
            let amount = fill.amount.max(Decimal::ZERO);
            Position {
                id: Uuid::new_v4(),
                key: key.clone(),
                amount,
                avg_entry_price: fill.price,
                current_price: fill.current_price,
                status: if amount > Decimal::ZERO {
                    PositionStatus::Open
                } else {
                    PositionStatus::Closed
                },
                created_at: now,
                updated_at: now,
            }
        }
        Some(mut position) => {
            let total = position.amount + fill.amount;
            if total > Decimal::ZERO {
                position.avg_entry_price =
                    (position.avg_entry_price * position.amount + fill.price * fill.amount) / total;
                position.amount = total;
                position.status = PositionStatus::Open;
            } else {
                position.amount = Decimal::ZERO;
                position.status = PositionStatus::Closed;
            }
            if fill.current_price.is_some() {
                position.current_price = fill.current_price;
            }
            position.updated_at = now;
            position
        }
    }
}

#[derive(Clone)]
pub struct PositionLedger {
    store: Arc<dyn PositionStore>,
}

impl PositionLedger {
    pub fn new(store: Arc<dyn PositionStore>) -> Self {
        Self { store }
    }

    pub async fn record_fill(
        &self,
        key: &PositionKey,
        side: Side,
        amount: Decimal,
        price: Decimal,
        current_price: Option<Decimal>,
    ) -> PersistResult<Position> {
        let delta = match side {
            Side::Buy => amount,
            Side::Sell => -amount,
        };
        let position = self
            .store
            .upsert_position(
                key,
                PositionFill {
                    amount: delta,
                    price,
                    current_price,
                },
            )
            .await?;
        debug!(
            venue = %key.venue,
            market_id = %key.market_id,
            amount = %position.amount,
            avg = %position.avg_entry_price,
            "position updated"
        );
        Ok(position)
    }

    pub async fn get(&self, key: &PositionKey) -> PersistResult<Option<Position>> {
        self.store.get_position(key).await
    }

    pub async fn list(&self, key_id: Uuid, filter: &PositionFilter, limit: usize, offset: usize) -> PersistResult<Vec<Position>> {
        self.store.list_positions(key_id, filter, limit, offset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::types::{Outcome, VenueSlug};
    use crate::persist::MemoryStore;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn key() -> PositionKey {
        PositionKey {
            key_id: Uuid::nil(),
            wallet_address: "0xwallet".into(),
            venue: VenueSlug::Polymarket,
            market_id: "m1".into(),
            outcome: Outcome::Yes,
        }
    }

    fn fill(amount: Decimal, price: Decimal) -> PositionFill {
        PositionFill {
            amount,
            price,
            current_price: Some(price),
        }
    }

    #[test]
    fn test_weighted_average() {
        let now = Utc::now();
        let p = apply_fill(None, &key(), fill(dec!(100), dec!(0.40)), now);
        let p = apply_fill(Some(p), &key(), fill(dec!(50), dec!(0.70)), now);
        assert_eq!(p.amount, dec!(150));
        assert_eq!(p.avg_entry_price, dec!(0.5));
        assert_eq!(p.status, PositionStatus::Open);
    }

    #[test]
    fn test_sell_to_zero_closes() {
        let now = Utc::now();
        let p = apply_fill(None, &key(), fill(dec!(10), dec!(0.5)), now);
        let p = apply_fill(Some(p), &key(), fill(dec!(-12), dec!(0.6)), now);
        assert_eq!(p.amount, Decimal::ZERO);
        assert_eq!(p.status, PositionStatus::Closed);
        assert_eq!(p.avg_entry_price, dec!(0.5));
        assert_eq!(p.current_price, Some(dec!(0.6)));
    }

    #[test]
    fn test_current_price_kept_when_absent() {
        let now = Utc::now();
        let p = apply_fill(None, &key(), fill(dec!(10), dec!(0.5)), now);
        let p = apply_fill(
            Some(p),
            &key(),
            PositionFill {
                amount: dec!(1),
                price: dec!(0.5),
                current_price: None,
            },
            now,
        );
        assert_eq!(p.current_price, Some(dec!(0.5)));
    }

    #[tokio::test]
    async fn test_ledger_concurrent_buys_serialize() {
        let store = Arc::new(MemoryStore::new());
        let ledger = PositionLedger::new(store);
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .record_fill(&key(), Side::Buy, dec!(5), dec!(0.5), None)
                        .await
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        let p = ledger.get(&key()).await.unwrap().unwrap();
        assert_eq!(p.amount, dec!(100));
        assert_eq!(p.avg_entry_price, dec!(0.5));
    }

    proptest! {
        #[test]
        fn prop_two_buys_commute(a1 in 1u32..10_000, p1 in 1u32..99, a2 in 1u32..10_000, p2 in 1u32..99) {
            let now = Utc::now();
            let f1 = fill(Decimal::from(a1), Decimal::new(p1 as i64, 2));
            let f2 = fill(Decimal::from(a2), Decimal::new(p2 as i64, 2));

            let x = apply_fill(Some(apply_fill(None, &key(), f1, now)), &key(), f2, now);
            let y = apply_fill(Some(apply_fill(None, &key(), f2, now)), &key(), f1, now);

            prop_assert_eq!(x.amount, y.amount);
            prop_assert!((x.avg_entry_price - y.avg_entry_price).abs() < dec!(0.000000001));
        }
    }
}
