use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use super::{
    PersistError, PersistResult, Position, PositionFill, PositionFilter, PositionKey, PositionStore, TradeRecord,
    TradeStore, TradeTotals, TradeUpdate, UsageRecord, UsageStore,
};
use crate::trading::positions::apply_fill;

/// Postgres-backed stores. Tables (`trades`, `positions`, `usage_logs`) are owned by the
/// migration tooling; this type only reads and writes rows.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> PersistResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        info!("connected to postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Enums are stored as their lowercase serde names.
fn parse_text<T: DeserializeOwned>(s: String) -> PersistResult<T> {
    serde_json::from_value(serde_json::Value::String(s)).map_err(|e| PersistError::Serialization(e.to_string()))
}

fn text<T: serde::Serialize>(value: &T) -> PersistResult<String> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Err(PersistError::Serialization(format!("expected string, got {other}"))),
        Err(e) => Err(PersistError::Serialization(e.to_string())),
    }
}

fn trade_from_row(row: &PgRow) -> PersistResult<TradeRecord> {
    Ok(TradeRecord {
        id: row.try_get("id")?,
        key_id: row.try_get("key_id")?,
        wallet_address: row.try_get("wallet_address")?,
        venue: parse_text(row.try_get("venue")?)?,
        chain: parse_text(row.try_get("chain")?)?,
        market_id: row.try_get("market_id")?,
        outcome: parse_text(row.try_get("outcome")?)?,
        side: parse_text(row.try_get("side")?)?,
        input_amount: row.try_get("input_amount")?,
        output_amount: row.try_get("output_amount")?,
        price: row.try_get("price")?,
        fee_amount: row.try_get("fee_amount")?,
        tx_hash: row.try_get("tx_hash")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        mode: row.try_get::<String, _>("mode")?.parse()?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn position_from_row(row: &PgRow) -> PersistResult<Position> {
    Ok(Position {
        id: row.try_get("id")?,
        key: PositionKey {
            key_id: row.try_get("key_id")?,
            wallet_address: row.try_get("wallet_address")?,
            venue: parse_text(row.try_get("venue")?)?,
            market_id: row.try_get("market_id")?,
            outcome: parse_text(row.try_get("outcome")?)?,
        },
        amount: row.try_get("amount")?,
        avg_entry_price: row.try_get("avg_entry_price")?,
        current_price: row.try_get("current_price")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const TRADE_COLUMNS: &str = "id, key_id, wallet_address, venue, chain, market_id, outcome, side, input_amount, \
     output_amount, price, fee_amount, tx_hash, status, mode, error_message, created_at, updated_at";

const POSITION_COLUMNS: &str =
    "id, key_id, wallet_address, venue, market_id, outcome, amount, avg_entry_price, current_price, status, created_at, updated_at";

#[async_trait]
impl TradeStore for PostgresStore {
    async fn create_trade(&self, trade: &TradeRecord) -> PersistResult<()> {
        sqlx::query(&format!(
            "INSERT INTO trades ({TRADE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
        ))
        .bind(trade.id)
        .bind(trade.key_id)
        .bind(&trade.wallet_address)
        .bind(text(&trade.venue)?)
        .bind(text(&trade.chain)?)
        .bind(&trade.market_id)
        .bind(text(&trade.outcome)?)
        .bind(text(&trade.side)?)
        .bind(trade.input_amount)
        .bind(trade.output_amount)
        .bind(trade.price)
        .bind(trade.fee_amount)
        .bind(&trade.tx_hash)
        .bind(trade.status.as_str())
        .bind(trade.mode.as_str())
        .bind(&trade.error_message)
        .bind(trade.created_at)
        .bind(trade.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_trade(&self, id: Uuid) -> PersistResult<Option<TradeRecord>> {
        let row = sqlx::query(&format!("SELECT {TRADE_COLUMNS} FROM trades WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(trade_from_row).transpose()
    }

    async fn update_trade(&self, id: Uuid, update: TradeUpdate) -> PersistResult<TradeRecord> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!("SELECT {TRADE_COLUMNS} FROM trades WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(PersistError::NotFound)?;
        let mut trade = trade_from_row(&row)?;
        update.apply(&mut trade, Utc::now())?;

        sqlx::query(
            "UPDATE trades SET status = $2, tx_hash = $3, output_amount = $4, price = $5, \
             error_message = $6, updated_at = $7 WHERE id = $1",
        )
        .bind(id)
        .bind(trade.status.as_str())
        .bind(&trade.tx_hash)
        .bind(trade.output_amount)
        .bind(trade.price)
        .bind(&trade.error_message)
        .bind(trade.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(trade)
    }

    async fn trade_totals(&self, key_ids: &[Uuid], from: DateTime<Utc>, to: DateTime<Utc>) -> PersistResult<TradeTotals> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count, \
                    COALESCE(SUM(input_amount), 0) AS volume, \
                    COALESCE(SUM(fee_amount), 0) AS fees \
             FROM trades WHERE key_id = ANY($1) AND created_at >= $2 AND created_at < $3",
        )
        .bind(key_ids)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("count")?;
        Ok(TradeTotals {
            count: count.max(0) as u64,
            volume: row.try_get::<Decimal, _>("volume")?,
            fees: row.try_get::<Decimal, _>("fees")?,
        })
    }
}

#[async_trait]
impl PositionStore for PostgresStore {
    async fn upsert_position(&self, key: &PositionKey, fill: PositionFill) -> PersistResult<Position> {
        let venue = text(&key.venue)?;
        let outcome = text(&key.outcome)?;
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // Row lock on the key serializes concurrent fills; a fresh key gets an empty closed row first.
        sqlx::query(
            "INSERT INTO positions (id, key_id, wallet_address, venue, market_id, outcome, amount, \
             avg_entry_price, current_price, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 0, 0, NULL, 'closed', $7, $7) \
             ON CONFLICT (key_id, wallet_address, venue, market_id, outcome) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(key.key_id)
        .bind(&key.wallet_address)
        .bind(&venue)
        .bind(&key.market_id)
        .bind(&outcome)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions \
             WHERE key_id = $1 AND wallet_address = $2 AND venue = $3 AND market_id = $4 AND outcome = $5 \
             FOR UPDATE"
        ))
        .bind(key.key_id)
        .bind(&key.wallet_address)
        .bind(&venue)
        .bind(&key.market_id)
        .bind(&outcome)
        .fetch_one(&mut *tx)
        .await?;

        let existing = position_from_row(&row)?;
        let id = existing.id;
        let is_new = existing.amount.is_zero() && existing.current_price.is_none() && existing.created_at == existing.updated_at;
        let mut updated = apply_fill(Some(existing).filter(|_| !is_new), key, fill, now);
        updated.id = id;

        sqlx::query(
            "UPDATE positions SET amount = $2, avg_entry_price = $3, current_price = $4, status = $5, updated_at = $6 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(updated.amount)
        .bind(updated.avg_entry_price)
        .bind(updated.current_price)
        .bind(updated.status.as_str())
        .bind(updated.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn get_position(&self, key: &PositionKey) -> PersistResult<Option<Position>> {
        let row = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions \
             WHERE key_id = $1 AND wallet_address = $2 AND venue = $3 AND market_id = $4 AND outcome = $5"
        ))
        .bind(key.key_id)
        .bind(&key.wallet_address)
        .bind(text(&key.venue)?)
        .bind(&key.market_id)
        .bind(text(&key.outcome)?)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(position_from_row).transpose()
    }

    async fn list_positions(&self, key_id: Uuid, filter: &PositionFilter, limit: usize, offset: usize) -> PersistResult<Vec<Position>> {
        let venue = filter.venue.as_ref().map(text).transpose()?;
        let rows = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions \
             WHERE key_id = $1 \
               AND ($2::text IS NULL OR wallet_address = $2) \
               AND ($3::text IS NULL OR venue = $3) \
               AND ($4::text IS NULL OR status = $4) \
             ORDER BY updated_at DESC LIMIT $5 OFFSET $6"
        ))
        .bind(key_id)
        .bind(&filter.wallet_address)
        .bind(venue)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(position_from_row).collect()
    }
}

#[async_trait]
impl UsageStore for PostgresStore {
    async fn insert_usage(&self, record: &UsageRecord) -> PersistResult<()> {
        sqlx::query(
            "INSERT INTO usage_logs (id, key_id, account_id, endpoint, method, status_code, response_time_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.id)
        .bind(record.key_id)
        .bind(record.account_id)
        .bind(&record.endpoint)
        .bind(&record.method)
        .bind(record.status_code as i32)
        .bind(record.response_time_ms.map(|ms| ms as i64))
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_requests(&self, key_ids: &[Uuid], from: DateTime<Utc>, to: DateTime<Utc>) -> PersistResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM usage_logs WHERE key_id = ANY($1) AND created_at >= $2 AND created_at < $3",
        )
        .bind(key_ids)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::types::{Chain, Outcome, VenueSlug};

    #[test]
    fn test_enum_text_round_trip() {
        assert_eq!(text(&VenueSlug::Limitless).unwrap(), "limitless");
        assert_eq!(text(&Chain::Bsc).unwrap(), "bsc");
        let outcome: Outcome = parse_text("no".to_string()).unwrap();
        assert_eq!(outcome, Outcome::No);
        assert!(parse_text::<VenueSlug>("nowhere".to_string()).is_err());
    }
}
