pub mod types;
pub use types::*;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn create_trade(&self, trade: &TradeRecord) -> PersistResult<()>;
    async fn get_trade(&self, id: Uuid) -> PersistResult<Option<TradeRecord>>;
    async fn update_trade(&self, id: Uuid, update: TradeUpdate) -> PersistResult<TradeRecord>;
    /// Count, summed input and summed fees for the given keys in `[from, to)`.
    async fn trade_totals(&self, key_ids: &[Uuid], from: DateTime<Utc>, to: DateTime<Utc>) -> PersistResult<TradeTotals>;
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Must be atomic per key: concurrent fills against one key serialize.
    async fn upsert_position(&self, key: &PositionKey, fill: PositionFill) -> PersistResult<Position>;
    async fn get_position(&self, key: &PositionKey) -> PersistResult<Option<Position>>;
    async fn list_positions(&self, key_id: Uuid, filter: &PositionFilter, limit: usize, offset: usize) -> PersistResult<Vec<Position>>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn insert_usage(&self, record: &UsageRecord) -> PersistResult<()>;
    async fn count_requests(&self, key_ids: &[Uuid], from: DateTime<Utc>, to: DateTime<Utc>) -> PersistResult<u64>;
}
