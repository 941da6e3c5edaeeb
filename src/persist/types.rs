use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::market_data::types::{Chain, Outcome, Side, VenueSlug};

#[derive(Debug)]
pub enum PersistError {
    Database(String),
    Serialization(String),
    NotFound,
    InvalidTransition { from: TradeStatus, to: TradeStatus },
    Other(String),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Database(msg) => write!(f, "Database error: {}", msg),
            PersistError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            PersistError::NotFound => write!(f, "Not found"),
            PersistError::InvalidTransition { from, to } => {
                write!(f, "Invalid trade transition {} -> {}", from, to)
            }
            PersistError::Other(msg) => write!(f, "Other error: {}", msg),
        }
    }
}

impl std::error::Error for PersistError {}

impl From<sqlx::Error> for PersistError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => PersistError::NotFound,
            other => PersistError::Database(other.to_string()),
        }
    }
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Lifecycle of a trade row. Progression only moves forward; `Confirmed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Quoted,
    Prepared,
    Submitted,
    Confirmed,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Quoted => "quoted",
            TradeStatus::Prepared => "prepared",
            TradeStatus::Submitted => "submitted",
            TradeStatus::Confirmed => "confirmed",
            TradeStatus::Failed => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TradeStatus::Quoted => 0,
            TradeStatus::Prepared => 1,
            TradeStatus::Submitted => 2,
            TradeStatus::Confirmed | TradeStatus::Failed => 3,
        }
    }

    pub fn can_transition_to(&self, next: TradeStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quoted" => Ok(TradeStatus::Quoted),
            "prepared" => Ok(TradeStatus::Prepared),
            "submitted" => Ok(TradeStatus::Submitted),
            "confirmed" => Ok(TradeStatus::Confirmed),
            "failed" => Ok(TradeStatus::Failed),
            other => Err(PersistError::Serialization(format!("unknown trade status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Prepare,
    Execute,
}

impl TradeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeMode::Prepare => "prepare",
            TradeMode::Execute => "execute",
        }
    }
}

impl FromStr for TradeMode {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prepare" => Ok(TradeMode::Prepare),
            "execute" => Ok(TradeMode::Execute),
            other => Err(PersistError::Serialization(format!("unknown trade mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub key_id: Uuid,
    pub wallet_address: String,
    pub venue: VenueSlug,
    pub chain: Chain,
    pub market_id: String,
    pub outcome: Outcome,
    pub side: Side,
    pub input_amount: Decimal,
    pub output_amount: Option<Decimal>,
    pub price: Option<Decimal>,
    pub fee_amount: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub status: TradeStatus,
    pub mode: TradeMode,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields an execution writes back onto an existing trade row.
#[derive(Debug, Clone, Default)]
pub struct TradeUpdate {
    pub status: Option<TradeStatus>,
    pub tx_hash: Option<String>,
    pub output_amount: Option<Decimal>,
    pub price: Option<Decimal>,
    pub error_message: Option<String>,
}

impl TradeUpdate {
    pub fn status(status: TradeStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(TradeStatus::Failed),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Apply onto a row, refusing backward status moves.
    pub fn apply(self, trade: &mut TradeRecord, now: DateTime<Utc>) -> PersistResult<()> {
        if let Some(next) = self.status {
            if !trade.status.can_transition_to(next) {
                return Err(PersistError::InvalidTransition {
                    from: trade.status,
                    to: next,
                });
            }
            trade.status = next;
        }
        if self.tx_hash.is_some() {
            trade.tx_hash = self.tx_hash;
        }
        if self.output_amount.is_some() {
            trade.output_amount = self.output_amount;
        }
        if self.price.is_some() {
            trade.price = self.price;
        }
        if self.error_message.is_some() {
            trade.error_message = self.error_message;
        }
        trade.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TradeTotals {
    pub count: u64,
    pub volume: Decimal,
    pub fees: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub key_id: Uuid,
    pub wallet_address: String,
    pub venue: VenueSlug,
    pub market_id: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(PositionStatus::Open),
            "closed" => Ok(PositionStatus::Closed),
            other => Err(PersistError::Serialization(format!("unknown position status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    #[serde(flatten)]
    pub key: PositionKey,
    pub amount: Decimal,
    pub avg_entry_price: Decimal,
    pub current_price: Option<Decimal>,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A signed change to a position: positive `amount` for buys, negative for sells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFill {
    pub amount: Decimal,
    pub price: Decimal,
    pub current_price: Option<Decimal>,
}

#[derive(Debug, Clone, Default)]
pub struct PositionFilter {
    pub wallet_address: Option<String>,
    pub venue: Option<VenueSlug>,
    pub status: Option<PositionStatus>,
}

impl PositionFilter {
    pub fn matches(&self, position: &Position) -> bool {
        self.wallet_address
            .as_ref()
            .map_or(true, |w| *w == position.key.wallet_address)
            && self.venue.map_or(true, |v| v == position.key.venue)
            && self.status.map_or(true, |s| s == position.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub key_id: Uuid,
    pub account_id: Uuid,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub response_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}
