use thiserror::Error;
use uuid::Uuid;

use crate::persist::PersistError;
use crate::rate_limit::LimitClass;

/// Typed failures surfaced by the gateway core.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("venue '{0}' not found")]
    VenueNotFound(String),

    #[error("[{venue}] market {market_id} not found")]
    MarketNotFound { venue: String, market_id: String },

    /// The venue request itself failed: network error, bad status, or upstream rate limit.
    #[error("[{venue}] venue unavailable: {message}")]
    PlatformUnavailable {
        venue: String,
        message: String,
        code: Option<String>,
    },

    /// Venue answered but cannot serve this request (e.g. no settlement token for the outcome).
    #[error("[{venue}] {message}")]
    Platform { venue: String, message: String },

    #[error("{0}")]
    InvalidOutcomeOrSide(String),

    #[error("invalid key type, expected {expected}")]
    InvalidKeyType { expected: &'static str },

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("{} rate limit exceeded", .class.label())]
    RateLimitExceeded {
        class: LimitClass,
        limit: u32,
        remaining: u32,
        reset_in_secs: f64,
    },

    #[error("transaction {tx_hash} reverted")]
    TransactionReverted { tx_hash: String },

    #[error("[{venue}] incomplete quote data: missing {field}")]
    InsufficientQuoteData { venue: String, field: String },

    #[error("trade {trade_id} failed: {message}")]
    TradeFailed { trade_id: Uuid, message: String },

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn unavailable(venue: impl Into<String>, message: impl ToString) -> Self {
        GatewayError::PlatformUnavailable {
            venue: venue.into(),
            message: message.to_string(),
            code: None,
        }
    }

    pub fn platform(venue: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::Platform {
            venue: venue.into(),
            message: message.into(),
        }
    }

    pub fn market_not_found(venue: impl Into<String>, market_id: impl Into<String>) -> Self {
        GatewayError::MarketNotFound {
            venue: venue.into(),
            market_id: market_id.into(),
        }
    }

    /// HTTP status the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::VenueNotFound(_) | GatewayError::MarketNotFound { .. } => 404,
            GatewayError::RateLimitExceeded { .. } => 429,
            GatewayError::PlatformUnavailable { .. } => 502,
            GatewayError::TradeFailed { .. }
            | GatewayError::Persistence(_)
            | GatewayError::Config(_) => 500,
            _ => 400,
        }
    }

    /// Headers describing which limit tripped, for 429 responses.
    pub fn rate_limit_headers(&self) -> Option<[(&'static str, String); 4]> {
        match self {
            GatewayError::RateLimitExceeded {
                class,
                limit,
                remaining,
                reset_in_secs,
            } => Some([
                ("X-RateLimit-Class", class.as_str().to_string()),
                ("X-RateLimit-Limit", limit.to_string()),
                ("X-RateLimit-Remaining", remaining.to_string()),
                ("X-RateLimit-Reset", (reset_in_secs.ceil() as u64).to_string()),
            ]),
            _ => None,
        }
    }
}
