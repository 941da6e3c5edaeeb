// Shared value types every venue adapter speaks.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueSlug {
    Kalshi,
    Polymarket,
    Myriad,
    Opinion,
    Limitless,
}

impl VenueSlug {
    pub const ALL: [VenueSlug; 5] = [
        VenueSlug::Kalshi,
        VenueSlug::Polymarket,
        VenueSlug::Myriad,
        VenueSlug::Opinion,
        VenueSlug::Limitless,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueSlug::Kalshi => "kalshi",
            VenueSlug::Polymarket => "polymarket",
            VenueSlug::Myriad => "myriad",
            VenueSlug::Opinion => "opinion",
            VenueSlug::Limitless => "limitless",
        }
    }
}

impl fmt::Display for VenueSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VenueSlug {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VenueSlug::ALL
            .into_iter()
            .find(|v| v.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| GatewayError::VenueNotFound(s.to_string()))
    }
}

/// Signing family a chain belongs to. Decides which key type a venue accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Ledger,
    Evm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Solana,
    Polygon,
    Bsc,
    Base,
    Abstract,
    Linea,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Solana => "solana",
            Chain::Polygon => "polygon",
            Chain::Bsc => "bsc",
            Chain::Base => "base",
            Chain::Abstract => "abstract",
            Chain::Linea => "linea",
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            Chain::Solana => ChainFamily::Ledger,
            _ => ChainFamily::Evm,
        }
    }

    /// EVM chain id; the ledger network has none and reports 0.
    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Solana => 0,
            Chain::Polygon => 137,
            Chain::Bsc => 56,
            Chain::Base => 8453,
            Chain::Abstract => 2741,
            Chain::Linea => 59144,
        }
    }

    pub fn explorer_url(&self, tx_hash: &str) -> String {
        match self {
            Chain::Solana => format!("https://solscan.io/tx/{tx_hash}"),
            Chain::Polygon => format!("https://polygonscan.com/tx/{tx_hash}"),
            Chain::Bsc => format!("https://bscscan.com/tx/{tx_hash}"),
            Chain::Base => format!("https://basescan.org/tx/{tx_hash}"),
            Chain::Abstract => format!("https://abscan.org/tx/{tx_hash}"),
            Chain::Linea => format!("https://lineascan.build/tx/{tx_hash}"),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "yes",
            Outcome::No => "no",
        }
    }

    pub fn opposite(&self) -> Outcome {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" => Ok(Outcome::Yes),
            "no" => Ok(Outcome::No),
            other => Err(GatewayError::InvalidOutcomeOrSide(format!(
                "invalid outcome '{other}', expected 'yes' or 'no'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(GatewayError::InvalidOutcomeOrSide(format!(
                "invalid side '{other}', expected 'buy' or 'sell'"
            ))),
        }
    }
}

/// Static description of a venue, used for listings.
#[derive(Debug, Clone, Serialize)]
pub struct VenueInfo {
    pub slug: VenueSlug,
    pub chain: Chain,
    pub name: &'static str,
    pub description: &'static str,
    pub collateral_symbol: &'static str,
    pub collateral_decimals: u32,
}

/// A binary market as normalised across venues.
///
/// `yes_price` and `no_price` come from independent books and need not sum to one.
/// `None` means the price is unknown, never zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub venue: VenueSlug,
    pub chain: Chain,
    pub market_id: String,
    pub event_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub yes_price: Option<Decimal>,
    pub no_price: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    pub liquidity: Option<Decimal>,
    pub is_active: bool,
    pub close_time: Option<String>,
    pub yes_token: Option<String>,
    pub no_token: Option<String>,
    pub is_multi_outcome: bool,
    pub related_market_count: usize,
    pub outcome_name: Option<String>,
    pub outcomes: Vec<String>,
    pub url: Option<String>,
    pub collateral_token: Option<String>,
    /// Untouched venue payload, kept for metadata extraction downstream.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Market {
    /// Skeleton with every optional field empty; adapters fill in what they know.
    pub fn new(venue: VenueSlug, chain: Chain, market_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            venue,
            chain,
            market_id: market_id.into(),
            event_id: None,
            title: title.into(),
            description: None,
            category: None,
            yes_price: None,
            no_price: None,
            volume_24h: None,
            liquidity: None,
            is_active: true,
            close_time: None,
            yes_token: None,
            no_token: None,
            is_multi_outcome: false,
            related_market_count: 0,
            outcome_name: None,
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            url: None,
            collateral_token: None,
            raw: serde_json::Value::Null,
        }
    }

    pub fn price(&self, outcome: Outcome) -> Option<Decimal> {
        match outcome {
            Outcome::Yes => self.yes_price,
            Outcome::No => self.no_price,
        }
    }

    pub fn token(&self, outcome: Outcome) -> Option<&str> {
        match outcome {
            Outcome::Yes => self.yes_token.as_deref(),
            Outcome::No => self.no_token.as_deref(),
        }
    }

    pub fn matches_query(&self, query: &str) -> bool {
        let q = query.to_lowercase();
        self.title.to_lowercase().contains(&q)
            || self
                .description
                .as_ref()
                .is_some_and(|d| d.to_lowercase().contains(&q))
    }
}

/// A priced offer to trade. `payload` is opaque venue data that prepare/execute need back unchanged.
///
/// Quotes are not versioned: `expires_at` is informational and nothing in the pipeline enforces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub venue: VenueSlug,
    pub chain: Chain,
    pub market_id: String,
    pub outcome: Outcome,
    pub side: Side,
    pub input_token: String,
    pub input_amount: Decimal,
    pub output_token: String,
    pub expected_output: Decimal,
    pub price_per_token: Decimal,
    pub price_impact: Option<Decimal>,
    pub platform_fee: Option<Decimal>,
    pub network_fee_estimate: Option<Decimal>,
    pub expires_at: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Quote {
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
    }

    pub fn payload_bool(&self, key: &str) -> bool {
        self.payload.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }
}

/// An unsigned on-chain call ready for a wallet to sign. Order within a sequence matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedTransaction {
    pub to: String,
    pub data: String,
    pub value: String,
    pub gas: Option<String>,
    pub chain_id: u64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeFailureKind {
    InvalidKeyType,
    TransactionReverted,
    InsufficientQuoteData,
    Venue,
}

/// Outcome of `execute_trade`. Failures are values, never panics or raised errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub input_amount: Decimal,
    pub output_amount: Option<Decimal>,
    pub error_message: Option<String>,
    pub explorer_url: Option<String>,
    pub failure: Option<TradeFailureKind>,
}

impl TradeResult {
    pub fn confirmed(quote: &Quote, tx_hash: String, explorer_url: Option<String>) -> Self {
        Self {
            success: true,
            tx_hash: Some(tx_hash),
            input_amount: quote.input_amount,
            output_amount: Some(quote.expected_output),
            error_message: None,
            explorer_url,
            failure: None,
        }
    }

    pub fn failed(quote: &Quote, kind: TradeFailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            tx_hash: None,
            input_amount: quote.input_amount,
            output_amount: None,
            error_message: Some(message.into()),
            explorer_url: None,
            failure: Some(kind),
        }
    }

    pub fn reverted(quote: &Quote, tx_hash: String, explorer_url: String) -> Self {
        Self {
            success: false,
            tx_hash: Some(tx_hash),
            input_amount: quote.input_amount,
            output_amount: None,
            error_message: Some("Transaction reverted".to_string()),
            explorer_url: Some(explorer_url),
            failure: Some(TradeFailureKind::TransactionReverted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_enums() {
        assert_eq!("YES".parse::<Outcome>().unwrap(), Outcome::Yes);
        assert_eq!(" sell ".parse::<Side>().unwrap(), Side::Sell);
        assert_eq!("Polymarket".parse::<VenueSlug>().unwrap(), VenueSlug::Polymarket);
        assert!(matches!("maybe".parse::<Outcome>(), Err(GatewayError::InvalidOutcomeOrSide(_))));
        assert!(matches!("hold".parse::<Side>(), Err(GatewayError::InvalidOutcomeOrSide(_))));
        assert!(matches!("nowhere".parse::<VenueSlug>(), Err(GatewayError::VenueNotFound(_))));
    }

    #[test]
    fn test_chain_family_and_ids() {
        assert_eq!(Chain::Solana.family(), ChainFamily::Ledger);
        assert_eq!(Chain::Base.family(), ChainFamily::Evm);
        assert_eq!(Chain::Polygon.chain_id(), 137);
        assert_eq!(Chain::Linea.explorer_url("0xabc"), "https://lineascan.build/tx/0xabc");
    }

    #[test]
    fn test_market_query_matches_title_or_description() {
        let mut m = Market::new(VenueSlug::Limitless, Chain::Base, "btc-100k", "Will BTC hit 100k?");
        m.description = Some("Resolves on Coinbase close".into());
        assert!(m.matches_query("btc"));
        assert!(m.matches_query("COINBASE"));
        assert!(!m.matches_query("eth"));
    }
}
