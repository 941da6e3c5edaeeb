// Shared trait for venue adapters + the closed set of venues behind it.

pub mod evm;
pub mod http;
pub mod kalshi;
pub mod ledger;
pub mod limitless;
pub mod myriad;
pub mod opinion;
pub mod polymarket;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::config::Settings;
use crate::error::GatewayResult;
use crate::market_data::order_book::OrderBook;
use crate::market_data::types::{
    Market, Outcome, PreparedTransaction, Quote, Side, TradeFailureKind, TradeResult, VenueInfo, VenueSlug,
};
use crate::trading::keys::SigningKey;

pub use kalshi::KalshiAdapter;
pub use limitless::LimitlessAdapter;
pub use myriad::MyriadAdapter;
pub use opinion::OpinionAdapter;
pub use polymarket::PolymarketAdapter;

/// Capability set every venue implements.
///
/// Listing calls are served from a TTL cache. `execute_trade` never returns an error:
/// every failure, including a key of the wrong family, comes back as an unsuccessful `TradeResult`.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn info(&self) -> VenueInfo;

    async fn initialize(&self) -> GatewayResult<()>;
    async fn close(&self) -> GatewayResult<()>;

    async fn get_markets(&self, limit: usize, offset: usize, active_only: bool) -> GatewayResult<Vec<Market>>;
    async fn search_markets(&self, query: &str, limit: usize) -> GatewayResult<Vec<Market>>;
    async fn get_market(&self, market_id: &str) -> GatewayResult<Option<Market>>;
    async fn get_orderbook(&self, market_id: &str, outcome: Outcome) -> GatewayResult<OrderBook>;
    async fn get_quote(&self, market_id: &str, outcome: Outcome, side: Side, amount: Decimal) -> GatewayResult<Quote>;

    /// Ordered, unsigned transactions for the trade. Approvals come before the trade call.
    async fn prepare_transaction(
        &self,
        market_id: &str,
        outcome: Outcome,
        side: Side,
        amount: Decimal,
        wallet_address: &str,
    ) -> GatewayResult<(Vec<PreparedTransaction>, Quote)>;

    async fn execute_trade(&self, quote: &Quote, key: &SigningKey) -> TradeResult;

    /// Send `amount` of collateral to `fee_account` after a confirmed trade.
    /// Venues that collect fees another way return `Ok(None)`.
    async fn transfer_fee(&self, _key: &SigningKey, _fee_account: &str, _amount: Decimal) -> GatewayResult<Option<String>> {
        Ok(None)
    }

    fn slug(&self) -> VenueSlug {
        self.info().slug
    }

    fn explorer_url(&self, tx_hash: &str) -> String {
        self.info().chain.explorer_url(tx_hash)
    }
}

/// Guard shared by every adapter's `execute_trade`.
pub(crate) fn check_key_family(info: &VenueInfo, quote: &Quote, key: &SigningKey) -> Option<TradeResult> {
    let expected = info.chain.family();
    if key.family() == expected {
        return None;
    }
    let name = match expected {
        crate::market_data::types::ChainFamily::Ledger => "ed25519 keypair",
        crate::market_data::types::ChainFamily::Evm => "EVM private key",
    };
    Some(TradeResult::failed(
        quote,
        TradeFailureKind::InvalidKeyType,
        format!("Invalid key type, expected {name}"),
    ))
}

/// Convert an execution error into the soft-failure shape, keeping the raw error text.
pub(crate) fn failed_from(quote: &Quote, e: &crate::error::GatewayError) -> TradeResult {
    use crate::error::GatewayError;
    let kind = match e {
        GatewayError::InsufficientQuoteData { .. } => TradeFailureKind::InsufficientQuoteData,
        GatewayError::InvalidKeyType { .. } => TradeFailureKind::InvalidKeyType,
        GatewayError::TransactionReverted { .. } => TradeFailureKind::TransactionReverted,
        _ => TradeFailureKind::Venue,
    };
    TradeResult::failed(quote, kind, e.to_string())
}

/// Slice a cached list the way every venue pages its listings.
pub(crate) fn page(markets: &[Market], limit: usize, offset: usize, active_only: bool) -> Vec<Market> {
    markets
        .iter()
        .filter(|m| !active_only || m.is_active)
        .skip(offset)
        .take(limit)
        .cloned()
        .collect()
}

pub(crate) fn search(markets: &[Market], query: &str, limit: usize) -> Vec<Market> {
    markets
        .iter()
        .filter(|m| m.matches_query(query))
        .take(limit)
        .cloned()
        .collect()
}

/// Best live price for a side, falling back to the market's last known price, then 0.5.
pub(crate) fn live_price(book: Option<&OrderBook>, market: &Market, outcome: Outcome, side: Side) -> Decimal {
    let from_book = book.and_then(|b| match side {
        Side::Buy => b.best_ask(),
        Side::Sell => b.best_bid(),
    });
    from_book
        .or_else(|| market.price(outcome))
        .filter(|p| *p > Decimal::ZERO)
        .unwrap_or(Decimal::new(5, 1))
}

pub(crate) fn trade_description(side: Side, outcome: Outcome, market_id: &str) -> String {
    format!(
        "{} {} on {}",
        side.as_str().to_uppercase(),
        outcome.as_str().to_uppercase(),
        market_id
    )
}

/// Buy spends collateral for shares, sell spends shares for collateral.
pub(crate) fn expected_output(side: Side, amount: Decimal, price: Decimal) -> Decimal {
    match side {
        Side::Buy if price > Decimal::ZERO => amount / price,
        Side::Buy => Decimal::ZERO,
        Side::Sell => amount * price,
    }
}

/// One variant per venue; venue-specific state stays inside each variant.
pub enum Adapter {
    Kalshi(KalshiAdapter),
    Polymarket(PolymarketAdapter),
    Limitless(LimitlessAdapter),
    Opinion(OpinionAdapter),
    Myriad(MyriadAdapter),
}

impl Adapter {
    pub fn build(slug: VenueSlug, settings: &Settings) -> Self {
        match slug {
            VenueSlug::Kalshi => Adapter::Kalshi(KalshiAdapter::new(settings)),
            VenueSlug::Polymarket => Adapter::Polymarket(PolymarketAdapter::new(settings)),
            VenueSlug::Limitless => Adapter::Limitless(LimitlessAdapter::new(settings)),
            VenueSlug::Opinion => Adapter::Opinion(OpinionAdapter::new(settings)),
            VenueSlug::Myriad => Adapter::Myriad(MyriadAdapter::new(settings)),
        }
    }

    fn inner(&self) -> &dyn VenueAdapter {
        match self {
            Adapter::Kalshi(a) => a,
            Adapter::Polymarket(a) => a,
            Adapter::Limitless(a) => a,
            Adapter::Opinion(a) => a,
            Adapter::Myriad(a) => a,
        }
    }
}

#[async_trait]
impl VenueAdapter for Adapter {
    fn info(&self) -> VenueInfo {
        self.inner().info()
    }

    async fn initialize(&self) -> GatewayResult<()> {
        self.inner().initialize().await
    }

    async fn close(&self) -> GatewayResult<()> {
        self.inner().close().await
    }

    async fn get_markets(&self, limit: usize, offset: usize, active_only: bool) -> GatewayResult<Vec<Market>> {
        self.inner().get_markets(limit, offset, active_only).await
    }

    async fn search_markets(&self, query: &str, limit: usize) -> GatewayResult<Vec<Market>> {
        self.inner().search_markets(query, limit).await
    }

    async fn get_market(&self, market_id: &str) -> GatewayResult<Option<Market>> {
        self.inner().get_market(market_id).await
    }

    async fn get_orderbook(&self, market_id: &str, outcome: Outcome) -> GatewayResult<OrderBook> {
        self.inner().get_orderbook(market_id, outcome).await
    }

    async fn get_quote(&self, market_id: &str, outcome: Outcome, side: Side, amount: Decimal) -> GatewayResult<Quote> {
        self.inner().get_quote(market_id, outcome, side, amount).await
    }

    async fn prepare_transaction(
        &self,
        market_id: &str,
        outcome: Outcome,
        side: Side,
        amount: Decimal,
        wallet_address: &str,
    ) -> GatewayResult<(Vec<PreparedTransaction>, Quote)> {
        self.inner()
            .prepare_transaction(market_id, outcome, side, amount, wallet_address)
            .await
    }

    async fn execute_trade(&self, quote: &Quote, key: &SigningKey) -> TradeResult {
        self.inner().execute_trade(quote, key).await
    }

    async fn transfer_fee(&self, key: &SigningKey, fee_account: &str, amount: Decimal) -> GatewayResult<Option<String>> {
        self.inner().transfer_fee(key, fee_account, amount).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::types::{Chain, ChainFamily};
    use rust_decimal_macros::dec;

    fn market(yes: Option<Decimal>) -> Market {
        let mut m = Market::new(VenueSlug::Polymarket, Chain::Polygon, "m", "M");
        m.yes_price = yes;
        m
    }

    #[test]
    fn test_live_price_fallbacks() {
        let book = OrderBook::from_levels("m", Outcome::Yes, [(dec!(0.4), dec!(1))], [(dec!(0.45), dec!(1))]);
        assert_eq!(live_price(Some(&book), &market(None), Outcome::Yes, Side::Buy), dec!(0.45));
        assert_eq!(live_price(Some(&book), &market(None), Outcome::Yes, Side::Sell), dec!(0.4));

        let empty = OrderBook::empty("m", Outcome::Yes);
        assert_eq!(live_price(Some(&empty), &market(Some(dec!(0.3))), Outcome::Yes, Side::Buy), dec!(0.3));
        assert_eq!(live_price(None, &market(None), Outcome::Yes, Side::Buy), dec!(0.5));
        assert_eq!(live_price(None, &market(Some(dec!(0))), Outcome::Yes, Side::Buy), dec!(0.5));
    }

    #[test]
    fn test_expected_output() {
        assert_eq!(expected_output(Side::Buy, dec!(10), dec!(0.4)), dec!(25));
        assert_eq!(expected_output(Side::Sell, dec!(10), dec!(0.4)), dec!(4));
        assert_eq!(expected_output(Side::Buy, dec!(10), dec!(0)), dec!(0));
    }

    #[test]
    fn test_page_and_search() {
        let mut a = market(None);
        a.market_id = "a".into();
        a.title = "Bitcoin above 100k".into();
        let mut b = market(None);
        b.market_id = "b".into();
        b.is_active = false;
        let markets = vec![a, b];

        assert_eq!(page(&markets, 10, 0, true).len(), 1);
        assert_eq!(page(&markets, 10, 1, false).len(), 1);
        assert_eq!(search(&markets, "bitcoin", 5).len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_key_family_is_a_soft_failure() {
        let settings = Settings::default();
        let adapter = Adapter::build(VenueSlug::Kalshi, &settings);
        assert_eq!(adapter.info().chain.family(), ChainFamily::Ledger);

        let evm_key = SigningKey::parse(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            ChainFamily::Evm,
        )
        .unwrap();
        let quote = Quote {
            venue: VenueSlug::Kalshi,
            chain: Chain::Solana,
            market_id: "m".into(),
            outcome: Outcome::Yes,
            side: Side::Buy,
            input_token: "in".into(),
            input_amount: dec!(5),
            output_token: "out".into(),
            expected_output: dec!(10),
            price_per_token: dec!(0.5),
            price_impact: None,
            platform_fee: None,
            network_fee_estimate: None,
            expires_at: None,
            payload: serde_json::Value::Null,
        };
        let result = adapter.execute_trade(&quote, &evm_key).await;
        assert!(!result.success);
        assert_eq!(result.failure, Some(TradeFailureKind::InvalidKeyType));
        assert_eq!(result.input_amount, dec!(5));
    }
}
