// Limitless Exchange on Base.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::evm::{self, EvmRpc, APPROVE_GAS};
use super::http::{parse_records, price_levels, VenueHttp};
use super::{
    check_key_family, expected_output, failed_from, live_price, page, search, trade_description, VenueAdapter,
};
use crate::config::Settings;
use crate::error::{GatewayError, GatewayResult};
use crate::market_data::cache::MarketCache;
use crate::market_data::fees::calculate_fee;
use crate::market_data::normaliser::{self, string_field, to_base_units};
use crate::market_data::order_book::OrderBook;
use crate::market_data::types::{
    Chain, Market, Outcome, PreparedTransaction, Quote, Side, TradeResult, VenueInfo, VenueSlug,
};
use crate::trading::keys::SigningKey;

pub const USDC: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";
const DECIMALS: u32 = 6;
const LISTING_LIMIT: u32 = 200;

fn category_label(id: &str) -> Option<&'static str> {
    Some(match id {
        "29" => "Hourly",
        "30" => "Daily",
        "31" => "Weekly",
        "2" => "Crypto",
        "1" => "Sports",
        "49" => "Football Matches",
        "23" => "Economy",
        "43" => "Pre-TGE",
        "19" => "Company News",
        _ => return None,
    })
}

pub struct LimitlessAdapter {
    http: VenueHttp,
    rpc: EvmRpc,
    cache: MarketCache,
    api_url: String,
    fee_account: String,
    fee_bps: u32,
}

impl LimitlessAdapter {
    pub fn new(settings: &Settings) -> Self {
        let cfg = &settings.limitless;
        let bearer = if cfg.api_key.is_empty() {
            String::new()
        } else {
            format!("Bearer {}", cfg.api_key)
        };
        Self {
            http: VenueHttp::new(VenueSlug::Limitless, &settings.http).with_header("authorization", &bearer),
            rpc: EvmRpc::new(VenueSlug::Limitless, Chain::Base, settings.rpc.base.clone()),
            cache: MarketCache::new(cfg.cache_ttl),
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            fee_account: settings.fees.evm_fee_account.clone(),
            fee_bps: settings.fees.evm_fee_bps,
        }
    }

    fn parse_market(data: &Value) -> Option<Market> {
        let slug = string_field(data, &["slug", "id"])?;
        let title = string_field(data, &["title", "question"]).unwrap_or_default();
        let mut m = Market::new(VenueSlug::Limitless, Chain::Base, slug.clone(), title);

        let outcomes = data.get("outcomes").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
        if let [yes, no, ..] = outcomes {
            m.yes_price = normaliser::field(yes, &["price"]);
            m.no_price = normaliser::field(no, &["price"]);
        } else if let Some(yes) = normaliser::field(data, &["yes_price"]) {
            m.yes_price = Some(yes);
            m.no_price = Some(Decimal::ONE - yes);
        }
        m.yes_token = outcomes
            .first()
            .and_then(|o| string_field(o, &["token_id"]))
            .or_else(|| string_field(data, &["yes_token_id"]));
        m.no_token = outcomes
            .get(1)
            .and_then(|o| string_field(o, &["token_id"]))
            .or_else(|| string_field(data, &["no_token_id"]));

        let category_id = string_field(data, &["category_id"]).unwrap_or_default();
        m.category = category_label(&category_id)
            .map(str::to_string)
            .or_else(|| string_field(data, &["category"]));
        m.event_id = string_field(data, &["event_slug"]);
        m.description = string_field(data, &["description"]);
        m.volume_24h = normaliser::field(data, &["volume"]).filter(|v| !v.is_zero());
        m.liquidity = normaliser::field(data, &["liquidity"]).filter(|v| !v.is_zero());
        m.is_active = match data.get("status").and_then(Value::as_str) {
            None => true,
            Some(s) => s == "active" || s == "open",
        };
        m.close_time = string_field(data, &["end_date", "endDate", "expirationDate"]);
        m.collateral_token = Some("USDC".into());
        m.url = Some(format!("https://limitless.exchange/markets/{slug}"));
        m.raw = data.clone();
        Some(m)
    }

    async fn fetch_all_markets(&self) -> GatewayResult<Vec<Market>> {
        let query = [("limit", LISTING_LIMIT.to_string()), ("status", "active".to_string())];
        let data = self.http.get_json(&format!("{}/markets", self.api_url), &query).await?;
        let items = match &data {
            Value::Array(items) => items.as_slice(),
            other => other
                .get("markets")
                .or_else(|| other.get("data"))
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        };
        let markets = parse_records(VenueSlug::Limitless, items, Self::parse_market);
        info!(count = markets.len(), "limitless markets refreshed");
        Ok(markets)
    }

    async fn markets(&self) -> GatewayResult<Arc<Vec<Market>>> {
        self.cache.get_or_refresh(|| self.fetch_all_markets()).await
    }

    /// Exchange contract the market settles through, as published in the market payload.
    fn exchange_of(market: &Market) -> Option<String> {
        market
            .raw
            .get("venue")
            .and_then(|v| string_field(v, &["exchange"]))
            .or_else(|| string_field(&market.raw, &["exchangeAddress"]))
    }

    fn missing(field: &str) -> GatewayError {
        GatewayError::InsufficientQuoteData {
            venue: "limitless".into(),
            field: field.into(),
        }
    }

    async fn place_order(&self, quote: &Quote, signer: &alloy::signers::local::PrivateKeySigner) -> GatewayResult<String> {
        let exchange = quote.payload_str("exchange").ok_or_else(|| Self::missing("exchange"))?;
        let exchange = evm::parse_address(VenueSlug::Limitless, exchange)?;
        if quote.side == Side::Buy {
            let usdc = evm::parse_address(VenueSlug::Limitless, USDC)?;
            let needed = to_base_units(quote.input_amount, DECIMALS).ok_or_else(|| Self::missing("input_amount"))?;
            self.rpc.ensure_allowance(signer, usdc, exchange, needed).await?;
        }

        let token_id = quote.payload_str("token_id").ok_or_else(|| Self::missing("token_id"))?;
        let order = json!({
            "marketSlug": quote.market_id,
            "tokenId": token_id,
            "side": quote.side.as_str().to_uppercase(),
            "orderType": "MARKET",
            "amount": quote.input_amount.to_string(),
            "maker": signer.address().to_checksum(None),
        });
        let resp = self.http.post_json(&format!("{}/orders", self.api_url), &order).await?;
        string_field(&resp, &["transaction_hash", "transactionHash", "order_id", "id"]).ok_or_else(|| Self::missing("order_id"))
    }
}

#[async_trait]
impl VenueAdapter for LimitlessAdapter {
    fn info(&self) -> VenueInfo {
        VenueInfo {
            slug: VenueSlug::Limitless,
            chain: Chain::Base,
            name: "Limitless",
            description: "Prediction markets on Base",
            collateral_symbol: "USDC",
            collateral_decimals: DECIMALS,
        }
    }

    async fn initialize(&self) -> GatewayResult<()> {
        self.http.init()
    }

    async fn close(&self) -> GatewayResult<()> {
        self.http.close();
        self.cache.invalidate();
        Ok(())
    }

    async fn get_markets(&self, limit: usize, offset: usize, active_only: bool) -> GatewayResult<Vec<Market>> {
        Ok(page(&self.markets().await?, limit, offset, active_only))
    }

    async fn search_markets(&self, query: &str, limit: usize) -> GatewayResult<Vec<Market>> {
        Ok(search(&self.markets().await?, query, limit))
    }

    async fn get_market(&self, market_id: &str) -> GatewayResult<Option<Market>> {
        if let Some(m) = self.markets().await?.iter().find(|m| m.market_id == market_id) {
            return Ok(Some(m.clone()));
        }
        match self.http.get_json(&format!("{}/markets/{}", self.api_url, market_id), &[]).await {
            Ok(data) => Ok(Self::parse_market(&data)),
            Err(e) => {
                debug!(market_id, error = %e, "limitless market lookup failed");
                Ok(None)
            }
        }
    }

    /// Degrades to an empty book when the venue has none for this market.
    async fn get_orderbook(&self, market_id: &str, outcome: Outcome) -> GatewayResult<OrderBook> {
        let url = format!("{}/markets/{}/orderbook", self.api_url, market_id);
        match self.http.get_json(&url, &[]).await {
            Ok(data) => Ok(OrderBook::from_levels(
                market_id,
                outcome,
                price_levels(&data, "bids"),
                price_levels(&data, "asks"),
            )),
            Err(e) => {
                debug!(market_id, error = %e, "limitless orderbook unavailable, using empty book");
                Ok(OrderBook::empty(market_id, outcome))
            }
        }
    }

    #[instrument(skip(self), fields(venue = "limitless"))]
    async fn get_quote(&self, market_id: &str, outcome: Outcome, side: Side, amount: Decimal) -> GatewayResult<Quote> {
        let market = self
            .get_market(market_id)
            .await?
            .ok_or_else(|| GatewayError::market_not_found("limitless", market_id))?;
        let book = self.get_orderbook(market_id, outcome).await?;
        let price = live_price(Some(&book), &market, outcome, side);
        let token_id = market.token(outcome).unwrap_or_default().to_string();

        let (input_token, output_token) = match side {
            Side::Buy => (USDC.to_string(), token_id.clone()),
            Side::Sell => (token_id.clone(), USDC.to_string()),
        };
        Ok(Quote {
            venue: VenueSlug::Limitless,
            chain: Chain::Base,
            market_id: market_id.to_string(),
            outcome,
            side,
            input_token,
            input_amount: amount,
            output_token,
            expected_output: expected_output(side, amount, price),
            price_per_token: price,
            price_impact: book.spread(),
            platform_fee: Some(calculate_fee(amount, self.fee_bps)),
            network_fee_estimate: Some(Decimal::new(5, 4)),
            expires_at: None,
            payload: json!({
                "token_id": token_id,
                "market_id": market_id,
                "exchange": Self::exchange_of(&market),
            }),
        })
    }

    async fn prepare_transaction(
        &self,
        market_id: &str,
        outcome: Outcome,
        side: Side,
        amount: Decimal,
        _wallet_address: &str,
    ) -> GatewayResult<(Vec<PreparedTransaction>, Quote)> {
        let quote = self.get_quote(market_id, outcome, side, amount).await?;
        let exchange_str = quote.payload_str("exchange").ok_or_else(|| Self::missing("exchange"))?;
        let exchange = evm::parse_address(VenueSlug::Limitless, exchange_str)?;
        let usdc = evm::parse_address(VenueSlug::Limitless, USDC)?;
        let raw = to_base_units(amount, DECIMALS)
            .ok_or_else(|| GatewayError::InvalidOutcomeOrSide(format!("invalid amount {amount}")))?;

        let mut txs = vec![
            evm::approve_tx(usdc, exchange, raw, Chain::Base, APPROVE_GAS, "Approve USDC for Limitless exchange"),
            evm::order_tx(
                exchange_str,
                quote.payload_str("token_id"),
                Chain::Base,
                trade_description(side, outcome, market_id),
            ),
        ];
        if self.fee_bps > 0 && !self.fee_account.is_empty() {
            let fee_account = evm::parse_address(VenueSlug::Limitless, &self.fee_account)?;
            let fee_raw = to_base_units(calculate_fee(amount, self.fee_bps), DECIMALS).unwrap_or_default();
            txs.push(evm::fee_approval_tx(usdc, fee_account, fee_raw, Chain::Base, self.fee_bps));
        }
        Ok((txs, quote))
    }

    async fn execute_trade(&self, quote: &Quote, key: &SigningKey) -> TradeResult {
        if let Some(rejected) = check_key_family(&self.info(), quote, key) {
            return rejected;
        }
        let SigningKey::Evm(signer) = key else {
            return failed_from(quote, &GatewayError::InvalidKeyType { expected: "EVM private key" });
        };
        match self.place_order(quote, signer).await {
            Ok(tx) => {
                info!(market_id = %quote.market_id, tx = %tx, "limitless order placed");
                let url = tx.starts_with("0x").then(|| self.explorer_url(&tx));
                TradeResult::confirmed(quote, tx, url)
            }
            Err(e) => {
                warn!(market_id = %quote.market_id, error = %e, "limitless trade failed");
                failed_from(quote, &e)
            }
        }
    }

    async fn transfer_fee(&self, key: &SigningKey, fee_account: &str, amount: Decimal) -> GatewayResult<Option<String>> {
        self.rpc.collect_fee(key, USDC, DECIMALS, fee_account, amount).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EXCHANGE: &str = "0xa4409D988CA2218d956BeEFD3874100F444f0DC3";
    const FEE_ACCOUNT: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    async fn server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [
                {
                    "slug": "btc-above-100k",
                    "title": "BTC above 100k by Friday?",
                    "category_id": 30,
                    "outcomes": [{"price": 0.62, "token_id": "11"}, {"price": 0.4, "token_id": "12"}],
                    "volume": "1200",
                    "status": "active",
                    "venue": {"exchange": EXCHANGE}
                },
                {"id": 77, "title": "Rate cut?", "yes_price": "0.3", "category": "Macro", "status": "resolved"},
                {"title": "no identifier"}
            ]})))
            .mount(&server)
            .await;
        server
    }

    fn adapter(server: &MockServer, fee_account: &str) -> LimitlessAdapter {
        let mut settings = Settings::default();
        settings.limitless.api_url = server.uri();
        settings.fees.evm_fee_account = fee_account.into();
        LimitlessAdapter::new(&settings)
    }

    #[tokio::test]
    async fn test_listing_parse() {
        let server = server().await;
        let markets = adapter(&server, "").get_markets(10, 0, false).await.unwrap();
        assert_eq!(markets.len(), 2);
        assert_eq!(markets[0].category.as_deref(), Some("Daily"));
        assert_eq!(markets[0].yes_token.as_deref(), Some("11"));
        assert_eq!(markets[0].url.as_deref(), Some("https://limitless.exchange/markets/btc-above-100k"));
        assert_eq!(markets[1].market_id, "77");
        assert_eq!(markets[1].category.as_deref(), Some("Macro"));
        assert_eq!(markets[1].no_price, Some(dec!(0.7)));
        assert!(!markets[1].is_active);

        let active = adapter(&server, "").get_markets(10, 0, true).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_close_drops_cached_markets() {
        let server = server().await;
        let limitless = adapter(&server, "");
        limitless.get_markets(10, 0, false).await.unwrap();
        assert!(limitless.cache.peek().is_some());
        limitless.close().await.unwrap();
        assert!(limitless.cache.peek().is_none());
    }

    #[tokio::test]
    async fn test_orderbook_failure_falls_back_to_market_price() {
        let server = server().await;
        Mock::given(method("GET"))
            .and(path("/markets/btc-above-100k/orderbook"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let quote = adapter(&server, "")
            .get_quote("btc-above-100k", Outcome::Yes, Side::Buy, dec!(31))
            .await
            .unwrap();
        assert_eq!(quote.price_per_token, dec!(0.62));
        assert_eq!(quote.expected_output, dec!(50));
        assert_eq!(quote.price_impact, None);
        assert_eq!(quote.network_fee_estimate, Some(dec!(0.0005)));
        assert_eq!(quote.payload_str("exchange"), Some(EXCHANGE));
    }

    #[tokio::test]
    async fn test_prepare_appends_fee_approval() {
        let server = server().await;
        Mock::given(method("GET"))
            .and(path("/markets/btc-above-100k/orderbook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bids": [{"price": "0.55", "size": "10"}],
                "asks": [{"price": "0.60", "size": "10"}]
            })))
            .mount(&server)
            .await;

        let (txs, quote) = adapter(&server, FEE_ACCOUNT)
            .prepare_transaction("btc-above-100k", Outcome::Yes, Side::Buy, dec!(30), "0xwallet")
            .await
            .unwrap();
        assert_eq!(quote.price_per_token, dec!(0.60));
        assert_eq!(txs.len(), 3);
        assert_eq!(txs[0].description, "Approve USDC for Limitless exchange");
        assert_eq!(txs[1].to, EXCHANGE);
        assert_eq!(txs[1].chain_id, 8453);
        assert!(txs[2].data.starts_with("0x095ea7b3"));
        assert!(txs[2].data.contains(&FEE_ACCOUNT[2..].to_lowercase()));
        // 0.15 USDC in base units
        assert!(txs[2].data.ends_with(&format!("{:064x}", 150_000u64)[56..]));

        let (no_fee, _) = adapter(&server, "")
            .prepare_transaction("btc-above-100k", Outcome::Yes, Side::Buy, dec!(30), "0xwallet")
            .await
            .unwrap();
        assert_eq!(no_fee.len(), 2);
    }

    #[tokio::test]
    async fn test_prepare_without_exchange_is_incomplete() {
        let server = server().await;
        Mock::given(method("GET"))
            .and(path("/markets/77/orderbook"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let err = adapter(&server, "")
            .prepare_transaction("77", Outcome::No, Side::Buy, dec!(1), "0xwallet")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InsufficientQuoteData { .. }));
    }
}
