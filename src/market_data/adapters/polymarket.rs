// Polymarket: gamma API for listings, CLOB for books and order placement, Polygon for approvals.

use alloy::primitives::U256;
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
use crate::market_data::normaliser::{self, decimal, string_field, string_list, to_base_units};
use crate::market_data::order_book::OrderBook;
use crate::market_data::types::{
    Chain, Market, Outcome, PreparedTransaction, Quote, Side, TradeResult, VenueInfo, VenueSlug,
};
use crate::trading::keys::SigningKey;

pub const EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";
pub const NEG_RISK_EXCHANGE: &str = "0xC5d563A36AE78145C45a50134d48A1215220f80a";
pub const USDC: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";
const DECIMALS: u32 = 6;
const LISTING_LIMIT: u32 = 2000;

pub struct PolymarketAdapter {
    clob: VenueHttp,
    gamma: VenueHttp,
    rpc: EvmRpc,
    cache: MarketCache,
    clob_url: String,
    gamma_url: String,
    fee_bps: u32,
}

fn is_open(m: &Value) -> bool {
    m.get("active").and_then(Value::as_bool).unwrap_or(true) && !m.get("closed").and_then(Value::as_bool).unwrap_or(false)
}

impl PolymarketAdapter {
    pub fn new(settings: &Settings) -> Self {
        let cfg = &settings.polymarket;
        let clob = VenueHttp::new(VenueSlug::Polymarket, &settings.http)
            .with_header("poly-builder-api-key", &cfg.builder_key)
            .with_header("poly-builder-secret", &cfg.builder_secret)
            .with_header("poly-builder-passphrase", &cfg.builder_passphrase);
        Self {
            clob,
            gamma: VenueHttp::new(VenueSlug::Polymarket, &settings.http),
            rpc: EvmRpc::new(VenueSlug::Polymarket, Chain::Polygon, settings.rpc.polygon.clone()),
            cache: MarketCache::new(cfg.cache_ttl),
            clob_url: cfg.clob_url.trim_end_matches('/').to_string(),
            gamma_url: cfg.gamma_url.trim_end_matches('/').to_string(),
            fee_bps: settings.fees.evm_fee_bps,
        }
    }

    /// One market per event. Multi-market events are represented by their first open market.
    fn parse_event(event: &Value) -> Option<Market> {
        let event_markets = event.get("markets").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
        let is_multi = event_markets.len() > 1;
        let (m, outcome_name) = if is_multi {
            let chosen = event_markets.iter().find(|m| is_open(m))?;
            (chosen, string_field(chosen, &["groupItemTitle"]))
        } else {
            (event_markets.first().unwrap_or(event), None)
        };

        let market_id = string_field(m, &["conditionId", "id"]).or_else(|| string_field(event, &["id"]))?;
        let title = string_field(event, &["title"])
            .or_else(|| string_field(m, &["question"]))
            .unwrap_or_default();
        let mut market = Market::new(VenueSlug::Polymarket, Chain::Polygon, market_id, title);

        let prices: Vec<Decimal> = m
            .get("outcomePrices")
            .map(string_list)
            .unwrap_or_default()
            .iter()
            .filter_map(|p| normaliser::parse_decimal_str(p))
            .collect();
        if let [yes, no, ..] = prices.as_slice() {
            market.yes_price = Some(*yes);
            market.no_price = Some(*no);
        } else if let Some(last) = m.get("lastTradePrice").and_then(decimal) {
            market.yes_price = Some(last);
            market.no_price = Some(Decimal::ONE - last);
        }

        let tokens = m.get("clobTokenIds").map(string_list).unwrap_or_default();
        market.yes_token = tokens.first().cloned();
        market.no_token = tokens.get(1).cloned();

        let slug = string_field(event, &["slug"]).unwrap_or_default();
        market.event_id = string_field(event, &["id", "slug"]);
        market.description = string_field(m, &["description"]).or_else(|| string_field(event, &["description"]));
        market.category = event
            .get("tags")
            .and_then(Value::as_array)
            .and_then(|t| t.first())
            .and_then(|t| string_field(t, &["label"]));
        market.volume_24h = normaliser::field(m, &["volume", "volumeNum"]).or_else(|| normaliser::field(event, &["volume"]));
        market.liquidity = normaliser::field(m, &["liquidity"]).or_else(|| normaliser::field(event, &["liquidity"]));
        market.is_active = is_open(m);
        market.close_time = string_field(m, &["endDate"]).or_else(|| string_field(event, &["endDate"]));
        market.is_multi_outcome = is_multi;
        market.related_market_count = if is_multi { event_markets.len() } else { 0 };
        market.outcome_name = outcome_name;
        market.collateral_token = Some("USDC.e".into());
        market.url = Some(format!("https://polymarket.com/event/{slug}"));
        market.raw = json!({"event": event, "market": m});
        Some(market)
    }

    async fn fetch_all_markets(&self) -> GatewayResult<Vec<Market>> {
        let query = [
            ("limit", LISTING_LIMIT.to_string()),
            ("order", "volume24hr".to_string()),
            ("ascending", "false".to_string()),
            ("active", "true".to_string()),
            ("closed", "false".to_string()),
        ];
        let data = self.gamma.get_json(&format!("{}/events", self.gamma_url), &query).await?;
        let events = data.as_array().map(Vec::as_slice).unwrap_or(&[]);
        let markets = parse_records(VenueSlug::Polymarket, events, Self::parse_event);
        info!(count = markets.len(), "polymarket markets refreshed");
        Ok(markets)
    }

    async fn markets(&self) -> GatewayResult<Arc<Vec<Market>>> {
        self.cache.get_or_refresh(|| self.fetch_all_markets()).await
    }

    async fn require_market(&self, market_id: &str) -> GatewayResult<Market> {
        self.get_market(market_id)
            .await?
            .ok_or_else(|| GatewayError::market_not_found("polymarket", market_id))
    }

    fn exchange_for(neg_risk: bool) -> &'static str {
        if neg_risk {
            NEG_RISK_EXCHANGE
        } else {
            EXCHANGE
        }
    }

    async fn place_order(&self, quote: &Quote, signer: &alloy::signers::local::PrivateKeySigner) -> GatewayResult<String> {
        let exchange = evm::parse_address(VenueSlug::Polymarket, Self::exchange_for(quote.payload_bool("neg_risk")))?;
        let usdc = evm::parse_address(VenueSlug::Polymarket, USDC)?;
        let needed = to_base_units(quote.input_amount, DECIMALS).unwrap_or(U256::MAX);
        self.rpc.ensure_allowance(signer, usdc, exchange, needed).await?;

        let token_id = quote.payload_str("token_id").ok_or_else(|| GatewayError::InsufficientQuoteData {
            venue: "polymarket".into(),
            field: "token_id".into(),
        })?;
        let order = json!({
            "tokenID": token_id,
            "price": quote.price_per_token.to_string(),
            "size": quote.input_amount.to_string(),
            "side": quote.side.as_str().to_uppercase(),
            "maker": signer.address().to_checksum(None),
        });
        let resp = self.clob.post_json(&format!("{}/order", self.clob_url), &order).await?;
        string_field(&resp, &["transactionHash", "orderID"]).ok_or_else(|| GatewayError::InsufficientQuoteData {
            venue: "polymarket".into(),
            field: "orderID".into(),
        })
    }
}

#[async_trait]
impl VenueAdapter for PolymarketAdapter {
    fn info(&self) -> VenueInfo {
        VenueInfo {
            slug: VenueSlug::Polymarket,
            chain: Chain::Polygon,
            name: "Polymarket",
            description: "World's largest prediction market on Polygon",
            collateral_symbol: "USDC",
            collateral_decimals: DECIMALS,
        }
    }

    async fn initialize(&self) -> GatewayResult<()> {
        self.clob.init()?;
        self.gamma.init()
    }

    async fn close(&self) -> GatewayResult<()> {
        self.clob.close();
        self.gamma.close();
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
        let query = [("condition_ids", market_id.to_string()), ("limit", "1".to_string())];
        match self.gamma.get_json(&format!("{}/markets", self.gamma_url), &query).await {
            Ok(data) => Ok(data
                .as_array()
                .and_then(|a| a.first())
                .and_then(|m| Self::parse_event(&json!({"title": m.get("question"), "markets": [m]})))),
            Err(e) => {
                debug!(market_id, error = %e, "polymarket market lookup failed");
                Ok(None)
            }
        }
    }

    async fn get_orderbook(&self, market_id: &str, outcome: Outcome) -> GatewayResult<OrderBook> {
        let market = self.require_market(market_id).await?;
        let token_id = market
            .token(outcome)
            .ok_or_else(|| GatewayError::platform("polymarket", format!("Token ID not found for {outcome}")))?;

        let data = self
            .clob
            .get_json(&format!("{}/book", self.clob_url), &[("token_id", token_id.to_string())])
            .await?;
        Ok(OrderBook::from_levels(
            market_id,
            outcome,
            price_levels(&data, "bids"),
            price_levels(&data, "asks"),
        ))
    }

    #[instrument(skip(self), fields(venue = "polymarket"))]
    async fn get_quote(&self, market_id: &str, outcome: Outcome, side: Side, amount: Decimal) -> GatewayResult<Quote> {
        let market = self.require_market(market_id).await?;
        let token_id = market
            .token(outcome)
            .ok_or_else(|| GatewayError::platform("polymarket", format!("Token not found for {outcome}")))?
            .to_string();

        let book = self.get_orderbook(market_id, outcome).await?;
        let price = live_price(Some(&book), &market, outcome, side);
        let neg_risk = market
            .raw
            .get("market")
            .and_then(|m| m.get("negRisk"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let (input_token, output_token) = match side {
            Side::Buy => (USDC.to_string(), token_id.clone()),
            Side::Sell => (token_id.clone(), USDC.to_string()),
        };
        Ok(Quote {
            venue: VenueSlug::Polymarket,
            chain: Chain::Polygon,
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
            network_fee_estimate: Some(Decimal::new(1, 2)),
            expires_at: None,
            payload: json!({"token_id": token_id, "neg_risk": neg_risk}),
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
        let exchange_str = Self::exchange_for(quote.payload_bool("neg_risk"));
        let exchange = evm::parse_address(VenueSlug::Polymarket, exchange_str)?;
        let usdc = evm::parse_address(VenueSlug::Polymarket, USDC)?;
        let raw = to_base_units(amount, DECIMALS)
            .ok_or_else(|| GatewayError::InvalidOutcomeOrSide(format!("invalid amount {amount}")))?;

        let txs = vec![
            evm::approve_tx(usdc, exchange, raw, Chain::Polygon, APPROVE_GAS, "Approve USDC for Polymarket exchange"),
            evm::order_tx(
                exchange_str,
                quote.payload_str("token_id"),
                Chain::Polygon,
                trade_description(side, outcome, market_id),
            ),
        ];
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
                info!(market_id = %quote.market_id, tx = %tx, "polymarket order placed");
                let url = tx.starts_with("0x").then(|| self.explorer_url(&tx));
                TradeResult::confirmed(quote, tx, url)
            }
            Err(e) => {
                warn!(market_id = %quote.market_id, error = %e, "polymarket trade failed");
                failed_from(quote, &e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn events() -> Value {
        json!([
            {
                "id": "100",
                "slug": "btc-150k",
                "title": "Will BTC hit 150k?",
                "tags": [{"label": "Crypto"}],
                "markets": [{
                    "conditionId": "0xabc",
                    "outcomePrices": "[\"0.35\", \"0.65\"]",
                    "clobTokenIds": "[\"111\", \"222\"]",
                    "volume": "5000",
                    "negRisk": false
                }]
            },
            {
                "id": "200",
                "slug": "election",
                "title": "Who wins the election?",
                "markets": [
                    {"conditionId": "0xclosed", "groupItemTitle": "Old", "closed": true},
                    {"conditionId": "0xdef", "groupItemTitle": "Candidate B", "lastTradePrice": 0.2,
                     "clobTokenIds": ["333", "444"], "negRisk": true},
                    {"conditionId": "0xghi", "groupItemTitle": "Candidate C"}
                ]
            },
            {"id": "300", "markets": [{"closed": true}, {"closed": true}]}
        ])
    }

    async fn server_with_events() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("limit", "2000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(events()))
            .mount(&server)
            .await;
        server
    }

    fn adapter(server: &MockServer) -> PolymarketAdapter {
        let mut settings = Settings::default();
        settings.polymarket.gamma_url = server.uri();
        settings.polymarket.clob_url = server.uri();
        PolymarketAdapter::new(&settings)
    }

    #[tokio::test]
    async fn test_events_parse_into_markets() {
        let server = server_with_events().await;
        let markets = adapter(&server).get_markets(10, 0, false).await.unwrap();
        assert_eq!(markets.len(), 2);

        let btc = &markets[0];
        assert_eq!(btc.market_id, "0xabc");
        assert_eq!(btc.yes_price, Some(dec!(0.35)));
        assert_eq!(btc.no_price, Some(dec!(0.65)));
        assert_eq!(btc.yes_token.as_deref(), Some("111"));
        assert_eq!(btc.category.as_deref(), Some("Crypto"));
        assert_eq!(btc.url.as_deref(), Some("https://polymarket.com/event/btc-150k"));
        assert!(!btc.is_multi_outcome);

        let election = &markets[1];
        assert_eq!(election.market_id, "0xdef");
        assert!(election.is_multi_outcome);
        assert_eq!(election.related_market_count, 3);
        assert_eq!(election.outcome_name.as_deref(), Some("Candidate B"));
        assert_eq!(election.yes_price, Some(dec!(0.2)));
        assert_eq!(election.no_price, Some(dec!(0.8)));
    }

    #[tokio::test]
    async fn test_quote_prices_from_book_then_market() {
        let server = server_with_events().await;
        Mock::given(method("GET"))
            .and(path("/book"))
            .and(query_param("token_id", "111"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bids": [{"price": "0.30", "size": "100"}],
                "asks": [{"price": "0.40", "size": "50"}, {"price": "0.38", "size": "10"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/book"))
            .and(query_param("token_id", "222"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bids": [], "asks": []})))
            .mount(&server)
            .await;

        let poly = adapter(&server);
        let quote = poly.get_quote("0xabc", Outcome::Yes, Side::Buy, dec!(19)).await.unwrap();
        assert_eq!(quote.price_per_token, dec!(0.38));
        assert_eq!(quote.expected_output, dec!(50));
        assert_eq!(quote.platform_fee, Some(dec!(0.095)));
        assert_eq!(quote.price_impact, Some(dec!(0.08)));
        assert_eq!(quote.payload_str("token_id"), Some("111"));

        let no = poly.get_quote("0xabc", Outcome::No, Side::Sell, dec!(10)).await.unwrap();
        assert_eq!(no.price_per_token, dec!(0.65));
        assert_eq!(no.expected_output, dec!(6.5));
        assert_eq!(no.output_token, USDC);
    }

    #[tokio::test]
    async fn test_prepare_routes_neg_risk_markets() {
        let server = server_with_events().await;
        Mock::given(method("GET"))
            .and(path("/book"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bids": [], "asks": []})))
            .mount(&server)
            .await;

        let (txs, quote) = adapter(&server)
            .prepare_transaction("0xdef", Outcome::Yes, Side::Buy, dec!(4), "0xwallet")
            .await
            .unwrap();
        assert!(quote.payload_bool("neg_risk"));
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].to, USDC);
        assert!(txs[0].data.starts_with("0x095ea7b3"));
        assert!(txs[0].data.to_lowercase().contains(&NEG_RISK_EXCHANGE[2..].to_lowercase()));
        assert_eq!(txs[1].to, NEG_RISK_EXCHANGE);
        assert_eq!(txs[1].gas.as_deref(), Some("300000"));
        assert_eq!(txs[1].description, "BUY YES on 0xdef");
        assert!(txs[1].data.ends_with("014d"));
    }

    #[tokio::test]
    async fn test_unknown_market_is_not_found() {
        let server = server_with_events().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        let err = adapter(&server)
            .get_quote("0xmissing", Outcome::Yes, Side::Buy, dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MarketNotFound { .. }));
    }
}
