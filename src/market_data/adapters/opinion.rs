// Opinion on BNB Smart Chain. Collateral is USDT with 18 decimals; trading needs both the
// exchange and the conditional-tokens contract approved.

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

pub const USDT: &str = "0x55d398326f99059fF775485246999027B3197955";
pub const CTF_EXCHANGE: &str = "0x5F45344126D6488025B0b84A3A8189F2487a7246";
pub const CONDITIONAL_TOKENS: &str = "0xbB5f35D40132A0478f6aa91e79962e9F752167EA";
const DECIMALS: u32 = 18;
const LISTING_LIMIT: u32 = 200;

pub struct OpinionAdapter {
    http: VenueHttp,
    rpc: EvmRpc,
    cache: MarketCache,
    api_url: String,
    multi_sig_addr: String,
    fee_account: String,
    fee_bps: u32,
}

impl OpinionAdapter {
    pub fn new(settings: &Settings) -> Self {
        let cfg = &settings.opinion;
        Self {
            http: VenueHttp::new(VenueSlug::Opinion, &settings.http).with_header("x-api-key", &cfg.api_key),
            rpc: EvmRpc::new(VenueSlug::Opinion, Chain::Bsc, settings.rpc.bsc.clone()),
            cache: MarketCache::new(cfg.cache_ttl),
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            multi_sig_addr: cfg.multi_sig_addr.clone(),
            fee_account: settings.fees.evm_fee_account.clone(),
            fee_bps: settings.fees.evm_fee_bps,
        }
    }

    fn parse_market(data: &Value) -> Option<Market> {
        let market_id = string_field(data, &["id", "market_id"])?;
        let title = string_field(data, &["title", "question"]).unwrap_or_default();
        let mut m = Market::new(VenueSlug::Opinion, Chain::Bsc, market_id.clone(), title);

        let outcomes = data.get("outcomes").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
        if let [yes, no, ..] = outcomes {
            m.yes_price = normaliser::field(yes, &["price"]);
            m.no_price = normaliser::field(no, &["price"]);
        } else if let Some(yes) = normaliser::field(data, &["yes_price"]).filter(|p| !p.is_zero()) {
            m.yes_price = Some(yes);
            m.no_price = Some(normaliser::field(data, &["no_price"]).unwrap_or(Decimal::ONE - yes));
        }
        m.yes_token = outcomes.first().and_then(|o| string_field(o, &["token_id"]));
        m.no_token = outcomes.get(1).and_then(|o| string_field(o, &["token_id"]));

        m.category = string_field(data, &["category"]);
        m.description = string_field(data, &["description"]);
        m.volume_24h = normaliser::field(data, &["volume"]).filter(|v| !v.is_zero());
        m.liquidity = normaliser::field(data, &["liquidity"]).filter(|v| !v.is_zero());
        m.is_active = match data.get("status").and_then(Value::as_str) {
            None => true,
            Some(s) => s == "active" || s == "open",
        };
        m.close_time = string_field(data, &["end_date", "endDate"]);
        m.collateral_token = Some("USDT".into());
        m.url = Some(format!("https://opinion.trade/market/{market_id}"));
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
        let markets = parse_records(VenueSlug::Opinion, items, Self::parse_market);
        info!(count = markets.len(), "opinion markets refreshed");
        Ok(markets)
    }

    async fn markets(&self) -> GatewayResult<Arc<Vec<Market>>> {
        self.cache.get_or_refresh(|| self.fetch_all_markets()).await
    }

    fn missing(field: &str) -> GatewayError {
        GatewayError::InsufficientQuoteData {
            venue: "opinion".into(),
            field: field.into(),
        }
    }

    async fn place_order(&self, quote: &Quote, signer: &alloy::signers::local::PrivateKeySigner) -> GatewayResult<String> {
        let usdt = evm::parse_address(VenueSlug::Opinion, USDT)?;
        let needed = to_base_units(quote.input_amount, DECIMALS).ok_or_else(|| Self::missing("input_amount"))?;
        for spender in [CTF_EXCHANGE, CONDITIONAL_TOKENS] {
            let spender = evm::parse_address(VenueSlug::Opinion, spender)?;
            self.rpc.ensure_allowance(signer, usdt, spender, needed).await?;
        }

        let token_id = quote.payload_str("token_id").ok_or_else(|| Self::missing("token_id"))?;
        let mut order = json!({
            "marketId": quote.market_id,
            "tokenId": token_id,
            "side": quote.side.as_str().to_uppercase(),
            "orderType": "market",
            "amount": quote.input_amount.to_string(),
            "maker": signer.address().to_checksum(None),
        });
        if !self.multi_sig_addr.is_empty() {
            order["multiSigAddress"] = json!(self.multi_sig_addr);
        }
        let resp = self.http.post_json(&format!("{}/orders", self.api_url), &order).await?;
        string_field(&resp, &["order_id", "orderId", "id"]).ok_or_else(|| Self::missing("order_id"))
    }
}

#[async_trait]
impl VenueAdapter for OpinionAdapter {
    fn info(&self) -> VenueInfo {
        VenueInfo {
            slug: VenueSlug::Opinion,
            chain: Chain::Bsc,
            name: "Opinion",
            description: "AI-oracle powered prediction markets on BSC",
            collateral_symbol: "USDT",
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
                debug!(market_id, error = %e, "opinion market lookup failed");
                Ok(None)
            }
        }
    }

    async fn get_orderbook(&self, market_id: &str, outcome: Outcome) -> GatewayResult<OrderBook> {
        let url = format!("{}/markets/{}/orderbook", self.api_url, market_id);
        let data = match self.http.get_json(&url, &[]).await {
            Ok(data) => data,
            Err(e) => {
                debug!(market_id, error = %e, "opinion orderbook unavailable, using empty book");
                return Ok(OrderBook::empty(market_id, outcome));
            }
        };
        // Per-outcome ladders when published, otherwise a single shared book.
        let side_key = |kind: &str| {
            let key = format!("{}_{kind}", outcome.as_str());
            if data.get(&key).is_some() {
                key
            } else {
                kind.to_string()
            }
        };
        Ok(OrderBook::from_levels(
            market_id,
            outcome,
            price_levels(&data, &side_key("bids")),
            price_levels(&data, &side_key("asks")),
        ))
    }

    #[instrument(skip(self), fields(venue = "opinion"))]
    async fn get_quote(&self, market_id: &str, outcome: Outcome, side: Side, amount: Decimal) -> GatewayResult<Quote> {
        let market = self
            .get_market(market_id)
            .await?
            .ok_or_else(|| GatewayError::market_not_found("opinion", market_id))?;
        let book = self.get_orderbook(market_id, outcome).await?;
        let price = live_price(Some(&book), &market, outcome, side);
        let token_id = market.token(outcome).unwrap_or_default().to_string();

        let (input_token, output_token) = match side {
            Side::Buy => (USDT.to_string(), token_id.clone()),
            Side::Sell => (token_id.clone(), USDT.to_string()),
        };
        Ok(Quote {
            venue: VenueSlug::Opinion,
            chain: Chain::Bsc,
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
            network_fee_estimate: Some(Decimal::new(1, 3)),
            expires_at: None,
            payload: json!({"token_id": token_id, "market_id": market_id}),
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
        let usdt = evm::parse_address(VenueSlug::Opinion, USDT)?;
        let exchange = evm::parse_address(VenueSlug::Opinion, CTF_EXCHANGE)?;
        let conditional = evm::parse_address(VenueSlug::Opinion, CONDITIONAL_TOKENS)?;
        let raw = to_base_units(amount, DECIMALS)
            .ok_or_else(|| GatewayError::InvalidOutcomeOrSide(format!("invalid amount {amount}")))?;

        let mut txs = vec![
            evm::approve_tx(usdt, exchange, raw, Chain::Bsc, APPROVE_GAS, "Approve USDT for Opinion exchange"),
            evm::approve_tx(usdt, conditional, raw, Chain::Bsc, APPROVE_GAS, "Approve USDT for Conditional Tokens"),
            evm::order_tx(
                CTF_EXCHANGE,
                quote.payload_str("token_id"),
                Chain::Bsc,
                trade_description(side, outcome, market_id),
            ),
        ];
        if self.fee_bps > 0 && !self.fee_account.is_empty() {
            let fee_account = evm::parse_address(VenueSlug::Opinion, &self.fee_account)?;
            let fee_raw = to_base_units(calculate_fee(amount, self.fee_bps), DECIMALS).unwrap_or_default();
            txs.push(evm::fee_approval_tx(usdt, fee_account, fee_raw, Chain::Bsc, self.fee_bps));
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
            Ok(order_id) => {
                info!(market_id = %quote.market_id, order_id = %order_id, "opinion order placed");
                let url = order_id.starts_with("0x").then(|| self.explorer_url(&order_id));
                TradeResult::confirmed(quote, order_id, url)
            }
            Err(e) => {
                warn!(market_id = %quote.market_id, error = %e, "opinion trade failed");
                failed_from(quote, &e)
            }
        }
    }

    async fn transfer_fee(&self, key: &SigningKey, fee_account: &str, amount: Decimal) -> GatewayResult<Option<String>> {
        self.rpc.collect_fee(key, USDT, DECIMALS, fee_account, amount).await
    }
}
