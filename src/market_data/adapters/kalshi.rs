// Kalshi markets traded through DFlow on the ledger network.

use ahash::AHashMap;
use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::http::{event_groups, mark_group, paginate, parse_records, VenueHttp, MAX_PAGES};
use super::{check_key_family, failed_from, ledger, page, search, trade_description, VenueAdapter};
use crate::config::Settings;
use crate::error::{GatewayError, GatewayResult};
use crate::market_data::cache::MarketCache;
use crate::market_data::normaliser::{self, decimal, string_field, to_base_units_u64};
use crate::market_data::order_book::OrderBook;
use crate::market_data::types::{
    Chain, Market, Outcome, PreparedTransaction, Quote, Side, TradeResult, VenueInfo, VenueSlug,
};
use crate::trading::keys::SigningKey;

pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
const DECIMALS: u32 = 6;
const PAGE_SIZE: u32 = 200;
const SLIPPAGE_BPS: u32 = 100;

pub struct KalshiAdapter {
    http: VenueHttp,
    public_http: VenueHttp,
    cache: MarketCache,
    trading_url: String,
    metadata_url: String,
    public_url: String,
    rpc_url: String,
    fee_account: String,
    fee_bps: u32,
}

impl KalshiAdapter {
    pub fn new(settings: &Settings) -> Self {
        let cfg = &settings.kalshi;
        Self {
            http: VenueHttp::new(VenueSlug::Kalshi, &settings.http).with_header("x-api-key", &cfg.api_key),
            public_http: VenueHttp::new(VenueSlug::Kalshi, &settings.http),
            cache: MarketCache::new(cfg.cache_ttl),
            trading_url: cfg.trading_url.trim_end_matches('/').to_string(),
            metadata_url: cfg.metadata_url.trim_end_matches('/').to_string(),
            public_url: cfg.public_url.trim_end_matches('/').to_string(),
            rpc_url: settings.rpc.solana.clone(),
            fee_account: cfg.fee_account.clone(),
            fee_bps: cfg.fee_bps,
        }
    }

    fn parse_market(data: &Value) -> Option<Market> {
        let market_id = string_field(data, &["ticker", "market_ticker"])?;
        let title = string_field(data, &["title", "question"]).unwrap_or_default();
        let mut m = Market::new(VenueSlug::Kalshi, Chain::Solana, market_id, title);

        m.event_id = string_field(data, &["eventTicker", "event_ticker"]);
        m.description = string_field(data, &["subtitle"]);
        m.category = string_field(data, &["category"]);
        m.yes_price = normaliser::field(data, &["yesAsk"]).filter(|p| !p.is_zero());
        m.no_price = normaliser::field(data, &["noAsk"]).filter(|p| !p.is_zero());
        m.volume_24h = normaliser::field(data, &["volume"]).filter(|v| !v.is_zero());
        m.liquidity = normaliser::field(data, &["openInterest"]).filter(|v| !v.is_zero());
        m.is_active = data.get("status").and_then(Value::as_str) == Some("active")
            || data.get("result").map_or(true, Value::is_null);
        m.close_time = string_field(data, &["closeTime", "close_time"]);
        if let Some(accounts) = data.get("accounts").and_then(|a| a.get(USDC_MINT)) {
            m.yes_token = string_field(accounts, &["yesMint"]);
            m.no_token = string_field(accounts, &["noMint"]);
        }
        m.collateral_token = Some("USDC".into());
        m.raw = data.clone();
        Some(m)
    }

    async fn fetch_page(&self, cursor: Option<String>) -> GatewayResult<(Vec<Value>, Option<String>)> {
        let mut query = vec![("limit", PAGE_SIZE.to_string()), ("status", "active".to_string())];
        if let Some(c) = cursor {
            query.push(("cursor", c));
        }
        let data = self
            .http
            .get_json(&format!("{}/api/v1/markets", self.metadata_url), &query)
            .await?;
        let page = data
            .get("markets")
            .or_else(|| data.get("data"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next = data.get("cursor").and_then(Value::as_str).map(str::to_string);
        Ok((page, next))
    }

    /// Outcome labels for an event's markets. Lookup failures yield no labels.
    async fn fetch_event_names(&self, event_id: &str) -> AHashMap<String, String> {
        let mut names = AHashMap::new();
        let url = format!("{}/events/{}", self.public_url, event_id);
        match self.public_http.get_json(&url, &[]).await {
            Ok(data) => {
                for mkt in data.get("markets").and_then(Value::as_array).into_iter().flatten() {
                    let ticker = string_field(mkt, &["ticker"]);
                    let name = string_field(mkt, &["yes_sub_title", "subtitle"]);
                    if let (Some(t), Some(n)) = (ticker, name) {
                        names.insert(t, n);
                    }
                }
            }
            Err(e) => debug!(event_id, error = %e, "event label lookup failed"),
        }
        names
    }

    async fn fetch_all_markets(&self) -> GatewayResult<Vec<Market>> {
        let items = paginate(VenueSlug::Kalshi, MAX_PAGES, |cursor| self.fetch_page(cursor)).await;
        let mut markets = parse_records(VenueSlug::Kalshi, &items, Self::parse_market);

        let groups = event_groups(&markets);
        let names = join_all(groups.iter().map(|(event_id, _)| self.fetch_event_names(event_id))).await;
        for ((_, indices), names) in groups.iter().zip(names) {
            mark_group(&mut markets, indices, &names);
        }
        info!(count = markets.len(), multi_outcome_events = groups.len(), "kalshi markets refreshed");
        Ok(markets)
    }

    async fn markets(&self) -> GatewayResult<Arc<Vec<Market>>> {
        self.cache.get_or_refresh(|| self.fetch_all_markets()).await
    }

    fn fee_params(&self) -> Vec<(&'static str, String)> {
        if self.fee_account.len() >= 32 {
            vec![
                ("feeAccount", self.fee_account.clone()),
                ("platformFeeScale", (self.fee_bps / 2).to_string()),
            ]
        } else {
            Vec::new()
        }
    }

    fn order_query(&self, quote: &Quote, user_public_key: &str) -> GatewayResult<Vec<(&'static str, String)>> {
        let amount = to_base_units_u64(quote.input_amount, DECIMALS).ok_or_else(|| GatewayError::InsufficientQuoteData {
            venue: VenueSlug::Kalshi.to_string(),
            field: "input_amount".into(),
        })?;
        let mut query = vec![
            ("inputMint", quote.input_token.clone()),
            ("outputMint", quote.output_token.clone()),
            ("amount", amount.to_string()),
            ("slippageBps", SLIPPAGE_BPS.to_string()),
            ("userPublicKey", user_public_key.to_string()),
        ];
        query.extend(self.fee_params());
        Ok(query)
    }

    async fn order_transaction(&self, quote: &Quote, user_public_key: &str) -> GatewayResult<String> {
        let query = self.order_query(quote, user_public_key)?;
        let data = self.http.get_json(&format!("{}/order", self.trading_url), &query).await?;
        string_field(&data, &["transaction"]).ok_or_else(|| GatewayError::InsufficientQuoteData {
            venue: VenueSlug::Kalshi.to_string(),
            field: "transaction".into(),
        })
    }

    async fn submit(&self, quote: &Quote, key: &ed25519_dalek::SigningKey) -> GatewayResult<String> {
        let user = bs58::encode(key.verifying_key().as_bytes()).into_string();
        let tx_b64 = self.order_transaction(quote, &user).await?;
        let signed = ledger::sign_transaction(VenueSlug::Kalshi, &tx_b64, key)?;
        ledger::send_transaction(&self.http, VenueSlug::Kalshi, &self.rpc_url, &signed).await
    }
}

#[async_trait]
impl VenueAdapter for KalshiAdapter {
    fn info(&self) -> VenueInfo {
        VenueInfo {
            slug: VenueSlug::Kalshi,
            chain: Chain::Solana,
            name: "Kalshi",
            description: "CFTC-regulated prediction markets on Solana",
            collateral_symbol: "USDC",
            collateral_decimals: DECIMALS,
        }
    }

    async fn initialize(&self) -> GatewayResult<()> {
        self.http.init()?;
        self.public_http.init()
    }

    async fn close(&self) -> GatewayResult<()> {
        self.http.close();
        self.public_http.close();
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
        let url = format!("{}/api/v1/market/{}", self.metadata_url, market_id);
        match self.http.get_json(&url, &[]).await {
            Ok(data) => Ok(Self::parse_market(data.get("market").unwrap_or(&data))),
            Err(e) => {
                debug!(market_id, error = %e, "kalshi market lookup failed");
                Ok(None)
            }
        }
    }

    async fn get_orderbook(&self, market_id: &str, outcome: Outcome) -> GatewayResult<OrderBook> {
        let url = format!("{}/api/v1/orderbook/{}", self.metadata_url, market_id);
        let data = self.http.get_json(&url, &[]).await?;

        let ladder = |side: Outcome| -> Vec<(Decimal, Decimal)> {
            data.get(format!("{}_bids", side.as_str()))
                .and_then(Value::as_object)
                .into_iter()
                .flatten()
                .filter_map(|(price, qty)| Some((normaliser::parse_decimal_str(price)?, decimal(qty)?)))
                .collect()
        };
        let bids = ladder(outcome);
        // Asks for one side are the other side's bids seen from this side.
        let asks = ladder(outcome.opposite())
            .into_iter()
            .map(|(p, q)| (Decimal::ONE - p, q));
        Ok(OrderBook::from_levels(market_id, outcome, bids, asks))
    }

    #[instrument(skip(self), fields(venue = "kalshi"))]
    async fn get_quote(&self, market_id: &str, outcome: Outcome, side: Side, amount: Decimal) -> GatewayResult<Quote> {
        let market = self
            .get_market(market_id)
            .await?
            .ok_or_else(|| GatewayError::market_not_found("kalshi", market_id))?;
        let outcome_token = market
            .token(outcome)
            .ok_or_else(|| GatewayError::platform("kalshi", format!("Token not found for {outcome}")))?
            .to_string();

        let (input_token, output_token) = match side {
            Side::Buy => (USDC_MINT.to_string(), outcome_token),
            Side::Sell => (outcome_token, USDC_MINT.to_string()),
        };
        let raw_amount = to_base_units_u64(amount, DECIMALS)
            .ok_or_else(|| GatewayError::InvalidOutcomeOrSide(format!("invalid amount {amount}")))?;
        let query = vec![
            ("inputMint", input_token.clone()),
            ("outputMint", output_token.clone()),
            ("amount", raw_amount.to_string()),
            ("slippageBps", SLIPPAGE_BPS.to_string()),
        ];
        let data = self.http.get_json(&format!("{}/order", self.trading_url), &query).await?;

        let missing = |field: &str| GatewayError::InsufficientQuoteData {
            venue: "kalshi".into(),
            field: field.into(),
        };
        let input_amount = data
            .get("inAmount")
            .and_then(|v| normaliser::from_base_units(v, DECIMALS))
            .ok_or_else(|| missing("inAmount"))?;
        let expected_output = data
            .get("outAmount")
            .and_then(|v| normaliser::from_base_units(v, DECIMALS))
            .ok_or_else(|| missing("outAmount"))?;
        let price_per_token = if expected_output > Decimal::ZERO {
            input_amount / expected_output
        } else {
            Decimal::ZERO
        };
        let platform_fee = data
            .get("platformFee")
            .and_then(|v| normaliser::from_base_units(v, DECIMALS))
            .unwrap_or(Decimal::ZERO);

        Ok(Quote {
            venue: VenueSlug::Kalshi,
            chain: Chain::Solana,
            market_id: market_id.to_string(),
            outcome,
            side,
            input_token,
            input_amount,
            output_token,
            expected_output,
            price_per_token,
            price_impact: Some(normaliser::field(&data, &["priceImpactPct"]).unwrap_or(Decimal::ZERO)),
            platform_fee: Some(platform_fee),
            network_fee_estimate: Some(Decimal::new(1, 3)),
            expires_at: None,
            payload: data,
        })
    }

    async fn prepare_transaction(
        &self,
        market_id: &str,
        outcome: Outcome,
        side: Side,
        amount: Decimal,
        wallet_address: &str,
    ) -> GatewayResult<(Vec<PreparedTransaction>, Quote)> {
        let quote = self.get_quote(market_id, outcome, side, amount).await?;
        let tx_b64 = self.order_transaction(&quote, wallet_address).await?;
        let txs = vec![PreparedTransaction {
            to: "solana_program".into(),
            data: tx_b64,
            value: "0".into(),
            gas: None,
            chain_id: Chain::Solana.chain_id(),
            description: trade_description(side, outcome, market_id),
        }];
        Ok((txs, quote))
    }

    async fn execute_trade(&self, quote: &Quote, key: &SigningKey) -> TradeResult {
        if let Some(rejected) = check_key_family(&self.info(), quote, key) {
            return rejected;
        }
        let SigningKey::Ledger(keypair) = key else {
            return failed_from(quote, &GatewayError::InvalidKeyType { expected: "ed25519 keypair" });
        };
        match self.submit(quote, keypair).await {
            Ok(signature) => {
                info!(market_id = %quote.market_id, tx = %signature, "kalshi trade submitted");
                let url = self.explorer_url(&signature);
                TradeResult::confirmed(quote, signature, Some(url))
            }
            Err(e) => {
                warn!(market_id = %quote.market_id, error = %e, "kalshi trade failed");
                failed_from(quote, &e)
            }
        }
    }
}
