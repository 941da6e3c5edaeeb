// Myriad: one protocol deployed on several EVM networks. The configured network id picks the
// chain, prediction-market contract and collateral token.

use alloy::primitives::{Bytes, U256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::evm::{self, EvmRpc, APPROVE_GAS, TRADE_GAS};
use super::http::{parse_records, price_levels, VenueHttp};
use super::{check_key_family, expected_output, failed_from, page, search, trade_description, VenueAdapter};
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

const EXECUTE_GAS: u64 = 500_000;
const LISTING_LIMIT: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MyriadNetwork {
    pub id: u64,
    pub name: &'static str,
    pub chain: Chain,
    pub prediction_market: &'static str,
    pub collateral: &'static str,
    pub collateral_symbol: &'static str,
    pub decimals: u32,
}

pub const NETWORKS: [MyriadNetwork; 3] = [
    MyriadNetwork {
        id: 2741,
        name: "Abstract",
        chain: Chain::Abstract,
        prediction_market: "0x3e0F5F8F5Fb043aBFA475C0308417Bf72c463289",
        collateral: "0x84A71ccD554Cc1b02749b35d22F684CC8ec987e1",
        collateral_symbol: "USDC.e",
        decimals: 6,
    },
    MyriadNetwork {
        id: 59144,
        name: "Linea",
        chain: Chain::Linea,
        prediction_market: "0x39e66ee6b2ddaf4defded3038e0162180dbef340",
        collateral: "0x176211869cA2b568f2A7D4EE941E073a821EE1ff",
        collateral_symbol: "USDC",
        decimals: 6,
    },
    MyriadNetwork {
        id: 56,
        name: "BNB Chain",
        chain: Chain::Bsc,
        prediction_market: "0x39E66eE6b2ddaf4DEfDEd3038E0162180dbeF340",
        collateral: "0x55d398326f99059fF775485246999027B3197955",
        collateral_symbol: "USDT",
        decimals: 18,
    },
];

impl MyriadNetwork {
    /// Unknown ids fall back to Abstract.
    pub fn by_id(id: u64) -> MyriadNetwork {
        NETWORKS.iter().copied().find(|n| n.id == id).unwrap_or(NETWORKS[0])
    }
}

pub struct MyriadAdapter {
    http: VenueHttp,
    rpc: EvmRpc,
    cache: MarketCache,
    network: MyriadNetwork,
    api_url: String,
    referral_code: String,
    fee_bps: u32,
}

impl MyriadAdapter {
    pub fn new(settings: &Settings) -> Self {
        let cfg = &settings.myriad;
        let network = MyriadNetwork::by_id(cfg.network_id);
        let rpc_url = match network.chain {
            Chain::Linea => settings.rpc.linea.clone(),
            Chain::Bsc => settings.rpc.bsc.clone(),
            _ => settings.rpc.abstract_chain.clone(),
        };
        let bearer = if cfg.api_key.is_empty() {
            String::new()
        } else {
            format!("Bearer {}", cfg.api_key)
        };
        Self {
            http: VenueHttp::new(VenueSlug::Myriad, &settings.http).with_header("authorization", &bearer),
            rpc: EvmRpc::new(VenueSlug::Myriad, network.chain, rpc_url),
            cache: MarketCache::new(cfg.cache_ttl),
            network,
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            referral_code: cfg.referral_code.clone(),
            fee_bps: settings.fees.evm_fee_bps,
        }
    }

    pub fn network(&self) -> MyriadNetwork {
        self.network
    }

    fn parse_market(&self, data: &Value) -> Option<Market> {
        let market_id = string_field(data, &["slug", "id"])?;
        let title = string_field(data, &["title", "question"]).unwrap_or_default();
        let mut m = Market::new(VenueSlug::Myriad, self.network.chain, market_id, title);

        if let Some(prices) = data.get("prices") {
            m.yes_price = normaliser::field(prices, &["yes"]).filter(|p| !p.is_zero());
            m.no_price = normaliser::field(prices, &["no"]).filter(|p| !p.is_zero());
        }
        if m.yes_price.is_none() {
            if let Some([yes, no, ..]) = data.get("outcomes").and_then(Value::as_array).map(Vec::as_slice) {
                m.yes_price = normaliser::field(yes, &["price"]);
                m.no_price = normaliser::field(no, &["price"]);
            }
        }

        let slug = string_field(data, &["slug"]).unwrap_or_default();
        m.event_id = string_field(data, &["category_slug"]);
        m.description = string_field(data, &["description"]);
        m.category = string_field(data, &["category"]);
        m.volume_24h = normaliser::field(data, &["volume"]).filter(|v| !v.is_zero());
        m.liquidity = normaliser::field(data, &["liquidity"]).filter(|v| !v.is_zero());
        m.is_active = data.get("status").and_then(Value::as_str) == Some("active");
        m.close_time = string_field(data, &["end_date", "endDate"]);
        m.yes_token = string_field(data, &["yes_token_id"]);
        m.no_token = string_field(data, &["no_token_id"]);
        m.collateral_token = Some(self.network.collateral_symbol.to_string());
        m.url = Some(format!("https://myriad.markets/{slug}"));
        m.raw = data.clone();
        Some(m)
    }

    async fn fetch_all_markets(&self) -> GatewayResult<Vec<Market>> {
        let query = [
            ("limit", LISTING_LIMIT.to_string()),
            ("offset", "0".to_string()),
            ("status", "active".to_string()),
            ("network_id", self.network.id.to_string()),
        ];
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
        let markets = parse_records(VenueSlug::Myriad, items, |v| self.parse_market(v));
        info!(count = markets.len(), network = self.network.name, "myriad markets refreshed");
        Ok(markets)
    }

    async fn markets(&self) -> GatewayResult<Arc<Vec<Market>>> {
        self.cache.get_or_refresh(|| self.fetch_all_markets()).await
    }

    /// Venue quote with shares and calldata. When the endpoint fails the quote is priced from
    /// the market and carries no calldata.
    async fn venue_quote(&self, market: &Market, outcome: Outcome, side: Side, amount: Decimal) -> Value {
        let outcome_id = match outcome {
            Outcome::Yes => 0,
            Outcome::No => 1,
        };
        let mut body = json!({
            "market_slug": market.market_id,
            "outcome_id": outcome_id,
            "action": side.as_str(),
            "amount": amount.to_string(),
        });
        if !self.referral_code.is_empty() {
            body["referral_code"] = json!(self.referral_code);
        }
        match self.http.post_json(&format!("{}/markets/quote", self.api_url), &body).await {
            Ok(data) => data,
            Err(e) => {
                debug!(market_id = %market.market_id, error = %e, "myriad quote failed, pricing from market");
                let price = market
                    .price(outcome)
                    .filter(|p| *p > Decimal::ZERO)
                    .unwrap_or(Decimal::new(5, 1));
                json!({
                    "price_average": price.to_string(),
                    "shares": expected_output(side, amount, price).to_string(),
                    "calldata": null,
                    "tx_target": null,
                })
            }
        }
    }

    fn tx_target<'a>(&'a self, quote: &'a Quote) -> &'a str {
        quote.payload_str("tx_target").unwrap_or(self.network.prediction_market)
    }

    async fn submit(&self, quote: &Quote, signer: &alloy::signers::local::PrivateKeySigner) -> GatewayResult<evm::Submitted> {
        let target = evm::parse_address(VenueSlug::Myriad, self.tx_target(quote))?;
        let calldata = quote.payload_str("calldata").ok_or_else(|| GatewayError::InsufficientQuoteData {
            venue: "myriad".into(),
            field: "calldata".into(),
        })?;
        let data: Bytes = calldata
            .parse()
            .map_err(|e| GatewayError::platform("myriad", format!("invalid calldata: {e}")))?;

        if quote.side == Side::Buy {
            let collateral = evm::parse_address(VenueSlug::Myriad, self.network.collateral)?;
            let needed = to_base_units(quote.input_amount, self.network.decimals).unwrap_or(U256::MAX);
            self.rpc.ensure_allowance(signer, collateral, target, needed).await?;
        }
        self.rpc.send_call(signer, target, data, U256::ZERO, Some(EXECUTE_GAS)).await
    }
}

#[async_trait]
impl VenueAdapter for MyriadAdapter {
    fn info(&self) -> VenueInfo {
        VenueInfo {
            slug: VenueSlug::Myriad,
            chain: self.network.chain,
            name: "Myriad",
            description: "Multi-chain prediction market protocol",
            collateral_symbol: self.network.collateral_symbol,
            collateral_decimals: self.network.decimals,
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
            Ok(data) => {
                let inner = if data.get("title").is_some() { &data } else { data.get("market").unwrap_or(&data) };
                Ok(self.parse_market(inner))
            }
            Err(e) => {
                debug!(market_id, error = %e, "myriad market lookup failed");
                Ok(None)
            }
        }
    }

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
                debug!(market_id, error = %e, "myriad orderbook unavailable, using empty book");
                Ok(OrderBook::empty(market_id, outcome))
            }
        }
    }

    #[instrument(skip(self), fields(venue = "myriad"))]
    async fn get_quote(&self, market_id: &str, outcome: Outcome, side: Side, amount: Decimal) -> GatewayResult<Quote> {
        let market = self
            .get_market(market_id)
            .await?
            .ok_or_else(|| GatewayError::market_not_found("myriad", market_id))?;
        let data = self.venue_quote(&market, outcome, side, amount).await;

        let price = normaliser::field(&data, &["price_average"]).unwrap_or(Decimal::new(5, 1));
        let shares = normaliser::field(&data, &["shares"]).unwrap_or(Decimal::ZERO);
        let collateral = self.network.collateral.to_string();
        let (input_token, output_token) = match side {
            Side::Buy => (collateral, String::new()),
            Side::Sell => (String::new(), collateral),
        };
        Ok(Quote {
            venue: VenueSlug::Myriad,
            chain: self.network.chain,
            market_id: market_id.to_string(),
            outcome,
            side,
            input_token,
            input_amount: amount,
            output_token,
            expected_output: shares,
            price_per_token: price,
            price_impact: None,
            platform_fee: Some(calculate_fee(amount, self.fee_bps)),
            network_fee_estimate: Some(Decimal::new(1, 3)),
            expires_at: None,
            payload: json!({
                "calldata": data.get("calldata").cloned().unwrap_or(Value::Null),
                "tx_target": data.get("tx_target").cloned().unwrap_or(Value::Null),
                "network_id": self.network.id,
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
        let target_str = self.tx_target(&quote).to_string();
        let target = evm::parse_address(VenueSlug::Myriad, &target_str)?;
        let collateral = evm::parse_address(VenueSlug::Myriad, self.network.collateral)?;
        let raw = to_base_units(amount, self.network.decimals)
            .ok_or_else(|| GatewayError::InvalidOutcomeOrSide(format!("invalid amount {amount}")))?;

        let txs = vec![
            evm::approve_tx(
                collateral,
                target,
                raw,
                self.network.chain,
                APPROVE_GAS,
                format!("Approve {} for Myriad", self.network.collateral_symbol),
            ),
            PreparedTransaction {
                to: target_str,
                data: quote.payload_str("calldata").unwrap_or("0x").to_string(),
                value: "0".into(),
                gas: Some(TRADE_GAS.to_string()),
                chain_id: self.network.id,
                description: trade_description(side, outcome, market_id),
            },
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
        match self.submit(quote, signer).await {
            Ok(sent) if sent.success => {
                info!(market_id = %quote.market_id, tx = %sent.tx_hash, "myriad trade confirmed");
                let url = self.explorer_url(&sent.tx_hash);
                TradeResult::confirmed(quote, sent.tx_hash, Some(url))
            }
            Ok(sent) => {
                warn!(market_id = %quote.market_id, tx = %sent.tx_hash, "myriad trade reverted");
                let url = self.explorer_url(&sent.tx_hash);
                TradeResult::reverted(quote, sent.tx_hash, url)
            }
            Err(e) => {
                warn!(market_id = %quote.market_id, error = %e, "myriad trade failed");
                failed_from(quote, &e)
            }
        }
    }
}
