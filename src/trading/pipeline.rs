//! quote -> prepare -> execute.
//!
//! `quote` persists nothing. `prepare` records a `prepared` row. `execute` records a `submitted`
//! row before touching the venue, then moves it to `confirmed` or `failed`. Nothing is retried.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::identity::Identity;
use crate::market_data::adapters::{Adapter, VenueAdapter};
use crate::market_data::fees::FeeTable;
use crate::market_data::types::{Outcome, PreparedTransaction, Quote, Side, TradeResult, VenueSlug};
use crate::persist::{PositionKey, TradeMode, TradeRecord, TradeStatus, TradeStore, TradeUpdate};
use crate::registry::VenueRegistry;
use crate::trading::keys::SigningKey;
use crate::trading::positions::PositionLedger;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRequest {
    pub venue: String,
    pub market_id: String,
    pub outcome: Outcome,
    pub side: Side,
    pub amount: Decimal,
}

/// Venue quote plus the platform fee charged on top.
#[derive(Debug, Clone, Serialize)]
pub struct PricedQuote {
    #[serde(flatten)]
    pub quote: Quote,
    pub fee_amount: Decimal,
    pub fee_bps: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepareResponse {
    /// `None` when the row could not be written and persistence is optional.
    pub trade_id: Option<Uuid>,
    pub transactions: Vec<PreparedTransaction>,
    pub quote: PricedQuote,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResponse {
    pub trade_id: Uuid,
    pub status: TradeStatus,
    pub venue: VenueSlug,
    pub market_id: String,
    pub tx_hash: Option<String>,
    pub input_amount: Decimal,
    pub output_amount: Option<Decimal>,
    pub fee_amount: Decimal,
    pub explorer_url: Option<String>,
    pub fee_tx_hash: Option<String>,
}

pub struct TradePipeline {
    registry: Arc<VenueRegistry>,
    trades: Arc<dyn TradeStore>,
    positions: PositionLedger,
    fees: Arc<FeeTable>,
    require_persistence: bool,
}

fn check_amount(amount: Decimal) -> GatewayResult<()> {
    if amount <= Decimal::ZERO {
        return Err(GatewayError::InvalidOutcomeOrSide(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

fn record_outcome(venue: VenueSlug, status: TradeStatus) {
    metrics::counter!("gateway_trades_total", "venue" => venue.as_str(), "status" => status.as_str()).increment(1);
}

impl TradePipeline {
    pub fn new(
        registry: Arc<VenueRegistry>,
        trades: Arc<dyn TradeStore>,
        positions: PositionLedger,
        fees: Arc<FeeTable>,
        require_persistence: bool,
    ) -> Self {
        Self {
            registry,
            trades,
            positions,
            fees,
            require_persistence,
        }
    }

    fn priced(&self, quote: Quote, amount: Decimal) -> PricedQuote {
        PricedQuote {
            fee_amount: self.fees.fee_for(quote.venue, amount),
            fee_bps: self.fees.bps_for(quote.venue),
            quote,
        }
    }

    fn new_record(
        &self,
        identity: &Identity,
        wallet_address: &str,
        adapter: &Adapter,
        req: &TradeRequest,
        status: TradeStatus,
        mode: TradeMode,
    ) -> TradeRecord {
        let info = adapter.info();
        let now = Utc::now();
        TradeRecord {
            id: Uuid::new_v4(),
            key_id: identity.key_id,
            wallet_address: wallet_address.to_string(),
            venue: info.slug,
            chain: info.chain,
            market_id: req.market_id.clone(),
            outcome: req.outcome,
            side: req.side,
            input_amount: req.amount,
            output_amount: None,
            price: None,
            fee_amount: Some(self.fees.fee_for(info.slug, req.amount)),
            tx_hash: None,
            status,
            mode,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[instrument(skip(self), fields(venue = %req.venue, market_id = %req.market_id))]
    pub async fn quote(&self, req: &TradeRequest) -> GatewayResult<PricedQuote> {
        check_amount(req.amount)?;
        let adapter = self.registry.resolve(&req.venue)?;
        let quote = adapter
            .get_quote(&req.market_id, req.outcome, req.side, req.amount)
            .await?;
        Ok(self.priced(quote, req.amount))
    }

    #[instrument(skip(self, identity), fields(venue = %req.venue, market_id = %req.market_id))]
    pub async fn prepare(&self, identity: &Identity, req: &TradeRequest, wallet_address: &str) -> GatewayResult<PrepareResponse> {
        check_amount(req.amount)?;
        let adapter = self.registry.resolve(&req.venue)?;
        let (transactions, quote) = adapter
            .prepare_transaction(&req.market_id, req.outcome, req.side, req.amount, wallet_address)
            .await?;

        let mut record = self.new_record(identity, wallet_address, &adapter, req, TradeStatus::Prepared, TradeMode::Prepare);
        record.price = Some(quote.price_per_token);
        let trade_id = match self.trades.create_trade(&record).await {
            Ok(()) => Some(record.id),
            Err(e) if self.require_persistence => {
                error!(error = %e, "prepared trade not recorded, withholding transactions");
                return Err(e.into());
            }
            Err(e) => {
                warn!(error = %e, "prepared trade not recorded");
                None
            }
        };
        record_outcome(record.venue, TradeStatus::Prepared);

        Ok(PrepareResponse {
            trade_id,
            transactions,
            quote: self.priced(quote, req.amount),
        })
    }

    /// Re-quotes, signs with `private_key` in memory, submits, and settles the trade row.
    ///
    /// The `submitted` row is written before the venue is called; without it nothing is sent.
    #[instrument(skip(self, identity, private_key), fields(venue = %req.venue, market_id = %req.market_id))]
    pub async fn execute(
        &self,
        identity: &Identity,
        req: &TradeRequest,
        wallet_address: &str,
        private_key: &str,
    ) -> GatewayResult<ExecuteResponse> {
        check_amount(req.amount)?;
        let adapter = self.registry.resolve(&req.venue)?;
        let info = adapter.info();
        let record = self.new_record(identity, wallet_address, &adapter, req, TradeStatus::Submitted, TradeMode::Execute);
        let trade_id = record.id;
        let fee_amount = record.fee_amount.unwrap_or(Decimal::ZERO);
        self.trades.create_trade(&record).await?;

        let quote = match adapter
            .get_quote(&req.market_id, req.outcome, req.side, req.amount)
            .await
        {
            Ok(q) => q,
            Err(e) => {
                self.settle(trade_id, info.slug, TradeUpdate::failed(e.to_string())).await;
                return Err(e);
            }
        };

        let key = match SigningKey::parse(private_key, info.chain.family()) {
            Ok(k) => k,
            Err(e) => {
                self.settle(trade_id, info.slug, TradeUpdate::failed(e.to_string())).await;
                return Err(e);
            }
        };

        let result = adapter.execute_trade(&quote, &key).await;
        let update = TradeUpdate {
            status: Some(if result.success {
                TradeStatus::Confirmed
            } else {
                TradeStatus::Failed
            }),
            tx_hash: result.tx_hash.clone(),
            output_amount: result.output_amount,
            price: Some(quote.price_per_token),
            error_message: result.error_message.clone(),
        };
        self.settle(trade_id, info.slug, update).await;

        if !result.success {
            let message = result
                .error_message
                .unwrap_or_else(|| "Trade execution failed".to_string());
            return Err(GatewayError::TradeFailed { trade_id, message });
        }
        info!(%trade_id, tx = ?result.tx_hash, "trade confirmed");

        if req.side == Side::Buy {
            self.track_position(identity, wallet_address, &quote, &result).await;
        }
        let fee_tx_hash = self.collect_fee(&adapter, &key, fee_amount).await;

        Ok(ExecuteResponse {
            trade_id,
            status: TradeStatus::Confirmed,
            venue: info.slug,
            market_id: req.market_id.clone(),
            tx_hash: result.tx_hash,
            input_amount: quote.input_amount,
            output_amount: result.output_amount,
            fee_amount,
            explorer_url: result.explorer_url,
            fee_tx_hash,
        })
    }

    // The venue call already happened; a write failure here must not hide its result.
    async fn settle(&self, trade_id: Uuid, venue: VenueSlug, update: TradeUpdate) {
        let status = update.status.unwrap_or(TradeStatus::Failed);
        if let Err(e) = self.trades.update_trade(trade_id, update).await {
            error!(%trade_id, error = %e, "trade row update failed");
        }
        record_outcome(venue, status);
    }

    async fn track_position(&self, identity: &Identity, wallet_address: &str, quote: &Quote, result: &TradeResult) {
        let key = PositionKey {
            key_id: identity.key_id,
            wallet_address: wallet_address.to_string(),
            venue: quote.venue,
            market_id: quote.market_id.clone(),
            outcome: quote.outcome,
        };
        let amount = result.output_amount.unwrap_or(quote.expected_output);
        if let Err(e) = self
            .positions
            .record_fill(&key, Side::Buy, amount, quote.price_per_token, Some(quote.price_per_token))
            .await
        {
            error!(market_id = %quote.market_id, error = %e, "position update failed");
        }
    }

    async fn collect_fee(&self, adapter: &Adapter, key: &SigningKey, fee_amount: Decimal) -> Option<String> {
        let venue = adapter.info().slug;
        let account = self.fees.mechanism(venue)?.post_trade_account()?;
        match adapter.transfer_fee(key, account, fee_amount).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(venue = %venue, error = %e, "post-trade fee transfer failed");
                None
            }
        }
    }
}
