//! Request log and calendar-month billing aggregates.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::identity::Identity;
use crate::persist::{TradeStore, UsageRecord, UsageStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_requests: u64,
    pub total_trades: u64,
    pub total_volume: Decimal,
    pub total_fees: Decimal,
}

/// `[first of this month, first of next month)` in UTC.
pub fn billing_period(now: DateTime<Utc>) -> GatewayResult<(DateTime<Utc>, DateTime<Utc>)> {
    let (year, month) = (now.year(), now.month());
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let start = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single();
    let end = Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0).single();
    match (start, end) {
        (Some(s), Some(e)) => Ok((s, e)),
        _ => Err(GatewayError::Config(format!("no billing period for {now}"))),
    }
}

pub struct UsageTracker {
    usage: Arc<dyn UsageStore>,
    trades: Arc<dyn TradeStore>,
}

impl UsageTracker {
    pub fn new(usage: Arc<dyn UsageStore>, trades: Arc<dyn TradeStore>) -> Self {
        Self { usage, trades }
    }

    pub async fn log_request(
        &self,
        identity: &Identity,
        endpoint: &str,
        method: &str,
        status_code: u16,
        response_time_ms: Option<u64>,
    ) -> GatewayResult<()> {
        let record = UsageRecord {
            id: Uuid::new_v4(),
            key_id: identity.key_id,
            account_id: identity.account_id,
            endpoint: endpoint.to_string(),
            method: method.to_ascii_uppercase(),
            status_code,
            response_time_ms,
            created_at: Utc::now(),
        };
        self.usage.insert_usage(&record).await?;
        debug!(key_id = %identity.key_id, endpoint, status_code, "request logged");
        Ok(())
    }

    /// Totals across every key of one account for the current billing period.
    pub async fn current_usage(&self, key_ids: &[Uuid]) -> GatewayResult<UsageSummary> {
        self.usage_at(key_ids, Utc::now()).await
    }

    pub async fn usage_at(&self, key_ids: &[Uuid], now: DateTime<Utc>) -> GatewayResult<UsageSummary> {
        let (period_start, period_end) = billing_period(now)?;
        let mut summary = UsageSummary {
            period_start,
            period_end,
            total_requests: 0,
            total_trades: 0,
            total_volume: Decimal::ZERO,
            total_fees: Decimal::ZERO,
        };
        if key_ids.is_empty() {
            return Ok(summary);
        }
        summary.total_requests = self.usage.count_requests(key_ids, period_start, period_end).await?;
        let totals = self.trades.trade_totals(key_ids, period_start, period_end).await?;
        summary.total_trades = totals.count;
        summary.total_volume = totals.volume;
        summary.total_fees = totals.fees;
        Ok(summary)
    }
}
