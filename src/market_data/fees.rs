//! Platform fee: 50 bps on every trade unless the venue's mechanism sets its own rate,
//! collected differently per venue.

use rust_decimal::Decimal;
use serde::Serialize;

use super::types::VenueSlug;
use crate::config::Settings;

pub const DEFAULT_FEE_BPS: u32 = 50;

pub fn calculate_fee(amount: Decimal, fee_bps: u32) -> Decimal {
    amount * Decimal::from(fee_bps) / Decimal::from(10_000)
}

/// How a venue collects the platform fee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mechanism", rename_all = "snake_case")]
pub enum FeeMechanism {
    /// `feeAccount` + `platformFeeScale` on the venue's order request.
    FeeAccountScale { fee_account: Option<String>, scale: u32 },
    /// Fee set on the venue's builder dashboard; orders carry the builder key.
    BuilderKey { builder_key: Option<String> },
    /// Revenue share keyed by a referral code on the quote request.
    ReferralCode { referral_code: Option<String> },
    /// Collateral transfer to the fee account after the trade lands.
    PostTradeTransfer { fee_account: Option<String>, fee_bps: u32 },
}

impl FeeMechanism {
    pub fn description(&self) -> &'static str {
        match self {
            FeeMechanism::FeeAccountScale { .. } => "feeAccount + platformFeeScale in order params",
            FeeMechanism::BuilderKey { .. } => "Fee configured at the venue builder dashboard",
            FeeMechanism::ReferralCode { .. } => "referral_code in quote request",
            FeeMechanism::PostTradeTransfer { .. } => "Post-trade transfer in execute mode; fee tx in prepare mode",
        }
    }

    /// Rate this mechanism charges in place of the platform default.
    pub fn fee_bps_override(&self) -> Option<u32> {
        match self {
            FeeMechanism::PostTradeTransfer { fee_bps, .. } => Some(*fee_bps),
            _ => None,
        }
    }

    /// Fee account to transfer to after a confirmed trade, if this venue collects that way.
    pub fn post_trade_account(&self) -> Option<&str> {
        match self {
            FeeMechanism::PostTradeTransfer {
                fee_account: Some(account),
                fee_bps,
            } if *fee_bps > 0 && !account.is_empty() => Some(account),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeeTable {
    pub fee_bps: u32,
    entries: Vec<(VenueSlug, FeeMechanism)>,
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl FeeTable {
    pub fn from_settings(settings: &Settings) -> Self {
        let evm_account = non_empty(&settings.fees.evm_fee_account);
        let entries = vec![
            (
                VenueSlug::Kalshi,
                FeeMechanism::FeeAccountScale {
                    fee_account: non_empty(&settings.kalshi.fee_account),
                    scale: settings.kalshi.fee_bps / 2,
                },
            ),
            (
                VenueSlug::Polymarket,
                FeeMechanism::BuilderKey {
                    builder_key: non_empty(&settings.polymarket.builder_key),
                },
            ),
            (
                VenueSlug::Myriad,
                FeeMechanism::ReferralCode {
                    referral_code: non_empty(&settings.myriad.referral_code),
                },
            ),
            (
                VenueSlug::Opinion,
                FeeMechanism::PostTradeTransfer {
                    fee_account: evm_account.clone(),
                    fee_bps: settings.fees.evm_fee_bps,
                },
            ),
            (
                VenueSlug::Limitless,
                FeeMechanism::PostTradeTransfer {
                    fee_account: evm_account,
                    fee_bps: settings.fees.evm_fee_bps,
                },
            ),
        ];
        Self {
            fee_bps: settings.fees.platform_fee_bps,
            entries,
        }
    }

    pub fn mechanism(&self, venue: VenueSlug) -> Option<&FeeMechanism> {
        self.entries.iter().find(|(v, _)| *v == venue).map(|(_, m)| m)
    }

    pub fn entries(&self) -> impl Iterator<Item = &(VenueSlug, FeeMechanism)> {
        self.entries.iter()
    }

    /// Effective rate for `venue`: its mechanism's own rate, else the platform default.
    pub fn bps_for(&self, venue: VenueSlug) -> u32 {
        self.mechanism(venue)
            .and_then(FeeMechanism::fee_bps_override)
            .unwrap_or(self.fee_bps)
    }

    pub fn fee_for(&self, venue: VenueSlug, amount: Decimal) -> Decimal {
        calculate_fee(amount, self.bps_for(venue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_calculate_fee() {
        assert_eq!(calculate_fee(dec!(100), DEFAULT_FEE_BPS), dec!(0.5));
        assert_eq!(calculate_fee(dec!(0), DEFAULT_FEE_BPS), dec!(0));
    }

    #[test]
    fn test_table_from_default_settings() {
        let mut settings = Settings::default();
        settings.fees.evm_fee_account = "0x000000000000000000000000000000000000fee1".into();
        let table = FeeTable::from_settings(&settings);

        assert_eq!(table.fee_bps, 50);
        assert_eq!(
            table.mechanism(VenueSlug::Kalshi),
            Some(&FeeMechanism::FeeAccountScale {
                fee_account: None,
                scale: 25
            })
        );
        assert!(table.mechanism(VenueSlug::Polymarket).unwrap().post_trade_account().is_none());
        assert_eq!(
            table.mechanism(VenueSlug::Opinion).unwrap().post_trade_account(),
            Some("0x000000000000000000000000000000000000fee1")
        );
        assert_eq!(table.entries().count(), 5);
    }

    #[test]
    fn test_post_trade_venues_charge_their_own_rate() {
        let mut settings = Settings::default();
        settings.fees.platform_fee_bps = 50;
        settings.fees.evm_fee_bps = 100;
        let table = FeeTable::from_settings(&settings);

        assert_eq!(table.bps_for(VenueSlug::Opinion), 100);
        assert_eq!(table.bps_for(VenueSlug::Limitless), 100);
        assert_eq!(table.bps_for(VenueSlug::Kalshi), 50);
        assert_eq!(table.bps_for(VenueSlug::Polymarket), 50);
        assert_eq!(table.fee_for(VenueSlug::Limitless, dec!(30)), dec!(0.3));
        assert_eq!(table.fee_for(VenueSlug::Myriad, dec!(30)), dec!(0.15));
    }
}
