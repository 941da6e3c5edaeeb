//! Cross-venue spread finder: same title, different venues, YES price gap above a threshold.

use futures::future::join_all;
use itertools::Itertools;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::market_data::adapters::VenueAdapter;
use crate::market_data::types::{Market, VenueSlug};
use crate::registry::VenueRegistry;

pub const DEFAULT_MIN_SPREAD: Decimal = dec!(0.02);
pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 50;
const MARKETS_PER_VENUE: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbitrageOpportunity {
    pub market_title: String,
    pub outcome: String,
    pub buy_venue: VenueSlug,
    pub buy_price: Decimal,
    pub sell_venue: VenueSlug,
    pub sell_price: Decimal,
    pub spread: Decimal,
    pub spread_pct: Decimal,
}

fn title_key(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Every cross-venue pair of active, priced markets sharing a normalized title.
pub fn find_opportunities(markets: &[Market], min_spread: Decimal, limit: usize) -> Vec<ArbitrageOpportunity> {
    let groups = markets
        .iter()
        .filter(|m| m.is_active && m.yes_price.is_some_and(|p| p > Decimal::ZERO))
        .into_group_map_by(|m| title_key(&m.title));

    let mut found = Vec::new();
    for group in groups.values().filter(|g| g.len() > 1) {
        for (a, b) in group.iter().tuple_combinations() {
            if a.venue == b.venue {
                continue;
            }
            let (Some(pa), Some(pb)) = (a.yes_price, b.yes_price) else {
                continue;
            };
            let (buy, buy_price, sell, sell_price) = if pa < pb { (a, pa, b, pb) } else { (b, pb, a, pa) };
            let spread = sell_price - buy_price;
            if spread < min_spread {
                continue;
            }
            let avg = (pa + pb) / Decimal::TWO;
            let spread_pct = if avg > Decimal::ZERO {
                (spread / avg * Decimal::ONE_HUNDRED).round_dp(2)
            } else {
                Decimal::ZERO
            };
            found.push(ArbitrageOpportunity {
                market_title: a.title.clone(),
                outcome: "YES".to_string(),
                buy_venue: buy.venue,
                buy_price,
                sell_venue: sell.venue,
                sell_price,
                spread: spread.round_dp(4),
                spread_pct,
            });
        }
    }

    found.sort_by(|x, y| y.spread.cmp(&x.spread).then_with(|| x.market_title.cmp(&y.market_title)));
    found.truncate(limit);
    found
}

pub struct ArbitrageScanner {
    registry: Arc<VenueRegistry>,
}

impl ArbitrageScanner {
    pub fn new(registry: Arc<VenueRegistry>) -> Self {
        Self { registry }
    }

    /// A venue whose listing fails is left out of the scan.
    pub async fn scan(&self, min_spread: Option<Decimal>, limit: Option<usize>) -> Vec<ArbitrageOpportunity> {
        let min_spread = min_spread.unwrap_or(DEFAULT_MIN_SPREAD);
        let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

        let fetches = self.registry.adapters().map(|adapter| async move {
            let venue = adapter.slug();
            match adapter.get_markets(MARKETS_PER_VENUE, 0, true).await {
                Ok(markets) => markets,
                Err(e) => {
                    warn!(venue = %venue, error = %e, "venue skipped in arbitrage scan");
                    Vec::new()
                }
            }
        });
        let markets: Vec<Market> = join_all(fetches).await.into_iter().flatten().collect();
        let found = find_opportunities(&markets, min_spread, limit);
        debug!(markets = markets.len(), opportunities = found.len(), "arbitrage scan done");
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::market_data::types::Chain;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn market(venue: VenueSlug, title: &str, yes: Option<Decimal>) -> Market {
        let mut m = Market::new(venue, Chain::Base, format!("{venue}-{title}"), title);
        m.yes_price = yes;
        m
    }

    #[test]
    fn test_reports_cross_venue_spread() {
        let markets = vec![
            market(VenueSlug::Limitless, "Will ETH flip BTC?", Some(dec!(0.40))),
            market(VenueSlug::Opinion, "  will eth flip btc? ", Some(dec!(0.55))),
        ];
        let found = find_opportunities(&markets, dec!(0.05), 10);
        assert_eq!(found.len(), 1);
        let opp = &found[0];
        assert_eq!(opp.spread, dec!(0.15));
        assert_eq!(opp.spread_pct, dec!(31.58));
        assert_eq!(opp.buy_venue, VenueSlug::Limitless);
        assert_eq!(opp.sell_venue, VenueSlug::Opinion);
        assert_eq!(opp.outcome, "YES");
    }

    #[test]
    fn test_same_venue_unpriced_and_small_spreads_ignored() {
        let mut closed = market(VenueSlug::Myriad, "A", Some(dec!(0.9)));
        closed.is_active = false;
        let markets = vec![
            market(VenueSlug::Limitless, "A", Some(dec!(0.40))),
            market(VenueSlug::Limitless, "A", Some(dec!(0.80))),
            market(VenueSlug::Opinion, "A", None),
            closed,
            market(VenueSlug::Kalshi, "B", Some(dec!(0.50))),
            market(VenueSlug::Polymarket, "B", Some(dec!(0.51))),
        ];
        assert!(find_opportunities(&markets, dec!(0.02), 10).is_empty());
    }

    #[test]
    fn test_sorted_descending_and_truncated() {
        let markets = vec![
            market(VenueSlug::Kalshi, "small", Some(dec!(0.50))),
            market(VenueSlug::Polymarket, "small", Some(dec!(0.55))),
            market(VenueSlug::Kalshi, "big", Some(dec!(0.20))),
            market(VenueSlug::Polymarket, "big", Some(dec!(0.60))),
            market(VenueSlug::Myriad, "big", Some(dec!(0.30))),
        ];
        let all = find_opportunities(&markets, dec!(0.02), 10);
        let spreads: Vec<Decimal> = all.iter().map(|o| o.spread).collect();
        assert_eq!(spreads, vec![dec!(0.40), dec!(0.30), dec!(0.10), dec!(0.05)]);

        let top = find_opportunities(&markets, dec!(0.02), 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].buy_venue, VenueSlug::Kalshi);
        assert_eq!(top[0].sell_venue, VenueSlug::Polymarket);
    }

    #[tokio::test]
    async fn test_failing_venue_is_excluded() {
        let limitless = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"slug": "eth-flip", "title": "ETH flips BTC", "yes_price": "0.30"}
            ])))
            .mount(&limitless)
            .await;
        let opinion = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&opinion)
            .await;
        let myriad = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [
                {"slug": "eth-flips-btc", "title": "ETH flips BTC", "status": "active", "prices": {"yes": 0.45, "no": 0.55}}
            ]})))
            .mount(&myriad)
            .await;

        let mut settings = Settings::default();
        settings.limitless.api_url = limitless.uri();
        settings.opinion.api_url = opinion.uri();
        settings.myriad.api_url = myriad.uri();
        let registry = VenueRegistry::with_venues(
            &settings,
            &[VenueSlug::Limitless, VenueSlug::Opinion, VenueSlug::Myriad],
        );

        let found = ArbitrageScanner::new(Arc::new(registry)).scan(None, None).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].buy_venue, VenueSlug::Limitless);
        assert_eq!(found[0].sell_venue, VenueSlug::Myriad);
        assert_eq!(found[0].spread, dec!(0.15));
    }
}
