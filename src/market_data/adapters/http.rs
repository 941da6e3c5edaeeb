// Shared HTTP plumbing for venue adapters: client lifecycle, status mapping,
// bounded cursor pagination, and multi-outcome event grouping.

use ahash::AHashMap;
use itertools::Itertools;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::HttpCfg;
use crate::error::{GatewayError, GatewayResult};
use crate::market_data::normaliser;
use crate::market_data::types::{Market, VenueSlug};

/// Hard cap on cursor pages per refill, so a venue that never stops paginating still terminates.
pub const MAX_PAGES: usize = 25;

pub struct VenueHttp {
    venue: VenueSlug,
    user_agent: String,
    timeout: Duration,
    headers: HeaderMap,
    client: RwLock<Option<Client>>,
}

impl VenueHttp {
    pub fn new(venue: VenueSlug, cfg: &HttpCfg) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            venue,
            user_agent: cfg.user_agent.clone(),
            timeout: cfg.timeout,
            headers,
            client: RwLock::new(None),
        }
    }

    /// Attach a static header (API keys). Empty values are ignored.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if value.is_empty() {
            return self;
        }
        match HeaderValue::from_str(value) {
            Ok(v) => {
                self.headers.insert(HeaderName::from_static(name), v);
            }
            Err(_) => warn!(venue = %self.venue, header = name, "ignoring non-ascii header value"),
        }
        self
    }

    fn build(&self) -> GatewayResult<Client> {
        Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .default_headers(self.headers.clone())
            .gzip(true)
            .build()
            .map_err(|e| GatewayError::unavailable(self.venue.as_str(), e))
    }

    pub fn init(&self) -> GatewayResult<()> {
        let client = self.build()?;
        *self.client.write() = Some(client);
        Ok(())
    }

    pub fn close(&self) {
        self.client.write().take();
    }

    /// The live client; built on first use if `init` was never called.
    pub fn client(&self) -> GatewayResult<Client> {
        if let Some(c) = self.client.read().as_ref() {
            return Ok(c.clone());
        }
        let client = self.build()?;
        *self.client.write() = Some(client.clone());
        Ok(client)
    }

    pub async fn get_json(&self, url: &str, query: &[(&str, String)]) -> GatewayResult<Value> {
        let req = self.client()?.get(url).query(query);
        self.send(req).await
    }

    pub async fn post_json(&self, url: &str, body: &Value) -> GatewayResult<Value> {
        let req = self.client()?.post(url).json(body);
        self.send(req).await
    }

    pub async fn send(&self, req: RequestBuilder) -> GatewayResult<Value> {
        let venue = self.venue.as_str();
        let resp = req.send().await.map_err(|e| {
            metrics::counter!("gateway_venue_fetch_failures_total", "venue" => venue).increment(1);
            GatewayError::unavailable(venue, e)
        })?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::PlatformUnavailable {
                venue: venue.to_string(),
                message: "Rate limit exceeded".into(),
                code: Some("429".into()),
            });
        }
        if !status.is_success() {
            metrics::counter!("gateway_venue_fetch_failures_total", "venue" => venue).increment(1);
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::PlatformUnavailable {
                venue: venue.to_string(),
                message: format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200)),
                code: Some(status.as_u16().to_string()),
            });
        }
        resp.json::<Value>()
            .await
            .map_err(|e| GatewayError::unavailable(venue, format!("invalid JSON: {e}")))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Follow a cursor until the venue returns an empty page, no cursor, an error, or `max_pages`
/// pages have been read. Never fails; returns whatever was accumulated.
pub async fn paginate<F, Fut>(venue: VenueSlug, max_pages: usize, mut fetch_page: F) -> Vec<Value>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = GatewayResult<(Vec<Value>, Option<String>)>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    for page_no in 0..max_pages {
        let (page, next) = match fetch_page(cursor.take()).await {
            Ok(p) => p,
            Err(e) => {
                warn!(venue = %venue, page = page_no, error = %e, "pagination stopped early");
                break;
            }
        };
        let empty = page.is_empty();
        items.extend(page);
        match next {
            Some(c) if !empty && !c.is_empty() => cursor = Some(c),
            _ => break,
        }
    }
    items
}

/// Parse each record, dropping the ones the parser rejects.
pub fn parse_records<F>(venue: VenueSlug, items: &[Value], parse: F) -> Vec<Market>
where
    F: Fn(&Value) -> Option<Market>,
{
    let markets: Vec<Market> = items.iter().filter_map(&parse).collect();
    let skipped = items.len() - markets.len();
    if skipped > 0 {
        debug!(venue = %venue, skipped, "skipped malformed market records");
    }
    markets
}

/// Book levels published as `[{price, size}, ...]` under `key`. Unparseable levels are dropped.
pub fn price_levels(data: &Value, key: &str) -> Vec<(Decimal, Decimal)> {
    data.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|l| Some((normaliser::field(l, &["price"])?, normaliser::field(l, &["size"])?)))
        .collect()
}

/// Indices of markets sharing an event id, for events with more than one market.
pub fn event_groups(markets: &[Market]) -> Vec<(String, Vec<usize>)> {
    markets
        .iter()
        .enumerate()
        .filter_map(|(i, m)| m.event_id.clone().map(|e| (e, i)))
        .into_group_map()
        .into_iter()
        .filter(|(_, idx)| idx.len() > 1)
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .collect()
}

/// Flag a group as multi-outcome. Markets missing from `names` stay unlabeled.
pub fn mark_group(markets: &mut [Market], indices: &[usize], names: &AHashMap<String, String>) {
    for &i in indices {
        let m = &mut markets[i];
        m.is_multi_outcome = true;
        m.related_market_count = indices.len();
        m.outcome_name = names.get(&m.market_id).cloned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::types::Chain;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_paginate_stops_at_cap() {
        let calls = AtomicUsize::new(0);
        let items = paginate(VenueSlug::Kalshi, MAX_PAGES, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok((vec![json!({"ticker": "X"})], Some("again".to_string()))) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), MAX_PAGES);
        assert_eq!(items.len(), MAX_PAGES);
    }

    #[tokio::test]
    async fn test_paginate_stops_on_error_and_keeps_items() {
        let calls = AtomicUsize::new(0);
        let items = paginate(VenueSlug::Kalshi, MAX_PAGES, |cursor| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 2 {
                    Err(GatewayError::unavailable("kalshi", "boom"))
                } else {
                    assert_eq!(cursor.is_some(), n > 0);
                    Ok((vec![json!(n)], Some(format!("c{n}"))))
                }
            }
        })
        .await;
        assert_eq!(items.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_paginate_stops_on_missing_cursor() {
        let items = paginate(VenueSlug::Kalshi, MAX_PAGES, |_| async {
            Ok((vec![json!(1), json!(2)], None))
        })
        .await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"a": 1})))
            .mount(&server)
            .await;

        let http = VenueHttp::new(VenueSlug::Opinion, &HttpCfg::default());
        http.init().unwrap();

        match http.get_json(&format!("{}/limited", server.uri()), &[]).await {
            Err(GatewayError::PlatformUnavailable { message, code, .. }) => {
                assert_eq!(message, "Rate limit exceeded");
                assert_eq!(code.as_deref(), Some("429"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match http.get_json(&format!("{}/broken", server.uri()), &[]).await {
            Err(GatewayError::PlatformUnavailable { code, .. }) => assert_eq!(code.as_deref(), Some("500")),
            other => panic!("unexpected {other:?}"),
        }
        let ok = http.get_json(&format!("{}/ok", server.uri()), &[]).await.unwrap();
        assert_eq!(ok["a"], 1);
    }

    #[test]
    fn test_event_grouping() {
        let mut markets: Vec<Market> = ["a", "b", "c"]
            .iter()
            .map(|id| Market::new(VenueSlug::Kalshi, Chain::Solana, *id, *id))
            .collect();
        markets[0].event_id = Some("E1".into());
        markets[1].event_id = Some("E1".into());
        markets[2].event_id = Some("E2".into());

        let groups = event_groups(&markets);
        assert_eq!(groups.len(), 1);
        let mut names = AHashMap::new();
        names.insert("a".to_string(), "Alice".to_string());
        mark_group(&mut markets, &groups[0].1, &names);

        assert!(markets[0].is_multi_outcome && markets[1].is_multi_outcome);
        assert_eq!(markets[0].related_market_count, 2);
        assert_eq!(markets[0].outcome_name.as_deref(), Some("Alice"));
        assert_eq!(markets[1].outcome_name, None);
        assert!(!markets[2].is_multi_outcome);
    }
}
