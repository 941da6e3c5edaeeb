use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};
use crate::market_data::types::VenueSlug;

/// Gateway settings: built-in defaults, then `gateway.toml`, then `GATEWAY__*` env vars.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// Absent means in-memory stores.
    pub database_url: Option<String>,
    pub require_trade_persistence: bool,
    pub http: HttpCfg,
    pub rpc: RpcCfg,
    pub kalshi: KalshiCfg,
    pub polymarket: PolymarketCfg,
    pub limitless: LimitlessCfg,
    pub opinion: OpinionCfg,
    pub myriad: MyriadCfg,
    pub fees: FeesCfg,
    pub rate_limit: RateLimitCfg,
    pub feed: FeedCfg,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            require_trade_persistence: true,
            http: HttpCfg::default(),
            rpc: RpcCfg::default(),
            kalshi: KalshiCfg::default(),
            polymarket: PolymarketCfg::default(),
            limitless: LimitlessCfg::default(),
            opinion: OpinionCfg::default(),
            myriad: MyriadCfg::default(),
            fees: FeesCfg::default(),
            rate_limit: RateLimitCfg::default(),
            feed: FeedCfg::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpCfg {
    pub user_agent: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            user_agent: "venue-gateway/0.1".into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RpcCfg {
    pub solana: String,
    pub polygon: String,
    pub bsc: String,
    pub base: String,
    #[serde(rename = "abstract")]
    pub abstract_chain: String,
    pub linea: String,
}

impl Default for RpcCfg {
    fn default() -> Self {
        Self {
            solana: "https://api.mainnet-beta.solana.com".into(),
            polygon: "https://polygon-rpc.com".into(),
            bsc: "https://bsc-dataseed.binance.org".into(),
            base: "https://mainnet.base.org".into(),
            abstract_chain: "https://api.mainnet.abs.xyz".into(),
            linea: "https://rpc.linea.build".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KalshiCfg {
    pub trading_url: String,
    pub metadata_url: String,
    pub public_url: String,
    pub api_key: String,
    pub fee_account: String,
    pub fee_bps: u32,
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for KalshiCfg {
    fn default() -> Self {
        Self {
            trading_url: "https://c.quote-api.dflow.net".into(),
            metadata_url: "https://c.prediction-markets-api.dflow.net".into(),
            public_url: "https://api.elections.kalshi.com/trade-api/v2".into(),
            api_key: String::new(),
            fee_account: String::new(),
            fee_bps: 50,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PolymarketCfg {
    pub clob_url: String,
    pub gamma_url: String,
    pub builder_key: String,
    pub builder_secret: String,
    pub builder_passphrase: String,
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for PolymarketCfg {
    fn default() -> Self {
        Self {
            clob_url: "https://clob.polymarket.com".into(),
            gamma_url: "https://gamma-api.polymarket.com".into(),
            builder_key: String::new(),
            builder_secret: String::new(),
            builder_passphrase: String::new(),
            cache_ttl: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LimitlessCfg {
    pub api_url: String,
    pub api_key: String,
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for LimitlessCfg {
    fn default() -> Self {
        Self {
            api_url: "https://api.limitless.exchange".into(),
            api_key: String::new(),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OpinionCfg {
    pub api_url: String,
    pub api_key: String,
    pub multi_sig_addr: String,
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for OpinionCfg {
    fn default() -> Self {
        Self {
            api_url: "https://proxy.opinion.trade:8443".into(),
            api_key: String::new(),
            multi_sig_addr: String::new(),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MyriadCfg {
    pub api_url: String,
    pub api_key: String,
    pub referral_code: String,
    pub network_id: u64,
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for MyriadCfg {
    fn default() -> Self {
        Self {
            api_url: "https://api-v2.myriadprotocol.com".into(),
            api_key: String::new(),
            referral_code: String::new(),
            network_id: 2741,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeesCfg {
    pub evm_fee_account: String,
    pub evm_fee_bps: u32,
    pub platform_fee_bps: u32,
}

impl Default for FeesCfg {
    fn default() -> Self {
        Self {
            evm_fee_account: String::new(),
            evm_fee_bps: 50,
            platform_fee_bps: crate::market_data::fees::DEFAULT_FEE_BPS,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitCfg {
    #[serde(with = "humantime_serde")]
    pub period: Duration,
}

impl Default for RateLimitCfg {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedCfg {
    pub venues: Vec<VenueSlug>,
    #[serde(with = "humantime_serde")]
    pub broadcast_interval: Duration,
    pub canary_enabled: bool,
    #[serde(with = "humantime_serde")]
    pub canary_interval: Duration,
    pub sync_limit: usize,
}

impl Default for FeedCfg {
    fn default() -> Self {
        Self {
            venues: vec![
                VenueSlug::Polymarket,
                VenueSlug::Kalshi,
                VenueSlug::Limitless,
                VenueSlug::Opinion,
            ],
            broadcast_interval: Duration::from_secs(5),
            canary_enabled: true,
            canary_interval: Duration::from_secs(60),
            sync_limit: 2000,
        }
    }
}

impl Settings {
    /// Load `.env`, then layer the optional file and `GATEWAY__` environment over defaults.
    pub fn load(path: Option<&str>) -> GatewayResult<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = Config::builder();
        builder = match path {
            Some(p) => builder.add_source(File::with_name(p)),
            None => builder.add_source(File::with_name("gateway").required(false)),
        };
        let cfg = builder
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("feed.venues")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let settings: Settings = cfg
            .try_deserialize()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.rate_limit.period.is_zero() {
            return Err(GatewayError::Config("rate_limit.period must be > 0".into()));
        }
        if self.feed.broadcast_interval.is_zero() {
            return Err(GatewayError::Config("feed.broadcast_interval must be > 0".into()));
        }
        if self.fees.platform_fee_bps > 10_000 {
            return Err(GatewayError::Config("fees.platform_fee_bps must be <= 10000".into()));
        }
        if ![2741, 59144, 56].contains(&self.myriad.network_id) {
            return Err(GatewayError::Config(format!(
                "myriad.network_id {} is not a supported network",
                self.myriad.network_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert!(s.require_trade_persistence);
        assert_eq!(s.feed.venues.len(), 4);
        assert_eq!(s.kalshi.cache_ttl, Duration::from_secs(300));
        assert_eq!(s.polymarket.cache_ttl, Duration::from_secs(120));
    }

    #[test]
    fn test_file_layer_with_humantime() {
        let cfg = Config::builder()
            .add_source(File::from_str(
                r#"
                require_trade_persistence = false
                [feed]
                venues = ["kalshi", "limitless"]
                broadcast_interval = "2s"
                [myriad]
                network_id = 59144
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let s: Settings = cfg.try_deserialize().unwrap();
        assert!(!s.require_trade_persistence);
        assert_eq!(s.feed.venues, vec![VenueSlug::Kalshi, VenueSlug::Limitless]);
        assert_eq!(s.feed.broadcast_interval, Duration::from_secs(2));
        assert_eq!(s.feed.canary_interval, Duration::from_secs(60));
        assert_eq!(s.myriad.network_id, 59144);
        s.validate().unwrap();
    }

    #[test]
    fn test_unknown_myriad_network_rejected() {
        let mut s = Settings::default();
        s.myriad.network_id = 1;
        assert!(matches!(s.validate(), Err(GatewayError::Config(_))));
    }
}
