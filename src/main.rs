use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use venue_gateway::config::Settings;
use venue_gateway::feed::FeedQuery;
use venue_gateway::market_data::adapters::VenueAdapter;
use venue_gateway::market_data::types::{Outcome, Side};
use venue_gateway::telemetry;
use venue_gateway::trading::TradeRequest;
use venue_gateway::GatewayContext;

#[derive(Parser)]
#[command(name = "venue-gateway")]
#[command(about = "Unified gateway over prediction-market venues")]
struct Args {
    /// Path to a settings file (TOML); defaults to ./gateway.toml when present
    #[arg(long, short, global = true)]
    config: Option<String>,

    /// Serve Prometheus metrics on this port (needs the metrics-exporter feature)
    #[arg(long, global = true)]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize venues and broadcast the live feed until Ctrl-C
    Run,
    /// List configured venues
    Venues,
    /// List or search markets
    Markets {
        #[arg(long)]
        venue: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show an order book
    Orderbook {
        #[arg(long)]
        venue: String,
        #[arg(long)]
        market: String,
        #[arg(long, default_value = "yes")]
        outcome: Outcome,
    },
    /// Price a trade including the platform fee
    Quote {
        #[arg(long)]
        venue: String,
        #[arg(long)]
        market: String,
        #[arg(long, default_value = "yes")]
        outcome: Outcome,
        #[arg(long, default_value = "buy")]
        side: Side,
        #[arg(long)]
        amount: Decimal,
    },
    /// Scan for cross-venue price gaps
    Arbitrage {
        #[arg(long)]
        min_spread: Option<Decimal>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// One full market sync across feed venues
    Sync,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;
    telemetry::init_tracing("venue_gateway=info");
    if let Some(port) = args.metrics_port {
        telemetry::init_metrics(port)?;
    }

    let ctx = GatewayContext::build(settings).await?;

    match args.command {
        Command::Run => run(&ctx).await?,
        Command::Venues => print_json(&ctx.registry.list_venues())?,
        Command::Markets { venue, search, limit } => {
            let query = FeedQuery {
                venue,
                search,
                limit,
                ..FeedQuery::default()
            };
            print_json(&ctx.feed.list_markets(&query).await?)?;
        }
        Command::Orderbook { venue, market, outcome } => {
            let adapter = ctx.registry.resolve(&venue)?;
            print_json(&adapter.get_orderbook(&market, outcome).await?)?;
        }
        Command::Quote {
            venue,
            market,
            outcome,
            side,
            amount,
        } => {
            let req = TradeRequest {
                venue,
                market_id: market,
                outcome,
                side,
                amount,
            };
            print_json(&ctx.pipeline.quote(&req).await?)?;
        }
        Command::Arbitrage { min_spread, limit } => {
            print_json(&ctx.arbitrage.scan(min_spread, limit).await)?;
        }
        Command::Sync => print_json(&ctx.feed.sync().await)?,
    }

    ctx.shutdown().await;
    Ok(())
}

async fn run(ctx: &GatewayContext) -> anyhow::Result<()> {
    ctx.start().await;

    let cancel = CancellationToken::new();
    let feed = tokio::spawn(ctx.feed.clone().run(cancel.clone()));
    info!(venues = ?ctx.feed.venues(), "feed broadcaster running, Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    cancel.cancel();
    feed.await?;
    Ok(())
}
