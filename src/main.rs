use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use acreage_scout::config::DEFAULT_DOMAIN_WEB_URL;
use acreage_scout::extract::land::LandUnitPolicy;
use acreage_scout::extract::price::PricePolicy;
use acreage_scout::store::JsonFileStore;
use acreage_scout::{Orchestrator, ScrapeOptions, SourceSelection};
use anyhow::{bail, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Scrape rural property listings from Australian real-estate sites.
#[derive(Debug, Parser)]
#[command(name = "acreage-scout", version)]
struct Args {
    /// Maximum pages per source and region (0 for no limit)
    #[arg(long, default_value_t = 10)]
    pages: i32,

    /// Delay between requests, e.g. "2s" or "500ms"
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    delay: Duration,

    /// Source to scrape: farmproperty, farmbuy, rea, domain, domain-web or all
    #[arg(long, default_value = "farmproperty")]
    source: SourceSelection,

    /// Comma-separated regions, e.g. "nsw,vic"
    #[arg(long, default_value = "nsw", value_delimiter = ',')]
    regions: Vec<String>,

    /// Use headless Chrome for realestate.com.au
    #[arg(long)]
    browser: bool,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Skip the anti-fingerprinting scripts
    #[arg(long)]
    no_stealth: bool,

    /// JSON file with cookies exported from a browser
    #[arg(long)]
    cookies: Option<PathBuf>,

    /// Chrome user data directory to reuse an existing session
    #[arg(long)]
    profile: Option<PathBuf>,

    /// ScrapingBee API key for bypassing bot protection
    #[arg(long, env = "SCRAPINGBEE_API_KEY", hide_env_values = true)]
    scrapingbee: Option<String>,

    /// Domain developer API key
    #[arg(long, env = "DOMAIN_API_KEY", hide_env_values = true)]
    domain_key: Option<String>,

    /// Search URL for the Domain website
    #[arg(long, default_value = DEFAULT_DOMAIN_WEB_URL)]
    domain_url: String,

    /// Scrape every page even when listings are already stored
    #[arg(long)]
    full_refresh: bool,

    /// Geocode listings without coordinates through Nominatim
    #[arg(long)]
    geocode: bool,

    /// Wait after a bot block before retrying once
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    block_cooldown: Duration,

    /// Challenge polls before giving up on a page
    #[arg(long, default_value_t = 10)]
    challenge_attempts: u32,

    /// Read unitless land sizes up to this value as hectares
    #[arg(long)]
    hectares_below: Option<f64>,

    /// Stop reading small bare prices as thousands
    #[arg(long)]
    literal_prices: bool,

    /// Where listings are stored
    #[arg(long, default_value = "scraped_properties.json")]
    output: PathBuf,
}

impl Args {
    fn into_options(self) -> ScrapeOptions {
        let defaults = ScrapeOptions::default();
        ScrapeOptions {
            max_pages: self.pages,
            delay: self.delay,
            source: self.source,
            regions: self.regions,
            use_browser: self.browser,
            headless: !self.headed,
            stealth: !self.no_stealth,
            cookie_file: self.cookies,
            profile_dir: self.profile,
            scrapingbee_key: self.scrapingbee.filter(|key| !key.is_empty()),
            domain_api_key: self.domain_key.filter(|key| !key.is_empty()),
            domain_web_url: self.domain_url,
            full_refresh: self.full_refresh,
            skip_geocode: !self.geocode,
            block_cooldown: self.block_cooldown,
            challenge_attempts: self.challenge_attempts,
            land_policy: match self.hectares_below {
                Some(sqm_above) => LandUnitPolicy::InferByMagnitude { sqm_above },
                None => LandUnitPolicy::PassThrough,
            },
            price_policy: PricePolicy {
                thousands_below: if self.literal_prices {
                    None
                } else {
                    defaults.price_policy.thousands_below
                },
            },
            ..defaults
        }
    }
}

fn parse_duration(value: &str) -> anyhow::Result<Duration> {
    let value = value.trim();
    let (number, scale) = if let Some(ms) = value.strip_suffix("ms") {
        (ms, 0.001)
    } else if let Some(s) = value.strip_suffix('s') {
        (s, 1.0)
    } else if let Some(m) = value.strip_suffix('m') {
        (m, 60.0)
    } else {
        (value, 1.0)
    };
    let number: f64 = number
        .trim()
        .parse()
        .with_context(|| format!("invalid duration: {}", value))?;
    if !number.is_finite() || number < 0.0 {
        bail!("invalid duration: {}", value);
    }
    Ok(Duration::from_secs_f64(number * scale))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let output = args.output.clone();
    let options = args.into_options();

    info!("🌾 Acreage Scout");
    info!("================");
    info!(
        "Source: {}, regions: {}, max pages: {}",
        options.source,
        options.regions.join(","),
        options.max_pages
    );

    let store = Arc::new(JsonFileStore::open(&output).await?);
    let orchestrator = Orchestrator::from_options(options, store)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping...");
            trigger.cancel();
        }
    });

    let summary = orchestrator.run(&cancel).await?;

    info!("");
    info!("✅ Found {} properties", summary.found);
    info!("📍 Geocoded {}", summary.geocoded);
    info!("💾 Saved {} to {}", summary.saved, output.display());
    if summary.skipped > 0 {
        info!("⏭️  Skipped {} without coordinates", summary.skipped);
    }
    if summary.failed > 0 {
        warn!("⚠️  {} properties failed to save", summary.failed);
    }

    Ok(())
}
