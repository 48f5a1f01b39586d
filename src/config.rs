use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::extract::land::LandUnitPolicy;
use crate::extract::price::PricePolicy;
use crate::models::Source;

pub const DEFAULT_DOMAIN_WEB_URL: &str = "https://www.domain.com.au/sale/illawarra-nsw/?ptype=acreage-semi-rural,farm,rural&landsize=40000-any&landsizeunit=m2&sort=dateupdated-desc";

/// Which sources a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceSelection {
    All,
    Only(Source),
}

impl SourceSelection {
    pub fn includes(&self, source: Source) -> bool {
        match self {
            SourceSelection::All => true,
            SourceSelection::Only(only) => *only == source,
        }
    }
}

impl Default for SourceSelection {
    fn default() -> Self {
        SourceSelection::Only(Source::FarmProperty)
    }
}

impl fmt::Display for SourceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSelection::All => f.write_str("all"),
            SourceSelection::Only(source) => source.fmt(f),
        }
    }
}

impl FromStr for SourceSelection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(SourceSelection::All);
        }
        Ok(SourceSelection::Only(s.parse()?))
    }
}

/// Options for a single crawl run.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    /// Pages per (source, region). Zero or less means no limit.
    pub max_pages: i32,
    /// Politeness delay between pages.
    pub delay: Duration,
    /// Floor for the delay when pages go through the metered fetch service.
    pub metered_delay: Duration,
    pub source: SourceSelection,
    /// Region slugs, e.g. `nsw` or `illawarra`.
    pub regions: Vec<String>,
    /// Drive realestate.com.au through headless Chrome instead of plain HTTP.
    pub use_browser: bool,
    pub headless: bool,
    /// Inject anti-fingerprinting scripts into browser pages.
    pub stealth: bool,
    pub cookie_file: Option<PathBuf>,
    pub profile_dir: Option<PathBuf>,
    pub scrapingbee_key: Option<String>,
    pub domain_api_key: Option<String>,
    pub domain_web_url: String,
    /// Walk every page even when a page holds only known listings.
    pub full_refresh: bool,
    pub skip_geocode: bool,
    pub block_cooldown: Duration,
    pub challenge_attempts: u32,
    pub land_policy: LandUnitPolicy,
    pub price_policy: PricePolicy,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            max_pages: 10,
            delay: Duration::from_secs(2),
            metered_delay: Duration::from_secs(3),
            source: SourceSelection::default(),
            regions: vec!["nsw".to_string()],
            use_browser: false,
            headless: true,
            stealth: true,
            cookie_file: None,
            profile_dir: None,
            scrapingbee_key: None,
            domain_api_key: None,
            domain_web_url: DEFAULT_DOMAIN_WEB_URL.to_string(),
            full_refresh: false,
            skip_geocode: true,
            block_cooldown: Duration::from_secs(30),
            challenge_attempts: 10,
            land_policy: LandUnitPolicy::default(),
            price_policy: PricePolicy::default(),
        }
    }
}

impl ScrapeOptions {
    /// Page cap as an `Option`, `None` when unbounded.
    pub fn page_limit(&self) -> Option<u32> {
        u32::try_from(self.max_pages).ok().filter(|limit| *limit > 0)
    }

    /// Delay to use between pages fetched through the metered service.
    pub fn metered_page_delay(&self) -> Duration {
        self.delay.max(self.metered_delay)
    }
}
