use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::antibot::{ChallengePolicy, NoStealth};
use crate::config::{ScrapeOptions, SourceSelection};
use crate::crawl::exists::{ExistsChecker, StoreExistsChecker};
use crate::crawl::pagination::{PaginationController, StopReason};
use crate::crawl::pause;
use crate::geocode::{Geocoder, NominatimGeocoder};
use crate::models::{Listing, Source};
use crate::scrapers::browser::{BrowserSettings, ReaBrowserAdapter};
use crate::scrapers::domain_api::DomainApiAdapter;
use crate::scrapers::domain_web::{self, DomainWebAdapter};
use crate::scrapers::farmbuy::FarmBuyAdapter;
use crate::scrapers::farmproperty::FarmPropertyAdapter;
use crate::scrapers::http::HttpFetcher;
use crate::scrapers::rea::ReaAdapter;
use crate::scrapers::scrapingbee::ScrapingBeeClient;
use crate::scrapers::traits::SourceAdapter;
use crate::scrapers::types::SearchQuery;
use crate::store::PropertyStore;

/// Nominatim's usage policy allows one request per second.
const GEOCODE_PAUSE: Duration = Duration::from_secs(1);

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Unique listings collected across all sources
    pub found: usize,
    pub geocoded: usize,
    pub saved: usize,
    /// Dropped for lacking coordinates
    pub skipped: usize,
    /// Rejected by the store
    pub failed: usize,
}

/// One (adapter, region) crawl's listings on their way to the collector.
struct Batch {
    adapter: &'static str,
    region: String,
    listings: Vec<Listing>,
}

/// Runs every configured adapter, then geocodes and saves what they found.
pub struct Orchestrator {
    options: ScrapeOptions,
    adapters: Vec<Box<dyn SourceAdapter>>,
    store: Arc<dyn PropertyStore>,
    geocoder: Option<Arc<dyn Geocoder>>,
    geocode_pause: Duration,
}

impl Orchestrator {
    /// An orchestrator with no adapters and no geocoder.
    pub fn new(options: ScrapeOptions, store: Arc<dyn PropertyStore>) -> Self {
        Self {
            options,
            adapters: Vec::new(),
            store,
            geocoder: None,
            geocode_pause: GEOCODE_PAUSE,
        }
    }

    /// Builds the adapters and geocoder `options` ask for.
    pub fn from_options(options: ScrapeOptions, store: Arc<dyn PropertyStore>) -> Result<Self> {
        let http = HttpFetcher::new()?;
        let mut adapters = Vec::new();
        for source in Source::ALL {
            if !options.source.includes(source) {
                continue;
            }
            if let Some(adapter) = build_adapter(source, &options, &http)? {
                info!("Source {} via {}", source, adapter.name());
                adapters.push(adapter);
            }
        }

        let geocoder: Option<Arc<dyn Geocoder>> = if options.skip_geocode {
            None
        } else {
            Some(Arc::new(NominatimGeocoder::new()?))
        };

        let mut orchestrator = Self::new(options, store);
        orchestrator.adapters = adapters;
        orchestrator.geocoder = geocoder;
        Ok(orchestrator)
    }

    /// Appends an adapter; adapters run in the order added.
    pub fn with_adapter(mut self, adapter: Box<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn with_geocode_pause(mut self, pause: Duration) -> Self {
        self.geocode_pause = pause;
        self
    }

    pub fn adapter_names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|adapter| adapter.name()).collect()
    }

    /// Crawls, geocodes and saves. A cancelled run saves nothing.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let started = Instant::now();
        info!("Starting scraper...");

        let checker = if self.options.full_refresh {
            info!("Full refresh enabled - will scrape all pages");
            None
        } else {
            Some(StoreExistsChecker::new(Arc::clone(&self.store)))
        };

        let (tx, rx) = mpsc::channel(16);
        let collector = tokio::spawn(collect(rx));

        for adapter in &self.adapters {
            if cancel.is_cancelled() {
                break;
            }
            let checker = checker.as_ref().map(|c| c as &dyn ExistsChecker);
            self.crawl_adapter(cancel, adapter.as_ref(), checker, &tx).await;
        }
        drop(tx);

        let mut listings = collector.await.context("Listing collector failed")?;
        if cancel.is_cancelled() {
            bail!("Crawl cancelled, discarding {} listings", listings.len());
        }
        info!("Total listings found: {}", listings.len());

        let geocoded = self.geocode_missing(cancel, &mut listings).await?;
        let (saved, skipped, failed) = self.save(&listings).await;
        self.store.flush().await.context("Failed to save listings")?;

        info!("Scraping complete: {} saved in {:.1?}", saved, started.elapsed());
        Ok(RunSummary {
            found: listings.len(),
            geocoded,
            saved,
            skipped,
            failed,
        })
    }

    async fn crawl_adapter(
        &self,
        cancel: &CancellationToken,
        adapter: &dyn SourceAdapter,
        checker: Option<&dyn ExistsChecker>,
        tx: &mpsc::Sender<Batch>,
    ) {
        let _run = match adapter.begin_run().await {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Failed to start {}: {}", adapter.name(), e);
                return;
            }
        };

        let regions: Vec<String> = if adapter.region_scoped() {
            self.options.regions.clone()
        } else {
            self.options.regions.iter().take(1).cloned().collect()
        };
        let controller = PaginationController::new(adapter)
            .with_exists_checker(checker)
            .with_page_limit(self.options.page_limit())
            .with_delay(self.options.delay)
            .with_block_cooldown(self.options.block_cooldown);

        for (i, region) in regions.into_iter().enumerate() {
            if i > 0 && pause(cancel, adapter.page_delay(self.options.delay)).await.is_err() {
                break;
            }
            info!("Scraping {} for {}...", adapter.name(), region);

            let outcome = controller.crawl(cancel, &SearchQuery::for_region(region.as_str())).await;
            info!(
                "Found {} listings from {} for {} over {} pages ({:?})",
                outcome.listings.len(),
                adapter.name(),
                region,
                outcome.pages_fetched,
                outcome.stop
            );

            let batch = Batch {
                adapter: adapter.name(),
                region,
                listings: outcome.listings,
            };
            if tx.send(batch).await.is_err() {
                warn!("Listing collector stopped early");
                break;
            }
            if outcome.stop == StopReason::Cancelled {
                break;
            }
        }
    }

    async fn geocode_missing(&self, cancel: &CancellationToken, listings: &mut [Listing]) -> Result<usize> {
        let Some(geocoder) = &self.geocoder else {
            info!("Skipped geocoding (run with --geocode to enable)");
            return Ok(0);
        };

        let mut geocoded = 0;
        for listing in listings.iter_mut().filter(|listing| !listing.has_coordinates()) {
            let Some(address) = listing.geocode_query() else {
                continue;
            };
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => bail!("Crawl cancelled during geocoding"),
                result = geocoder.geocode(&address) => result,
            };
            match result {
                Ok((lat, lng)) => {
                    listing.set_coordinates(lat, lng);
                    geocoded += 1;
                }
                Err(e) => warn!("Geocoding failed for {}: {:#}", address, e),
            }
            if pause(cancel, self.geocode_pause).await.is_err() {
                bail!("Crawl cancelled during geocoding");
            }
        }
        info!("Geocoded {} listings", geocoded);
        Ok(geocoded)
    }

    /// Upserts every listing with coordinates. Returns (saved, skipped, failed).
    async fn save(&self, listings: &[Listing]) -> (usize, usize, usize) {
        let (mut saved, mut skipped, mut failed) = (0, 0, 0);
        for listing in listings {
            if !listing.has_coordinates() {
                skipped += 1;
                continue;
            }
            match self.store.upsert_property(listing).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    warn!("Failed to save listing {}: {:#}", listing.external_id, e);
                    failed += 1;
                }
            }
        }
        if skipped > 0 {
            info!("Skipped {} properties without coordinates", skipped);
        }
        (saved, skipped, failed)
    }
}

/// Merges batches, keeping the first occurrence of each (source, id).
async fn collect(mut rx: mpsc::Receiver<Batch>) -> Vec<Listing> {
    let mut index: HashMap<(Source, String), usize> = HashMap::new();
    let mut merged: Vec<Listing> = Vec::new();

    while let Some(batch) = rx.recv().await {
        let received = batch.listings.len();
        let mut duplicates = 0;
        for listing in batch.listings {
            let key = (listing.source, listing.external_id.clone());
            match index.get(&key) {
                Some(&at) => {
                    merged[at].fill_missing_from(listing);
                    duplicates += 1;
                }
                None => {
                    index.insert(key, merged.len());
                    merged.push(listing);
                }
            }
        }
        debug!(
            "Collected {} listings from {} ({}), {} already seen",
            received, batch.adapter, batch.region, duplicates
        );
    }
    merged
}

fn build_adapter(source: Source, options: &ScrapeOptions, http: &HttpFetcher) -> Result<Option<Box<dyn SourceAdapter>>> {
    let price = options.price_policy;
    let land = options.land_policy;

    let adapter: Box<dyn SourceAdapter> = match source {
        Source::FarmProperty => Box::new(FarmPropertyAdapter::new(http.clone(), price)),
        Source::FarmBuy => Box::new(FarmBuyAdapter::new(http.clone(), price, land)),
        Source::DomainWeb => Box::new(DomainWebAdapter::new(
            http.clone(),
            options.domain_web_url.clone(),
            price,
            domain_web::LAND_POLICY,
        )),
        Source::Domain => match &options.domain_api_key {
            Some(key) => Box::new(DomainApiAdapter::new(http.clone(), key.clone(), price)),
            None => {
                if options.source == SourceSelection::Only(Source::Domain) {
                    warn!("Domain source selected but no API key provided (set DOMAIN_API_KEY)");
                } else {
                    debug!("No Domain API key, skipping the Domain API");
                }
                return Ok(None);
            }
        },
        // ScrapingBee, then the browser, then plain HTTP.
        Source::Rea => {
            if let Some(key) = &options.scrapingbee_key {
                info!(
                    "Using ScrapingBee for REA scraping ({:?} between pages)",
                    options.metered_page_delay()
                );
                Box::new(ReaAdapter::metered(
                    ScrapingBeeClient::new(key.clone())?,
                    options.metered_delay,
                    price,
                    land,
                ))
            } else if options.use_browser {
                info!("Using browser for REA scraping (may be blocked by Kasada)");
                let settings = BrowserSettings {
                    headless: options.headless,
                    profile_dir: options.profile_dir.clone(),
                    cookie_file: options.cookie_file.clone(),
                    challenge: ChallengePolicy::default().with_max_attempts(options.challenge_attempts),
                };
                let mut adapter = ReaBrowserAdapter::new(settings, price, land)?;
                if !options.stealth {
                    adapter = adapter.with_stealth(Arc::new(NoStealth));
                }
                Box::new(adapter)
            } else {
                info!("Using direct HTTP for REA scraping (will likely be blocked)");
                Box::new(ReaAdapter::direct(http.clone(), price, land))
            }
        }
    };
    Ok(Some(adapter))
}
