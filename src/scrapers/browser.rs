use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::antibot::{
    load_cookie_file, AntiBotSession, BrowserCookie, ChallengePolicy, ChromeStealth, ChromeTab,
    StealthProvider,
};
use crate::error::ScrapeError;
use crate::extract::land::LandUnitPolicy;
use crate::extract::price::PricePolicy;
use crate::extract::ExtractionPipeline;
use crate::models::{PageResult, RawPage, Source};
use crate::scrapers::rea::{self, list_search_url};
use crate::scrapers::traits::{RunGuard, SourceAdapter};
use crate::scrapers::types::SearchQuery;

const COOKIE_DOMAIN: &str = "realestate.com.au";
const PAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// How to launch Chrome for a run.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Existing Chrome profile, e.g. one where the challenge was already passed
    pub profile_dir: Option<PathBuf>,
    pub cookie_file: Option<PathBuf>,
    pub challenge: ChallengePolicy,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            profile_dir: None,
            cookie_file: None,
            challenge: ChallengePolicy::default(),
        }
    }
}

/// realestate.com.au through headless Chrome.
///
/// One Chrome process per crawl run, one fresh tab per results page.
pub struct ReaBrowserAdapter {
    settings: BrowserSettings,
    cookies: Vec<BrowserCookie>,
    stealth: Arc<dyn StealthProvider>,
    pipeline: ExtractionPipeline,
    browser: Arc<Mutex<Option<Browser>>>,
}

impl ReaBrowserAdapter {
    pub fn new(
        settings: BrowserSettings,
        price_policy: PricePolicy,
        land_policy: LandUnitPolicy,
    ) -> Result<Self> {
        let cookies = match &settings.cookie_file {
            Some(path) => load_cookie_file(path, COOKIE_DOMAIN)?,
            None => Vec::new(),
        };

        Ok(Self {
            settings,
            cookies,
            stealth: Arc::new(ChromeStealth),
            pipeline: rea::pipeline(price_policy, land_policy),
            browser: Arc::new(Mutex::new(None)),
        })
    }

    pub fn with_stealth(mut self, stealth: Arc<dyn StealthProvider>) -> Self {
        self.stealth = stealth;
        self
    }

    fn launch_options(&self) -> Result<LaunchOptions<'static>> {
        LaunchOptions::default_builder()
            .headless(self.settings.headless)
            .sandbox(false)
            .window_size(Some((1920, 1080)))
            .user_data_dir(self.settings.profile_dir.clone())
            .idle_browser_timeout(Duration::from_secs(300))
            .args(vec![
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
            ])
            .build()
            .context("Failed to build launch options")
    }

    async fn open_tab(&self) -> Result<Arc<Tab>, ScrapeError> {
        let slot = Arc::clone(&self.browser);
        tokio::task::spawn_blocking(move || {
            let browser = slot.lock().map_err(|_| anyhow!("browser lock poisoned"))?;
            browser
                .as_ref()
                .ok_or_else(|| anyhow!("browser not started"))?
                .new_tab()
        })
        .await
        .map_err(|e| ScrapeError::Browser(format!("browser task failed: {}", e)))?
        .map_err(ScrapeError::from)
    }
}

#[async_trait]
impl SourceAdapter for ReaBrowserAdapter {
    fn source(&self) -> Source {
        Source::Rea
    }

    fn name(&self) -> &'static str {
        "rea-browser"
    }

    async fn begin_run(&self) -> Result<RunGuard, ScrapeError> {
        info!("Launching Chrome (headless={})...", self.settings.headless);
        if let Some(dir) = &self.settings.profile_dir {
            info!("Using Chrome profile {}", dir.display());
        }

        let options = self.launch_options()?;
        let browser = tokio::task::spawn_blocking(move || {
            Browser::new(options).context("Failed to launch Chrome browser")
        })
        .await
        .map_err(|e| ScrapeError::Browser(format!("browser launch task failed: {}", e)))??;

        let slot = Arc::clone(&self.browser);
        *slot.lock().map_err(|_| ScrapeError::Browser("browser lock poisoned".into()))? = Some(browser);

        Ok(RunGuard::on_release(move || {
            match slot.lock() {
                Ok(mut browser) => {
                    browser.take();
                }
                Err(poisoned) => {
                    poisoned.into_inner().take();
                }
            }
            info!("Chrome closed");
        }))
    }

    async fn fetch_page(
        &self,
        cancel: &CancellationToken,
        query: &SearchQuery,
        page: u32,
    ) -> Result<RawPage, ScrapeError> {
        let url = list_search_url(rea::BASE_URL, query, page);
        let tab = ChromeTab::new(self.open_tab().await?, PAGE_TIMEOUT);

        let mut session = AntiBotSession::new(tab, Arc::clone(&self.stealth), self.settings.challenge.clone())
            .with_cookies(self.cookies.clone());
        let loaded = session.load(cancel, &url).await;
        session.page().close().await;

        let html = loaded?;
        info!("Page loaded: {} ({} bytes)", url, html.len());
        Ok(RawPage::new(page, url, html))
    }

    fn parse_page(&self, raw: &RawPage) -> PageResult {
        let result = self.pipeline.run(raw);
        if result.listings.is_empty() {
            rea::explain_empty_page(raw);
        }
        result
    }

    fn page_delay(&self, _configured: Duration) -> Duration {
        Duration::from_millis(rand::thread_rng().gen_range(3_000..6_000))
    }
}
