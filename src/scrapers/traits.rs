use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ScrapeError;
use crate::models::{Listing, PageResult, RawPage, Source};
use crate::scrapers::types::SearchQuery;

/// Common trait for all listing sources.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source that listings from this adapter are tagged with
    fn source(&self) -> Source;

    /// Adapter name for logs (several adapters may serve one source)
    fn name(&self) -> &'static str;

    /// Fetch one results page
    async fn fetch_page(
        &self,
        cancel: &CancellationToken,
        query: &SearchQuery,
        page: u32,
    ) -> Result<RawPage, ScrapeError>;

    /// Parse a fetched page into listings
    fn parse_page(&self, raw: &RawPage) -> PageResult;

    /// Fill in fields from detail pages for listings not seen before.
    ///
    /// Failures are logged per listing and never fail the page.
    async fn enrich(&self, _cancel: &CancellationToken, _listings: &mut [Listing]) {}

    /// Delay between result pages given the configured politeness delay
    fn page_delay(&self, configured: Duration) -> Duration {
        configured
    }

    /// Whether the crawl repeats per configured region. Adapters with a fixed
    /// search URL return false and are crawled once.
    fn region_scoped(&self) -> bool {
        true
    }

    /// Acquire per-run resources, released when the guard drops.
    async fn begin_run(&self) -> Result<RunGuard, ScrapeError> {
        Ok(RunGuard::noop())
    }
}

/// Releases an adapter's per-run resources on drop, whichever way the run ends.
pub struct RunGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl RunGuard {
    pub fn noop() -> Self {
        Self { release: None }
    }

    pub fn on_release(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
