use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crawl::exists::{all_known, ExistsChecker};
use crate::crawl::pause;
use crate::error::FailureKind;
use crate::models::{Listing, RawPage};
use crate::scrapers::traits::SourceAdapter;
use crate::scrapers::types::SearchQuery;

/// Why a crawl stopped paginating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    PageLimit,
    /// The page parsed to nothing.
    EmptyPage,
    NoMorePages,
    /// Every listing on the page was already stored.
    AllKnown,
    /// Still blocked after the cooldown retry.
    Blocked,
    /// A network or HTTP failure ended this source's crawl.
    FetchFailed,
    Cancelled,
}

#[derive(Debug)]
pub struct CrawlOutcome {
    /// Unique by `external_id`, in page order.
    pub listings: Vec<Listing>,
    pub pages_fetched: u32,
    pub stop: StopReason,
}

/// Walks one (source, region) page by page.
pub struct PaginationController<'a> {
    adapter: &'a dyn SourceAdapter,
    exists: Option<&'a dyn ExistsChecker>,
    page_limit: Option<u32>,
    delay: Duration,
    block_cooldown: Duration,
}

impl<'a> PaginationController<'a> {
    pub fn new(adapter: &'a dyn SourceAdapter) -> Self {
        Self {
            adapter,
            exists: None,
            page_limit: None,
            delay: Duration::from_secs(2),
            block_cooldown: Duration::from_secs(30),
        }
    }

    /// Stop once a page holds only known listings. Pass `None` for a full refresh.
    pub fn with_exists_checker(mut self, exists: Option<&'a dyn ExistsChecker>) -> Self {
        self.exists = exists;
        self
    }

    /// `None` walks until the source runs out.
    pub fn with_page_limit(mut self, limit: Option<u32>) -> Self {
        self.page_limit = limit;
        self
    }

    /// Politeness delay, before the adapter's own adjustment.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_block_cooldown(mut self, cooldown: Duration) -> Self {
        self.block_cooldown = cooldown;
        self
    }

    pub async fn crawl(&self, cancel: &CancellationToken, query: &SearchQuery) -> CrawlOutcome {
        let adapter = self.adapter;
        let mut seen = HashSet::new();
        let mut listings = Vec::new();
        let mut pages_fetched = 0;
        let mut page = 1;

        let stop = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if self.page_limit.is_some_and(|limit| page > limit) {
                break StopReason::PageLimit;
            }

            info!("Scraping {} page {} for {}...", adapter.name(), page, query.region);
            let raw = match self.fetch(cancel, query, page).await {
                Ok(raw) => raw,
                Err(stop) => break stop,
            };
            pages_fetched += 1;

            let result = adapter.parse_page(&raw);
            if result.listings.is_empty() {
                info!("No listings on {} page {}, stopping", adapter.name(), page);
                break StopReason::EmptyPage;
            }

            let page_ids: Vec<String> = result
                .listings
                .iter()
                .map(|listing| listing.external_id.clone())
                .collect();
            let known = self.known_ids(&page_ids).await;

            let (mut novel, stored): (Vec<Listing>, Vec<Listing>) = result
                .listings
                .into_iter()
                .filter(|listing| seen.insert(listing.external_id.clone()))
                .partition(|listing| !known.get(&listing.external_id).copied().unwrap_or(false));

            if !novel.is_empty() {
                adapter.enrich(cancel, &mut novel).await;
            }
            info!(
                "Found {} new listings on page {} ({} already stored, total: {})",
                novel.len(),
                page,
                stored.len(),
                listings.len() + novel.len() + stored.len()
            );
            listings.extend(novel);
            listings.extend(stored);

            if self.exists.is_some() && all_known(&page_ids, &known) {
                info!("All listings on page {} already stored, stopping", page);
                break StopReason::AllKnown;
            }
            if !result.has_more {
                info!("No more pages available");
                break StopReason::NoMorePages;
            }
            if self.page_limit.is_some_and(|limit| page >= limit) {
                break StopReason::PageLimit;
            }

            let delay = adapter.page_delay(self.delay);
            debug!("Waiting {:?} before next page", delay);
            if pause(cancel, delay).await.is_err() {
                break StopReason::Cancelled;
            }
            page += 1;
        };

        CrawlOutcome {
            listings,
            pages_fetched,
            stop,
        }
    }

    async fn fetch(&self, cancel: &CancellationToken, query: &SearchQuery, page: u32) -> Result<RawPage, StopReason> {
        let err = match self.adapter.fetch_page(cancel, query, page).await {
            Ok(raw) => return Ok(raw),
            Err(err) => err,
        };

        match err.kind() {
            FailureKind::Cancelled => Err(StopReason::Cancelled),
            FailureKind::Blocked => {
                warn!(
                    "🚫 {} page {} blocked: {}. Waiting {:?} before retry...",
                    self.adapter.name(),
                    page,
                    err,
                    self.block_cooldown
                );
                if pause(cancel, self.block_cooldown).await.is_err() {
                    return Err(StopReason::Cancelled);
                }
                match self.adapter.fetch_page(cancel, query, page).await {
                    Ok(raw) => Ok(raw),
                    Err(retry) if retry.kind() == FailureKind::Cancelled => Err(StopReason::Cancelled),
                    Err(retry) => {
                        warn!("Still blocked after retry ({}), stopping {}", retry, self.adapter.name());
                        Err(StopReason::Blocked)
                    }
                }
            }
            FailureKind::Transient | FailureKind::Terminal => {
                warn!("Error scraping {} page {}: {}", self.adapter.name(), page, err);
                Err(StopReason::FetchFailed)
            }
        }
    }

    async fn known_ids(&self, ids: &[String]) -> HashMap<String, bool> {
        let Some(exists) = self.exists else {
            return HashMap::new();
        };
        match exists.existing(self.adapter.source(), ids).await {
            Ok(known) => known,
            Err(e) => {
                warn!("Exists check failed, treating page as new: {:#}", e);
                HashMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScrapeError;
    use crate::models::{PageResult, Source};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Pages are `"id,id,...;more"` bodies; fetch failures are scripted per page.
    #[derive(Default)]
    struct ScriptedAdapter {
        pages: Vec<&'static str>,
        failures: Mutex<HashMap<u32, Vec<ScrapeError>>>,
        fetched: Mutex<Vec<u32>>,
        enriched: Mutex<Vec<String>>,
    }

    impl ScriptedAdapter {
        fn new(pages: Vec<&'static str>) -> Self {
            Self {
                pages,
                ..Self::default()
            }
        }

        fn failing(self, page: u32, errors: Vec<ScrapeError>) -> Self {
            self.failures.lock().unwrap().insert(page, errors.into_iter().rev().collect());
            self
        }

        fn fetched(&self) -> Vec<u32> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedAdapter {
        fn source(&self) -> Source {
            Source::FarmBuy
        }

        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_page(
            &self,
            _cancel: &CancellationToken,
            _query: &SearchQuery,
            page: u32,
        ) -> Result<RawPage, ScrapeError> {
            self.fetched.lock().unwrap().push(page);
            if let Some(err) = self.failures.lock().unwrap().get_mut(&page).and_then(Vec::pop) {
                return Err(err);
            }
            let body = self.pages.get(page as usize - 1).copied().unwrap_or("");
            Ok(RawPage::new(page, format!("page-{}", page), body))
        }

        fn parse_page(&self, raw: &RawPage) -> PageResult {
            let (ids, more) = raw.body.split_once(';').unwrap_or((raw.body.as_str(), ""));
            PageResult {
                listings: ids
                    .split(',')
                    .filter(|id| !id.is_empty())
                    .map(|id| Listing::new(Source::FarmBuy, id))
                    .collect(),
                has_more: more == "more",
            }
        }

        async fn enrich(&self, _cancel: &CancellationToken, listings: &mut [Listing]) {
            let mut enriched = self.enriched.lock().unwrap();
            for listing in listings {
                listing.description = Some("enriched".into());
                enriched.push(listing.external_id.clone());
            }
        }
    }

    struct KnownIds(Vec<&'static str>);

    #[async_trait]
    impl ExistsChecker for KnownIds {
        async fn existing(&self, _source: Source, ids: &[String]) -> Result<HashMap<String, bool>> {
            Ok(ids
                .iter()
                .map(|id| (id.clone(), self.0.iter().any(|known| *known == id.as_str())))
                .collect())
        }
    }

    fn controller(adapter: &ScriptedAdapter) -> PaginationController<'_> {
        PaginationController::new(adapter)
            .with_delay(Duration::ZERO)
            .with_block_cooldown(Duration::ZERO)
    }

    fn ids(outcome: &CrawlOutcome) -> Vec<&str> {
        outcome.listings.iter().map(|l| l.external_id.as_str()).collect()
    }

    #[tokio::test]
    async fn dedupes_across_pages() {
        let adapter = ScriptedAdapter::new(vec!["1,2;more", "2,3;more", "3,4"]);
        let outcome = controller(&adapter).crawl(&CancellationToken::new(), &SearchQuery::default()).await;
        assert_eq!(ids(&outcome), vec!["1", "2", "3", "4"]);
        assert_eq!(outcome.stop, StopReason::NoMorePages);
        assert_eq!(outcome.pages_fetched, 3);
    }

    #[tokio::test]
    async fn empty_page_stops_despite_more_marker() {
        let adapter = ScriptedAdapter::new(vec!["1;more", ";more", "9;more"]);
        let outcome = controller(&adapter).crawl(&CancellationToken::new(), &SearchQuery::default()).await;
        assert_eq!(outcome.stop, StopReason::EmptyPage);
        assert_eq!(adapter.fetched(), vec![1, 2]);
    }

    #[tokio::test]
    async fn all_known_page_stops_before_next_fetch() {
        let adapter = ScriptedAdapter::new(vec!["5,6;more", "1,2;more", "3;more"]);
        let checker = KnownIds(vec!["1", "2"]);
        let outcome = controller(&adapter)
            .with_exists_checker(Some(&checker))
            .crawl(&CancellationToken::new(), &SearchQuery::default())
            .await;
        assert_eq!(outcome.stop, StopReason::AllKnown);
        assert_eq!(adapter.fetched(), vec![1, 2]);
        assert_eq!(ids(&outcome), vec!["5", "6", "1", "2"]);
    }

    #[tokio::test]
    async fn full_refresh_walks_past_known_pages() {
        let adapter = ScriptedAdapter::new(vec!["1,2;more", "3"]);
        let outcome = controller(&adapter)
            .with_exists_checker(None)
            .crawl(&CancellationToken::new(), &SearchQuery::default())
            .await;
        assert_eq!(outcome.stop, StopReason::NoMorePages);
        assert_eq!(adapter.fetched(), vec![1, 2]);
    }

    #[tokio::test]
    async fn enriches_only_unstored_listings() {
        let adapter = ScriptedAdapter::new(vec!["1,2,3"]);
        let checker = KnownIds(vec!["2"]);
        let outcome = controller(&adapter)
            .with_exists_checker(Some(&checker))
            .crawl(&CancellationToken::new(), &SearchQuery::default())
            .await;
        assert_eq!(*adapter.enriched.lock().unwrap(), vec!["1", "3"]);
        assert_eq!(outcome.listings.len(), 3);
    }

    #[tokio::test]
    async fn page_limit_bounds_the_walk() {
        let adapter = ScriptedAdapter::new(vec!["1;more", "2;more", "3;more"]);
        let outcome = controller(&adapter)
            .with_page_limit(Some(2))
            .crawl(&CancellationToken::new(), &SearchQuery::default())
            .await;
        assert_eq!(outcome.stop, StopReason::PageLimit);
        assert_eq!(adapter.fetched(), vec![1, 2]);
    }

    #[tokio::test]
    async fn block_is_retried_once_after_cooldown() {
        let adapter = ScriptedAdapter::new(vec!["1;more", "2"])
            .failing(2, vec![ScrapeError::blocked("page-2", "KPSDK")]);
        let outcome = controller(&adapter).crawl(&CancellationToken::new(), &SearchQuery::default()).await;
        assert_eq!(adapter.fetched(), vec![1, 2, 2]);
        assert_eq!(ids(&outcome), vec!["1", "2"]);
        assert_eq!(outcome.stop, StopReason::NoMorePages);
    }

    #[tokio::test]
    async fn persistent_block_aborts_the_source() {
        let adapter = ScriptedAdapter::new(vec!["1;more", "2;more"]).failing(
            2,
            vec![
                ScrapeError::blocked("page-2", "KPSDK"),
                ScrapeError::blocked("page-2", "KPSDK"),
            ],
        );
        let outcome = controller(&adapter).crawl(&CancellationToken::new(), &SearchQuery::default()).await;
        assert_eq!(outcome.stop, StopReason::Blocked);
        assert_eq!(adapter.fetched(), vec![1, 2, 2]);
        assert_eq!(ids(&outcome), vec!["1"]);
    }

    #[tokio::test]
    async fn terminal_error_is_not_retried() {
        let adapter = ScriptedAdapter::new(vec!["1;more"]).failing(
            1,
            vec![ScrapeError::Http {
                status: 404,
                url: "page-1".into(),
            }],
        );
        let outcome = controller(&adapter).crawl(&CancellationToken::new(), &SearchQuery::default()).await;
        assert_eq!(outcome.stop, StopReason::FetchFailed);
        assert_eq!(adapter.fetched(), vec![1]);
    }

    #[tokio::test]
    async fn cancelled_run_fetches_nothing() {
        let adapter = ScriptedAdapter::new(vec!["1;more"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = controller(&adapter).crawl(&cancel, &SearchQuery::default()).await;
        assert_eq!(outcome.stop, StopReason::Cancelled);
        assert!(adapter.fetched().is_empty());
    }
}
