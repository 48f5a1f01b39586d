//! Page-to-listings extraction.
//!
//! An [`ExtractionPipeline`] holds a source's strategies in priority order and
//! stops at the first one that yields at least one listing. Strategies fail
//! quietly by returning `None`; an exhausted pipeline produces an empty page.

pub mod blob;
pub mod cards;
pub mod json;
pub mod jsonld;
pub mod land;
pub mod price;
pub mod search;

use std::collections::HashSet;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::models::{Listing, PageResult, RawPage, Source};
use blob::BlobLocator;
use cards::CardRuleSet;
use price::PricePolicy;

/// What a strategy found on a page.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub listings: Vec<Listing>,
    /// The strategy's own pagination verdict, when its data carries one.
    pub has_more: Option<bool>,
}

impl Extraction {
    pub fn new(listings: Vec<Listing>) -> Self {
        Self {
            listings,
            has_more: None,
        }
    }

    pub fn with_has_more(mut self, has_more: bool) -> Self {
        self.has_more = Some(has_more);
        self
    }
}

/// Resolves a listing link against the site root. Absolute and
/// protocol-relative links keep their own host.
pub fn absolute_url(base: &str, href: &str) -> String {
    match Url::parse(base).and_then(|base| base.join(href.trim())) {
        Ok(url) => url.into(),
        Err(_) => format!("{}{}", base.trim_end_matches('/'), href),
    }
}

/// One way of reading listings out of a page.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn extract(&self, page: &RawPage) -> Option<Extraction>;
}

type JsonWalk = Box<dyn Fn(&Value) -> Option<Extraction> + Send + Sync>;
type ListingMapper = Box<dyn Fn(&Value) -> Option<Listing> + Send + Sync>;
type PageFn = Box<dyn Fn(&RawPage) -> Option<Extraction> + Send + Sync>;

/// Finds a known data blob and walks its documented paths.
pub struct EmbeddedJson {
    locators: Vec<BlobLocator>,
    walk: JsonWalk,
}

impl EmbeddedJson {
    pub fn new(
        locators: Vec<BlobLocator>,
        walk: impl Fn(&Value) -> Option<Extraction> + Send + Sync + 'static,
    ) -> Self {
        Self {
            locators,
            walk: Box::new(walk),
        }
    }
}

impl Strategy for EmbeddedJson {
    fn name(&self) -> &str {
        "embedded-json"
    }

    fn extract(&self, page: &RawPage) -> Option<Extraction> {
        self.locators.iter().find_map(|locator| {
            let blob = locator.locate(&page.body)?;
            (self.walk)(&blob).filter(|found| !found.listings.is_empty())
        })
    }
}

/// Walks the whole blob looking for listing-shaped objects.
pub struct RecursiveSearch {
    locators: Vec<BlobLocator>,
    mapper: ListingMapper,
}

impl RecursiveSearch {
    pub fn new(
        locators: Vec<BlobLocator>,
        mapper: impl Fn(&Value) -> Option<Listing> + Send + Sync + 'static,
    ) -> Self {
        Self {
            locators,
            mapper: Box::new(mapper),
        }
    }
}

impl Strategy for RecursiveSearch {
    fn name(&self) -> &str {
        "recursive-search"
    }

    fn extract(&self, page: &RawPage) -> Option<Extraction> {
        self.locators.iter().find_map(|locator| {
            let blob = locator.locate(&page.body)?;
            let listings: Vec<Listing> = search::find_listing_candidates(&blob)
                .iter()
                .filter_map(|candidate| (self.mapper)(candidate))
                .collect();
            (!listings.is_empty()).then(|| Extraction::new(listings))
        })
    }
}

/// Listing links and data attributes in the markup.
pub struct HtmlCards {
    rules: CardRuleSet,
}

impl HtmlCards {
    pub fn new(rules: CardRuleSet) -> Self {
        Self { rules }
    }
}

impl Strategy for HtmlCards {
    fn name(&self) -> &str {
        "html-cards"
    }

    fn extract(&self, page: &RawPage) -> Option<Extraction> {
        let listings = self.rules.extract(&page.body);
        (!listings.is_empty()).then(|| Extraction::new(listings))
    }
}

/// A source-specific strategy written as a plain function.
pub struct FnStrategy {
    name: &'static str,
    run: PageFn,
}

impl FnStrategy {
    pub fn new(
        name: &'static str,
        run: impl Fn(&RawPage) -> Option<Extraction> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            run: Box::new(run),
        }
    }
}

impl Strategy for FnStrategy {
    fn name(&self) -> &str {
        self.name
    }

    fn extract(&self, page: &RawPage) -> Option<Extraction> {
        (self.run)(page)
    }
}

/// Markup that signals another results page exists.
pub struct NextPageMarkers {
    literals: &'static [&'static str],
    patterns: Vec<Regex>,
}

impl NextPageMarkers {
    pub fn new(literals: &'static [&'static str], patterns: &[&str]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!("Ignoring next-page pattern {:?}: {}", pattern, e);
                    None
                }
            })
            .collect();
        Self { literals, patterns }
    }

    pub fn none() -> Self {
        Self {
            literals: &[],
            patterns: Vec::new(),
        }
    }

    pub fn matches(&self, html: &str) -> bool {
        self.literals.iter().any(|marker| html.contains(marker))
            || self.patterns.iter().any(|regex| regex.is_match(html))
    }
}

/// Ordered fallback of strategies for one source.
pub struct ExtractionPipeline {
    source: Source,
    strategies: Vec<Box<dyn Strategy>>,
    next_markers: NextPageMarkers,
    price_policy: PricePolicy,
}

impl ExtractionPipeline {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            strategies: Vec::new(),
            next_markers: NextPageMarkers::none(),
            price_policy: PricePolicy::default(),
        }
    }

    /// Appends a strategy after the ones already registered.
    pub fn with_strategy(mut self, strategy: impl Strategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn with_next_markers(mut self, markers: NextPageMarkers) -> Self {
        self.next_markers = markers;
        self
    }

    pub fn with_price_policy(mut self, policy: PricePolicy) -> Self {
        self.price_policy = policy;
        self
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn run(&self, page: &RawPage) -> PageResult {
        for strategy in &self.strategies {
            let Some(found) = strategy.extract(page) else {
                debug!("{} page {}: {} found nothing", self.source, page.page, strategy.name());
                continue;
            };
            if found.listings.is_empty() {
                continue;
            }

            let has_more = found
                .has_more
                .unwrap_or_else(|| self.next_markers.matches(&page.body));
            let listings = self.finish(found.listings);
            debug!(
                "{} page {}: {} listings via {} (has_more={})",
                self.source,
                page.page,
                listings.len(),
                strategy.name(),
                has_more
            );
            return PageResult { listings, has_more };
        }

        PageResult::empty()
    }

    fn finish(&self, listings: Vec<Listing>) -> Vec<Listing> {
        let mut seen = HashSet::new();
        listings
            .into_iter()
            .filter(|listing| !listing.external_id.trim().is_empty())
            .filter(|listing| seen.insert(listing.external_id.clone()))
            .map(|mut listing| {
                listing.normalize(&self.price_policy);
                listing
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cards::{CardRule, IdSource, SlugConvention};
    use json::JsonExt;

    #[test]
    fn absolute_url_resolves_against_site_root() {
        let base = "https://www.domain.com.au";
        assert_eq!(absolute_url(base, "/farm-123"), "https://www.domain.com.au/farm-123");
        assert_eq!(absolute_url(base, "farm-123"), "https://www.domain.com.au/farm-123");
        assert_eq!(
            absolute_url(base, "https://cdn.example.com/a.jpg"),
            "https://cdn.example.com/a.jpg"
        );
        assert_eq!(
            absolute_url(base, "//cdn.example.com/a.jpg"),
            "https://cdn.example.com/a.jpg"
        );
        assert_eq!(
            absolute_url("https://farmbuy.com/", "/property/9?ref=list"),
            "https://farmbuy.com/property/9?ref=list"
        );
    }

    const LINK_RULES: &[CardRule] = &[CardRule {
        priority: 0,
        pattern: r#"href="/listing/(\d+)""#,
        id: IdSource::Group(1),
        path_group: None,
        excludes: &[],
    }];

    fn pipeline() -> ExtractionPipeline {
        ExtractionPipeline::new(Source::DomainWeb)
            .with_strategy(EmbeddedJson::new(
                vec![BlobLocator::ScriptId("__NEXT_DATA__")],
                |blob| {
                    let items = blob.get("listings")?.as_array()?;
                    let listings = items
                        .iter()
                        .filter_map(|item| {
                            let mut listing = Listing::new(Source::DomainWeb, item.id_at("id")?);
                            listing.price_text = item.str_at("price").map(String::from);
                            Some(listing)
                        })
                        .collect();
                    Some(Extraction::new(listings))
                },
            ))
            .with_strategy(HtmlCards::new(CardRuleSet::new(
                Source::DomainWeb,
                "https://example.com",
                SlugConvention::Opaque,
                LINK_RULES,
            )))
            .with_next_markers(NextPageMarkers::new(&[r#"rel="next""#], &[]))
    }

    #[test]
    fn prefers_embedded_json_over_cards() {
        let html = r#"
            <script id="__NEXT_DATA__" type="application/json">{"listings":[{"id":1,"price":"$600k"},{"id":2}]}</script>
            <a href="/listing/99">card</a><a href="/listing/98">card</a><a href="/listing/97">card</a>
        "#;
        let result = pipeline().run(&RawPage::new(1, "https://example.com", html));

        let ids: Vec<&str> = result.listings.iter().map(|l| l.external_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(result.listings[0].price_min, Some(600_000));
        assert!(!result.has_more);
    }

    #[test]
    fn falls_back_to_cards_when_json_is_empty() {
        let html = r#"
            <script id="__NEXT_DATA__" type="application/json">{"listings":[]}</script>
            <a href="/listing/99">card</a><a href="/listing/99">again</a>
            <link rel="next" href="?page=2">
        "#;
        let result = pipeline().run(&RawPage::new(1, "https://example.com", html));

        assert_eq!(result.listings.len(), 1);
        assert_eq!(result.listings[0].url, "https://example.com/99");
        assert!(result.has_more);
    }

    #[test]
    fn nothing_parseable_means_no_more_pages() {
        let html = r#"<html><a rel="next" href="?page=2">Next</a></html>"#;
        let result = pipeline().run(&RawPage::new(3, "https://example.com", html));
        assert!(result.listings.is_empty());
        assert!(!result.has_more);
    }

    #[test]
    fn strategy_verdict_overrides_markers() {
        let pipeline = ExtractionPipeline::new(Source::Rea)
            .with_strategy(FnStrategy::new("fixed", |_| {
                Some(Extraction::new(vec![Listing::new(Source::Rea, "1")]).with_has_more(false))
            }))
            .with_next_markers(NextPageMarkers::new(&[r#"rel="next""#], &[]));

        let result = pipeline.run(&RawPage::new(1, "u", r#"rel="next""#));
        assert!(!result.has_more);
        assert_eq!(pipeline.strategy_names(), vec!["fixed"]);
    }

    #[test]
    fn drops_listings_without_identifier() {
        let pipeline = ExtractionPipeline::new(Source::FarmBuy).with_strategy(FnStrategy::new(
            "mixed",
            |_| {
                Some(Extraction::new(vec![
                    Listing::new(Source::FarmBuy, ""),
                    Listing::new(Source::FarmBuy, "5"),
                ]))
            },
        ));
        let result = pipeline.run(&RawPage::default());
        assert_eq!(result.listings.len(), 1);
    }
}
