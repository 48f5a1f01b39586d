use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crawl::pause;
use crate::error::ScrapeError;
use crate::extract::cards::{CardRule, CardRuleSet, IdSource, SlugConvention};
use crate::extract::json::JsonExt;
use crate::extract::land::find_land_size;
use crate::extract::price::PricePolicy;
use crate::extract::{jsonld, ExtractionPipeline, HtmlCards, NextPageMarkers};
use crate::models::{state_from_postcode, Listing, PageResult, RawPage, Source};
use crate::scrapers::http::HttpFetcher;
use crate::scrapers::traits::SourceAdapter;
use crate::scrapers::types::SearchQuery;

pub const BASE_URL: &str = "https://www.farmproperty.com.au";

const LISTING_LINKS: &[CardRule] = &[CardRule {
    priority: 0,
    pattern: r#"href="(/property/(\d+)-[^"]+)""#,
    id: IdSource::Group(2),
    path_group: Some(1),
    excludes: &[],
}];

static PRICE_SPAN: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"span[class*="price"]"#).unwrap());
static BARE_PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s*(\$[\d,]+(?:\s*-\s*\$[\d,]+)?)\s*<").unwrap());

/// farmproperty.com.au: list pages of detail links, details from each listing page
pub struct FarmPropertyAdapter {
    http: HttpFetcher,
    base_url: String,
    pipeline: ExtractionPipeline,
    price_policy: PricePolicy,
    detail_pause: Duration,
}

impl FarmPropertyAdapter {
    pub fn new(http: HttpFetcher, price_policy: PricePolicy) -> Self {
        Self::with_base_url(http, price_policy, BASE_URL)
    }

    pub fn with_base_url(
        http: HttpFetcher,
        price_policy: PricePolicy,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        let pipeline = ExtractionPipeline::new(Source::FarmProperty)
            .with_strategy(HtmlCards::new(CardRuleSet::new(
                Source::FarmProperty,
                base_url.clone(),
                SlugConvention::Opaque,
                LISTING_LINKS,
            )))
            .with_next_markers(NextPageMarkers::new(&[r#"rel="next""#], &[]))
            .with_price_policy(price_policy);

        Self {
            http,
            base_url,
            pipeline,
            price_policy,
            detail_pause: Duration::from_millis(500),
        }
    }

    pub fn with_detail_pause(mut self, pause: Duration) -> Self {
        self.detail_pause = pause;
        self
    }

    fn search_url(&self, region: &str, page: u32) -> String {
        let mut url = format!("{}/buy/{}", self.base_url, region.to_lowercase());
        if page > 1 {
            url.push_str(&format!("?pagenumber={}", page));
        }
        url
    }

    async fn fetch_detail(&self, cancel: &CancellationToken, listing: &Listing) -> Result<Listing, ScrapeError> {
        let fetched = self.http.get_html(cancel, &listing.url, &[]).await?;
        Ok(parse_detail(&fetched.body, &listing.external_id, &listing.url))
    }
}

#[async_trait]
impl SourceAdapter for FarmPropertyAdapter {
    fn source(&self) -> Source {
        Source::FarmProperty
    }

    fn name(&self) -> &'static str {
        "farmproperty"
    }

    async fn fetch_page(
        &self,
        cancel: &CancellationToken,
        query: &SearchQuery,
        page: u32,
    ) -> Result<RawPage, ScrapeError> {
        let url = self.search_url(&query.region, page);
        let fetched = self.http.get_html(cancel, &url, &[]).await?;
        Ok(RawPage::new(page, url, fetched.body))
    }

    fn parse_page(&self, raw: &RawPage) -> PageResult {
        let mut result = self.pipeline.run(raw);
        if !result.listings.is_empty() && !result.has_more {
            result.has_more = raw.body.contains(&format!("pagenumber={}", raw.page + 1));
        }
        result
    }

    async fn enrich(&self, cancel: &CancellationToken, listings: &mut [Listing]) {
        for listing in listings.iter_mut() {
            match self.fetch_detail(cancel, listing).await {
                Ok(detail) => {
                    listing.fill_missing_from(detail);
                    listing.normalize(&self.price_policy);
                }
                Err(ScrapeError::Cancelled) => return,
                Err(e) => warn!("Error fetching farmproperty listing {}: {}", listing.external_id, e),
            }
            if pause(cancel, self.detail_pause).await.is_err() {
                return;
            }
        }
        info!("Fetched {} farmproperty detail pages", listings.len());
    }
}

/// Reads a listing detail page: schema.org `Residence` data, price and land size.
pub fn parse_detail(html: &str, external_id: &str, url: &str) -> Listing {
    let mut listing = Listing::new(Source::FarmProperty, external_id);
    listing.url = url.to_string();
    listing.property_type = Some("rural".to_string());

    if let Some(node) = jsonld::find_by_type(html, &["Residence"]) {
        listing.address = node.str_at("name").map(String::from);
        listing.description = node.str_at("description").map(String::from);
        match node.get("image") {
            Some(serde_json::Value::Array(images)) => images
                .iter()
                .filter_map(|image| image.as_str())
                .for_each(|image| listing.push_image(image)),
            Some(image) => {
                if let Some(image) = image.as_str() {
                    listing.push_image(image);
                }
            }
            None => {}
        }
        if let Some(address) = node.get("address") {
            listing.suburb = address.str_at("addressLocality").map(String::from);
            listing.postcode = address.str_at("postalCode").map(String::from);
            if listing.address.is_none() {
                listing.address = address.str_at("streetAddress").map(String::from);
            }
        }
        if let Some(geo) = node.get("geo") {
            if let (Some(lat), Some(lng)) = (geo.f64_at("latitude"), geo.f64_at("longitude")) {
                listing.set_coordinates(lat, lng);
            }
        }
    } else {
        debug!("No Residence JSON-LD on {}", url);
    }

    listing.price_text = price_text(html);
    listing.land_size_sqm = find_land_size(html);
    if let Some(postcode) = &listing.postcode {
        listing.state = Some(state_from_postcode(postcode).to_string());
    }
    listing
}

fn price_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&PRICE_SPAN)
        .map(|span| span.text().collect::<String>().trim().to_string())
        .find(|text| !text.is_empty())
        .or_else(|| BARE_PRICE.captures(html).map(|caps| caps[1].trim().to_string()))
}
