use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::ScrapeError;
use crate::extract::blob::BlobLocator;
use crate::extract::cards::{CardRule, CardRuleSet, IdSource, SlugConvention};
use crate::extract::json::{collection_items, resolve, resolve_first, JsonExt};
use crate::extract::land::{land_to_sqm, parse_land_size, LandUnitPolicy};
use crate::extract::price::PricePolicy;
use crate::extract::{
    absolute_url, EmbeddedJson, Extraction, ExtractionPipeline, HtmlCards, NextPageMarkers, RecursiveSearch,
};
use crate::models::{Listing, PageResult, RawPage, Source};
use crate::scrapers::http::HttpFetcher;
use crate::scrapers::traits::SourceAdapter;
use crate::scrapers::types::SearchQuery;

pub const BASE_URL: &str = "https://www.domain.com.au";

/// Bare `landSize` numbers are square metres above 100, hectares below.
pub const LAND_POLICY: LandUnitPolicy = LandUnitPolicy::InferByMagnitude { sqm_above: 100.0 };

/// Places listings have lived in Domain's page state over time.
const LISTING_PATHS: &[&str] = &[
    "listingsMap",
    "listings",
    "componentProps.listingsMap",
    "componentProps.listings",
    "searchResults.listings",
    "searchResults.results",
    "results",
    "data.listings",
];

const STATE_BLOBS: &[BlobLocator] = &[
    BlobLocator::WindowAssign("window.__INITIAL_STATE__"),
    BlobLocator::WindowAssign("window.__data__"),
    BlobLocator::WindowAssign("window.pageData"),
];

const LISTING_LINKS: &[CardRule] = &[CardRule {
    priority: 0,
    pattern: r#"href="(/[^"]*-(\d{7,10}))""#,
    id: IdSource::Group(2),
    path_group: Some(1),
    excludes: &["/suburb-profile", "/news/", "/advice/", "/agent/"],
}];

const NEXT_LINKS: &[&str] = &[
    r#"rel="next""#,
    r#"aria-label="Next page""#,
    r#"data-testid="paginator-next""#,
];

const BROWSER_HEADERS: &[(&str, &str)] = &[
    ("Cache-Control", "no-cache"),
    ("Pragma", "no-cache"),
    ("Sec-Ch-Ua", r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#),
    ("Sec-Ch-Ua-Mobile", "?0"),
    ("Sec-Ch-Ua-Platform", r#""macOS""#),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
    ("Upgrade-Insecure-Requests", "1"),
];

/// Maps Domain's page-state listing objects.
#[derive(Debug, Clone)]
pub struct DomainListingMapper {
    base_url: String,
    land_policy: LandUnitPolicy,
}

impl DomainListingMapper {
    pub fn new(base_url: impl Into<String>, land_policy: LandUnitPolicy) -> Self {
        Self {
            base_url: base_url.into(),
            land_policy,
        }
    }

    fn absolute(&self, url: &str) -> String {
        absolute_url(&self.base_url, url)
    }

    /// Search-results entry: `{id, listingModel: {...}}`, or a flat listing object.
    pub fn map(&self, item: &Value) -> Option<Listing> {
        let Some(model) = item.get("listingModel").filter(|m| m.is_object()) else {
            return self.map_flat(item);
        };
        let id = item.id_at("id")?;
        let mut listing = Listing::new(Source::DomainWeb, id.as_str());

        listing.url = match model.str_at("url") {
            Some(url) => self.absolute(url),
            None => self.absolute(&format!("/listing/{}", id)),
        };

        if let Some(address) = model.get("address") {
            listing.address = address.str_at("street").map(String::from);
            listing.suburb = address.str_at("suburb").map(String::from);
            listing.state = address.str_at("state").map(String::from);
            listing.postcode = address.id_at("postcode");
            if let (Some(lat), Some(lng)) = (address.f64_at("lat"), address.f64_at("lng")) {
                listing.set_coordinates(lat, lng);
            }
        }
        listing.price_text = model.str_at("price").map(String::from);

        if let Some(features) = model.get("features") {
            listing.property_type = features
                .first_str(&["propertyType", "propertyTypeFormatted"])
                .map(String::from);
            if let Some(size) = features.f64_at("landSize").filter(|size| *size > 0.0) {
                // Domain omits the unit when it is hectares.
                let unit = features.str_at("landUnit").unwrap_or("ha");
                listing.land_size_sqm = Some(land_to_sqm(size, Some(unit), &self.land_policy));
            }
            listing.bedrooms = features.u32_at("beds").filter(|n| *n > 0);
            listing.bathrooms = features.u32_at("baths").filter(|n| *n > 0);
        }

        if let Some(images) = model.arr_at("images") {
            images
                .iter()
                .filter_map(Value::as_str)
                .for_each(|image| listing.push_image(image));
        }
        Some(listing)
    }

    /// Older flat listing shape, also used by the window state blobs.
    pub fn map_flat(&self, item: &Value) -> Option<Listing> {
        let id = item.id_at("listingId").or_else(|| item.id_at("id"))?;
        let mut listing = Listing::new(Source::DomainWeb, id.as_str());

        listing.url = if let Some(url) = item.str_at("listingUrl") {
            self.absolute(url)
        } else if let Some(slug) = item.str_at("listingSlug") {
            self.absolute(slug)
        } else {
            self.absolute(&format!("/listing/{}", id))
        };

        match item.get("address") {
            Some(address) if address.is_object() => self.read_address(address, &mut listing),
            _ => listing.address = item.str_at("displayAddress").map(String::from),
        }

        listing.price_text = item
            .str_at("price")
            .or_else(|| item.get("price").and_then(|p| p.str_at("displayPrice")))
            .map(String::from);
        listing.property_type = item
            .str_at("propertyType")
            .or_else(|| {
                item.arr_at("propertyTypes")
                    .and_then(|types| types.first())
                    .and_then(Value::as_str)
            })
            .map(String::from);
        listing.bedrooms = item.u32_at("bedrooms").filter(|n| *n > 0);
        listing.bathrooms = item.u32_at("bathrooms").filter(|n| *n > 0);

        listing.land_size_sqm = item
            .f64_at("landAreaSqm")
            .or_else(|| item.f64_at("landSize"))
            .filter(|size| *size > 0.0)
            .or_else(|| {
                item.str_at("landArea")
                    .and_then(|area| parse_land_size(area, &self.land_policy))
            });

        if let (Some(lat), Some(lng)) = (item.f64_at("latitude"), item.f64_at("longitude")) {
            listing.set_coordinates(lat, lng);
        }
        if let Some(geo) = item.get("geoLocation") {
            if let (Some(lat), Some(lng)) = (geo.f64_at("latitude"), geo.f64_at("longitude")) {
                listing.set_coordinates(lat, lng);
            }
        }

        let media = item.arr_at("media").or_else(|| item.arr_at("images"));
        for entry in media.into_iter().flatten() {
            match entry {
                Value::String(url) => listing.push_image(url.as_str()),
                other => {
                    if let Some(url) = other.str_at("url") {
                        listing.push_image(url);
                    }
                }
            }
        }

        listing.description = item.first_str(&["headline", "description"]).map(String::from);
        Some(listing)
    }

    fn read_address(&self, address: &Value, listing: &mut Listing) {
        listing.address = address.str_at("displayAddress").map(String::from).or_else(|| {
            let parts: Vec<&str> = ["streetNumber", "street"]
                .iter()
                .filter_map(|key| address.str_at(key))
                .collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        });
        listing.suburb = address.str_at("suburb").map(String::from);
        listing.state = address.str_at("state").map(String::from);
        listing.postcode = address.id_at("postcode");
        if let (Some(lat), Some(lng)) = (address.f64_at("latitude"), address.f64_at("longitude")) {
            listing.set_coordinates(lat, lng);
        }
    }
}

/// `__NEXT_DATA__` walk: component props carry the listings and page counters.
fn walk_next_data(mapper: &DomainListingMapper, blob: &Value) -> Option<Extraction> {
    let page_props = resolve(blob, "props.pageProps").ok()?;
    match resolve(&page_props, "componentProps") {
        Ok(component) => {
            let current = component.f64_at("currentPage").unwrap_or(1.0);
            let total = component.f64_at("totalPages").unwrap_or(1.0);
            let items = resolve_first(&component, LISTING_PATHS)?;
            let listings = collection_items(&items)
                .into_iter()
                .filter_map(|item| mapper.map(item))
                .collect();
            Some(Extraction::new(listings).with_has_more(current < total))
        }
        Err(miss) => {
            debug!("Domain page state without component props: {}", miss);
            let items = resolve_first(&page_props, LISTING_PATHS)?;
            let listings = collection_items(&items)
                .into_iter()
                .filter_map(|item| mapper.map(item))
                .collect();
            Some(Extraction::new(listings))
        }
    }
}

fn walk_window_state(mapper: &DomainListingMapper, blob: &Value) -> Option<Extraction> {
    let items = resolve_first(blob, LISTING_PATHS)?;
    let listings = collection_items(&items)
        .into_iter()
        .filter_map(|item| mapper.map_flat(item))
        .collect();
    Some(Extraction::new(listings))
}

/// Builds Domain's extraction waterfall.
pub fn pipeline(base_url: &str, price_policy: PricePolicy, land_policy: LandUnitPolicy) -> ExtractionPipeline {
    let mapper = DomainListingMapper::new(base_url, land_policy);
    let next_data = mapper.clone();
    let window_state = mapper.clone();
    let search = mapper;

    let mut search_blobs = vec![BlobLocator::ScriptId("__NEXT_DATA__")];
    search_blobs.extend_from_slice(STATE_BLOBS);

    ExtractionPipeline::new(Source::DomainWeb)
        .with_strategy(EmbeddedJson::new(
            vec![BlobLocator::ScriptId("__NEXT_DATA__")],
            move |blob| walk_next_data(&next_data, blob),
        ))
        .with_strategy(EmbeddedJson::new(STATE_BLOBS.to_vec(), move |blob| {
            walk_window_state(&window_state, blob)
        }))
        .with_strategy(RecursiveSearch::new(search_blobs, move |item| search.map(item)))
        .with_strategy(HtmlCards::new(CardRuleSet::new(
            Source::DomainWeb,
            base_url,
            SlugConvention::DashedWithPostcode,
            LISTING_LINKS,
        )))
        .with_next_markers(NextPageMarkers::new(NEXT_LINKS, &[r#"page=\d+[^"]*"[^>]*>Next"#]))
        .with_price_policy(price_policy)
}

/// domain.com.au search pages, no API key needed
pub struct DomainWebAdapter {
    http: HttpFetcher,
    start_url: String,
    pipeline: ExtractionPipeline,
}

impl DomainWebAdapter {
    pub fn new(
        http: HttpFetcher,
        start_url: impl Into<String>,
        price_policy: PricePolicy,
        land_policy: LandUnitPolicy,
    ) -> Self {
        Self {
            http,
            start_url: start_url.into(),
            pipeline: pipeline(BASE_URL, price_policy, land_policy),
        }
    }

    /// The start URL with its `page` parameter set. Other parameters keep
    /// their original encoding.
    fn page_url(&self, page: u32) -> String {
        if page <= 1 {
            return self.start_url.clone();
        }
        let Ok(mut url) = Url::parse(&self.start_url) else {
            let separator = if self.start_url.contains('?') { '&' } else { '?' };
            return format!("{}{}page={}", self.start_url, separator, page);
        };
        let mut params: Vec<String> = url
            .query()
            .unwrap_or("")
            .split('&')
            .filter(|param| !param.is_empty() && !param.starts_with("page="))
            .map(String::from)
            .collect();
        params.push(format!("page={}", page));
        url.set_query(Some(&params.join("&")));
        url.into()
    }
}

#[async_trait]
impl SourceAdapter for DomainWebAdapter {
    fn source(&self) -> Source {
        Source::DomainWeb
    }

    fn name(&self) -> &'static str {
        "domain-web"
    }

    fn region_scoped(&self) -> bool {
        false
    }

    async fn fetch_page(
        &self,
        cancel: &CancellationToken,
        _query: &SearchQuery,
        page: u32,
    ) -> Result<RawPage, ScrapeError> {
        let url = self.page_url(page);
        let fetched = self.http.get_html(cancel, &url, BROWSER_HEADERS).await?;
        debug!("Received {} bytes from Domain for page {}", fetched.body.len(), page);
        Ok(RawPage::new(page, url, fetched.body))
    }

    fn parse_page(&self, raw: &RawPage) -> PageResult {
        self.pipeline.run(raw)
    }
}
