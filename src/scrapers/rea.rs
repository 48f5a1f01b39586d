//! realestate.com.au
//!
//! Result pages embed their GraphQL responses in `window.ArgonautExchange`,
//! with each layer stored as a JSON-encoded string. The map view carries
//! coordinates for ~200 listings a page; the list view keeps 25 in an urql
//! cache; very old pages used `rpiResults`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ScrapeError;
use crate::extract::blob::BlobLocator;
use crate::extract::cards::{CardRule, CardRuleSet, IdSource, SlugConvention};
use crate::extract::json::{collection_items, resolve, JsonExt};
use crate::extract::land::{parse_land_size, LandUnitPolicy};
use crate::extract::price::PricePolicy;
use crate::extract::{EmbeddedJson, Extraction, ExtractionPipeline, HtmlCards, NextPageMarkers, RecursiveSearch};
use crate::models::{Listing, PageResult, RawPage, Source};
use crate::scrapers::http::HttpFetcher;
use crate::scrapers::scrapingbee::{ScrapingBeeClient, ScrapingBeeOptions};
use crate::scrapers::traits::SourceAdapter;
use crate::scrapers::types::SearchQuery;

pub const BASE_URL: &str = "https://www.realestate.com.au";

const ARGONAUT: BlobLocator = BlobLocator::WindowAssign("window.ArgonautExchange");
const IMAGE_SIZE: &str = "800x600";
const DEFAULT_MIN_LAND_SQM: f64 = 100_000.0;
const DEFAULT_MAX_PRICE: i64 = 2_000_000;

/// A map page this full, with more results in total, is followed by another.
const FULL_MAP_PAGE: f64 = 190.0;

const LISTING_LINKS: &[CardRule] = &[
    CardRule {
        priority: 0,
        pattern: r#"href="(/property-[^"]+)""#,
        id: IdSource::PathSuffix { min_digits: 6 },
        path_group: Some(1),
        excludes: &[],
    },
    CardRule {
        priority: 1,
        pattern: r#"data-listing-id="(\d{6,})""#,
        id: IdSource::Group(1),
        path_group: None,
        excludes: &[],
    },
];

/// Reads REA listing objects in any of the shapes the site has used.
#[derive(Debug, Clone, Copy)]
pub struct ReaListingMapper {
    land_policy: LandUnitPolicy,
}

impl ReaListingMapper {
    pub fn new(land_policy: LandUnitPolicy) -> Self {
        Self { land_policy }
    }

    pub fn map(&self, item: &Value) -> Option<Listing> {
        let id = item.id_at("id").or_else(|| item.id_at("listingId"))?;
        let mut listing = Listing::new(Source::Rea, id);

        listing.url = listing_url(item).unwrap_or_default();

        if let Some(address) = item.get("address") {
            listing.address = address
                .get("display")
                .and_then(|display| display.str_at("shortAddress"))
                .map(String::from);
            listing.suburb = address.str_at("suburb").map(String::from);
            listing.postcode = address.id_at("postcode");
            listing.state = address.str_at("state").map(str::to_uppercase);
            if let Some(location) = address.get("location") {
                if let (Some(lat), Some(lng)) = (location.f64_at("latitude"), location.f64_at("longitude")) {
                    listing.set_coordinates(lat, lng);
                }
            }
        }

        listing.price_text = item
            .get("price")
            .and_then(|price| price.str_at("display"))
            .map(String::from);
        listing.property_type = Some(
            item.get("propertyType")
                .and_then(|kind| kind.str_at("display"))
                .unwrap_or("rural")
                .to_string(),
        );
        listing.description = item.str_at("description").map(String::from);

        if let Some(features) = item.get("generalFeatures") {
            listing.bedrooms = features.get("bedrooms").and_then(|beds| beds.u32_at("value"));
            listing.bathrooms = features.get("bathrooms").and_then(|baths| baths.u32_at("value"));
        }

        if let Ok(land) = resolve(item, "propertySizes.land") {
            if let Some(value) = land.str_at("displayValue") {
                let unit = land
                    .get("sizeUnit")
                    .and_then(|unit| unit.str_at("displayValue"))
                    .unwrap_or("");
                listing.land_size_sqm = parse_land_size(&format!("{} {}", value, unit), &self.land_policy);
            }
        }

        for image in images(item) {
            listing.push_image(image);
        }
        Some(listing)
    }
}

fn listing_url(item: &Value) -> Option<String> {
    if let Some(pretty) = item.str_at("prettyUrl") {
        return Some(format!("{}{}", BASE_URL, pretty));
    }
    let links = item.get("_links")?;
    if let Some(href) = links.get("canonical").and_then(|link| link.str_at("href")) {
        return Some(href.to_string());
    }
    let tracked = links.get("trackedCanonical")?.str_at("href")?;
    Some(
        tracked
            .replace("{sourcePage}", "")
            .replace("{sourceElement}", "")
            .trim_end_matches("?sourcePage=&sourceElement=")
            .to_string(),
    )
}

fn sized(templated: &str) -> String {
    templated.replace("{size}", IMAGE_SIZE)
}

fn images(item: &Value) -> Vec<String> {
    match item.get("media") {
        Some(Value::Object(_)) => {
            let media = &item["media"];
            let mut found: Vec<String> = media
                .get("mainImage")
                .and_then(|main| main.str_at("templatedUrl"))
                .map(sized)
                .into_iter()
                .collect();
            found.extend(
                media
                    .arr_at("images")
                    .into_iter()
                    .flatten()
                    .filter_map(|image| image.str_at("templatedUrl"))
                    .map(sized),
            );
            found
        }
        Some(Value::Array(entries)) => entries
            .iter()
            .filter(|entry| entry.str_at("type") == Some("photo"))
            .filter_map(|entry| entry.str_at("url"))
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// Map view: `fetchMapSearchData.data.buyMapSearch.results.items[].listing`,
/// coordinates in each item's `pinGeocode`.
fn walk_map_view(mapper: &ReaListingMapper, blob: &Value) -> Option<Extraction> {
    let map_data = resolve(blob, "resi-property_map-results-web.fetchMapSearchData").ok()?;
    let results = resolve(&map_data, "data.buyMapSearch.results").ok()?;

    let mut has_more = map_data.get("hasNext").and_then(Value::as_bool).unwrap_or(false);
    if let (Some(count), Some(total)) = (results.f64_at("resultsCount"), results.f64_at("totalResultsCount")) {
        if count >= FULL_MAP_PAGE && total > count {
            has_more = true;
        }
        debug!("REA map results: {} of {} (has_more={})", count, total, has_more);
    }

    let listings = results
        .arr_at("items")?
        .iter()
        .filter_map(|item| {
            let mut listing = mapper.map(item.get("listing")?)?;
            if let Some(pin) = item.get("pinGeocode") {
                if let (Some(lat), Some(lng)) = (pin.f64_at("latitude"), pin.f64_at("longitude")) {
                    listing.set_coordinates(lat, lng);
                }
            }
            Some(listing)
        })
        .collect();
    Some(Extraction::new(listings).with_has_more(has_more))
}

/// List view: the first urql cache entry holding `buySearch.results.exact.items`.
fn walk_urql_cache(mapper: &ReaListingMapper, blob: &Value) -> Option<Extraction> {
    let cache = resolve(blob, "resi-property_listing-experience-web.urqlClientCache").ok()?;
    collection_items(&cache).into_iter().find_map(|entry| {
        let items = resolve(entry, "data.buySearch.results.exact.items").ok()?;
        let listings: Vec<Listing> = collection_items(&items)
            .into_iter()
            .filter_map(|item| mapper.map(item.get("listing")?))
            .collect();
        (!listings.is_empty()).then(|| Extraction::new(listings))
    })
}

fn walk_rpi_results(mapper: &ReaListingMapper, blob: &Value) -> Option<Extraction> {
    let tiers = resolve(blob, "rpiResults.tieredResults").ok()?;
    let listings = collection_items(&tiers)
        .into_iter()
        .filter_map(|tier| tier.arr_at("results"))
        .flatten()
        .filter_map(|item| mapper.map(item))
        .collect();
    Some(Extraction::new(listings))
}

/// Extraction waterfall shared by every REA transport.
pub fn pipeline(price_policy: PricePolicy, land_policy: LandUnitPolicy) -> ExtractionPipeline {
    let mapper = ReaListingMapper::new(land_policy);
    ExtractionPipeline::new(Source::Rea)
        .with_strategy(EmbeddedJson::new(vec![ARGONAUT], move |blob| walk_map_view(&mapper, blob)))
        .with_strategy(EmbeddedJson::new(vec![ARGONAUT], move |blob| walk_urql_cache(&mapper, blob)))
        .with_strategy(EmbeddedJson::new(vec![ARGONAUT], move |blob| walk_rpi_results(&mapper, blob)))
        .with_strategy(RecursiveSearch::new(vec![ARGONAUT], move |item| mapper.map(item)))
        .with_strategy(HtmlCards::new(CardRuleSet::new(
            Source::Rea,
            BASE_URL,
            SlugConvention::PlusJoinedWords,
            LISTING_LINKS,
        )))
        .with_next_markers(NextPageMarkers::new(&[r#"rel="next""#, "Next page"], &[]))
        .with_price_policy(price_policy)
}

/// Map-view search, ~200 listings with coordinates per page.
pub fn map_search_url(base_url: &str, query: &SearchQuery, page: u32) -> String {
    format!(
        "{}/buy/property-house-land-acreage-rural-size-{}-between-0-{}-in-{}/map-{}?includeSurrounding=false&activeSort=list-date",
        base_url,
        query.min_land_sqm.unwrap_or(DEFAULT_MIN_LAND_SQM).round() as i64,
        query.max_price.unwrap_or(DEFAULT_MAX_PRICE),
        query.region.to_lowercase(),
        page
    )
}

/// List-view search used by the browser transport.
pub fn list_search_url(base_url: &str, query: &SearchQuery, page: u32) -> String {
    format!(
        "{}/buy/property-land-acreage-rural-size-{}-in-{}/list-{}?activeSort=list-date",
        base_url,
        query.min_land_sqm.unwrap_or(DEFAULT_MIN_LAND_SQM).round() as i64,
        query.region.to_lowercase(),
        page
    )
}

/// Logs why a real-looking page produced nothing.
pub fn explain_empty_page(raw: &RawPage) {
    if raw.body.len() <= 5_000 {
        return;
    }
    if raw.body.contains("/property-") {
        info!("REA page {} has property links but no listings were parsed", raw.page);
    } else if raw.body.contains("No results found") || raw.body.contains("no properties") {
        info!("REA returned no results for page {}", raw.page);
    } else {
        let preview: String = raw.body.chars().take(500).collect();
        debug!("Unexpected REA page content: {}", preview);
    }
}

enum Transport {
    Metered {
        client: ScrapingBeeClient,
        options: ScrapingBeeOptions,
        min_delay: Duration,
    },
    Direct(HttpFetcher),
}

/// realestate.com.au over HTTP, either through the metered bypass service or direct
pub struct ReaAdapter {
    transport: Transport,
    base_url: String,
    pipeline: ExtractionPipeline,
}

impl ReaAdapter {
    /// Pages fetched through ScrapingBee, never faster than `min_delay` apart.
    pub fn metered(
        client: ScrapingBeeClient,
        min_delay: Duration,
        price_policy: PricePolicy,
        land_policy: LandUnitPolicy,
    ) -> Self {
        Self {
            transport: Transport::Metered {
                client,
                options: ScrapingBeeOptions::rea(),
                min_delay,
            },
            base_url: BASE_URL.to_string(),
            pipeline: pipeline(price_policy, land_policy),
        }
    }

    /// Plain HTTP; Kasada usually blocks this.
    pub fn direct(http: HttpFetcher, price_policy: PricePolicy, land_policy: LandUnitPolicy) -> Self {
        Self {
            transport: Transport::Direct(http),
            base_url: BASE_URL.to_string(),
            pipeline: pipeline(price_policy, land_policy),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SourceAdapter for ReaAdapter {
    fn source(&self) -> Source {
        Source::Rea
    }

    fn name(&self) -> &'static str {
        match self.transport {
            Transport::Metered { .. } => "rea-scrapingbee",
            Transport::Direct(_) => "rea",
        }
    }

    async fn fetch_page(
        &self,
        cancel: &CancellationToken,
        query: &SearchQuery,
        page: u32,
    ) -> Result<RawPage, ScrapeError> {
        let url = map_search_url(&self.base_url, query, page);
        let body = match &self.transport {
            Transport::Metered { client, options, .. } => client.fetch_html(cancel, &url, options).await?,
            Transport::Direct(http) => http.get_html(cancel, &url, &[]).await?.body,
        };
        debug!("Received {} bytes from REA for {} page {}", body.len(), query.region, page);
        Ok(RawPage::new(page, url, body))
    }

    fn parse_page(&self, raw: &RawPage) -> PageResult {
        let result = self.pipeline.run(raw);
        if result.listings.is_empty() {
            explain_empty_page(raw);
        }
        result
    }

    fn page_delay(&self, configured: Duration) -> Duration {
        match &self.transport {
            Transport::Metered { min_delay, .. } => configured.max(*min_delay),
            Transport::Direct(_) => configured,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn argonaut_page(exchange: Value) -> String {
        format!(
            "<html><script>window.ArgonautExchange={};</script>\
             <a href=\"/property-rural-1+farm+rd-oberon-nsw-2787-139999999\">card</a></html>",
            exchange
        )
    }

    fn map_view_page(count: u32, total: u32, has_next: bool) -> String {
        let inner = json!({"buyMapSearch": {"results": {
            "resultsCount": count,
            "totalResultsCount": total,
            "items": [{
                "pinGeocode": {"latitude": -33.7, "longitude": 149.85},
                "listing": {
                    "id": "143210987",
                    "_links": {"trackedCanonical": {"href": "https://www.realestate.com.au/property-rural-nsw-oberon-143210987?sourcePage={sourcePage}&sourceElement={sourceElement}"}},
                    "address": {"display": {"shortAddress": "120 Abercrombie Rd"}, "suburb": "Oberon", "postcode": "2787", "state": "nsw"},
                    "price": {"display": "$1.2m"},
                    "propertyType": {"display": "Rural"},
                    "generalFeatures": {"bedrooms": {"value": 4}, "bathrooms": {"value": 2}},
                    "media": {"mainImage": {"templatedUrl": "https://i2.realestate.com.au/{size}/main.jpg"}}
                }
            }]
        }}});
        let map_data = json!({"hasNext": has_next, "data": inner.to_string()});
        argonaut_page(json!({
            "resi-property_map-results-web": {"fetchMapSearchData": map_data.to_string()}
        }))
    }

    fn adapter() -> ReaAdapter {
        ReaAdapter::direct(HttpFetcher::new().unwrap(), PricePolicy::default(), LandUnitPolicy::PassThrough)
    }

    #[test]
    fn map_view_listings_with_coordinates() {
        let result = adapter().parse_page(&RawPage::new(1, "u", map_view_page(1, 1, false)));
        assert_eq!(result.listings.len(), 1);
        assert!(!result.has_more);

        let listing = &result.listings[0];
        assert_eq!(listing.external_id, "143210987");
        assert_eq!(
            listing.url,
            "https://www.realestate.com.au/property-rural-nsw-oberon-143210987"
        );
        assert_eq!(listing.address.as_deref(), Some("120 Abercrombie Rd"));
        assert_eq!(listing.state.as_deref(), Some("NSW"));
        assert_eq!(listing.price_min, Some(1_200_000));
        assert_eq!(listing.bedrooms, Some(4));
        assert_eq!(listing.latitude, Some(-33.7));
        assert_eq!(listing.images, vec!["https://i2.realestate.com.au/800x600/main.jpg".to_string()]);
    }

    #[test]
    fn full_map_page_implies_more() {
        assert!(adapter().parse_page(&RawPage::new(1, "u", map_view_page(200, 450, false))).has_more);
        assert!(adapter().parse_page(&RawPage::new(1, "u", map_view_page(12, 12, true))).has_more);
    }

    #[test]
    fn urql_cache_listings() {
        let data = json!({"buySearch": {"results": {"exact": {"items": [{"listing": {
            "id": "143000111",
            "_links": {"canonical": {"href": "https://www.realestate.com.au/property-acreage-nsw-taralga-143000111"}},
            "address": {"suburb": "Taralga", "postcode": "2580"},
            "description": "<b>Views</b> forever",
            "propertySizes": {"land": {"displayValue": "40", "sizeUnit": {"displayValue": "ha"}}},
            "media": {"images": [{"templatedUrl": "https://i2/{size}/a.jpg"}, {"templatedUrl": "https://i2/{size}/b.jpg"}]}
        }}]}}}});
        let cache = json!({"abc123": {"data": data.to_string()}});
        let html = argonaut_page(json!({
            "resi-property_listing-experience-web": {"urqlClientCache": cache.to_string()}
        })) + r#"<link rel="next" href="/list-2">"#;

        let result = adapter().parse_page(&RawPage::new(1, "u", html));
        assert_eq!(result.listings.len(), 1);
        assert!(result.has_more);
        let listing = &result.listings[0];
        assert_eq!(listing.land_size_sqm, Some(400_000.0));
        assert_eq!(listing.description.as_deref(), Some("Views forever"));
        assert_eq!(listing.images.len(), 2);
        assert_eq!(listing.property_type.as_deref(), Some("rural"));
    }

    #[test]
    fn legacy_rpi_results() {
        let html = argonaut_page(json!({"rpiResults": {"tieredResults": [
            {"results": [{
                "listingId": "120000001",
                "prettyUrl": "/property-rural-nsw-goulburn-120000001",
                "address": {"suburb": "Goulburn", "location": {"latitude": -34.75, "longitude": 149.72}},
                "media": [{"type": "photo", "url": "https://p/1.jpg"}, {"type": "floorplan", "url": "https://p/f.jpg"}]
            }]},
            {"results": []}
        ]}}));
        let result = adapter().parse_page(&RawPage::new(1, "u", html));
        assert_eq!(result.listings.len(), 1);
        let listing = &result.listings[0];
        assert_eq!(listing.url, "https://www.realestate.com.au/property-rural-nsw-goulburn-120000001");
        assert!(listing.has_coordinates());
        assert_eq!(listing.images, vec!["https://p/1.jpg".to_string()]);
    }

    #[test]
    fn cards_when_blob_is_missing() {
        let html = r#"
            <a href="/property-rural-12+creek+road-big+hill-nsw-2580-143000001">Card</a>
            <div data-listing-id="143000002"></div>
            <a href="/property-rural-nsw-2580">no id</a>
            <span>Next page</span>"#;
        let result = adapter().parse_page(&RawPage::new(1, "u", html));
        let ids: Vec<&str> = result.listings.iter().map(|l| l.external_id.as_str()).collect();
        assert_eq!(ids, vec!["143000001", "143000002"]);
        assert_eq!(result.listings[0].suburb.as_deref(), Some("Big Hill"));
        assert!(result.has_more);
    }

    #[test]
    fn search_urls() {
        let query = SearchQuery::for_region("NSW");
        assert_eq!(
            map_search_url(BASE_URL, &query, 2),
            "https://www.realestate.com.au/buy/property-house-land-acreage-rural-size-100000-between-0-2000000-in-nsw/map-2?includeSurrounding=false&activeSort=list-date"
        );
        assert_eq!(
            list_search_url(BASE_URL, &query, 1),
            "https://www.realestate.com.au/buy/property-land-acreage-rural-size-100000-in-nsw/list-1?activeSort=list-date"
        );
    }

    #[test]
    fn metered_transport_keeps_a_delay_floor() {
        let client = ScrapingBeeClient::new("key").unwrap();
        let adapter = ReaAdapter::metered(
            client,
            Duration::from_secs(3),
            PricePolicy::default(),
            LandUnitPolicy::PassThrough,
        );
        assert_eq!(adapter.name(), "rea-scrapingbee");
        assert_eq!(adapter.page_delay(Duration::from_secs(1)), Duration::from_secs(3));
        assert_eq!(adapter.page_delay(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn kasada_page_is_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/buy/property-house-land-acreage-rural-size-100000-between-0-2000000-in-nsw/map-1"))
            .respond_with(ResponseTemplate::new(429).set_body_string("<script src=\"/ips.js\">KPSDK</script>"))
            .mount(&server)
            .await;

        let err = adapter()
            .with_base_url(server.uri())
            .fetch_page(&CancellationToken::new(), &SearchQuery::default(), 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::Blocked);
    }
}
