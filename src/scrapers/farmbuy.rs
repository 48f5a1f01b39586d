use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::crawl::pause;
use crate::error::ScrapeError;
use crate::extract::json::JsonExt;
use crate::extract::land::{parse_land_size, LandUnitPolicy};
use crate::extract::price::PricePolicy;
use crate::extract::{absolute_url, Extraction, ExtractionPipeline, FnStrategy, NextPageMarkers};
use crate::models::{Listing, PageResult, RawPage, Source};
use crate::scrapers::http::HttpFetcher;
use crate::scrapers::traits::SourceAdapter;
use crate::scrapers::types::SearchQuery;

pub const BASE_URL: &str = "https://farmbuy.com";

static TILE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li[data-propertyid]").unwrap());
static TILE_JSON: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/json"]"#).unwrap());
static MARKER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("figure.marker[data-lat][data-lng]").unwrap());
static MARKER_ID: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[data-property-id]").unwrap());
static MARKER_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static MARKER_SUBURB: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.suburb").unwrap());
static MARKER_STREET: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.streetAddress").unwrap());
static PROFILE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#propertyprofile").unwrap());
static FULL_SIZE_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://farmbuycdn\.clodflare\.pushcreative\.com\.au/\d+/1920_[^\x22]+\.(?:jpg|jpeg|png|webp)")
        .unwrap()
});

/// farmbuy.com: JSON embedded per result tile, coordinates from the map markers
pub struct FarmBuyAdapter {
    http: HttpFetcher,
    base_url: String,
    pipeline: ExtractionPipeline,
    price_policy: PricePolicy,
    detail_pause: Duration,
}

impl FarmBuyAdapter {
    pub fn new(http: HttpFetcher, price_policy: PricePolicy, land_policy: LandUnitPolicy) -> Self {
        Self::with_base_url(http, price_policy, land_policy, BASE_URL)
    }

    pub fn with_base_url(
        http: HttpFetcher,
        price_policy: PricePolicy,
        land_policy: LandUnitPolicy,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        let tile_base = base_url.clone();
        let pipeline = ExtractionPipeline::new(Source::FarmBuy)
            .with_strategy(FnStrategy::new("tile-json", move |page| {
                let listings = parse_tiles(&page.body, &tile_base, &land_policy);
                (!listings.is_empty()).then(|| Extraction::new(listings))
            }))
            .with_strategy(FnStrategy::new("map-markers", |page| {
                let listings = parse_markers(&page.body);
                (!listings.is_empty()).then(|| Extraction::new(listings))
            }))
            .with_next_markers(NextPageMarkers::new(&[r#"rel="next""#], &[]))
            .with_price_policy(price_policy);

        Self {
            http,
            base_url,
            pipeline,
            price_policy,
            detail_pause: Duration::from_millis(300),
        }
    }

    pub fn with_detail_pause(mut self, pause: Duration) -> Self {
        self.detail_pause = pause;
        self
    }

    fn search_url(&self, region: &str, page: u32) -> String {
        let mut url = format!("{}/state/{}?sort=datedesc", self.base_url, region.to_lowercase());
        if page > 1 {
            url.push_str(&format!("&page={}", page));
        }
        url
    }
}

#[async_trait]
impl SourceAdapter for FarmBuyAdapter {
    fn source(&self) -> Source {
        Source::FarmBuy
    }

    fn name(&self) -> &'static str {
        "farmbuy"
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
            result.has_more = raw.body.contains(&format!("page={}", raw.page + 1));
        }
        result
    }

    async fn enrich(&self, cancel: &CancellationToken, listings: &mut [Listing]) {
        for listing in listings.iter_mut().filter(|l| !l.url.is_empty()) {
            match self.http.get_html(cancel, &listing.url, &[]).await {
                Ok(fetched) => {
                    let (images, description) = parse_detail(&fetched.body);
                    if !images.is_empty() {
                        listing.images = images;
                    }
                    if description.is_some() {
                        listing.description = description;
                    }
                    listing.normalize(&self.price_policy);
                }
                Err(ScrapeError::Cancelled) => return,
                Err(e) => warn!("Error fetching farmbuy detail for {}: {}", listing.external_id, e),
            }
            if pause(cancel, self.detail_pause).await.is_err() {
                return;
            }
        }
    }
}

/// Listings from the JSON blob inside each result tile, with marker coordinates joined in.
pub fn parse_tiles(html: &str, base_url: &str, land_policy: &LandUnitPolicy) -> Vec<Listing> {
    let document = Html::parse_document(html);
    let mut listings: Vec<Listing> = document
        .select(&TILE)
        .filter_map(|tile| {
            let tile_id = tile.value().attr("data-propertyid")?;
            let script = tile.select(&TILE_JSON).next()?;
            let raw: String = script.text().collect();
            match serde_json::from_str::<Value>(raw.trim()) {
                Ok(data) => map_tile(&data, tile_id, base_url, land_policy),
                Err(e) => {
                    warn!("Error parsing farmbuy tile JSON for {}: {}", tile_id, e);
                    None
                }
            }
        })
        .collect();

    let coordinates = marker_coordinates(&document);
    let mut joined = 0;
    for listing in &mut listings {
        if let Some((lat, lng)) = coordinates.get(&listing.external_id) {
            listing.set_coordinates(*lat, *lng);
            joined += 1;
        }
    }
    debug!("Joined map coordinates onto {}/{} farmbuy tiles", joined, listings.len());
    listings
}

fn map_tile(data: &Value, tile_id: &str, base_url: &str, land_policy: &LandUnitPolicy) -> Option<Listing> {
    let id = data.id_at("id").unwrap_or_else(|| tile_id.to_string());
    let mut listing = Listing::new(Source::FarmBuy, id);

    if let Some(url) = data.str_at("url") {
        listing.url = absolute_url(base_url, url);
    }
    if let Some(address) = data.get("address") {
        listing.address = address.str_at("full").map(String::from);
        listing.suburb = address.str_at("suburb").map(String::from);
        listing.postcode = address.str_at("postcode").map(String::from);
        listing.state = address.str_at("state").map(str::to_uppercase);
    }
    listing.price_text = data.str_at("priceText").map(String::from);
    listing.property_type = Some(
        data.arr_at("types")
            .and_then(|types| types.first())
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .unwrap_or_else(|| "rural".to_string()),
    );
    listing.land_size_sqm = data
        .str_at("landArea")
        .and_then(|area| parse_land_size(area, land_policy));
    if let Some(meta) = data.get("meta") {
        listing.bedrooms = meta.u32_at("bed").filter(|beds| *beds > 0);
        listing.bathrooms = meta.u32_at("bath").filter(|baths| *baths > 0);
    }
    // mainTileImageURL is `false` when the tile has no photo.
    if let Some(image) = data.str_at("mainTileImageURL") {
        listing.push_image(image);
    }
    Some(listing)
}

fn marker_coordinates(document: &Html) -> HashMap<String, (f64, f64)> {
    document
        .select(&MARKER)
        .filter_map(|marker| {
            let (lat, lng) = marker_position(marker)?;
            let id = marker.select(&MARKER_ID).next()?.value().attr("data-property-id")?;
            Some((id.to_string(), (lat, lng)))
        })
        .collect()
}

fn marker_position(marker: ElementRef<'_>) -> Option<(f64, f64)> {
    let lat: f64 = marker.value().attr("data-lat")?.trim().parse().ok()?;
    let lng: f64 = marker.value().attr("data-lng")?.trim().parse().ok()?;
    (lat != 0.0 && lng != 0.0).then_some((lat, lng))
}

/// Bare listings built from map markers alone, for pages without tile JSON.
pub fn parse_markers(html: &str) -> Vec<Listing> {
    let document = Html::parse_document(html);
    document
        .select(&MARKER)
        .filter_map(|marker| {
            let id = marker.select(&MARKER_ID).next()?.value().attr("data-property-id")?;
            let mut listing = Listing::new(Source::FarmBuy, id);
            listing.property_type = Some("rural".to_string());
            if let Some((lat, lng)) = marker_position(marker) {
                listing.set_coordinates(lat, lng);
            }
            if let Some(link) = marker.select(&MARKER_LINK).next() {
                listing.url = link.value().attr("href").unwrap_or_default().to_string();
            }
            listing.suburb = first_text(marker, &MARKER_SUBURB);
            listing.address = first_text(marker, &MARKER_STREET);
            Some(listing)
        })
        .collect()
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    let text: String = scope.select(selector).next()?.text().collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Full-size gallery images and the profile description from a detail page.
pub fn parse_detail(html: &str) -> (Vec<String>, Option<String>) {
    let mut images: Vec<String> = Vec::new();
    for found in FULL_SIZE_IMAGE.find_iter(html) {
        if !images.iter().any(|image| image == found.as_str()) {
            images.push(found.as_str().to_string());
        }
    }

    let document = Html::parse_document(html);
    let description = document.select(&PROFILE).next().and_then(|profile| {
        let mut paragraphs = Vec::new();
        // Rainfall and other facts follow under <h4> headings.
        for element in profile.descendants().filter_map(ElementRef::wrap) {
            match element.value().name() {
                "h4" => break,
                "p" => {
                    let text: String = element.text().collect();
                    let text = text.trim();
                    if !text.is_empty() {
                        paragraphs.push(text.to_string());
                    }
                }
                _ => {}
            }
        }
        (!paragraphs.is_empty()).then(|| paragraphs.join("\n\n"))
    });

    (images, description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULTS_PAGE: &str = r#"
        <ul>
          <li data-propertyid="363892" class="tile">
            <script type="application/json">
              {"id": "363892", "url": "/property/363892-wellington", "priceText": "$1.2m",
               "landArea": "280ha", "types": ["Grazing", "Cropping"],
               "address": {"full": "1200 Mitchell Hwy, Wellington NSW 2820", "suburb": "Wellington", "state": "nsw", "postcode": "2820"},
               "meta": {"bed": "4", "bath": "2", "car": ""},
               "mainTileImageURL": "https://img.farmbuy.com/363892/tile.jpg"}
            </script>
          </li>
          <li data-propertyid="363900" class="tile">
            <script type="application/json">
              {"id": "363900", "url": "https://farmbuy.com/property/363900-dubbo", "priceText": "Contact Agent",
               "landArea": "691.90ac", "types": [], "address": {"suburb": "Dubbo"},
               "meta": {"bed": "0"}, "mainTileImageURL": false}
            </script>
          </li>
        </ul>
        <div class="map">
          <figure class="marker" data-lat="-32.555" data-lng="148.944">
            <figcaption><div class="propertyMapTile" data-property-id="363892"></div></figcaption>
          </figure>
        </div>
        <a href="/state/nsw?sort=datedesc&page=2">Next</a>"#;

    const MARKERS_ONLY: &str = r#"
        <figure class="marker" data-lat="-33.1" data-lng="149.2">
          <div data-property-id="1001"><a href="https://farmbuy.com/property/1001">View</a>
          <span class="suburb">Molong</span><span class="streetAddress">12 Bank St</span></div>
        </figure>
        <figure class="marker" data-lat="0" data-lng="0">
          <div data-property-id="1002"><a href="https://farmbuy.com/property/1002">View</a></div>
        </figure>"#;

    const DETAIL_PAGE: &str = r#"
        <img src="https://farmbuycdn.clodflare.pushcreative.com.au/363892/1920_front.jpg">
        <img src="https://farmbuycdn.clodflare.pushcreative.com.au/363892/1920_front.jpg">
        <img src="https://farmbuycdn.clodflare.pushcreative.com.au/363892/1920_dam.webp">
        <img src="https://farmbuycdn.clodflare.pushcreative.com.au/363892/400_thumb.jpg">
        <div id="propertyprofile" class="user-content">
          <p>Well watered grazing &amp; cropping.</p>
          <p>Two dams and a creek.</p>
          <h4>Annual Rainfall</h4>
          <p>600mm</p>
        </div>"#;

    fn adapter() -> FarmBuyAdapter {
        FarmBuyAdapter::new(
            HttpFetcher::new().unwrap(),
            PricePolicy::default(),
            LandUnitPolicy::PassThrough,
        )
        .with_detail_pause(Duration::ZERO)
    }

    #[test]
    fn tiles_map_fields_and_join_coordinates() {
        let result = adapter().parse_page(&RawPage::new(1, "u", RESULTS_PAGE));
        assert_eq!(result.listings.len(), 2);
        assert!(result.has_more);

        let first = &result.listings[0];
        assert_eq!(first.external_id, "363892");
        assert_eq!(first.url, "https://farmbuy.com/property/363892-wellington");
        assert_eq!(first.state.as_deref(), Some("NSW"));
        assert_eq!(first.property_type.as_deref(), Some("grazing"));
        assert_eq!(first.land_size_sqm, Some(2_800_000.0));
        assert_eq!(first.bedrooms, Some(4));
        assert_eq!(first.price_min, Some(1_200_000));
        assert_eq!(first.latitude, Some(-32.555));
        assert_eq!(first.images.len(), 1);

        let second = &result.listings[1];
        assert_eq!(second.property_type.as_deref(), Some("rural"));
        assert_eq!(second.bedrooms, None);
        assert!(second.images.is_empty());
        assert!(!second.has_coordinates());
        assert_eq!(second.price_min, None);
    }

    #[test]
    fn markers_are_the_fallback() {
        let result = adapter().parse_page(&RawPage::new(1, "u", MARKERS_ONLY));
        assert_eq!(result.listings.len(), 2);
        let first = &result.listings[0];
        assert_eq!(first.suburb.as_deref(), Some("Molong"));
        assert_eq!(first.address.as_deref(), Some("12 Bank St"));
        assert!(first.has_coordinates());
        assert!(!result.listings[1].has_coordinates());
        assert!(!result.has_more);
    }

    #[test]
    fn detail_images_and_description() {
        let (images, description) = parse_detail(DETAIL_PAGE);
        assert_eq!(images.len(), 2);
        assert_eq!(
            description.as_deref(),
            Some("Well watered grazing & cropping.\n\nTwo dams and a creek.")
        );
    }

    #[tokio::test]
    async fn search_url_and_detail_enrichment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/state/nsw"))
            .and(query_param("sort", "datedesc"))
            .and(query_param("page", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/property/363892-wellington"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DETAIL_PAGE))
            .mount(&server)
            .await;

        let adapter = FarmBuyAdapter::with_base_url(
            HttpFetcher::new().unwrap(),
            PricePolicy::default(),
            LandUnitPolicy::PassThrough,
            server.uri(),
        )
        .with_detail_pause(Duration::ZERO);
        let cancel = CancellationToken::new();

        let raw = adapter
            .fetch_page(&cancel, &SearchQuery::for_region("nsw"), 3)
            .await
            .unwrap();
        let mut result = adapter.parse_page(&raw);
        adapter.enrich(&cancel, &mut result.listings[..1]).await;

        assert_eq!(result.listings[0].images.len(), 2);
        assert!(result.listings[0]
            .description
            .as_deref()
            .is_some_and(|d| d.starts_with("Well watered")));
    }
}
