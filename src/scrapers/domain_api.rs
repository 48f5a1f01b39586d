use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ScrapeError;
use crate::extract::price::PricePolicy;
use crate::models::{Listing, PageResult, RawPage, Source};
use crate::scrapers::http::HttpFetcher;
use crate::scrapers::traits::SourceAdapter;
use crate::scrapers::types::SearchQuery;

pub const API_BASE_URL: &str = "https://api.domain.com.au";
const SITE_URL: &str = "https://www.domain.com.au";

/// Largest page the search endpoint allows.
pub const PAGE_SIZE: u32 = 100;

const DEFAULT_MIN_LAND_SQM: f64 = 40_000.0;
const DEFAULT_MAX_PRICE: i64 = 2_000_000;

/// Body of `POST /v1/listings/residential/_search`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub listing_type: String,
    pub property_types: Vec<String>,
    pub locations: Vec<SearchLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_land_area: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price: Option<i64>,
    pub page_number: u32,
    pub page_size: u32,
    pub sort: SearchSort,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchLocation {
    pub state: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSort {
    pub sort_key: String,
    pub direction: String,
}

impl SearchRequest {
    /// Rural sale listings in the query's state, newest first.
    pub fn for_query(query: &SearchQuery, page: u32) -> Self {
        Self {
            listing_type: "Sale".to_string(),
            property_types: ["AcreageSemiRural", "Farm", "Rural"]
                .into_iter()
                .map(String::from)
                .collect(),
            locations: vec![SearchLocation {
                state: query.region.to_uppercase(),
            }],
            min_land_area: Some(query.min_land_sqm.unwrap_or(DEFAULT_MIN_LAND_SQM).round() as i64),
            max_price: Some(query.max_price.unwrap_or(DEFAULT_MAX_PRICE)),
            page_number: page,
            page_size: PAGE_SIZE,
            sort: SearchSort {
                sort_key: "DateListed".to_string(),
                direction: "Descending".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum SearchResult {
    PropertyListing { listing: ApiListing },
    Project { project: ApiProject },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiProject {
    pub id: i64,
    #[serde(default)]
    pub child_listings: Vec<ApiListing>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiListing {
    pub id: i64,
    pub price_details: Option<PriceDetails>,
    pub media: Vec<Media>,
    pub property_details: Option<PropertyDetails>,
    pub headline: Option<String>,
    pub summary_description: Option<String>,
    pub date_listed: Option<String>,
    pub listing_slug: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriceDetails {
    pub display_price: Option<String>,
    pub price_from: Option<i64>,
    pub price_to: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Media {
    pub category: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PropertyDetails {
    pub state: Option<String>,
    pub property_type: Option<String>,
    pub bathrooms: Option<f64>,
    pub bedrooms: Option<f64>,
    pub street_number: Option<String>,
    pub street: Option<String>,
    pub suburb: Option<String>,
    pub postcode: Option<String>,
    pub displayable_address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Square meters
    pub land_area: Option<f64>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

impl ApiListing {
    pub fn to_listing(&self) -> Listing {
        let mut listing = Listing::new(Source::Domain, self.id.to_string());
        listing.url = match non_empty(&self.listing_slug) {
            Some(slug) => format!("{}/{}", SITE_URL, slug),
            None => format!("{}/listing/{}", SITE_URL, self.id),
        };

        if let Some(details) = &self.property_details {
            listing.address = non_empty(&details.displayable_address).or_else(|| {
                let parts: Vec<String> = [&details.street_number, &details.street]
                    .into_iter()
                    .filter_map(non_empty)
                    .collect();
                (!parts.is_empty()).then(|| parts.join(" "))
            });
            listing.suburb = non_empty(&details.suburb);
            listing.state = non_empty(&details.state);
            listing.postcode = non_empty(&details.postcode);
            if let (Some(lat), Some(lng)) = (details.latitude, details.longitude) {
                listing.set_coordinates(lat, lng);
            }
            listing.property_type = non_empty(&details.property_type);
            listing.bedrooms = details.bedrooms.map(|n| n.max(0.0) as u32);
            listing.bathrooms = details.bathrooms.map(|n| n.max(0.0) as u32);
            listing.land_size_sqm = details.land_area.filter(|area| *area > 0.0);
        }

        if let Some(price) = &self.price_details {
            listing.price_text = non_empty(&price.display_price);
            listing.price_min = price.price_from.filter(|p| *p > 0);
            listing.price_max = price.price_to.filter(|p| *p > 0);
        }

        let summary = non_empty(&self.summary_description);
        listing.description = match (non_empty(&self.headline), summary) {
            (Some(headline), Some(summary)) => Some(format!("{}\n\n{}", headline, summary)),
            (headline, summary) => headline.or(summary),
        };

        self.media
            .iter()
            .filter(|media| media.category == "Image")
            .for_each(|media| listing.push_image(media.url.as_str()));

        listing.listed_at = self.date_listed.as_deref().and_then(parse_listed_at);
        listing
    }
}

/// Domain dates come with or without a zone, or as a bare date.
pub fn parse_listed_at(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(parsed.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Flattens search results, expanding projects into their child listings.
pub fn flatten_results(results: &[SearchResult]) -> Vec<Listing> {
    results
        .iter()
        .flat_map(|result| match result {
            SearchResult::PropertyListing { listing } => vec![listing.to_listing()],
            SearchResult::Project { project } => project
                .child_listings
                .iter()
                .map(ApiListing::to_listing)
                .collect(),
            SearchResult::Other => Vec::new(),
        })
        .collect()
}

/// Domain's official listings API
pub struct DomainApiAdapter {
    http: HttpFetcher,
    api_key: String,
    base_url: String,
    price_policy: PricePolicy,
}

impl DomainApiAdapter {
    pub fn new(http: HttpFetcher, api_key: impl Into<String>, price_policy: PricePolicy) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: API_BASE_URL.to_string(),
            price_policy,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SourceAdapter for DomainApiAdapter {
    fn source(&self) -> Source {
        Source::Domain
    }

    fn name(&self) -> &'static str {
        "domain"
    }

    async fn fetch_page(
        &self,
        cancel: &CancellationToken,
        query: &SearchQuery,
        page: u32,
    ) -> Result<RawPage, ScrapeError> {
        let url = format!("{}/v1/listings/residential/_search", self.base_url);
        let request = self
            .http
            .client()
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .header("Accept", "application/json")
            .json(&SearchRequest::for_query(query, page));

        let fetched = self.http.send(cancel, &url, request).await?;
        let total_count = fetched.header_u64("X-Total-Count");
        let mut raw = RawPage::new(page, url, fetched.body);
        raw.total_count = total_count;
        Ok(raw)
    }

    fn parse_page(&self, raw: &RawPage) -> PageResult {
        let results: Vec<SearchResult> = match serde_json::from_str(&raw.body) {
            Ok(results) => results,
            Err(e) => {
                warn!("Failed to decode Domain API page {}: {}", raw.page, e);
                return PageResult::empty();
            }
        };

        let listings: Vec<Listing> = flatten_results(&results)
            .into_iter()
            .map(|mut listing| {
                listing.normalize(&self.price_policy);
                listing
            })
            .collect();

        let fetched_so_far = u64::from(raw.page) * u64::from(PAGE_SIZE);
        let has_more = results.len() as u32 == PAGE_SIZE
            && raw.total_count.map_or(true, |total| fetched_so_far < total);
        debug!(
            "Domain API page {}: {} results, {} listings, total {:?}",
            raw.page,
            results.len(),
            listings.len(),
            raw.total_count
        );

        PageResult { listings, has_more }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_results() -> serde_json::Value {
        json!([
            {"type": "PropertyListing", "listing": {
                "id": 2019123456,
                "listingSlug": "12-creek-road-big-hill-nsw-2579-2019123456",
                "priceDetails": {"displayPrice": "$850,000 - $900,000"},
                "propertyDetails": {
                    "state": "NSW", "suburb": "Big Hill", "postcode": "2579",
                    "streetNumber": "12", "street": "Creek Road",
                    "latitude": -34.55, "longitude": 149.99,
                    "propertyType": "AcreageSemiRural", "bedrooms": 3.0, "landArea": 404686.0
                },
                "headline": "Creek frontage",
                "summaryDescription": "Permanent water<br />Good fencing",
                "media": [{"category": "Image", "url": "https://img/a.jpg"}, {"category": "Video", "url": "https://v"}],
                "dateListed": "2024-03-01T09:30:00"
            }},
            {"type": "Project", "project": {"id": 77, "childListings": [
                {"id": 501, "propertyDetails": {"displayableAddress": "Lot 1 Estate Rd"}},
                {"id": 502}
            ]}},
            {"type": "Topspot"}
        ])
    }

    fn adapter() -> DomainApiAdapter {
        DomainApiAdapter::new(HttpFetcher::new().unwrap(), "key", PricePolicy::default())
    }

    #[test]
    fn converts_listings_and_flattens_projects() {
        let body = sample_results().to_string();
        let result = adapter().parse_page(&RawPage::new(1, "u", body));

        let ids: Vec<&str> = result.listings.iter().map(|l| l.external_id.as_str()).collect();
        assert_eq!(ids, vec!["2019123456", "501", "502"]);
        assert!(!result.has_more);

        let listing = &result.listings[0];
        assert_eq!(listing.address.as_deref(), Some("12 Creek Road"));
        assert_eq!(listing.url, "https://www.domain.com.au/12-creek-road-big-hill-nsw-2579-2019123456");
        assert_eq!(listing.price_min, Some(850_000));
        assert_eq!(listing.price_max, Some(900_000));
        assert_eq!(listing.bedrooms, Some(3));
        assert_eq!(listing.land_size_sqm, Some(404_686.0));
        assert_eq!(listing.images, vec!["https://img/a.jpg".to_string()]);
        assert_eq!(
            listing.description.as_deref(),
            Some("Creek frontage\n\nPermanent water\nGood fencing")
        );
        assert!(listing.listed_at.is_some());

        assert_eq!(result.listings[1].address.as_deref(), Some("Lot 1 Estate Rd"));
        assert_eq!(result.listings[2].url, "https://www.domain.com.au/listing/502");
    }

    #[test]
    fn full_page_below_total_has_more() {
        let results: Vec<serde_json::Value> = (0..PAGE_SIZE)
            .map(|i| json!({"type": "PropertyListing", "listing": {"id": 1000 + i}}))
            .collect();
        let body = serde_json::Value::Array(results).to_string();

        let mut raw = RawPage::new(1, "u", body.clone());
        raw.total_count = Some(250);
        assert!(adapter().parse_page(&raw).has_more);

        let mut last = RawPage::new(3, "u", body);
        last.total_count = Some(250);
        assert!(!adapter().parse_page(&last).has_more);
    }

    #[test]
    fn malformed_body_is_an_empty_page() {
        let result = adapter().parse_page(&RawPage::new(1, "u", "<html>oops</html>"));
        assert!(result.listings.is_empty());
        assert!(!result.has_more);
    }

    #[test]
    fn listed_at_formats() {
        assert!(parse_listed_at("2024-03-01T09:30:00Z").is_some());
        assert!(parse_listed_at("2024-03-01T09:30:00").is_some());
        assert!(parse_listed_at("2024-03-01").is_some());
        assert!(parse_listed_at("March 2024").is_none());
    }

    #[tokio::test]
    async fn posts_search_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/listings/residential/_search"))
            .and(header("X-API-Key", "key"))
            .and(body_partial_json(json!({
                "listingType": "Sale",
                "locations": [{"state": "VIC"}],
                "pageNumber": 2,
                "pageSize": 100,
                "minLandArea": 40000
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Total-Count", "3")
                    .set_body_json(sample_results()),
            )
            .mount(&server)
            .await;

        let adapter = adapter().with_base_url(server.uri());
        let raw = adapter
            .fetch_page(&CancellationToken::new(), &SearchQuery::for_region("vic"), 2)
            .await
            .unwrap();
        assert_eq!(raw.total_count, Some(3));
        assert_eq!(adapter.parse_page(&raw).listings.len(), 3);
    }

    #[tokio::test]
    async fn rejected_key_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorised"))
            .mount(&server)
            .await;

        let adapter = adapter().with_base_url(server.uri());
        let err = adapter
            .fetch_page(&CancellationToken::new(), &SearchQuery::default(), 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::Terminal);
    }
}
