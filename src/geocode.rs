use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::extract::json::as_f64;

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
const USER_AGENT: &str = "FarmSearch/1.0 (property search application)";

/// Turns a free-text address into `(latitude, longitude)`.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<(f64, f64)>;
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: serde_json::Value,
    lon: serde_json::Value,
}

/// OpenStreetMap Nominatim, restricted to Australia.
///
/// The public instance allows one request per second; callers pace themselves.
pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create geocoding client")?;

        Ok(Self {
            client,
            base_url: NOMINATIM_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, address: &str) -> Result<(f64, f64)> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(&[
                ("q", address),
                ("format", "json"),
                ("limit", "1"),
                ("countrycodes", "au"),
            ])
            .send()
            .await
            .context("Geocoding request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {} from geocoder", status);
        }

        let places: Vec<NominatimPlace> = response.json().await.context("Failed to parse geocoder response")?;
        let place = places
            .first()
            .ok_or_else(|| anyhow!("no results found for address: {}", address))?;
        let lat = as_f64(&place.lat).ok_or_else(|| anyhow!("bad latitude {}", place.lat))?;
        let lng = as_f64(&place.lon).ok_or_else(|| anyhow!("bad longitude {}", place.lon))?;
        Ok((lat, lng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn geocoder(server: &MockServer) -> NominatimGeocoder {
        NominatimGeocoder::new().unwrap().with_base_url(server.uri())
    }

    #[tokio::test]
    async fn parses_string_coordinates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "12 Creek Rd, Braidwood, NSW, Australia"))
            .and(query_param("countrycodes", "au"))
            .and(query_param("limit", "1"))
            .and(header("User-Agent", USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"lat": "-35.4412", "lon": "149.7998", "display_name": "Braidwood"}
            ])))
            .mount(&server)
            .await;

        let (lat, lng) = geocoder(&server)
            .await
            .geocode("12 Creek Rd, Braidwood, NSW, Australia")
            .await
            .unwrap();
        assert_eq!(lat, -35.4412);
        assert_eq!(lng, 149.7998);
    }

    #[tokio::test]
    async fn empty_result_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let err = geocoder(&server).await.geocode("Nowhere").await.unwrap_err();
        assert!(err.to_string().contains("no results"));
    }

    #[tokio::test]
    async fn http_error_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(geocoder(&server).await.geocode("Goulburn").await.is_err());
    }
}
