use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::crawl::until_cancelled;
use crate::error::ScrapeError;
use crate::scrapers::http::block_signature;

const DEFAULT_BASE_URL: &str = "https://app.scrapingbee.com/api/v1/";

/// Request options for the ScrapingBee fetch API
#[derive(Debug, Clone, Default)]
pub struct ScrapingBeeOptions {
    /// Execute the page's JavaScript before returning
    pub render_js: bool,
    /// Residential proxies
    pub premium_proxy: bool,
    /// Stealth proxies (takes precedence over premium)
    pub stealth_proxy: bool,
    /// Proxy country, e.g. "au"
    pub country_code: Option<String>,
    /// CSS selector to wait for
    pub wait_for: Option<String>,
    /// Extra wait after load, in milliseconds
    pub wait_ms: Option<u32>,
    pub block_resources: bool,
    pub return_page_source: bool,
}

impl ScrapingBeeOptions {
    /// Settings that get realestate.com.au past its bot defence.
    pub fn rea() -> Self {
        Self {
            render_js: true,
            stealth_proxy: true,
            country_code: Some("au".to_string()),
            wait_for: Some("a[href*='/property-']".to_string()),
            wait_ms: Some(5000),
            ..Self::default()
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if self.render_js {
            params.push(("render_js", "true".to_string()));
        }
        if self.stealth_proxy {
            params.push(("stealth_proxy", "true".to_string()));
        } else if self.premium_proxy {
            params.push(("premium_proxy", "true".to_string()));
        }
        if let Some(country) = &self.country_code {
            params.push(("country_code", country.clone()));
        }
        if let Some(selector) = &self.wait_for {
            params.push(("wait_for", selector.clone()));
        }
        if let Some(wait) = self.wait_ms.filter(|ms| *ms > 0) {
            params.push(("wait", wait.to_string()));
        }
        if self.block_resources {
            params.push(("block_resources", "true".to_string()));
        }
        if self.return_page_source {
            params.push(("return_page_source", "true".to_string()));
        }
        params
    }
}

/// Metered fetch service that renders pages behind bot protection.
pub struct ScrapingBeeClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl ScrapingBeeClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        // Stealth renders can take minutes.
        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .context("Failed to create ScrapingBee client")?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch `target_url` through the service and return the page HTML.
    pub async fn fetch_html(
        &self,
        cancel: &CancellationToken,
        target_url: &str,
        options: &ScrapingBeeOptions,
    ) -> Result<String, ScrapeError> {
        let mut params = vec![
            ("api_key", self.api_key.clone()),
            ("url", target_url.to_string()),
        ];
        params.extend(options.query());

        until_cancelled(cancel, async {
            let response = self.client.get(&self.base_url).query(&params).send().await?;
            let status = response.status();
            if let Some(cost) = response
                .headers()
                .get("Spb-Cost")
                .and_then(|v| v.to_str().ok())
            {
                info!("💳 ScrapingBee request cost {} credits", cost);
            }
            let body = response.text().await?;
            debug!("ScrapingBee {} -> {} ({} bytes)", target_url, status, body.len());

            if !status.is_success() {
                return Err(ScrapeError::Http {
                    status: status.as_u16(),
                    url: target_url.to_string(),
                });
            }
            if let Some(signature) = block_signature(status.as_u16(), &body) {
                return Err(ScrapeError::blocked(target_url, signature));
            }
            Ok::<_, ScrapeError>(body)
        })
        .await
    }
}
