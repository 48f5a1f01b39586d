use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::{Network, Page};
use headless_chrome::Tab;

use crate::antibot::cookies::BrowserCookie;
use crate::error::ScrapeError;

/// The browser tab operations the challenge session needs.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Script evaluated before any page script on every new document.
    async fn add_preload_script(&self, source: &str) -> Result<(), ScrapeError>;

    async fn set_cookies(&self, cookies: &[BrowserCookie]) -> Result<(), ScrapeError>;

    /// Navigate and wait for the document to load.
    async fn navigate(&self, url: &str) -> Result<(), ScrapeError>;

    async fn evaluate(&self, script: &str) -> Result<(), ScrapeError>;

    /// `<body>` markup.
    async fn body_html(&self) -> Result<String, ScrapeError>;

    /// The whole document.
    async fn full_html(&self) -> Result<String, ScrapeError>;
}

/// A headless Chrome tab.
///
/// headless_chrome is synchronous, so every call runs on the blocking pool.
pub struct ChromeTab {
    tab: Arc<Tab>,
}

impl ChromeTab {
    pub fn new(tab: Arc<Tab>, timeout: Duration) -> Self {
        tab.set_default_timeout(timeout);
        Self { tab }
    }

    async fn blocking<T, F>(&self, call: F) -> Result<T, ScrapeError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || call(&tab))
            .await
            .map_err(|e| ScrapeError::Browser(format!("browser task failed: {}", e)))?
            .map_err(ScrapeError::from)
    }

    async fn evaluate_string(&self, expression: &'static str) -> Result<String, ScrapeError> {
        self.blocking(move |tab| {
            let result = tab.evaluate(expression, false)?;
            result
                .value
                .and_then(|value| value.as_str().map(String::from))
                .ok_or_else(|| anyhow!("`{}` returned no string", expression))
        })
        .await
    }

    pub async fn close(&self) {
        if let Err(e) = self.blocking(|tab| tab.close(true).map(|_| ())).await {
            tracing::debug!("Failed to close tab: {}", e);
        }
    }
}

#[async_trait]
impl BrowserPage for ChromeTab {
    async fn add_preload_script(&self, source: &str) -> Result<(), ScrapeError> {
        let source = source.to_string();
        self.blocking(move |tab| {
            tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
                source,
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })
            .context("Failed to add preload script")?;
            Ok(())
        })
        .await
    }

    async fn set_cookies(&self, cookies: &[BrowserCookie]) -> Result<(), ScrapeError> {
        let params = cookies
            .iter()
            .map(|cookie| serde_json::from_value::<Network::CookieParam>(cookie.to_cdp()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ScrapeError::InvalidResponse(format!("bad cookie: {}", e)))?;
        self.blocking(move |tab| tab.set_cookies(params).context("Failed to set cookies"))
            .await
    }

    async fn navigate(&self, url: &str) -> Result<(), ScrapeError> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&url)
                .with_context(|| format!("Failed to navigate to {}", url))?
                .wait_until_navigated()
                .context("Navigation did not finish")?;
            Ok(())
        })
        .await
    }

    async fn evaluate(&self, script: &str) -> Result<(), ScrapeError> {
        let script = script.to_string();
        self.blocking(move |tab| tab.evaluate(&script, false).map(|_| ())).await
    }

    async fn body_html(&self) -> Result<String, ScrapeError> {
        self.evaluate_string("document.body ? document.body.outerHTML : ''").await
    }

    async fn full_html(&self) -> Result<String, ScrapeError> {
        self.evaluate_string("document.documentElement.outerHTML").await
    }
}
