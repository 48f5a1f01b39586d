use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

/// A cookie as exported by browser extensions such as Cookie-Editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: Option<String>,
    /// Cookie-Editor and EditThisCookie export this as `expirationDate`.
    #[serde(default, alias = "expirationDate")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

impl BrowserCookie {
    /// `SameSite` as the DevTools protocol spells it, if it is one it knows.
    pub fn same_site(&self) -> Option<&'static str> {
        match self.same_site.as_deref()?.to_ascii_lowercase().as_str() {
            "strict" => Some("Strict"),
            "lax" => Some("Lax"),
            "none" => Some("None"),
            _ => None,
        }
    }

    /// `Network.CookieParam` payload.
    pub fn to_cdp(&self) -> Value {
        let mut param = json!({
            "name": self.name,
            "value": self.value,
            "domain": self.domain,
        });
        if let Some(path) = self.path.as_deref().filter(|p| !p.is_empty()) {
            param["path"] = json!(path);
        }
        if let Some(expires) = self.expires.filter(|e| *e > 0.0) {
            param["expires"] = json!(expires);
        }
        if self.http_only {
            param["httpOnly"] = json!(true);
        }
        if self.secure {
            param["secure"] = json!(true);
        }
        if let Some(same_site) = self.same_site() {
            param["sameSite"] = json!(same_site);
        }
        param
    }
}

/// Cookies from a JSON array, keeping only those set for `domain`.
pub fn parse_cookies(json: &str, domain: &str) -> Result<Vec<BrowserCookie>> {
    let cookies: Vec<BrowserCookie> =
        serde_json::from_str(json).context("Failed to parse cookie file")?;
    Ok(cookies
        .into_iter()
        .filter(|cookie| cookie.domain.contains(domain))
        .collect())
}

pub fn load_cookie_file(path: &Path, domain: &str) -> Result<Vec<BrowserCookie>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read cookie file {}", path.display()))?;
    let cookies = parse_cookies(&content, domain)?;
    info!("🍪 Loaded {} cookies for {}", cookies.len(), domain);
    Ok(cookies)
}
