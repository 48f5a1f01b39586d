use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::extract::price::{parse_price_range, PricePolicy};

const MAX_DESCRIPTION_CHARS: usize = 2000;

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());

/// Source of the property listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    #[serde(rename = "farmproperty")]
    FarmProperty,
    #[serde(rename = "farmbuy")]
    FarmBuy,
    #[serde(rename = "domain")]
    Domain,
    #[serde(rename = "domain-web")]
    DomainWeb,
    #[serde(rename = "rea")]
    Rea,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Source::FarmProperty,
        Source::FarmBuy,
        Source::Rea,
        Source::Domain,
        Source::DomainWeb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::FarmProperty => "farmproperty",
            Source::FarmBuy => "farmbuy",
            Source::Domain => "domain",
            Source::DomainWeb => "domain-web",
            Source::Rea => "rea",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown source: {}", s))
    }
}

/// Normalized property listing from one source.
///
/// `external_id` + `source` identify one listing occurrence. The same physical
/// property can show up once per source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub external_id: String,
    pub source: Source,
    pub url: String,
    pub address: Option<String>,
    pub suburb: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub price_text: Option<String>,
    pub property_type: Option<String>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    /// Always square meters, whatever unit the source used.
    pub land_size_sqm: Option<f64>,
    pub description: Option<String>,
    /// Ordered, without duplicates.
    pub images: Vec<String>,
    pub listed_at: Option<DateTime<Utc>>,
    pub scraped_at: DateTime<Utc>,
}

impl Listing {
    pub fn new(source: Source, external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            source,
            url: String::new(),
            address: None,
            suburb: None,
            state: None,
            postcode: None,
            latitude: None,
            longitude: None,
            price_min: None,
            price_max: None,
            price_text: None,
            property_type: None,
            bedrooms: None,
            bathrooms: None,
            land_size_sqm: None,
            description: None,
            images: Vec::new(),
            listed_at: None,
            scraped_at: Utc::now(),
        }
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    pub fn set_coordinates(&mut self, lat: f64, lng: f64) {
        self.latitude = Some(lat);
        self.longitude = Some(lng);
    }

    /// Appends an image URL unless it is empty or already present.
    pub fn push_image(&mut self, url: impl Into<String>) {
        let url = url.into();
        if !url.is_empty() && !self.images.contains(&url) {
            self.images.push(url);
        }
    }

    /// Copies every field `other` knows that this listing does not.
    pub fn fill_missing_from(&mut self, other: Listing) {
        fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
            if slot.is_none() {
                *slot = value;
            }
        }

        let other_has_coordinates = other.has_coordinates();
        if self.url.is_empty() {
            self.url = other.url;
        }
        // A state without a postcode is only a default; a postcode-backed one wins.
        if self.postcode.is_none() && other.postcode.is_some() && other.state.is_some() {
            self.state = other.state;
        } else {
            fill(&mut self.state, other.state);
        }
        fill(&mut self.address, other.address);
        fill(&mut self.suburb, other.suburb);
        fill(&mut self.postcode, other.postcode);
        if !self.has_coordinates() && other_has_coordinates {
            self.latitude = other.latitude;
            self.longitude = other.longitude;
        }
        fill(&mut self.price_min, other.price_min);
        fill(&mut self.price_max, other.price_max);
        fill(&mut self.price_text, other.price_text);
        fill(&mut self.property_type, other.property_type);
        fill(&mut self.bedrooms, other.bedrooms);
        fill(&mut self.bathrooms, other.bathrooms);
        fill(&mut self.land_size_sqm, other.land_size_sqm);
        fill(&mut self.description, other.description);
        fill(&mut self.listed_at, other.listed_at);
        if self.images.is_empty() {
            for image in other.images {
                self.push_image(image);
            }
        }
    }

    /// Final clean-up applied to every listing leaving the extraction pipeline.
    pub fn normalize(&mut self, price_policy: &PricePolicy) {
        if self.price_min.is_none() && self.price_max.is_none() {
            if let Some(text) = &self.price_text {
                if let Some((min, max)) = parse_price_range(text, price_policy) {
                    self.price_min = Some(min);
                    self.price_max = Some(max);
                }
            }
        }

        if self.state.as_deref().map_or(true, str::is_empty) {
            self.state = Some(
                self.postcode
                    .as_deref()
                    .map(state_from_postcode)
                    .unwrap_or("NSW")
                    .to_string(),
            );
        }

        if let Some(description) = self.description.take() {
            let cleaned = clean_description(&description);
            if !cleaned.is_empty() {
                self.description = Some(cleaned);
            }
        }

        let mut seen = HashSet::new();
        self.images.retain(|url| !url.is_empty() && seen.insert(url.clone()));

        for field in [
            &mut self.address,
            &mut self.suburb,
            &mut self.postcode,
            &mut self.price_text,
            &mut self.property_type,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }
    }

    /// Free-text address handed to the geocoder.
    pub fn geocode_query(&self) -> Option<String> {
        let parts: Vec<&str> = [self.address.as_deref(), self.suburb.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            return None;
        }
        let state = self.state.as_deref().unwrap_or("NSW");
        Some(format!("{}, {}, Australia", parts.join(", "), state))
    }
}

fn clean_description(raw: &str) -> String {
    let text = raw
        .replace("<br />", "\n")
        .replace("<br/>", "\n")
        .replace("<br>", "\n");
    let text = HTML_TAG.replace_all(&text, " ");
    let text = WHITESPACE_RUN.replace_all(&text, " ");
    let text = text.trim();
    if text.chars().count() > MAX_DESCRIPTION_CHARS {
        text.chars().take(MAX_DESCRIPTION_CHARS).collect()
    } else {
        text.to_string()
    }
}

/// Australian state for a four digit postcode. Anything unrecognised is NSW.
pub fn state_from_postcode(postcode: &str) -> &'static str {
    let postcode = postcode.trim();
    if postcode.len() != 4 {
        return "NSW";
    }
    match postcode.as_bytes()[0] {
        b'3' => "VIC",
        b'4' => "QLD",
        b'5' => "SA",
        b'6' => "WA",
        b'7' => "TAS",
        b'0' => "NT",
        _ => "NSW",
    }
}

/// Raw content of one fetched page, as handed from fetch to parse.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    pub page: u32,
    pub url: String,
    pub body: String,
    /// Result total reported out-of-band (e.g. an API header).
    pub total_count: Option<u64>,
}

impl RawPage {
    pub fn new(page: u32, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            page,
            url: url.into(),
            body: body.into(),
            total_count: None,
        }
    }
}

/// Listings parsed from one page plus the page's own "another page exists" hint.
#[derive(Debug, Clone, Default)]
pub struct PageResult {
    pub listings: Vec<Listing>,
    pub has_more: bool,
}

impl PageResult {
    pub fn empty() -> Self {
        Self::default()
    }
}
