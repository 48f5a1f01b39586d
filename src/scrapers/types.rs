use serde::{Deserialize, Serialize};

/// Search parameters for one (source, region) crawl
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Region slug understood by the source (state code or area name)
    pub region: String,
    /// Minimum land size (square meters); adapters fall back to their own default
    pub min_land_sqm: Option<f64>,
    /// Maximum price (AUD)
    pub max_price: Option<i64>,
}

impl SearchQuery {
    pub fn for_region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Self::default()
        }
    }
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            region: "nsw".to_string(),
            min_land_sqm: None,
            max_price: None,
        }
    }
}
