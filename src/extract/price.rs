use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static PRICE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*([km])?").unwrap());

/// Heuristics applied to free-text prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePolicy {
    /// Bare numbers below this are read as thousands ("$650" means $650k).
    /// `None` turns the heuristic off.
    pub thousands_below: Option<f64>,
}

impl Default for PricePolicy {
    fn default() -> Self {
        Self {
            thousands_below: Some(1000.0),
        }
    }
}

/// Pulls a `(min, max)` price range out of display text.
///
/// The first two numeric tokens become the range; a single token is both
/// bounds. Text without numbers ("Contact Agent", "Auction") yields `None`.
pub fn parse_price_range(text: &str, policy: &PricePolicy) -> Option<(i64, i64)> {
    let cleaned = text.to_lowercase().replace([',', '$'], "");

    let values: Vec<i64> = PRICE_TOKEN
        .captures_iter(&cleaned)
        .filter_map(|caps| {
            let mut value: f64 = caps.get(1)?.as_str().parse().ok()?;
            match caps.get(2).map(|m| m.as_str()) {
                Some("k") => value *= 1_000.0,
                Some("m") => value *= 1_000_000.0,
                _ => {}
            }
            if let Some(threshold) = policy.thousands_below {
                if value < threshold {
                    value *= 1_000.0;
                }
            }
            let value = value.round() as i64;
            (value > 0).then_some(value)
        })
        .take(2)
        .collect();

    match values.as_slice() {
        [] => None,
        [only] => Some((*only, *only)),
        [first, second, ..] => Some(((*first).min(*second), (*first).max(*second))),
    }
}
