use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const SQM_PER_HECTARE: f64 = 10_000.0;
pub const SQM_PER_ACRE: f64 = 4_046.86;

static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d[\d,]*(?:\.\d+)?)").unwrap());

/// Land sizes quoted in running text, e.g. "set on 40.5 hectares of".
static LAND_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d[\d,]*(?:\.\d+)?)\s*(hectares?|ha|acres?|ac)\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandUnit {
    Hectare,
    Acre,
    SquareMetre,
}

impl LandUnit {
    /// Recognises `ha`, `hectare(s)`, `ac`, `acre(s)`, `sqm`, `m²` and `m2`.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token
            .trim()
            .trim_end_matches(|c: char| c == '.' || c == ',' || c == ')')
            .to_lowercase();
        match token.as_str() {
            "ha" | "hectare" | "hectares" => Some(LandUnit::Hectare),
            "ac" | "acre" | "acres" => Some(LandUnit::Acre),
            "sqm" | "m²" | "m2" | "sq.m" | "squaremetres" | "squaremeters" => {
                Some(LandUnit::SquareMetre)
            }
            _ => None,
        }
    }

    pub fn to_sqm(self, value: f64) -> f64 {
        match self {
            LandUnit::Hectare => value * SQM_PER_HECTARE,
            LandUnit::Acre => value * SQM_PER_ACRE,
            LandUnit::SquareMetre => value,
        }
    }
}

/// What to do with a land size that carries no unit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum LandUnitPolicy {
    /// Keep the number as-is.
    #[default]
    PassThrough,
    /// Values above `sqm_above` are square metres, anything smaller is hectares.
    InferByMagnitude { sqm_above: f64 },
}

impl LandUnitPolicy {
    pub fn resolve(&self, value: f64) -> f64 {
        match self {
            LandUnitPolicy::PassThrough => value,
            LandUnitPolicy::InferByMagnitude { sqm_above } if value > *sqm_above => value,
            LandUnitPolicy::InferByMagnitude { .. } => LandUnit::Hectare.to_sqm(value),
        }
    }
}

/// Converts a value with an optional unit label to square metres.
pub fn land_to_sqm(value: f64, unit: Option<&str>, policy: &LandUnitPolicy) -> f64 {
    match unit.and_then(LandUnit::from_token) {
        Some(unit) => unit.to_sqm(value),
        None => policy.resolve(value),
    }
}

/// Parses a land-size field such as `"4.5 ha"`, `"691.90ac"` or `"2,000 m²"`.
pub fn parse_land_size(text: &str, policy: &LandUnitPolicy) -> Option<f64> {
    let found = LEADING_NUMBER.find(text)?;
    let value: f64 = found.as_str().replace(',', "").parse().ok()?;
    if value <= 0.0 {
        return None;
    }

    let rest = text[found.end()..].trim_start();
    let token = rest
        .split(|c: char| c.is_whitespace() || c == '(' || c == '/')
        .next()
        .unwrap_or("");
    let unit = if token.is_empty() {
        None
    } else if rest.to_lowercase().starts_with("square met") {
        Some("sqm")
    } else {
        Some(token)
    };
    Some(land_to_sqm(value, unit, policy))
}

/// Finds the first hectare or acre figure in free text.
pub fn find_land_size(text: &str) -> Option<f64> {
    let lower = text.to_lowercase();
    let caps = LAND_IN_TEXT.captures(&lower)?;
    let value: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
    let unit = LandUnit::from_token(caps.get(2)?.as_str())?;
    (value > 0.0).then(|| unit.to_sqm(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn hectares_and_acres_convert() {
        let policy = LandUnitPolicy::PassThrough;
        assert_eq!(parse_land_size("4.5 ha", &policy), Some(45_000.0));
        assert!(close(parse_land_size("10 acres", &policy).unwrap(), 40_468.6));
        assert_eq!(parse_land_size("280ha", &policy), Some(2_800_000.0));
        assert!(close(
            parse_land_size("691.90ac", &policy).unwrap(),
            691.90 * SQM_PER_ACRE
        ));
    }

    #[test]
    fn square_metres_pass_unchanged() {
        let policy = LandUnitPolicy::PassThrough;
        assert_eq!(parse_land_size("2,000 m²", &policy), Some(2_000.0));
        assert_eq!(parse_land_size("850sqm", &policy), Some(850.0));
        assert_eq!(parse_land_size("1200 square metres", &policy), Some(1_200.0));
    }

    #[test]
    fn missing_unit_follows_policy() {
        assert_eq!(
            parse_land_size("40", &LandUnitPolicy::PassThrough),
            Some(40.0)
        );
        let infer = LandUnitPolicy::InferByMagnitude { sqm_above: 100.0 };
        assert_eq!(parse_land_size("40", &infer), Some(400_000.0));
        assert_eq!(parse_land_size("5000", &infer), Some(5_000.0));
    }

    #[test]
    fn unparseable_sizes_are_none() {
        let policy = LandUnitPolicy::PassThrough;
        assert_eq!(parse_land_size("", &policy), None);
        assert_eq!(parse_land_size("approx", &policy), None);
    }

    #[test]
    fn finds_size_in_running_text() {
        let text = "A rare <b>40.5 Hectares</b> of grazing country";
        assert_eq!(find_land_size(text), Some(405_000.0));
        assert_eq!(find_land_size("no size here"), None);
    }
}
