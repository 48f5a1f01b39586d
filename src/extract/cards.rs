//! Last-resort extraction from listing links and data attributes.
//!
//! Each source declares a table of [`CardRule`]s. Rules run in priority order
//! and every match contributes a listing whose identity and address come from
//! the link itself.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::extract::absolute_url;
use crate::models::{Listing, Source};

const AU_STATES: &[&str] = &["NSW", "VIC", "QLD", "SA", "WA", "TAS", "NT", "ACT"];

static REA_POSTCODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-(\d{4})-\d+$").unwrap());
static REA_SUBURB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-([a-z][a-z+]*)-(nsw|vic|qld|sa|wa|tas|nt|act)-\d{4}").unwrap()
});
static REA_STREET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"property-[^-]+-(.+)-[a-z][a-z+]*-(?:nsw|vic|qld|sa|wa|tas|nt|act)-\d{4}").unwrap()
});

/// Where a rule finds the listing id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSource {
    /// A capture group of the rule's pattern.
    Group(usize),
    /// Trailing run of at least `min_digits` digits at the end of the path.
    PathSuffix { min_digits: usize },
}

/// How the site encodes the address into its listing URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlugConvention {
    /// `/12-creek-road-big-hill-nsw-2580-2019123456`
    DashedWithPostcode,
    /// `/property-rural-12+creek+road-big+hill-nsw-2580-143000000`
    PlusJoinedWords,
    /// The slug carries no usable address.
    Opaque,
}

#[derive(Debug, Clone, Copy)]
pub struct CardRule {
    /// Lower runs first.
    pub priority: u8,
    pub pattern: &'static str,
    pub id: IdSource,
    /// Capture group holding the site-relative listing path, if any.
    pub path_group: Option<usize>,
    /// Paths containing any of these are ignored.
    pub excludes: &'static [&'static str],
}

/// A source's compiled card rules.
pub struct CardRuleSet {
    source: Source,
    base_url: String,
    slug: SlugConvention,
    rules: Vec<(CardRule, Regex)>,
}

impl CardRuleSet {
    pub fn new(
        source: Source,
        base_url: impl Into<String>,
        slug: SlugConvention,
        rules: &[CardRule],
    ) -> Self {
        let mut compiled: Vec<(CardRule, Regex)> = rules
            .iter()
            .filter_map(|rule| match Regex::new(rule.pattern) {
                Ok(regex) => Some((*rule, regex)),
                Err(e) => {
                    warn!("Dropping card rule {:?} for {}: {}", rule.pattern, source, e);
                    None
                }
            })
            .collect();
        compiled.sort_by_key(|(rule, _)| rule.priority);

        Self {
            source,
            base_url: base_url.into(),
            slug,
            rules: compiled,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Listings found by a single rule, for testing rules one at a time.
    pub fn extract_with_rule(&self, index: usize, html: &str) -> Vec<Listing> {
        let mut seen = HashSet::new();
        self.rules
            .get(index)
            .map(|(rule, regex)| self.apply(rule, regex, html, &mut seen))
            .unwrap_or_default()
    }

    /// Runs every rule, deduplicating ids across rules.
    pub fn extract(&self, html: &str) -> Vec<Listing> {
        let mut seen = HashSet::new();
        self.rules
            .iter()
            .flat_map(|(rule, regex)| self.apply(rule, regex, html, &mut seen))
            .collect()
    }

    fn apply(
        &self,
        rule: &CardRule,
        regex: &Regex,
        html: &str,
        seen: &mut HashSet<String>,
    ) -> Vec<Listing> {
        let mut listings = Vec::new();
        for caps in regex.captures_iter(html) {
            let path = rule
                .path_group
                .and_then(|group| caps.get(group))
                .map(|m| m.as_str());
            if path.is_some_and(|p| rule.excludes.iter().any(|ex| p.contains(ex))) {
                continue;
            }

            let id = match rule.id {
                IdSource::Group(group) => caps.get(group).map(|m| m.as_str().to_string()),
                IdSource::PathSuffix { min_digits } => path.and_then(|p| trailing_id(p, min_digits)),
            };
            let Some(id) = id else { continue };
            if !seen.insert(id.clone()) {
                continue;
            }

            let mut listing = Listing::new(self.source, id.as_str());
            match path {
                Some(path) => {
                    listing.url = absolute_url(&self.base_url, path);
                    apply_slug(self.slug, path, &mut listing);
                }
                None => listing.url = absolute_url(&self.base_url, &id),
            }
            listings.push(listing);
        }
        listings
    }
}

fn trailing_id(path: &str, min_digits: usize) -> Option<String> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let digits: String = path
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let preceded_by_dash = path[..path.len() - digits.len()].ends_with('-');
    (digits.len() >= min_digits && preceded_by_dash).then_some(digits)
}

pub fn apply_slug(convention: SlugConvention, path: &str, listing: &mut Listing) {
    match convention {
        SlugConvention::DashedWithPostcode => dashed_slug(path, listing),
        SlugConvention::PlusJoinedWords => plus_joined_slug(path, listing),
        SlugConvention::Opaque => {}
    }
}

fn dashed_slug(path: &str, listing: &mut Listing) {
    let parts: Vec<&str> = path.trim_start_matches('/').split('-').collect();
    if parts.len() < 4 {
        return;
    }

    // Last part is the listing id; the postcode is the last four-digit part before it.
    let Some(at) = (0..parts.len() - 1)
        .rev()
        .find(|&i| parts[i].len() == 4 && parts[i].chars().all(|c| c.is_ascii_digit()))
    else {
        return;
    };
    listing.postcode = Some(parts[at].to_string());

    let state = (at > 0)
        .then(|| parts[at - 1].to_uppercase())
        .filter(|state| AU_STATES.contains(&state.as_str()));
    let suburb_end = match (&state, at) {
        (Some(_), at) if at >= 2 => at - 2,
        (None, at) if at >= 1 => at - 1,
        _ => return,
    };
    if let Some(state) = state {
        listing.state = Some(state);
    }
    if suburb_end == 0 {
        return;
    }

    let suburb_start = suburb_end - 1;
    listing.suburb = Some(title_case(&parts[suburb_start..=suburb_end].join(" ")));
    if suburb_start > 0 {
        listing.address = Some(title_case(&parts[..suburb_start].join(" ")));
    }
}

fn plus_joined_slug(path: &str, listing: &mut Listing) {
    let lower = path.to_lowercase();
    if let Some(caps) = REA_POSTCODE.captures(&lower) {
        listing.postcode = Some(caps[1].to_string());
    }
    if let Some(caps) = REA_SUBURB.captures(&lower) {
        listing.suburb = Some(title_case(&caps[1].replace('+', " ")));
        listing.state = Some(caps[2].to_uppercase());
    }
    if let Some(caps) = REA_STREET.captures(&lower) {
        let street = caps[1].replace(['+', '-'], " ");
        listing.address = Some(title_case(&street));
    }
}

/// `"big hill"` becomes `"Big Hill"`.
pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
