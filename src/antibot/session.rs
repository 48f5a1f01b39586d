//! Loading one page past a bot-defence challenge.
//!
//! ```text
//! Fresh -> ChallengeDetected -> Resolving { attempt } -> Resolved
//!                                                     \-> Blocked
//! Fresh -> Resolved
//! ```
//!
//! `Blocked` is reached after exactly `max_attempts` unresolved attempts and
//! surfaces as [`ScrapeError::Blocked`], which the pagination loop answers with
//! a cooldown and a single retry.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::antibot::cookies::BrowserCookie;
use crate::antibot::page::BrowserPage;
use crate::antibot::stealth::StealthProvider;
use crate::crawl::pause;
use crate::error::ScrapeError;

/// Kasada and Cloudflare interstitial markers.
const CHALLENGE_MARKERS: &[&str] = &[
    "KPSDK",
    "/ips.js",
    "challenge-platform",
    "cf-chl-",
    "cf_chl_",
    "<title>Just a moment...</title>",
];
/// A body smaller than this is an interstitial, not a results page.
const MIN_CONTENT_LEN: usize = 5_000;
/// Kasada markers in a page smaller than this mean the challenge never cleared.
const MAX_BLOCKED_LEN: usize = 10_000;

/// Fractions of the page height scrolled to, to trigger lazy loading.
const SCROLL_STOPS: &[&str] = &[
    "window.scrollTo(0, document.body.scrollHeight / 3)",
    "window.scrollTo(0, document.body.scrollHeight / 2)",
    "window.scrollTo(0, document.body.scrollHeight)",
    "window.scrollTo(0, 0)",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fresh,
    ChallengeDetected,
    Resolving { attempt: u32 },
    Resolved,
    Blocked,
}

/// Timing and retry limits for challenge resolution.
#[derive(Debug, Clone)]
pub struct ChallengePolicy {
    pub max_attempts: u32,
    /// Wait after navigation before the page is inspected.
    pub settle: Duration,
    /// Wait after each simulated-input attempt.
    pub attempt_pause: Duration,
    /// Base wait between lazy-load scroll steps, jittered up to double.
    pub scroll_pause: Duration,
}

impl Default for ChallengePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            settle: Duration::from_secs(5),
            attempt_pause: Duration::from_secs(2),
            scroll_pause: Duration::from_millis(500),
        }
    }
}

impl ChallengePolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// No waiting at all.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            settle: Duration::ZERO,
            attempt_pause: Duration::ZERO,
            scroll_pause: Duration::ZERO,
        }
    }
}

pub fn is_challenge(body: &str) -> bool {
    body.len() < MIN_CONTENT_LEN || CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker))
}

pub fn is_resolved(body: &str) -> bool {
    body.len() > MIN_CONTENT_LEN && !CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Block signature left in a fully loaded document, if any.
pub fn final_block_signature(html: &str) -> Option<&'static str> {
    if html.contains("KPSDK") && html.len() < MAX_BLOCKED_LEN {
        return Some("KPSDK");
    }
    ["Access Denied", "403 Forbidden"]
        .into_iter()
        .find(|marker| html.contains(marker))
}

/// Pointer movement and a small scroll, offset further on each attempt.
fn human_input_script(attempt: u32) -> String {
    let mut rng = rand::thread_rng();
    let x = 100 + attempt * 50 + rng.gen_range(0..400);
    let y = 100 + attempt * 30 + rng.gen_range(0..300);
    let scroll = rng.gen_range(0..50);
    format!(
        "(function() {{\
            document.dispatchEvent(new MouseEvent('mousemove', {{clientX: {x}, clientY: {y}, bubbles: true}}));\
            window.scrollBy(0, {scroll});\
        }})();"
    )
}

fn jittered(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let extra = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
    base + Duration::from_millis(extra)
}

/// One page load in one browser tab.
pub struct AntiBotSession<P: BrowserPage> {
    page: P,
    stealth: Arc<dyn StealthProvider>,
    cookies: Vec<BrowserCookie>,
    policy: ChallengePolicy,
    state: SessionState,
    attempts: u32,
}

impl<P: BrowserPage> AntiBotSession<P> {
    pub fn new(page: P, stealth: Arc<dyn StealthProvider>, policy: ChallengePolicy) -> Self {
        Self {
            page,
            stealth,
            cookies: Vec::new(),
            policy,
            state: SessionState::Fresh,
            attempts: 0,
        }
    }

    pub fn with_cookies(mut self, cookies: Vec<BrowserCookie>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Simulated-input attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn into_page(self) -> P {
        self.page
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Navigates to `url` and returns the document once past any challenge.
    pub async fn load(&mut self, cancel: &CancellationToken, url: &str) -> Result<String, ScrapeError> {
        if !self.cookies.is_empty() {
            self.page.set_cookies(&self.cookies).await?;
        }
        if let Some(script) = self.stealth.preload_script() {
            if let Err(e) = self.page.add_preload_script(script).await {
                warn!("Failed to add preload script ({}): {}", self.stealth.name(), e);
            }
        }

        self.page.navigate(url).await?;
        if let Some(script) = self.stealth.page_script() {
            self.page.evaluate(script).await?;
        }
        pause(cancel, self.policy.settle).await?;

        let body = self.page.body_html().await?;
        if is_challenge(&body) {
            self.transition(SessionState::ChallengeDetected);
            info!("🛡️ Challenge page detected at {}, simulating input", url);
            self.resolve_challenge(cancel, url).await?;
        } else {
            self.transition(SessionState::Resolved);
        }

        for step in SCROLL_STOPS {
            self.page.evaluate(step).await?;
            pause(cancel, jittered(self.policy.scroll_pause)).await?;
        }

        let html = self.page.full_html().await?;
        debug!("Loaded {} ({} bytes)", url, html.len());
        if let Some(signature) = final_block_signature(&html) {
            let preview: String = html.chars().take(500).collect();
            debug!("Blocked page content: {}", preview);
            self.transition(SessionState::Blocked);
            return Err(ScrapeError::blocked(url, signature));
        }
        Ok(html)
    }

    async fn resolve_challenge(&mut self, cancel: &CancellationToken, url: &str) -> Result<(), ScrapeError> {
        for attempt in 1..=self.policy.max_attempts {
            self.transition(SessionState::Resolving { attempt });
            self.attempts = attempt;

            self.page.evaluate(&human_input_script(attempt)).await?;
            pause(cancel, self.policy.attempt_pause).await?;

            let body = self.page.body_html().await?;
            if is_resolved(&body) {
                info!("✅ Challenge resolved after {} attempts", attempt);
                self.transition(SessionState::Resolved);
                return Ok(());
            }
            info!(
                "Still on challenge page (attempt {}/{}, body length: {})",
                attempt,
                self.policy.max_attempts,
                body.len()
            );
        }

        self.transition(SessionState::Blocked);
        warn!("🚫 Challenge unresolved after {} attempts", self.policy.max_attempts);
        Err(ScrapeError::blocked(
            url,
            format!("challenge unresolved after {} attempts", self.policy.max_attempts),
        ))
    }
}
