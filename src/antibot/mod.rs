//! Getting a browser past bot-defence challenges.

pub mod cookies;
pub mod page;
pub mod session;
pub mod stealth;

pub use cookies::{load_cookie_file, BrowserCookie};
pub use page::{BrowserPage, ChromeTab};
pub use session::{AntiBotSession, ChallengePolicy, SessionState};
pub use stealth::{ChromeStealth, NoStealth, StealthProvider};
