pub mod antibot;
pub mod config;
pub mod crawl;
pub mod error;
pub mod extract;
pub mod geocode;
pub mod models;
pub mod scrapers;
pub mod store;

pub use config::{ScrapeOptions, SourceSelection};
pub use crawl::{Orchestrator, RunSummary};
pub use error::{FailureKind, ScrapeError};
pub use models::{Listing, PageResult, RawPage, Source};
