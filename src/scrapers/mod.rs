//! Listing sources. Each adapter fetches and parses one site's result pages.

pub mod browser;
pub mod domain_api;
pub mod domain_web;
pub mod farmbuy;
pub mod farmproperty;
pub mod http;
pub mod rea;
pub mod scrapingbee;
pub mod traits;
pub mod types;

pub use browser::{BrowserSettings, ReaBrowserAdapter};
pub use domain_api::DomainApiAdapter;
pub use domain_web::DomainWebAdapter;
pub use farmbuy::FarmBuyAdapter;
pub use farmproperty::FarmPropertyAdapter;
pub use http::HttpFetcher;
pub use rea::ReaAdapter;
pub use scrapingbee::ScrapingBeeClient;
pub use traits::{RunGuard, SourceAdapter};
pub use types::SearchQuery;
