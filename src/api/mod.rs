pub mod client;
pub mod model;

use crate::error::AppResult;
use async_trait::async_trait;

pub use client::JsonPageSource;
pub use model::{ApiPage, CrawlPage};

/// Where the crawl worker gets listing pages from.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, path: &str) -> AppResult<CrawlPage>;
}
