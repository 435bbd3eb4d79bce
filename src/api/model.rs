use crate::model::common::{deserialize_optional_string, deserialize_string_or_default};
use crate::model::Listing;
use serde::Deserialize;
use serde_json::Value;

/// One listing page as served by a retailer feed.
///
/// Listings stay raw until [`ApiPage::decode_listings`] so one bad item does not cost the page.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ApiPage {
    #[serde(default, deserialize_with = "deserialize_string_or_default")]
    pub category: String,
    #[serde(default, alias = "products")]
    pub listings: Vec<Value>,
    #[serde(default, alias = "next_page", deserialize_with = "deserialize_optional_string")]
    pub next: Option<String>,
}

/// A decoded page ready for the crawl worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlPage {
    pub category: String,
    pub listings: Vec<Listing>,
    pub next: Option<String>,
    pub malformed: usize,
}

impl ApiPage {
    pub fn decode_listings(self) -> CrawlPage {
        let mut malformed = 0;
        let listings = self
            .listings
            .into_iter()
            .filter_map(|v| match serde_json::from_value::<Listing>(v) {
                Ok(l) => Some(l),
                Err(_) => {
                    malformed += 1;
                    None
                }
            })
            .collect();
        CrawlPage {
            category: self.category,
            listings,
            next: self.next.filter(|n| !n.trim().is_empty()),
            malformed,
        }
    }
}
