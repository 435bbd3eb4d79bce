use super::listing::{Identity, Listing};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: f64,
    pub timestamp: String,
}

/// How the standardizer resolved a non-reference entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryMark {
    /// Resolved by direct product-code match (or a reference entry); no flag stored.
    Direct,
    Inferred,
    Unmatched,
}

/// Persisted catalog document: the latest listing plus its append-only price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub listing: Listing,
    #[serde(default)]
    pub price_history: Vec<PricePoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standardized_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_category: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub category_inferred: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub category_unmatched: bool,
}

impl CatalogEntry {
    pub fn new(listing: Listing, first_point: PricePoint) -> Self {
        CatalogEntry {
            listing,
            price_history: vec![first_point],
            standardized_category: None,
            original_category: None,
            category_inferred: false,
            category_unmatched: false,
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::new(
            self.listing.product_code.clone(),
            self.listing.retailer.clone(),
        )
    }

    pub fn product_code(&self) -> &str {
        &self.listing.product_code
    }

    pub fn retailer(&self) -> &str {
        &self.listing.retailer
    }

    /// Native category label as the retailer presents it.
    pub fn category(&self) -> &str {
        &self.listing.category
    }

    /// Replaces every listing field and appends one history point; standardization fields stay.
    pub fn observe(&mut self, listing: Listing, point: PricePoint) {
        self.listing = listing;
        self.price_history.push(point);
    }

    pub fn mark(&self) -> Option<CategoryMark> {
        match (
            self.standardized_category.is_some(),
            self.category_inferred,
            self.category_unmatched,
        ) {
            (false, _, _) => None,
            (true, true, _) => Some(CategoryMark::Inferred),
            (true, false, true) => Some(CategoryMark::Unmatched),
            (true, false, false) => Some(CategoryMark::Direct),
        }
    }

    /// Sets the standardization fields; the two flags are kept mutually exclusive.
    pub fn set_standardized(&mut self, standardized: String, mark: CategoryMark) {
        self.original_category = Some(self.listing.category.clone());
        self.standardized_category = Some(standardized);
        self.category_inferred = mark == CategoryMark::Inferred;
        self.category_unmatched = mark == CategoryMark::Unmatched;
    }

    /// Last two prices in chronological order, if at least two observations exist.
    pub fn last_two_prices(&self) -> Option<(f64, f64)> {
        match self.price_history.as_slice() {
            [.., prev, last] => Some((prev.price, last.price)),
            _ => None,
        }
    }
}

/// Projection used by the standardized export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizedProduct {
    pub name: String,
    pub product_code: String,
    pub online_mag: String,
    pub original_category: String,
    pub category: Option<String>,
}

impl From<&CatalogEntry> for StandardizedProduct {
    fn from(entry: &CatalogEntry) -> Self {
        StandardizedProduct {
            name: entry.listing.name.clone(),
            product_code: entry.listing.product_code.clone(),
            online_mag: entry.listing.retailer.clone(),
            original_category: entry.listing.category.clone(),
            category: entry.standardized_category.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(price: f64) -> PricePoint {
        PricePoint {
            price,
            timestamp: "2025_01_01_00_00".into(),
        }
    }

    #[test]
    fn observe_replaces_fields_and_keeps_history_and_category() {
        let mut entry = CatalogEntry::new(Listing::new("A1", "x", "Phones", 100.0), point(100.0));
        entry.set_standardized("Telefoane".into(), CategoryMark::Inferred);

        entry.observe(
            Listing::new("A1", "x", "Phones", 90.0).with_name("renamed"),
            point(90.0),
        );

        assert_eq!(entry.listing.name, "renamed");
        assert_eq!(entry.listing.price, 90.0);
        let prices: Vec<f64> = entry.price_history.iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![100.0, 90.0]);
        assert_eq!(entry.standardized_category.as_deref(), Some("Telefoane"));
        assert_eq!(entry.mark(), Some(CategoryMark::Inferred));
    }

    #[test]
    fn flags_stay_mutually_exclusive() {
        let mut entry = CatalogEntry::new(Listing::new("A1", "x", "Misc", 1.0), point(1.0));
        entry.set_standardized("Misc".into(), CategoryMark::Unmatched);
        entry.set_standardized("Phones".into(), CategoryMark::Inferred);
        assert!(entry.category_inferred);
        assert!(!entry.category_unmatched);
    }

    #[test]
    fn direct_mark_clears_earlier_flags() {
        let mut entry = CatalogEntry::new(Listing::new("A1", "x", "Gadgets", 1.0), point(1.0));
        entry.set_standardized("Gadgets".into(), CategoryMark::Unmatched);
        entry.set_standardized("Phones".into(), CategoryMark::Direct);
        assert_eq!(entry.mark(), Some(CategoryMark::Direct));
        assert!(!entry.category_inferred && !entry.category_unmatched);
    }

    #[test]
    fn document_round_trips_through_flat_json() {
        let mut entry = CatalogEntry::new(Listing::new("A1", "x", "Phones", 100.0), point(100.0));
        entry.set_standardized("Phones".into(), CategoryMark::Direct);
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["product_code"], "A1");
        assert_eq!(json["online_mag"], "x");
        assert!(json.get("category_inferred").is_none());

        let back: CatalogEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
