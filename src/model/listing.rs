use super::common::{
    deserialize_flexible_price, deserialize_flexible_u32, deserialize_optional_string,
    deserialize_stock_flag, deserialize_string_or_default, ProductCode, RetailerId,
};
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Unique key of a catalog document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub product_code: ProductCode,
    #[serde(rename = "online_mag")]
    pub retailer: RetailerId,
}

impl Identity {
    pub fn new<P: Into<String>, R: Into<String>>(product_code: P, retailer: R) -> Self {
        Identity {
            product_code: product_code.into(),
            retailer: retailer.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.product_code, self.retailer)
    }
}

fn default_rating() -> f64 {
    -1.0
}

/// One crawl observation of a product on a retailer's site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    #[serde(default, deserialize_with = "deserialize_string_or_default")]
    pub product_code: ProductCode,
    #[serde(
        rename = "online_mag",
        default,
        deserialize_with = "deserialize_string_or_default"
    )]
    pub retailer: RetailerId,
    #[serde(default, deserialize_with = "deserialize_string_or_default")]
    pub name: String,
    #[serde(deserialize_with = "deserialize_flexible_price")]
    pub price: f64,
    #[serde(
        rename = "is_in_stoc",
        default,
        deserialize_with = "deserialize_stock_flag"
    )]
    pub in_stock: bool,
    #[serde(default = "default_rating")]
    pub rating: f64,
    #[serde(default, deserialize_with = "deserialize_flexible_u32")]
    pub number_of_reviews: u32,
    #[serde(default, deserialize_with = "deserialize_string_or_default")]
    pub category: String,
    #[serde(default)]
    pub specifications: BTreeMap<String, String>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_default")]
    pub url: String,
    /// Retailer-specific fields (manufacturer, image, ...) carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Listing {
    pub fn new<P, R, C>(product_code: P, retailer: R, category: C, price: f64) -> Self
    where
        P: Into<String>,
        R: Into<String>,
        C: Into<String>,
    {
        Listing {
            product_code: product_code.into(),
            retailer: retailer.into(),
            name: String::new(),
            price,
            in_stock: true,
            rating: default_rating(),
            number_of_reviews: 0,
            category: category.into(),
            specifications: BTreeMap::new(),
            timestamp: None,
            url: String::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_timestamp<S: Into<String>>(mut self, ts: S) -> Self {
        self.timestamp = Some(ts.into());
        self
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Validated `(product_code, retailer)` key; either being blank rejects the listing.
    pub fn identity(&self) -> AppResult<Identity> {
        let code = self.product_code.trim();
        let retailer = self.retailer.trim();
        if code.is_empty() {
            return Err(AppError::invalid_listing(
                "product_code",
                format!("retailer='{}', name='{}'", retailer, self.name),
            ));
        }
        if retailer.is_empty() {
            return Err(AppError::invalid_listing(
                "online_mag",
                format!("product_code='{}', name='{}'", code, self.name),
            ));
        }
        Ok(Identity::new(code, retailer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_scraper_output_record() {
        let raw = r#"{
            "timestamp": "2025_03_02_14_05",
            "name": "Telefon X",
            "price": "1.299,99 lei",
            "rating": -1,
            "number_of_reviews": 0,
            "is_in_stoc": 1,
            "url": "https://shop.test/x",
            "product_code": "SM-A556",
            "online_mag": "vexio",
            "specifications": { "RAM": "8 GB" },
            "manufacturer": "samsung",
            "category": "Telefoane"
        }"#;
        let listing: Listing = serde_json::from_str(raw).unwrap();
        assert_eq!(listing.price, 1299.99);
        assert!(listing.in_stock);
        assert_eq!(listing.timestamp.as_deref(), Some("2025_03_02_14_05"));
        assert_eq!(listing.extra.get("manufacturer"), Some(&Value::from("samsung")));
        assert_eq!(
            listing.identity().unwrap(),
            Identity::new("SM-A556", "vexio")
        );
    }

    #[test]
    fn blank_identity_fields_are_rejected() {
        let no_code = Listing::new("  ", "vexio", "Phones", 10.0);
        assert!(matches!(
            no_code.identity(),
            Err(AppError::InvalidListing {
                field: "product_code",
                ..
            })
        ));

        let raw = r#"{ "product_code": "A1", "price": 5 }"#;
        let no_retailer: Listing = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            no_retailer.identity(),
            Err(AppError::InvalidListing {
                field: "online_mag",
                ..
            })
        ));
    }
}
