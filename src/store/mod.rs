//! Catalog Store boundary: a document collection keyed by `(product_code, online_mag)`.

pub mod file;
pub mod memory;

use crate::error::AppResult;
use crate::model::{CatalogEntry, CategoryMark, Identity, Listing, PricePoint};
use std::collections::BTreeSet;

pub use file::FileCatalogStore;
pub use memory::MemoryCatalogStore;

/// The `(database, collection)` pair a store is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLocation {
    pub database: String,
    pub collection: String,
}

impl StoreLocation {
    pub fn new<D: Into<String>, C: Into<String>>(database: D, collection: C) -> Self {
        StoreLocation {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Retailer,
    Category,
    StandardizedCategory,
}

impl Field {
    fn value(self, entry: &CatalogEntry) -> Option<&str> {
        match self {
            Field::Retailer => Some(entry.retailer()),
            Field::Category => Some(entry.category()),
            Field::StandardizedCategory => entry.standardized_category.as_deref(),
        }
    }
}

/// Conjunction of optional equality predicates; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub retailer: Option<String>,
    pub retailer_ne: Option<String>,
    pub category: Option<String>,
    pub product_code: Option<String>,
    pub has_standardized: Option<bool>,
    pub inferred: Option<bool>,
    pub unmatched: Option<bool>,
}

impl Filter {
    pub fn all() -> Self {
        Filter::default()
    }

    pub fn retailer<S: Into<String>>(mut self, retailer: S) -> Self {
        self.retailer = Some(retailer.into());
        self
    }

    pub fn not_retailer<S: Into<String>>(mut self, retailer: S) -> Self {
        self.retailer_ne = Some(retailer.into());
        self
    }

    pub fn category<S: Into<String>>(mut self, category: S) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn product_code<S: Into<String>>(mut self, code: S) -> Self {
        self.product_code = Some(code.into());
        self
    }

    pub fn has_standardized(mut self, present: bool) -> Self {
        self.has_standardized = Some(present);
        self
    }

    pub fn inferred(mut self, flag: bool) -> Self {
        self.inferred = Some(flag);
        self
    }

    pub fn unmatched(mut self, flag: bool) -> Self {
        self.unmatched = Some(flag);
        self
    }

    pub fn matches(&self, entry: &CatalogEntry) -> bool {
        fn eq(want: &Option<String>, got: &str) -> bool {
            want.as_deref().map_or(true, |w| w == got)
        }

        eq(&self.retailer, entry.retailer())
            && self
                .retailer_ne
                .as_deref()
                .map_or(true, |r| r != entry.retailer())
            && eq(&self.category, entry.category())
            && eq(&self.product_code, entry.product_code())
            && self
                .has_standardized
                .map_or(true, |p| entry.standardized_category.is_some() == p)
            && self.inferred.map_or(true, |f| entry.category_inferred == f)
            && self.unmatched.map_or(true, |f| entry.category_unmatched == f)
    }
}

/// Set-all-fields plus append-one-price, applied atomically to one document.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogMutation {
    pub identity: Identity,
    pub listing: Listing,
    pub push: PricePoint,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryUpdate {
    pub identity: Identity,
    pub standardized_category: String,
    pub mark: CategoryMark,
}

pub trait CatalogStore: Send + Sync {
    /// Matching documents in insertion order.
    fn find(&self, filter: &Filter) -> AppResult<Vec<CatalogEntry>>;

    /// Upserts every mutation; each document's set+append is atomic, documents are independent.
    fn bulk_upsert(&self, mutations: Vec<CatalogMutation>) -> AppResult<BulkWriteResult>;

    /// Applies a whole standardization pass or nothing. Returns the number of documents changed.
    fn apply_category_updates(&self, updates: Vec<CategoryUpdate>) -> AppResult<usize>;

    /// Distinct values of `field` over matching documents, sorted.
    fn distinct(&self, field: Field, filter: &Filter) -> AppResult<BTreeSet<String>> {
        Ok(self
            .find(filter)?
            .iter()
            .filter_map(|e| field.value(e).map(str::to_string))
            .collect())
    }

    fn count(&self, filter: &Filter) -> AppResult<usize> {
        Ok(self.find(filter)?.len())
    }
}
