pub mod catalog;
pub mod common;
pub mod listing;
pub mod user;

pub use catalog::{CatalogEntry, CategoryMark, PricePoint, StandardizedProduct};
pub use listing::{Identity, Listing};
pub use user::{SavedProduct, UserProfile};
