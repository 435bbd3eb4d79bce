use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use crate::model::{CatalogEntry, UserProfile};
use crate::store::{CatalogStore, Filter};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceDrop {
    pub product_code: String,
    #[serde(rename = "online_mag")]
    pub retailer: String,
    pub old_price: f64,
    pub new_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserNotification {
    pub email: String,
    pub drops: Vec<PriceDrop>,
}

/// `None` unless the two most recent observations show a strict decrease.
pub fn price_drop(entry: &CatalogEntry) -> Option<PriceDrop> {
    let (old_price, new_price) = entry.last_two_prices()?;
    (new_price < old_price).then(|| PriceDrop {
        product_code: entry.product_code().to_string(),
        retailer: entry.retailer().to_string(),
        old_price,
        new_price,
    })
}

/// Users with at least one notifying saved product whose latest price fell, on any retailer.
pub fn find_price_drops(
    store: &dyn CatalogStore,
    users: &[UserProfile],
) -> AppResult<Vec<UserNotification>> {
    let mut notifications = Vec::new();
    for user in users {
        let mut drops = Vec::new();
        for saved in user.saved_products.iter().filter(|s| s.email_notification) {
            let entries = store.find(&Filter::all().product_code(saved.product_code.clone()))?;
            drops.extend(entries.iter().filter_map(price_drop));
        }
        if !drops.is_empty() {
            notifications.push(UserNotification {
                email: user.email.clone(),
                drops,
            });
        }
    }
    Ok(notifications)
}

/// Loads the users file; a missing file means nobody to notify.
pub async fn load_users(path: &Path) -> AppResult<Vec<UserProfile>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log(
                LogLevel::Warning,
                &format!("Users file '{}' not found, nothing to notify.", path.display()),
            );
            return Ok(Vec::new());
        }
        Err(e) => return Err(AppError::Io(format!("{} ({})", e, path.display()))),
    };
    serde_json::from_str(&raw).map_err(|e| {
        AppError::SerdeParse(format!("users file '{}': {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Listing, PricePoint, SavedProduct};
    use crate::store::MemoryCatalogStore;

    fn entry(code: &str, retailer: &str, prices: &[f64]) -> CatalogEntry {
        let mut points = prices.iter().enumerate().map(|(i, p)| PricePoint {
            price: *p,
            timestamp: format!("2025_03_0{}_09_00", i + 1),
        });
        let first = points.next().unwrap();
        let mut e = CatalogEntry::new(Listing::new(code, retailer, "Phones", prices[0]), first);
        e.price_history.extend(points);
        e
    }

    fn user(codes: &[(&str, bool)]) -> UserProfile {
        UserProfile {
            email: "ana@example.com".into(),
            saved_products: codes
                .iter()
                .map(|(c, n)| SavedProduct {
                    product_code: c.to_string(),
                    email_notification: *n,
                })
                .collect(),
        }
    }

    #[test]
    fn only_a_strict_decrease_triggers() {
        assert_eq!(
            price_drop(&entry("A1", "x", &[120.0, 100.0])).map(|d| (d.old_price, d.new_price)),
            Some((120.0, 100.0))
        );
        assert!(price_drop(&entry("A1", "x", &[100.0, 120.0])).is_none());
        assert!(price_drop(&entry("A1", "x", &[100.0, 100.0])).is_none());
        assert!(price_drop(&entry("A1", "x", &[100.0])).is_none());
    }

    #[test]
    fn drops_are_collected_across_retailers() {
        let store = MemoryCatalogStore::with_entries(vec![
            entry("A1", "vexio", &[150.0, 120.0, 100.0]),
            entry("A1", "evomag", &[99.0, 95.0]),
            entry("A1", "altex", &[90.0, 110.0]),
            entry("B2", "vexio", &[50.0, 40.0]),
        ])
        .unwrap();

        let found = find_price_drops(&store, &[user(&[("A1", true), ("B2", false)])]).unwrap();
        assert_eq!(found.len(), 1);
        let retailers: Vec<&str> = found[0].drops.iter().map(|d| d.retailer.as_str()).collect();
        assert_eq!(retailers, vec!["vexio", "evomag"]);
    }

    #[test]
    fn users_without_drops_are_left_out() {
        let store = MemoryCatalogStore::with_entries(vec![entry("A1", "vexio", &[100.0])]).unwrap();
        let found = find_price_drops(&store, &[user(&[("A1", true)])]).unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn users_file_uses_camel_case_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(
            &path,
            r#"[{"email":"ana@example.com","savedProducts":[{"product_code":"A1","email_notification":true}]}]"#,
        )
        .unwrap();
        let users = load_users(&path).await.unwrap();
        assert_eq!(users, vec![user(&[("A1", true)])]);
        assert!(load_users(&dir.path().join("none.json")).await.unwrap().is_empty());
    }
}
