use crate::config;
use crate::error::{AppError, AppResult};
use crate::logging::{log, log_for, LogLevel};
use crate::model::{Listing, PricePoint};
use crate::store::{CatalogMutation, CatalogStore};
use crate::utils;
use chrono::{DateTime, Local};
use futures::stream::{self, StreamExt};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub inserted: usize,
    pub updated: usize,
    pub rejected: usize,
}

impl UpsertReport {
    pub fn merge(&mut self, other: UpsertReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.rejected += other.rejected;
    }
}

/// Turns listings into per-identity mutations, rejecting the ones without an identity.
///
/// Listings without a timestamp share `batch_time` truncated to the minute.
pub fn build_mutations(
    listings: Vec<Listing>,
    batch_time: &DateTime<Local>,
) -> (Vec<CatalogMutation>, Vec<AppError>) {
    let default_ts = utils::history_timestamp(batch_time);
    let mut mutations = Vec::with_capacity(listings.len());
    let mut rejected = Vec::new();

    for listing in listings {
        let identity = match listing.identity() {
            Ok(id) => id,
            Err(e) => {
                rejected.push(e);
                continue;
            }
        };
        let timestamp = listing
            .timestamp
            .clone()
            .unwrap_or_else(|| default_ts.clone());
        let push = PricePoint {
            price: listing.price,
            timestamp,
        };
        mutations.push(CatalogMutation {
            identity,
            listing,
            push,
        });
    }
    (mutations, rejected)
}

/// Applies one batch of observations to the store as a single bulk write.
pub fn upsert_listings(
    store: &dyn CatalogStore,
    listings: Vec<Listing>,
    batch_time: &DateTime<Local>,
) -> AppResult<UpsertReport> {
    let (mutations, rejected) = build_mutations(listings, batch_time);
    for e in &rejected {
        log(LogLevel::Warning, &format!("Rejected listing: {}", e));
    }

    let written = store.bulk_upsert(mutations)?;
    let report = UpsertReport {
        inserted: written.inserted,
        updated: written.updated,
        rejected: rejected.len(),
    };
    if report.inserted + report.updated > 0 {
        log(
            LogLevel::Info,
            &format!(
                "Upserted: {} new, {} updated, {} rejected",
                report.inserted, report.updated, report.rejected
            ),
        );
    }
    Ok(report)
}

/// Upserts several retailer batches concurrently; documents are independent so no extra
/// locking is needed beyond the store's per-document atomicity.
///
/// A failed batch is logged and counted as rejected unless the store itself went away.
pub async fn upsert_batches(
    store: Arc<dyn CatalogStore>,
    batches: Vec<(String, Vec<Listing>)>,
    batch_time: DateTime<Local>,
) -> AppResult<UpsertReport> {
    let results: Vec<(String, usize, AppResult<UpsertReport>)> = stream::iter(batches)
        .map(|(retailer, listings)| {
            let store = Arc::clone(&store);
            async move {
                let size = listings.len();
                let res = utils::run_blocking(move || {
                    upsert_listings(store.as_ref(), listings, &batch_time)
                })
                .await;
                (retailer, size, res)
            }
        })
        .buffer_unordered(config::MAX_UPSERT_CONCUR)
        .collect()
        .await;

    let mut total = UpsertReport::default();
    for (retailer, size, result) in results {
        match result {
            Ok(report) => {
                log_for(
                    LogLevel::Success,
                    &retailer,
                    &format!(
                        "Batch of {}: {} inserted, {} updated, {} rejected",
                        size, report.inserted, report.updated, report.rejected
                    ),
                );
                total.merge(report);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log_for(
                    LogLevel::Error,
                    &retailer,
                    &format!("Upsert of {} listings failed: {}", size, e),
                );
                total.rejected += size;
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Filter, MemoryCatalogStore};
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 2, h, m, s).unwrap()
    }

    #[test]
    fn price_history_appends_in_order_without_duplicates() {
        let store = MemoryCatalogStore::new();
        upsert_listings(&store, vec![Listing::new("A1", "x", "Phones", 100.0)], &at(9, 0, 0))
            .unwrap();
        let report =
            upsert_listings(&store, vec![Listing::new("A1", "x", "Phones", 90.0)], &at(10, 0, 0))
                .unwrap();

        assert_eq!(report, UpsertReport { inserted: 0, updated: 1, rejected: 0 });
        let all = store.find(&Filter::all()).unwrap();
        assert_eq!(all.len(), 1);
        let prices: Vec<f64> = all[0].price_history.iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![100.0, 90.0]);
        assert_eq!(all[0].listing.price, 90.0);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let store = MemoryCatalogStore::new();
        let report = upsert_listings(&store, Vec::new(), &at(9, 0, 0)).unwrap();
        assert_eq!(report, UpsertReport::default());
        assert!(store.is_empty());
    }

    #[test]
    fn invalid_listings_are_skipped_not_fatal() {
        let store = MemoryCatalogStore::new();
        let report = upsert_listings(
            &store,
            vec![
                Listing::new("", "x", "Phones", 1.0),
                Listing::new("A1", "", "Phones", 1.0),
                Listing::new("A2", "x", "Phones", 1.0),
            ],
            &at(9, 0, 0),
        )
        .unwrap();
        assert_eq!(report, UpsertReport { inserted: 1, updated: 0, rejected: 2 });
    }

    #[test]
    fn missing_timestamps_share_the_batch_minute() {
        let (mutations, _) = build_mutations(
            vec![
                Listing::new("A1", "x", "Phones", 1.0),
                Listing::new("A2", "x", "Phones", 2.0),
                Listing::new("A3", "x", "Phones", 3.0).with_timestamp("2024_12_31_23_59"),
            ],
            &at(14, 5, 42),
        );
        let stamps: Vec<&str> = mutations.iter().map(|m| m.push.timestamp.as_str()).collect();
        assert_eq!(
            stamps,
            vec!["2025_03_02_14_05", "2025_03_02_14_05", "2024_12_31_23_59"]
        );
    }

    #[tokio::test]
    async fn concurrent_retailer_batches_merge_counts() {
        let store: Arc<dyn CatalogStore> = Arc::new(MemoryCatalogStore::new());
        let batches = vec![
            (
                "vexio".to_string(),
                vec![
                    Listing::new("A1", "vexio", "Telefoane", 1.0),
                    Listing::new("A2", "vexio", "Telefoane", 2.0),
                ],
            ),
            (
                "evomag".to_string(),
                vec![Listing::new("A1", "evomag", "Smartphone", 1.5)],
            ),
        ];
        let report = upsert_batches(Arc::clone(&store), batches, at(9, 0, 0))
            .await
            .unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(store.count(&Filter::all()).unwrap(), 3);
    }
}
