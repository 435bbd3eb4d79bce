//! Cross-retailer category standardization.
//!
//! One retailer's native taxonomy is treated as ground truth. Other retailers' categories are
//! mapped onto it by product-code matching, in four ordered passes over the whole store:
//! seed the reference entries, resolve whole `(retailer, category)` groups by majority vote,
//! infer what is left from siblings or the reference retailer, then report.
//!
//! Every pass reads a full snapshot, computes its updates, and commits them with one
//! [`CatalogStore::apply_category_updates`] call, so a pass is never half applied. Passes are
//! idempotent and are retried from the top on a non-fatal failure.

use crate::config;
use crate::error::{AppError, AppResult};
use crate::logging::{log, log_for, LogLevel};
use crate::model::{CatalogEntry, CategoryMark, StandardizedProduct};
use crate::store::{CatalogStore, CategoryUpdate, Field, Filter};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub type ReferenceMap = HashMap<String, String>;

/// Most frequent value; ties go to the lexicographically smallest value.
pub fn mode<'a, I>(values: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        // strict `>` keeps the earliest (smallest) value among equal counts
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((value, count));
        }
    }
    best.map(|(v, _)| v.to_string())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectMatchSummary {
    pub groups_matched: usize,
    pub groups_unmatched: usize,
    pub entries_updated: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InferenceSummary {
    pub inferred: usize,
    pub unmatched: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetailerBreakdown {
    pub original_categories: usize,
    pub standardized_categories: usize,
    pub category_list: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StandardizationReport {
    pub total_products: usize,
    pub standardized_products: usize,
    pub standardization_percentage: f64,
    pub inferred_categories: usize,
    pub unmatched_products: usize,
    pub retailer_breakdown: BTreeMap<String, RetailerBreakdown>,
}

impl StandardizationReport {
    pub fn log_summary(&self) {
        log(LogLevel::Info, "Standardization Report:");
        log(
            LogLevel::Info,
            &format!("Total products: {}", self.total_products),
        );
        log(
            LogLevel::Info,
            &format!(
                "Standardized products: {} ({:.2}%)",
                self.standardized_products, self.standardization_percentage
            ),
        );
        log(
            LogLevel::Info,
            &format!(
                "Products with inferred categories: {}",
                self.inferred_categories
            ),
        );
        log(
            LogLevel::Info,
            &format!("Unmatched products: {}", self.unmatched_products),
        );
        for (retailer, b) in &self.retailer_breakdown {
            log_for(
                LogLevel::Info,
                retailer,
                &format!(
                    "{} native -> {} standardized categories",
                    b.original_categories, b.standardized_categories
                ),
            );
        }
    }
}

pub struct CategoryStandardizer<'a> {
    store: &'a dyn CatalogStore,
    reference_retailer: String,
}

impl<'a> CategoryStandardizer<'a> {
    pub fn new<S: Into<String>>(store: &'a dyn CatalogStore, reference_retailer: S) -> Self {
        CategoryStandardizer {
            store,
            reference_retailer: reference_retailer.into(),
        }
    }

    /// Phase 1: reference entries map onto themselves.
    pub fn seed_reference(&self) -> AppResult<usize> {
        let reference = self
            .store
            .find(&Filter::all().retailer(&self.reference_retailer))?;
        let updates: Vec<CategoryUpdate> = reference
            .iter()
            .map(|e| CategoryUpdate {
                identity: e.identity(),
                standardized_category: e.category().to_string(),
                mark: CategoryMark::Direct,
            })
            .collect();
        let changed = self.store.apply_category_updates(updates)?;
        log(
            LogLevel::Info,
            &format!(
                "Seeded {} reference products ({} changed)",
                reference.len(),
                changed
            ),
        );
        Ok(changed)
    }

    /// Product code -> reference category. A code listed twice keeps the later entry.
    pub fn build_reference_map(&self) -> AppResult<ReferenceMap> {
        let reference = self
            .store
            .find(&Filter::all().retailer(&self.reference_retailer))?;
        let map = reference_map_from(&reference);
        log(
            LogLevel::Info,
            &format!("Built reference map with {} product codes", map.len()),
        );
        Ok(map)
    }

    /// Phase 2: each `(retailer, category)` group with at least one code known to the
    /// reference retailer takes the majority reference category, one vote per matching entry.
    pub fn standardize_direct(&self) -> AppResult<DirectMatchSummary> {
        let reference_map = self.build_reference_map()?;
        let entries = self
            .store
            .find(&Filter::all().not_retailer(&self.reference_retailer))?;

        let mut summary = DirectMatchSummary::default();
        let mut updates = Vec::new();

        for ((retailer, category), group) in group_by_retailer_category(&entries) {
            let votes: Vec<&str> = group
                .iter()
                .filter_map(|e| reference_map.get(e.product_code()).map(String::as_str))
                .collect();

            let Some(standard) = mode(votes.iter().copied()) else {
                log_for(
                    LogLevel::Info,
                    retailer,
                    &format!("No matching product codes for category '{}'", category),
                );
                summary.groups_unmatched += 1;
                continue;
            };

            let pct = votes.len() as f64 / group.len() as f64 * 100.0;
            log_for(
                LogLevel::Info,
                retailer,
                &format!(
                    "Category '{}' -> '{}' based on {} matching products ({:.2}% of category)",
                    category,
                    standard,
                    votes.len(),
                    pct
                ),
            );
            summary.groups_matched += 1;
            updates.extend(group.iter().map(|e| CategoryUpdate {
                identity: e.identity(),
                standardized_category: standard.clone(),
                mark: CategoryMark::Direct,
            }));
        }

        summary.entries_updated = self.store.apply_category_updates(updates)?;
        log(
            LogLevel::Info,
            &format!("Total products updated: {}", summary.entries_updated),
        );
        Ok(summary)
    }

    /// Phase 3: resolves every entry still lacking a standardized category.
    ///
    /// Order of preference: mode of resolved siblings in the same `(retailer, category)`
    /// group, then the reference retailer's category for the same product code, else the
    /// native category flagged as unmatched. Every resolved sibling votes, unmatched ones
    /// included, so only the first entry of an unknown group ends up unmatched. Within a group,
    /// entries whose code the reference retailer knows are resolved first, each subgroup in
    /// product-code order, so the outcome does not depend on storage order.
    pub fn infer_unmatched(&self) -> AppResult<InferenceSummary> {
        let reference_map = self.build_reference_map()?;
        let non_reference = Filter::all().not_retailer(&self.reference_retailer);

        let mut siblings: HashMap<(String, String), Vec<String>> = HashMap::new();
        for e in self.store.find(&non_reference.clone().has_standardized(true))? {
            if let Some(std_cat) = e.standardized_category.clone() {
                siblings
                    .entry((e.listing.retailer.clone(), e.listing.category.clone()))
                    .or_default()
                    .push(std_cat);
            }
        }

        let mut pending = self.store.find(&non_reference.has_standardized(false))?;
        log(
            LogLevel::Info,
            &format!(
                "Found {} products without category matches",
                pending.len()
            ),
        );
        pending.sort_by(|a, b| {
            let a_known = reference_map.contains_key(a.product_code());
            let b_known = reference_map.contains_key(b.product_code());
            (a.retailer(), a.category(), !a_known, a.product_code()).cmp(&(
                b.retailer(),
                b.category(),
                !b_known,
                b.product_code(),
            ))
        });

        let mut summary = InferenceSummary::default();
        let mut updates = Vec::with_capacity(pending.len());

        for entry in &pending {
            let key = (entry.listing.retailer.clone(), entry.listing.category.clone());
            let from_siblings = siblings
                .get(&key)
                .and_then(|cats| mode(cats.iter().map(String::as_str)));

            let (standardized, mark) = match from_siblings {
                Some(cat) => (cat, CategoryMark::Inferred),
                None => match reference_map.get(entry.product_code()) {
                    Some(cat) => (cat.clone(), CategoryMark::Inferred),
                    None => (entry.category().to_string(), CategoryMark::Unmatched),
                },
            };

            match mark {
                CategoryMark::Inferred => summary.inferred += 1,
                _ => summary.unmatched += 1,
            }
            siblings.entry(key).or_default().push(standardized.clone());
            updates.push(CategoryUpdate {
                identity: entry.identity(),
                standardized_category: standardized,
                mark,
            });
        }

        self.store.apply_category_updates(updates)?;
        log(
            LogLevel::Info,
            &format!("Inferred categories for {} products", summary.inferred),
        );
        log(
            LogLevel::Info,
            &format!("Marked {} products as unmatched", summary.unmatched),
        );
        Ok(summary)
    }

    /// Phase 4: aggregate counts plus a per-retailer taxonomy breakdown.
    pub fn report(&self) -> AppResult<StandardizationReport> {
        let total = self.store.count(&Filter::all())?;
        let standardized = self.store.count(&Filter::all().has_standardized(true))?;
        let inferred = self.store.count(&Filter::all().inferred(true))?;
        let unmatched = self.store.count(&Filter::all().unmatched(true))?;

        let mut breakdown = BTreeMap::new();
        for retailer in self.store.distinct(Field::Retailer, &Filter::all())? {
            let by_retailer = Filter::all().retailer(&retailer);
            let original = self.store.distinct(Field::Category, &by_retailer)?;
            let standard = self
                .store
                .distinct(Field::StandardizedCategory, &by_retailer)?;
            breakdown.insert(
                retailer,
                RetailerBreakdown {
                    original_categories: original.len(),
                    standardized_categories: standard.len(),
                    category_list: standard.into_iter().collect(),
                },
            );
        }

        Ok(StandardizationReport {
            total_products: total,
            standardized_products: standardized,
            standardization_percentage: if total > 0 {
                standardized as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            inferred_categories: inferred,
            unmatched_products: unmatched,
            retailer_breakdown: breakdown,
        })
    }

    /// Runs all four phases in order.
    pub fn run(&self) -> AppResult<StandardizationReport> {
        self.run_phase("Seed reference categories", || self.seed_reference())?;
        self.run_phase("Direct product-code match", || self.standardize_direct())?;
        self.run_phase("Infer unmatched products", || self.infer_unmatched())?;
        let report = self.run_phase("Report", || self.report())?;
        report.log_summary();
        Ok(report)
    }

    fn run_phase<T, F>(&self, name: &str, phase: F) -> AppResult<T>
    where
        F: Fn() -> AppResult<T>,
    {
        let mut last_err = None;
        for attempt in 1..=config::PHASE_ATTEMPTS {
            log(
                LogLevel::Step,
                &format!("--- Standardize: {} (attempt {}) ---", name, attempt),
            );
            match phase() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log(
                        LogLevel::Warning,
                        &format!("Phase '{}' failed, nothing committed: {}", name, e),
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            AppError::Unexpected(format!("phase '{}' never ran", name))
        }))
    }
}

/// Plain key overwrite in iteration order, so a repeated code keeps its last category.
pub fn reference_map_from<'e, I>(entries: I) -> ReferenceMap
where
    I: IntoIterator<Item = &'e CatalogEntry>,
{
    let mut map = ReferenceMap::new();
    for entry in entries {
        map.insert(entry.product_code().to_string(), entry.category().to_string());
    }
    map
}

/// Groups entries by `(retailer, native category)` in sorted order.
fn group_by_retailer_category(
    entries: &[CatalogEntry],
) -> BTreeMap<(&str, &str), Vec<&CatalogEntry>> {
    let mut groups: BTreeMap<(&str, &str), Vec<&CatalogEntry>> = BTreeMap::new();
    for e in entries {
        groups.entry((e.retailer(), e.category())).or_default().push(e);
    }
    groups
}

/// Every entry projected onto its standardized category.
pub fn standardized_view(store: &dyn CatalogStore) -> AppResult<Vec<StandardizedProduct>> {
    Ok(store
        .find(&Filter::all())?
        .iter()
        .map(StandardizedProduct::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Listing, PricePoint};
    use crate::store::{CatalogMutation, MemoryCatalogStore};

    const REF: &str = "vexio";

    fn entry(code: &str, retailer: &str, category: &str) -> CatalogEntry {
        CatalogEntry::new(
            Listing::new(code, retailer, category, 10.0),
            PricePoint {
                price: 10.0,
                timestamp: "2025_03_02_10_00".into(),
            },
        )
    }

    fn mutation(e: CatalogEntry) -> CatalogMutation {
        CatalogMutation {
            identity: e.identity(),
            push: e.price_history[0].clone(),
            listing: e.listing,
        }
    }

    fn store_of(entries: Vec<CatalogEntry>) -> MemoryCatalogStore {
        MemoryCatalogStore::with_entries(entries).unwrap()
    }

    fn get(store: &MemoryCatalogStore, code: &str, retailer: &str) -> CatalogEntry {
        store
            .find(&Filter::all().product_code(code).retailer(retailer))
            .unwrap()
            .remove(0)
    }

    #[test]
    fn mode_breaks_ties_lexicographically() {
        assert_eq!(mode(["b", "a", "b"]), Some("b".to_string()));
        assert_eq!(mode(["Phones", "Accessories"]), Some("Accessories".to_string()));
        assert_eq!(mode(["z", "y", "y", "z"]), Some("y".to_string()));
        assert_eq!(mode(std::iter::empty::<&str>()), None);
    }

    #[test]
    fn majority_vote_governs_the_whole_group() {
        let store = store_of(vec![
            entry("P1", REF, "Phones"),
            entry("P2", REF, "Phones"),
            entry("P3", REF, "Phones"),
            entry("C1", REF, "Accessories"),
            entry("P1", "evomag", "Mobile"),
            entry("P2", "evomag", "Mobile"),
            entry("P3", "evomag", "Mobile"),
            entry("C1", "evomag", "Mobile"),
            entry("Z9", "evomag", "Mobile"),
        ]);
        let s = CategoryStandardizer::new(&store, REF);
        s.seed_reference().unwrap();
        let summary = s.standardize_direct().unwrap();

        assert_eq!(summary.groups_matched, 1);
        for code in ["P1", "P2", "P3", "C1", "Z9"] {
            let e = get(&store, code, "evomag");
            assert_eq!(e.standardized_category.as_deref(), Some("Phones"));
            assert_eq!(e.original_category.as_deref(), Some("Mobile"));
            assert_eq!(e.mark(), Some(CategoryMark::Direct));
        }
    }

    #[test]
    fn later_reference_duplicate_wins() {
        let rows = [entry("P1", REF, "Old"), entry("P1", REF, "New"), entry("P2", REF, "X")];
        let map = reference_map_from(&rows);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("P1").map(String::as_str), Some("New"));
    }

    #[test]
    fn unmatched_fallback_keeps_native_category() {
        let store = store_of(vec![
            entry("P1", REF, "Phones"),
            entry("Q1", "evomag", "Gadgets"),
        ]);
        let report = CategoryStandardizer::new(&store, REF).run().unwrap();

        let e = get(&store, "Q1", "evomag");
        assert!(e.category_unmatched);
        assert!(!e.category_inferred);
        assert_eq!(e.standardized_category, e.original_category);
        assert_eq!(e.standardized_category.as_deref(), Some("Gadgets"));
        assert_eq!(report.unmatched_products, 1);
        assert_eq!(report.standardized_products, 2);
    }

    #[test]
    fn inference_uses_siblings_then_reference_code() {
        let mut prior = entry("S1", "evomag", "Diverse");
        prior.set_standardized("Tablets".into(), CategoryMark::Inferred);
        let store = store_of(vec![
            entry("P1", REF, "Phones"),
            prior,
            entry("S2", "evomag", "Diverse"),
            entry("S3", "evomag", "Diverse"),
            entry("S4", "evomag", "Diverse"),
        ]);
        let s = CategoryStandardizer::new(&store, REF);
        s.seed_reference().unwrap();
        let summary = s.infer_unmatched().unwrap();
        assert_eq!(summary, InferenceSummary { inferred: 3, unmatched: 0 });
        for code in ["S2", "S3", "S4"] {
            let e = get(&store, code, "evomag");
            assert_eq!(e.standardized_category.as_deref(), Some("Tablets"));
            assert!(e.category_inferred);
        }

        // no resolved sibling: fall back to the same code under the reference retailer,
        // and the newly inferred entry then serves its own siblings
        let store = store_of(vec![
            entry("P1", REF, "Phones"),
            entry("A0", "evomag", "Misc"),
            entry("P1", "evomag", "Misc"),
        ]);
        let s = CategoryStandardizer::new(&store, REF);
        s.seed_reference().unwrap();
        // P1 matches directly in phase 2, so skip it to exercise the fallback
        s.infer_unmatched().unwrap();
        let p1 = get(&store, "P1", "evomag");
        let a0 = get(&store, "A0", "evomag");
        assert_eq!(p1.standardized_category.as_deref(), Some("Phones"));
        assert!(p1.category_inferred);
        assert_eq!(a0.standardized_category.as_deref(), Some("Phones"));
        assert!(a0.category_inferred);
    }

    #[test]
    fn first_unmatched_entry_seeds_its_siblings() {
        let store = store_of(vec![
            entry("P1", REF, "Phones"),
            entry("A2", "evomag", "Misc"),
            entry("A1", "evomag", "Misc"),
        ]);
        let s = CategoryStandardizer::new(&store, REF);
        s.seed_reference().unwrap();
        let summary = s.infer_unmatched().unwrap();
        assert_eq!(summary, InferenceSummary { inferred: 1, unmatched: 1 });

        let a1 = get(&store, "A1", "evomag");
        assert!(a1.category_unmatched);
        assert_eq!(a1.standardized_category.as_deref(), Some("Misc"));
        let a2 = get(&store, "A2", "evomag");
        assert!(a2.category_inferred);
        assert!(!a2.category_unmatched);
        assert_eq!(a2.standardized_category.as_deref(), Some("Misc"));
    }

    #[test]
    fn earlier_unmatched_sibling_votes_on_later_run() {
        let store = store_of(vec![
            entry("P1", REF, "Phones"),
            entry("A1", "evomag", "Misc"),
        ]);
        let s = CategoryStandardizer::new(&store, REF);
        s.run().unwrap();
        assert!(get(&store, "A1", "evomag").category_unmatched);

        store
            .bulk_upsert(vec![mutation(entry("A3", "evomag", "Misc"))])
            .unwrap();
        s.run().unwrap();
        let a3 = get(&store, "A3", "evomag");
        assert!(a3.category_inferred);
        assert_eq!(a3.standardized_category.as_deref(), Some("Misc"));
    }

    #[test]
    fn direct_match_on_later_run_clears_unmatched_flag() {
        let store = store_of(vec![
            entry("P1", REF, "Phones"),
            entry("Q1", "evomag", "Gadgets"),
        ]);
        let s = CategoryStandardizer::new(&store, REF);
        let first = s.run().unwrap();
        assert_eq!(first.unmatched_products, 1);
        assert!(get(&store, "Q1", "evomag").category_unmatched);

        store
            .bulk_upsert(vec![mutation(entry("Q1", REF, "Phones"))])
            .unwrap();
        let second = s.run().unwrap();

        let q1 = get(&store, "Q1", "evomag");
        assert_eq!(q1.standardized_category.as_deref(), Some("Phones"));
        assert_eq!(q1.original_category.as_deref(), Some("Gadgets"));
        assert_eq!(q1.mark(), Some(CategoryMark::Direct));
        assert_eq!(second.unmatched_products, 0);
        assert_eq!(second.inferred_categories, 0);
    }

    #[test]
    fn rerunning_changes_nothing() {
        let store = store_of(vec![
            entry("P1", REF, "Phones"),
            entry("P2", REF, "Phones"),
            entry("L1", REF, "Laptops"),
            entry("P1", "evomag", "Mobile"),
            entry("X1", "evomag", "Mobile"),
            entry("L1", "evomag", "Diverse"),
            entry("Q1", "evomag", "Diverse"),
            entry("Z1", "altex", "Other"),
        ]);
        let s = CategoryStandardizer::new(&store, REF);
        let first_report = s.run().unwrap();
        let snapshot = store.find(&Filter::all()).unwrap();

        let second_report = s.run().unwrap();
        assert_eq!(store.find(&Filter::all()).unwrap(), snapshot);
        assert_eq!(first_report, second_report);
        assert_eq!(second_report.total_products, 8);
        assert_eq!(second_report.standardized_products, 8);
    }

    #[test]
    fn reference_entries_carry_no_flags() {
        let store = store_of(vec![entry("P1", REF, "Phones")]);
        CategoryStandardizer::new(&store, REF).run().unwrap();
        let e = get(&store, "P1", REF);
        assert_eq!(e.standardized_category.as_deref(), Some("Phones"));
        assert_eq!(e.original_category.as_deref(), Some("Phones"));
        assert!(!e.category_inferred && !e.category_unmatched);
    }

    #[test]
    fn report_breaks_down_taxonomies_per_retailer() {
        let store = store_of(vec![
            entry("P1", REF, "Phones"),
            entry("L1", REF, "Laptops"),
            entry("P1", "evomag", "Smartphone"),
            entry("P9", "evomag", "Telefoane"),
            entry("L1", "evomag", "Notebook"),
        ]);
        let report = CategoryStandardizer::new(&store, REF).run().unwrap();
        let evomag = &report.retailer_breakdown["evomag"];
        assert_eq!(evomag.original_categories, 3);
        assert_eq!(evomag.standardized_categories, 3);
        assert_eq!(report.retailer_breakdown[REF].original_categories, 2);
        assert!((report.standardization_percentage - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn standardized_view_projects_categories() {
        let store = store_of(vec![entry("P1", REF, "Phones"), entry("P1", "evomag", "Mobile")]);
        CategoryStandardizer::new(&store, REF).run().unwrap();
        let view = standardized_view(&store).unwrap();
        let evomag = view.iter().find(|p| p.online_mag == "evomag").unwrap();
        assert_eq!(evomag.original_category, "Mobile");
        assert_eq!(evomag.category.as_deref(), Some("Phones"));
    }
}
