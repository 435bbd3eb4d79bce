use super::memory::{Documents, MemoryCatalogStore};
use super::{BulkWriteResult, CatalogMutation, CatalogStore, CategoryUpdate, Filter, StoreLocation};
use crate::error::{AppError, AppResult};
use crate::io;
use crate::logging::{log, LogLevel};
use crate::model::CatalogEntry;
use std::path::{Path, PathBuf};

/// A collection persisted as one JSON array at `<data_dir>/<database>/<collection>.json`.
///
/// Every mutating call is staged on a copy, written to a temp file and renamed into place
/// before the in-memory view changes, so a crash leaves either the old or the new collection.
#[derive(Debug)]
pub struct FileCatalogStore {
    path: PathBuf,
    memory: MemoryCatalogStore,
}

impl FileCatalogStore {
    pub fn open(data_dir: &Path, location: &StoreLocation) -> AppResult<Self> {
        let path = Self::collection_path(data_dir, location);
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice::<Vec<CatalogEntry>>(&bytes).map_err(|e| {
                AppError::StoreUnavailable(format!(
                    "collection '{}' is unreadable: {}",
                    path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log(
                    LogLevel::Info,
                    &format!(
                        "Collection '{}' does not exist yet, starting empty.",
                        path.display()
                    ),
                );
                Vec::new()
            }
            Err(e) => {
                return Err(AppError::StoreUnavailable(format!(
                    "cannot open '{}': {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(FileCatalogStore {
            memory: MemoryCatalogStore::with_entries(entries)?,
            path,
        })
    }

    pub fn collection_path(data_dir: &Path, location: &StoreLocation) -> PathBuf {
        data_dir
            .join(io::clean_filename(&location.database))
            .join(format!("{}.json", io::clean_filename(&location.collection)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, docs: &Documents) -> AppResult<()> {
        let bytes = serde_json::to_vec(docs.entries())?;
        io::write_atomic_blocking(&self.path, &bytes).map_err(|e| {
            AppError::StoreUnavailable(format!("cannot persist '{}': {}", self.path.display(), e))
        })
    }
}

impl CatalogStore for FileCatalogStore {
    fn find(&self, filter: &Filter) -> AppResult<Vec<CatalogEntry>> {
        self.memory.find(filter)
    }

    fn bulk_upsert(&self, mutations: Vec<CatalogMutation>) -> AppResult<BulkWriteResult> {
        if mutations.is_empty() {
            return Ok(BulkWriteResult::default());
        }
        self.memory
            .transact(|docs| Ok(docs.bulk_upsert(mutations)), |docs| self.persist(docs))
    }

    fn apply_category_updates(&self, updates: Vec<CategoryUpdate>) -> AppResult<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        self.memory.transact(
            |docs| docs.apply_category_updates(updates),
            |docs| self.persist(docs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Identity, Listing, PricePoint};
    use tempfile::TempDir;

    fn mutation(code: &str, price: f64) -> CatalogMutation {
        CatalogMutation {
            identity: Identity::new(code, "vexio"),
            listing: Listing::new(code, "vexio", "Telefoane", price),
            push: PricePoint {
                price,
                timestamp: "2025_01_01_10_00".into(),
            },
        }
    }

    #[test]
    fn reopened_store_sees_committed_history() {
        let dir = TempDir::new().unwrap();
        let loc = StoreLocation::new("app", "products");

        {
            let store = FileCatalogStore::open(dir.path(), &loc).unwrap();
            store.bulk_upsert(vec![mutation("A1", 100.0)]).unwrap();
            store.bulk_upsert(vec![mutation("A1", 90.0)]).unwrap();
        }

        let store = FileCatalogStore::open(dir.path(), &loc).unwrap();
        assert_eq!(store.path(), dir.path().join("app").join("products.json"));
        let all = store.find(&Filter::all()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].price_history.len(), 2);

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains('\n'));
    }

    #[test]
    fn corrupt_collection_is_store_unavailable() {
        let dir = TempDir::new().unwrap();
        let loc = StoreLocation::new("app", "products");
        let path = FileCatalogStore::collection_path(dir.path(), &loc);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"[{ broken").unwrap();

        let err = FileCatalogStore::open(dir.path(), &loc).unwrap_err();
        assert!(err.is_fatal());
    }
}
