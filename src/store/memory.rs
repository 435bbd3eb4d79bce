use super::{BulkWriteResult, CatalogMutation, CatalogStore, CategoryUpdate, Filter};
use crate::error::{AppError, AppResult};
use crate::model::{CatalogEntry, Identity};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub(crate) struct Documents {
    entries: Vec<CatalogEntry>,
    index: HashMap<Identity, usize>,
}

impl Documents {
    pub(crate) fn from_entries(entries: Vec<CatalogEntry>) -> AppResult<Self> {
        let mut docs = Documents::default();
        for entry in entries {
            let id = entry.identity();
            if docs.index.contains_key(&id) {
                return Err(AppError::Store(format!(
                    "duplicate identity {} in stored collection",
                    id
                )));
            }
            docs.index.insert(id, docs.entries.len());
            docs.entries.push(entry);
        }
        Ok(docs)
    }

    pub(crate) fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    fn upsert(&mut self, mutation: CatalogMutation) -> bool {
        let CatalogMutation {
            identity,
            mut listing,
            push,
        } = mutation;
        listing.product_code = identity.product_code.clone();
        listing.retailer = identity.retailer.clone();

        match self.index.get(&identity) {
            Some(&pos) => {
                self.entries[pos].observe(listing, push);
                false
            }
            None => {
                self.index.insert(identity, self.entries.len());
                self.entries.push(CatalogEntry::new(listing, push));
                true
            }
        }
    }

    pub(crate) fn bulk_upsert(&mut self, mutations: Vec<CatalogMutation>) -> BulkWriteResult {
        let mut result = BulkWriteResult::default();
        for mutation in mutations {
            if self.upsert(mutation) {
                result.inserted += 1;
            } else {
                result.updated += 1;
            }
        }
        result
    }

    pub(crate) fn apply_category_updates(&mut self, updates: Vec<CategoryUpdate>) -> AppResult<usize> {
        // Resolve every target first so a bad identity leaves the pass uncommitted.
        let mut positions = Vec::with_capacity(updates.len());
        for update in &updates {
            let pos = self.index.get(&update.identity).copied().ok_or_else(|| {
                AppError::Store(format!(
                    "category update targets unknown document {}",
                    update.identity
                ))
            })?;
            positions.push(pos);
        }

        let mut changed = 0;
        for (pos, update) in positions.into_iter().zip(updates) {
            let entry = &mut self.entries[pos];
            let before = entry.clone();
            entry.set_standardized(update.standardized_category, update.mark);
            if *entry != before {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

/// In-process store; every mutating call holds the write lock for its whole duration.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    docs: RwLock<Documents>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        MemoryCatalogStore::default()
    }

    pub fn with_entries(entries: Vec<CatalogEntry>) -> AppResult<Self> {
        Ok(MemoryCatalogStore {
            docs: RwLock::new(Documents::from_entries(entries)?),
        })
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `apply` on a copy of the documents and swaps it in only if `commit` accepts it.
    pub(crate) fn transact<T, A, C>(&self, apply: A, commit: C) -> AppResult<T>
    where
        A: FnOnce(&mut Documents) -> AppResult<T>,
        C: FnOnce(&Documents) -> AppResult<()>,
    {
        let mut guard = self
            .docs
            .write()
            .map_err(|_| AppError::StoreUnavailable("catalog lock poisoned".into()))?;
        let mut draft = guard.clone();
        let out = apply(&mut draft)?;
        commit(&draft)?;
        *guard = draft;
        Ok(out)
    }
}

impl CatalogStore for MemoryCatalogStore {
    fn find(&self, filter: &Filter) -> AppResult<Vec<CatalogEntry>> {
        let guard = self
            .docs
            .read()
            .map_err(|_| AppError::StoreUnavailable("catalog lock poisoned".into()))?;
        Ok(guard
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    fn bulk_upsert(&self, mutations: Vec<CatalogMutation>) -> AppResult<BulkWriteResult> {
        if mutations.is_empty() {
            return Ok(BulkWriteResult::default());
        }
        let mut guard = self
            .docs
            .write()
            .map_err(|_| AppError::StoreUnavailable("catalog lock poisoned".into()))?;
        Ok(guard.bulk_upsert(mutations))
    }

    fn apply_category_updates(&self, updates: Vec<CategoryUpdate>) -> AppResult<usize> {
        self.transact(|docs| docs.apply_category_updates(updates), |_| Ok(()))
    }
}
