use xxhash_rust::xxh3::xxh3_64;

use super::filter::{FilterCriteria, FilterEngine};
use super::sort::{SortEngine, SortMode};
use crate::models::CatalogItem;

/// Computes a fast hash of an ordered item list.
///
/// The hash covers (id + path + last_modified) for each item in order, so any
/// change to membership, metadata or order yields a different value.
pub fn list_fingerprint(items: &[CatalogItem]) -> u64 {
    let mut hasher_input = Vec::with_capacity(items.len() * 64);

    for item in items {
        hasher_input.extend_from_slice(item.id.as_bytes());
        hasher_input.push(0);
        hasher_input.extend_from_slice(item.path.as_os_str().as_encoded_bytes());
        hasher_input.push(0);
        hasher_input.extend_from_slice(&item.last_modified.to_le_bytes());
    }

    xxh3_64(&hasher_input)
}

/// The catalog as the user currently sees it: filtered, then sorted.
pub struct CatalogView {
    items: Vec<CatalogItem>,
    filter: FilterEngine,
    criteria: FilterCriteria,
    sort: SortEngine,
}

impl CatalogView {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self {
            items,
            filter: FilterEngine::new(),
            criteria: FilterCriteria::default(),
            sort: SortEngine::default(),
        }
    }

    /// Replace the underlying catalog.
    pub fn set_items(&mut self, items: Vec<CatalogItem>) {
        self.items = items;
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn set_favorites<I: IntoIterator<Item = String>>(&mut self, ids: I) {
        self.filter.update_favorites(ids);
    }

    pub fn set_hidden<I: IntoIterator<Item = String>>(&mut self, ids: I) {
        self.filter.update_hidden(ids);
    }

    pub fn set_criteria(&mut self, criteria: FilterCriteria) {
        self.criteria = criteria;
    }

    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    pub fn set_sort_mode(&mut self, mode: SortMode) {
        self.sort.set_mode(mode);
    }

    pub fn reshuffle(&mut self, seed: u64) {
        self.sort.reshuffle(seed);
    }

    /// Filtered, ordered indices into `items()`.
    pub fn project_indices(&self) -> Vec<usize> {
        let mut indices = self.filter.apply(&self.items, &self.criteria);
        self.sort.sort_indices(&mut indices, &self.items);
        indices
    }

    /// The list to hand to the grid.
    pub fn project(&self) -> Vec<CatalogItem> {
        self.project_indices()
            .into_iter()
            .map(|idx| self.items[idx].clone())
            .collect()
    }

    /// Fingerprint of the current projection.
    pub fn fingerprint(&self) -> u64 {
        list_fingerprint(&self.project())
    }
}
