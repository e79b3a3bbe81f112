use std::collections::HashSet;

use crate::models::CatalogItem;

/// What to keep when projecting the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    /// Only items in exactly this folder.
    pub folder: Option<String>,
    pub favorites_only: bool,
    /// Show nothing but hidden items.
    pub hidden_only: bool,
    /// Include hidden items alongside the rest.
    pub show_hidden: bool,
}

/// Filters catalog items against the favorite and hidden id sets.
#[derive(Debug, Default)]
pub struct FilterEngine {
    favorite_ids: HashSet<String>,
    hidden_ids: HashSet<String>,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the favorites set.
    pub fn update_favorites<I: IntoIterator<Item = String>>(&mut self, ids: I) {
        self.favorite_ids.clear();
        self.favorite_ids.extend(ids);
    }

    /// Replace the hidden set.
    pub fn update_hidden<I: IntoIterator<Item = String>>(&mut self, ids: I) {
        self.hidden_ids.clear();
        self.hidden_ids.extend(ids);
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.favorite_ids.contains(id)
    }

    pub fn is_hidden(&self, id: &str) -> bool {
        self.hidden_ids.contains(id)
    }

    /// Indices of the items that pass `criteria`, in catalog order.
    pub fn apply(&self, items: &[CatalogItem], criteria: &FilterCriteria) -> Vec<usize> {
        items
            .iter()
            .enumerate()
            .filter(|(_, item)| self.matches(item, criteria))
            .map(|(idx, _)| idx)
            .collect()
    }

    #[inline]
    pub fn matches(&self, item: &CatalogItem, criteria: &FilterCriteria) -> bool {
        if let Some(ref folder) = criteria.folder {
            if item.folder.as_ref() != Some(folder) {
                return false;
            }
        }

        if criteria.favorites_only && !self.is_favorite(&item.id) {
            return false;
        }

        let hidden = self.is_hidden(&item.id);
        if criteria.hidden_only {
            hidden
        } else {
            !hidden || criteria.show_hidden
        }
    }
}
