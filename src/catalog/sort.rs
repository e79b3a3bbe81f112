use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::models::CatalogItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Folder name ascending, newest first within a folder.
    Folder,
    /// Newest first.
    Date,
    /// Seeded random order.
    Shuffle,
    /// Catalog order.
    None,
}

impl SortMode {
    pub fn parse(value: &str) -> Self {
        match value {
            "folder" => Self::Folder,
            "date" => Self::Date,
            "shuffle" => Self::Shuffle,
            _ => Self::None,
        }
    }
}

/// Orders catalog indices without moving the items themselves.
#[derive(Debug, Clone)]
pub struct SortEngine {
    mode: SortMode,
    shuffle_seed: u64,
}

impl SortEngine {
    pub fn new(mode: SortMode) -> Self {
        Self {
            mode,
            shuffle_seed: 0,
        }
    }

    pub fn mode(&self) -> SortMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SortMode) {
        self.mode = mode;
    }

    /// Reseed the shuffle; the same seed always yields the same order.
    pub fn reshuffle(&mut self, seed: u64) {
        self.shuffle_seed = seed;
    }

    /// Sort `indices` (into `items`) in place according to the current mode.
    pub fn sort_indices(&self, indices: &mut [usize], items: &[CatalogItem]) {
        match self.mode {
            SortMode::Folder => indices.sort_by(|&a, &b| {
                compare_folders(&items[a], &items[b])
                    .then_with(|| items[b].last_modified.cmp(&items[a].last_modified))
            }),
            SortMode::Date => {
                indices.sort_by(|&a, &b| items[b].last_modified.cmp(&items[a].last_modified))
            }
            SortMode::Shuffle => {
                let mut rng = StdRng::seed_from_u64(self.shuffle_seed);
                indices.shuffle(&mut rng);
            }
            SortMode::None => {}
        }
    }
}

impl Default for SortEngine {
    fn default() -> Self {
        Self::new(SortMode::Folder)
    }
}

/// Items with a folder sort before items without one.
fn compare_folders(a: &CatalogItem, b: &CatalogItem) -> Ordering {
    match (&a.folder, &b.folder) {
        (Some(fa), Some(fb)) => fa.cmp(fb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
