//! Catalog projection: which items the grid shows, and in what order.
//!
//! - `FilterEngine` - folder, favorites and hidden-state filtering
//! - `SortEngine` - folder/date/shuffle ordering
//! - `CatalogView` - the combination, producing the list handed to the grid

pub mod filter;
pub mod sort;
pub mod view;

pub use filter::{FilterCriteria, FilterEngine};
pub use sort::{SortEngine, SortMode};
pub use view::CatalogView;
