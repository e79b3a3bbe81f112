pub mod catalog_item;
pub mod playback_state;

pub use catalog_item::*;
pub use playback_state::*;
