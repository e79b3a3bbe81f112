//! Windowed grid virtualization.
//!
//! - `GridLayout` - column grid math: extents, positions, visible ranges
//! - `GridVirtualizer` - materializes only the render window as nodes

pub mod grid_layout;
pub mod virtualizer;

pub use grid_layout::{GridLayout, ItemRect, RenderWindow};
pub use virtualizer::{
    GridContainer, GridVirtualizer, RenderObserver, RenderOutcome, RenderedItem, ViewportMetrics,
};
