//! Windowed grid virtualizer.
//!
//! Keeps the full catalog laid out on an absolute grid but only materializes
//! nodes for the render window (viewport plus buffer rows). Nodes live in the
//! host's `GridContainer`, keyed by catalog index; the virtualizer only keeps
//! the index-keyed bookkeeping needed to diff one pass against the next.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, trace};

use super::grid_layout::{GridLayout, ItemRect, RenderWindow};
use crate::catalog::view::list_fingerprint;
use crate::config::GridConfig;
use crate::models::CatalogItem;

/// Host-side surface the grid draws into.
pub trait GridContainer {
    /// Opaque visual node created by the item factory.
    type Node;

    fn insert(&mut self, index: usize, node: Self::Node, rect: ItemRect);
    fn reposition(&mut self, index: usize, rect: ItemRect);
    fn remove(&mut self, index: usize);
    fn set_content_height(&mut self, height: f32);
}

/// Receives materialization events, in order, during a render pass.
///
/// `on_release` is always delivered before the node is removed from the
/// container, so attached playback surfaces are released first.
pub trait RenderObserver {
    fn on_materialize(&mut self, index: usize, item: &CatalogItem);
    fn on_release(&mut self, index: usize);
    fn on_visibility(&mut self, index: usize, visible: bool);
}

/// Current scroll offset and viewport size.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportMetrics {
    pub scroll_top: f32,
    pub width: f32,
    pub height: f32,
}

/// Bookkeeping for one materialized index.
#[derive(Debug, Clone)]
pub struct RenderedItem {
    pub item_id: String,
    pub source: PathBuf,
    pub rect: ItemRect,
    /// Inside the viewport proper, not just the buffer.
    pub visible: bool,
}

/// What a render pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOutcome {
    pub created: usize,
    pub destroyed: usize,
    pub visibility_changes: usize,
}

impl RenderOutcome {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.destroyed == 0 && self.visibility_changes == 0
    }
}

pub struct GridVirtualizer {
    layout: GridLayout,
    min_scroll_delta_ratio: f32,
    items: Vec<CatalogItem>,
    fingerprint: u64,
    viewport: ViewportMetrics,
    /// Scroll offset the last render pass used.
    rendered_scroll_top: f32,
    rendered: BTreeMap<usize, RenderedItem>,
    window: RenderWindow,
    render_pending: bool,
    bound: bool,
}

impl GridVirtualizer {
    pub fn new(config: &GridConfig) -> Self {
        Self {
            layout: GridLayout::from_config(config),
            min_scroll_delta_ratio: config.min_scroll_delta_ratio.max(0.0),
            items: Vec::new(),
            fingerprint: list_fingerprint(&[]),
            viewport: ViewportMetrics::default(),
            rendered_scroll_top: 0.0,
            rendered: BTreeMap::new(),
            window: RenderWindow::default(),
            render_pending: false,
            bound: false,
        }
    }

    /// Bind to a container and viewport. The caller follows up with `render`.
    pub fn init<C: GridContainer>(&mut self, container: &mut C, viewport: ViewportMetrics) {
        self.viewport = viewport;
        self.layout.container_width = viewport.width;
        self.bound = true;
        container.set_content_height(self.content_height());
        self.render_pending = true;
        debug!(
            width = viewport.width,
            height = viewport.height,
            "Grid virtualizer bound"
        );
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Replace the backing list.
    ///
    /// Returns false when the list is identical to the current one. Rendered
    /// indices whose item changed id or source path are released right away;
    /// the rest is picked up by the next render pass.
    pub fn set_data<C: GridContainer>(
        &mut self,
        items: Vec<CatalogItem>,
        container: &mut C,
        observer: &mut dyn RenderObserver,
    ) -> bool {
        let fingerprint = list_fingerprint(&items);
        if fingerprint == self.fingerprint && items.len() == self.items.len() {
            trace!("set_data with unchanged list ignored");
            return false;
        }

        let stale: Vec<usize> = self
            .rendered
            .iter()
            .filter(|(index, rendered)| {
                items
                    .get(**index)
                    .map_or(true, |item| {
                        item.id != rendered.item_id || item.path != rendered.source
                    })
            })
            .map(|(index, _)| *index)
            .collect();
        for index in stale {
            self.release(index, container, observer);
        }

        debug!(
            old = self.items.len(),
            new = items.len(),
            "Grid data replaced"
        );
        self.items = items;
        self.fingerprint = fingerprint;
        container.set_content_height(self.content_height());
        self.render_pending = true;
        true
    }

    /// Change the column count. Repositions every rendered item.
    pub fn set_columns<C: GridContainer>(&mut self, columns: usize, container: &mut C) -> bool {
        let columns = columns.max(1);
        if columns == self.layout.columns {
            return false;
        }
        self.layout.columns = columns;
        self.relayout(container);
        true
    }

    /// Change the tile height. Repositions every rendered item.
    pub fn set_item_height<C: GridContainer>(&mut self, height: f32, container: &mut C) -> bool {
        let height = height.max(1.0);
        if height == self.layout.item_height {
            return false;
        }
        self.layout.item_height = height;
        self.relayout(container);
        true
    }

    /// Record a scroll position. Returns whether a render is now pending.
    ///
    /// Moves of less than half a tile since the last pass do not schedule one.
    pub fn on_scroll(&mut self, scroll_top: f32) -> bool {
        self.viewport.scroll_top = scroll_top;
        let threshold = self.layout.item_height * self.min_scroll_delta_ratio;
        if (scroll_top - self.rendered_scroll_top).abs() >= threshold {
            self.render_pending = true;
        }
        self.render_pending
    }

    /// Record a viewport size change.
    pub fn on_resize<C: GridContainer>(&mut self, width: f32, height: f32, container: &mut C) {
        let width_changed = width != self.viewport.width;
        let height_changed = height != self.viewport.height;
        self.viewport.width = width;
        self.viewport.height = height;

        if width_changed {
            self.layout.container_width = width;
            self.reposition_all(container);
        }
        if width_changed || height_changed {
            self.render_pending = true;
        }
    }

    pub fn needs_render(&self) -> bool {
        self.bound && self.render_pending
    }

    /// Diff the desired window against what is materialized.
    ///
    /// Leaving indices are released (observer first, then container); entering
    /// indices are created through `factory`. A factory error aborts the pass
    /// and propagates to the caller.
    pub fn render<C: GridContainer>(
        &mut self,
        container: &mut C,
        factory: &mut dyn FnMut(&CatalogItem, usize) -> Result<C::Node>,
        observer: &mut dyn RenderObserver,
    ) -> Result<RenderOutcome> {
        let mut outcome = RenderOutcome::default();
        if !self.bound {
            return Ok(outcome);
        }

        let count = self.items.len();
        let window =
            self.layout
                .compute_visible_range(count, self.viewport.scroll_top, self.viewport.height);
        let visible =
            self.layout
                .compute_viewport_range(count, self.viewport.scroll_top, self.viewport.height);

        let leaving: Vec<usize> = self
            .rendered
            .keys()
            .filter(|index| !window.contains(**index))
            .copied()
            .collect();
        for index in leaving {
            self.release(index, container, observer);
            outcome.destroyed += 1;
        }

        for index in window.indices() {
            if self.rendered.contains_key(&index) {
                continue;
            }
            let item = &self.items[index];
            let node =
                factory(item, index).with_context(|| format!("Item factory failed for index {index}"))?;
            let rect = self.layout.item_rect(index);
            container.insert(index, node, rect);
            self.rendered.insert(
                index,
                RenderedItem {
                    item_id: item.id.clone(),
                    source: item.path.clone(),
                    rect,
                    visible: false,
                },
            );
            observer.on_materialize(index, item);
            outcome.created += 1;
        }

        for (index, rendered) in self.rendered.iter_mut() {
            let is_visible = visible.contains(*index);
            if is_visible != rendered.visible {
                rendered.visible = is_visible;
                observer.on_visibility(*index, is_visible);
                outcome.visibility_changes += 1;
            }
        }

        self.window = window;
        self.rendered_scroll_top = self.viewport.scroll_top;
        self.render_pending = false;

        if !outcome.is_noop() {
            trace!(
                start = window.start_index,
                end = window.end_index,
                created = outcome.created,
                destroyed = outcome.destroyed,
                "Render pass"
            );
        }
        Ok(outcome)
    }

    /// Release every rendered item and unbind.
    pub fn destroy<C: GridContainer>(&mut self, container: &mut C, observer: &mut dyn RenderObserver) {
        let indices: Vec<usize> = self.rendered.keys().copied().collect();
        for index in indices {
            self.release(index, container, observer);
        }
        self.window = RenderWindow::default();
        self.render_pending = false;
        self.bound = false;
        debug!("Grid virtualizer destroyed");
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn viewport(&self) -> ViewportMetrics {
        self.viewport
    }

    pub fn window(&self) -> RenderWindow {
        self.window
    }

    pub fn content_height(&self) -> f32 {
        self.layout.content_height(self.items.len())
    }

    pub fn rendered_count(&self) -> usize {
        self.rendered.len()
    }

    pub fn rendered(&self, index: usize) -> Option<&RenderedItem> {
        self.rendered.get(&index)
    }

    pub fn rendered_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.rendered.keys().copied()
    }

    pub fn visible_count(&self) -> usize {
        self.rendered.values().filter(|r| r.visible).count()
    }

    fn release<C: GridContainer>(
        &mut self,
        index: usize,
        container: &mut C,
        observer: &mut dyn RenderObserver,
    ) {
        if self.rendered.remove(&index).is_some() {
            observer.on_release(index);
            container.remove(index);
        }
    }

    fn relayout<C: GridContainer>(&mut self, container: &mut C) {
        container.set_content_height(self.content_height());
        self.reposition_all(container);
        self.render_pending = true;
    }

    fn reposition_all<C: GridContainer>(&mut self, container: &mut C) {
        for (index, rendered) in self.rendered.iter_mut() {
            let rect = self.layout.item_rect(*index);
            if rect != rendered.rect {
                rendered.rect = rect;
                container.reposition(*index, rect);
            }
        }
    }
}
