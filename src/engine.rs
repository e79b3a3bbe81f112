//! The caller-facing grid: virtualizer and lifecycle manager wired together.
//!
//! `VideoGrid` owns the host container, forwards materialization events from
//! the virtualizer into the playback manager, and coalesces render requests so
//! at most one pass runs per `tick`.

use std::rc::Rc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::layout::{GridContainer, GridVirtualizer, RenderOutcome, ViewportMetrics};
use crate::models::{CatalogItem, PlaybackStatus};
use crate::playback::{SurfaceEvent, SurfaceFactory, VideoLifecycleManager};

/// Builds the visual node for one catalog item.
pub type ItemFactory<N> = Box<dyn FnMut(&CatalogItem, usize) -> Result<N>>;

/// Counters reported by `VideoGrid::stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GridStats {
    pub total_items: usize,
    pub rendered_count: usize,
    pub active_decoder_count: usize,
    /// Items in `loaded` or `playing`.
    pub loaded_count: usize,
    pub visible_count: usize,
    pub loading_count: usize,
    pub playing_count: usize,
    pub paused_count: usize,
    pub error_count: usize,
    pub peak_active: usize,
    pub nodes_created: u64,
    pub nodes_destroyed: u64,
    pub retries_scheduled: u64,
    pub evictions: u64,
    pub watchdog_repairs: u64,
}

pub struct VideoGrid<C: GridContainer> {
    container: C,
    virtualizer: GridVirtualizer,
    manager: VideoLifecycleManager,
    item_factory: ItemFactory<C::Node>,
    nodes_created: u64,
    nodes_destroyed: u64,
    destroyed: bool,
}

impl<C: GridContainer> VideoGrid<C> {
    /// Validate `config`, bind to `container` and run the initial render.
    pub fn mount(
        config: EngineConfig,
        mut container: C,
        item_factory: ItemFactory<C::Node>,
        surfaces: Box<dyn SurfaceFactory>,
        clock: Rc<dyn Clock>,
        viewport: ViewportMetrics,
    ) -> Result<Self> {
        config
            .validate()
            .context("Invalid video grid configuration")?;

        let mut virtualizer = GridVirtualizer::new(&config.grid);
        virtualizer.init(&mut container, viewport);
        let manager =
            VideoLifecycleManager::new(config.playback, config.watchdog, clock, surfaces);

        let mut grid = Self {
            container,
            virtualizer,
            manager,
            item_factory,
            nodes_created: 0,
            nodes_destroyed: 0,
            destroyed: false,
        };
        grid.render()?;
        info!(
            columns = config.grid.columns,
            max_active = grid.manager.config().max_active,
            "Video grid mounted"
        );
        Ok(grid)
    }

    /// Run a render pass now. Factory errors propagate.
    pub fn render(&mut self) -> Result<RenderOutcome> {
        let Self {
            container,
            virtualizer,
            manager,
            item_factory,
            ..
        } = self;
        let mut factory = |item: &CatalogItem, index: usize| item_factory(item, index);
        let outcome = virtualizer.render(container, &mut factory, manager)?;
        self.nodes_created += outcome.created as u64;
        self.nodes_destroyed += outcome.destroyed as u64;
        Ok(outcome)
    }

    /// Replace the catalog. The render happens on the next tick.
    pub fn set_data(&mut self, items: Vec<CatalogItem>) -> bool {
        self.virtualizer
            .set_data(items, &mut self.container, &mut self.manager)
    }

    pub fn set_columns(&mut self, columns: usize) -> bool {
        self.virtualizer.set_columns(columns, &mut self.container)
    }

    pub fn set_item_height(&mut self, height: f32) -> bool {
        self.virtualizer.set_item_height(height, &mut self.container)
    }

    pub fn on_scroll(&mut self, scroll_top: f32) -> bool {
        self.virtualizer.on_scroll(scroll_top)
    }

    pub fn on_resize(&mut self, width: f32, height: f32) {
        self.virtualizer.on_resize(width, height, &mut self.container);
    }

    /// One cooperative frame: drain surface events, run a pending render,
    /// then fire due timers and the watchdog.
    pub fn tick(&mut self) -> Result<RenderOutcome> {
        if self.destroyed {
            return Ok(RenderOutcome::default());
        }
        self.manager.pump_events();
        let outcome = if self.virtualizer.needs_render() {
            self.render()?
        } else {
            RenderOutcome::default()
        };
        self.manager.tick();
        Ok(outcome)
    }

    pub fn handle_event(&mut self, event: SurfaceEvent) {
        self.manager.handle_event(event);
    }

    /// Manual retry for an item in `error`.
    pub fn retry(&mut self, index: usize) -> bool {
        self.manager.retry(index)
    }

    pub fn connect_status_changed<F>(&mut self, callback: F)
    where
        F: Fn(usize, PlaybackStatus) + 'static,
    {
        self.manager.connect_status_changed(callback);
    }

    pub fn event_receiver(&self) -> flume::Receiver<SurfaceEvent> {
        self.manager.event_receiver()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.manager.next_deadline()
    }

    pub fn stats(&self) -> GridStats {
        let playback = self.manager.stats();
        GridStats {
            total_items: self.virtualizer.items().len(),
            rendered_count: self.virtualizer.rendered_count(),
            active_decoder_count: playback.active,
            loaded_count: playback.loaded + playback.playing,
            visible_count: self.virtualizer.visible_count(),
            loading_count: playback.loading,
            playing_count: playback.playing,
            paused_count: playback.paused,
            error_count: playback.error,
            peak_active: playback.peak_active,
            nodes_created: self.nodes_created,
            nodes_destroyed: self.nodes_destroyed,
            retries_scheduled: playback.retries_scheduled,
            evictions: playback.evictions,
            watchdog_repairs: playback.watchdog_repairs,
        }
    }

    /// Release every rendered item and its surface, then stop all timers.
    /// Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        let released = self.virtualizer.rendered_count();
        self.virtualizer
            .destroy(&mut self.container, &mut self.manager);
        self.nodes_destroyed += released as u64;
        self.manager.shutdown();
        self.destroyed = true;
        debug!(released, "Video grid destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn container(&self) -> &C {
        &self.container
    }

    pub fn virtualizer(&self) -> &GridVirtualizer {
        &self.virtualizer
    }

    pub fn manager(&self) -> &VideoLifecycleManager {
        &self.manager
    }
}

impl<C: GridContainer> Drop for VideoGrid<C> {
    fn drop(&mut self) {
        self.destroy();
    }
}
