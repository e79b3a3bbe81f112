//! glib main-loop host for a `VideoGrid`.
//!
//! For GTK embedders: the grid lives in an `Rc<RefCell<_>>` owned by the UI
//! and a `timeout_add_local` source ticks it every frame. Surface events are
//! drained by `VideoGrid::tick` itself, so no extra channel plumbing is needed.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error};

use crate::engine::VideoGrid;
use crate::layout::GridContainer;

pub struct GlibTicker {
    source: Option<glib::SourceId>,
    // Set once the source has removed itself; removing it again would panic
    finished: Rc<Cell<bool>>,
}

impl GlibTicker {
    /// Tick `grid` every `frame` on the thread-default main context.
    ///
    /// The ticker holds only a weak reference; it stops by itself once the
    /// grid is dropped or destroyed.
    pub fn attach<C>(grid: &Rc<RefCell<VideoGrid<C>>>, frame: Duration) -> Self
    where
        C: GridContainer + 'static,
        C::Node: 'static,
    {
        let weak = Rc::downgrade(grid);
        let finished = Rc::new(Cell::new(false));
        let finished_flag = finished.clone();

        let source = glib::timeout_add_local(frame, move || {
            let Some(grid) = weak.upgrade() else {
                finished_flag.set(true);
                return glib::ControlFlow::Break;
            };
            // Re-entrant call from inside a grid callback: skip this frame
            let Ok(mut grid) = grid.try_borrow_mut() else {
                return glib::ControlFlow::Continue;
            };
            if grid.is_destroyed() {
                finished_flag.set(true);
                return glib::ControlFlow::Break;
            }
            if let Err(err) = grid.tick() {
                error!("Video grid frame failed: {:#}", err);
            }
            glib::ControlFlow::Continue
        });
        debug!(frame = ?frame, "glib ticker attached");

        Self {
            source: Some(source),
            finished,
        }
    }

    pub fn is_running(&self) -> bool {
        self.source.is_some() && !self.finished.get()
    }

    pub fn stop(&mut self) {
        if let Some(source) = self.source.take() {
            if !self.finished.get() {
                source.remove();
            }
            debug!("glib ticker stopped");
        }
    }
}

impl Drop for GlibTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::EngineConfig;
    use crate::layout::{ItemRect, ViewportMetrics};
    use crate::models::CatalogItem;
    use crate::playback::{EventSink, LoadTicket, MediaSurface};
    use std::path::Path;

    struct Nowhere;

    impl GridContainer for Nowhere {
        type Node = ();

        fn insert(&mut self, _index: usize, _node: (), _rect: ItemRect) {}

        fn reposition(&mut self, _index: usize, _rect: ItemRect) {}

        fn remove(&mut self, _index: usize) {}

        fn set_content_height(&mut self, _height: f32) {}
    }

    struct Idle;

    impl MediaSurface for Idle {
        fn assign(&mut self, _source: &Path, _ticket: LoadTicket) {}

        fn play(&mut self) {}

        fn pause(&mut self) {}

        fn seek(&mut self, _position: f64) {}

        fn release(&mut self) {}
    }

    #[test]
    fn test_ticker_renders_and_stops_with_grid() {
        let context = glib::MainContext::default();
        let _guard = context.acquire().unwrap();

        let grid = VideoGrid::mount(
            EngineConfig::default(),
            Nowhere,
            Box::new(|_: &CatalogItem, _: usize| -> anyhow::Result<()> { Ok(()) }),
            Box::new(|_: &CatalogItem, _: usize, _: EventSink| -> Box<dyn MediaSurface> {
                Box::new(Idle)
            }),
            Rc::new(SystemClock),
            ViewportMetrics {
                scroll_top: 0.0,
                width: 1000.0,
                height: 800.0,
            },
        )
        .unwrap();
        let grid = Rc::new(RefCell::new(grid));
        let ticker = GlibTicker::attach(&grid, Duration::from_millis(1));

        let items = (0..30)
            .map(|i| CatalogItem::new(format!("g{}", i), format!("/g/{}.mp4", i)))
            .collect();
        grid.borrow_mut().set_data(items);

        for _ in 0..50 {
            if grid.borrow().stats().rendered_count > 0 {
                break;
            }
            context.iteration(true);
        }
        assert_eq!(grid.borrow().stats().rendered_count, 30);

        grid.borrow_mut().destroy();
        context.iteration(true);
        assert!(!ticker.is_running());
    }
}
