//! Tokio driver for a `VideoGrid`.
//!
//! Everything runs on the task that awaits `GridDriver::run`: host commands
//! and surface events are applied as they arrive, and a frame interval runs
//! the coalesced render plus due timers. The grid itself is `!Send`, so this
//! belongs on a current-thread runtime or a `LocalSet`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::engine::{GridStats, VideoGrid};
use crate::layout::GridContainer;
use crate::models::CatalogItem;
use crate::playback::SurfaceEvent;

/// Default frame interval (~60 Hz).
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Requests from the host environment.
#[derive(Debug, Clone)]
pub enum HostCommand {
    Scroll(f32),
    Resize { width: f32, height: f32 },
    SetData(Vec<CatalogItem>),
    SetColumns(usize),
    SetItemHeight(f32),
    Retry(usize),
    Shutdown,
}

/// Latest published stats, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct StatsHandle {
    inner: Arc<RwLock<GridStats>>,
}

impl StatsHandle {
    pub fn get(&self) -> GridStats {
        *self.inner.read()
    }

    fn publish(&self, stats: GridStats) {
        *self.inner.write() = stats;
    }
}

pub struct GridDriver<C: GridContainer> {
    grid: VideoGrid<C>,
    commands: flume::Receiver<HostCommand>,
    events: flume::Receiver<SurfaceEvent>,
    frame: Duration,
    stats: StatsHandle,
}

impl<C: GridContainer> GridDriver<C> {
    /// Wrap `grid`. Returns the driver and the sender the host feeds.
    pub fn new(grid: VideoGrid<C>, frame: Duration) -> (Self, flume::Sender<HostCommand>) {
        let (command_tx, commands) = flume::unbounded();
        let events = grid.event_receiver();
        let stats = StatsHandle::default();
        stats.publish(grid.stats());
        let driver = Self {
            grid,
            commands,
            events,
            frame: frame.max(Duration::from_millis(1)),
            stats,
        };
        (driver, command_tx)
    }

    pub fn stats_handle(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// Run until `Shutdown` arrives or every command sender is dropped.
    ///
    /// The grid is destroyed on the way out; the final stats are returned.
    pub async fn run(mut self) -> Result<GridStats> {
        let mut ticker = tokio::time::interval(self.frame);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(frame = ?self.frame, "Grid driver started");

        let mut frames: u64 = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.grid.tick()?;
                    if !outcome.is_noop() {
                        trace!(created = outcome.created, destroyed = outcome.destroyed, "Frame rendered");
                    }
                    self.stats.publish(self.grid.stats());
                    frames += 1;
                }
                command = self.commands.recv_async() => match command {
                    Ok(HostCommand::Shutdown) => {
                        debug!("Shutdown requested");
                        break;
                    }
                    Ok(command) => self.apply(command),
                    Err(_) => {
                        debug!("Host command channel closed");
                        break;
                    }
                },
                event = self.events.recv_async() => {
                    if let Ok(event) = event {
                        self.grid.handle_event(event);
                    }
                }
            }
        }

        let peak = self.grid.stats().peak_active;
        self.grid.destroy();
        let stats = self.grid.stats();
        self.stats.publish(stats);
        info!(frames, peak_active = peak, "Grid driver stopped");
        Ok(stats)
    }

    fn apply(&mut self, command: HostCommand) {
        match command {
            HostCommand::Scroll(top) => {
                self.grid.on_scroll(top);
            }
            HostCommand::Resize { width, height } => self.grid.on_resize(width, height),
            HostCommand::SetData(items) => {
                self.grid.set_data(items);
            }
            HostCommand::SetColumns(columns) => {
                self.grid.set_columns(columns);
            }
            HostCommand::SetItemHeight(height) => {
                self.grid.set_item_height(height);
            }
            HostCommand::Retry(index) => {
                if !self.grid.retry(index) {
                    warn!(index, "Retry ignored: item is not in error");
                }
            }
            HostCommand::Shutdown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::config::EngineConfig;
    use crate::layout::{ItemRect, ViewportMetrics};
    use crate::playback::{
        EventSink, LoadTicket, MediaSurface, SurfaceEventKind, SurfaceMeta,
    };
    use std::collections::BTreeSet;
    use std::path::Path;
    use std::rc::Rc;

    #[derive(Default)]
    struct Slots {
        indices: BTreeSet<usize>,
    }

    impl GridContainer for Slots {
        type Node = ();

        fn insert(&mut self, index: usize, _node: (), _rect: ItemRect) {
            self.indices.insert(index);
        }

        fn reposition(&mut self, _index: usize, _rect: ItemRect) {}

        fn remove(&mut self, index: usize) {
            self.indices.remove(&index);
        }

        fn set_content_height(&mut self, _height: f32) {}
    }

    /// Resolves every load right away.
    struct InstantSurface {
        sink: EventSink,
    }

    impl MediaSurface for InstantSurface {
        fn assign(&mut self, _source: &Path, ticket: LoadTicket) {
            let _ = self.sink.send(SurfaceEvent::new(
                ticket,
                SurfaceEventKind::Loaded(SurfaceMeta {
                    duration: 8.0,
                    width: 320,
                    height: 240,
                }),
            ));
        }

        fn play(&mut self) {}

        fn pause(&mut self) {}

        fn seek(&mut self, _position: f64) {}

        fn release(&mut self) {}
    }

    fn driver() -> (GridDriver<Slots>, flume::Sender<HostCommand>) {
        let grid = VideoGrid::mount(
            EngineConfig::default(),
            Slots::default(),
            Box::new(|_: &CatalogItem, _: usize| -> Result<()> { Ok(()) }),
            Box::new(
                |_: &CatalogItem, _: usize, sink: EventSink| -> Box<dyn MediaSurface> {
                    Box::new(InstantSurface { sink })
                },
            ),
            Rc::new(TokioClock),
            ViewportMetrics {
                scroll_top: 0.0,
                width: 1000.0,
                height: 800.0,
            },
        )
        .unwrap();
        GridDriver::new(grid, FRAME_INTERVAL)
    }

    fn catalog(count: usize) -> Vec<CatalogItem> {
        (0..count)
            .map(|i| CatalogItem::new(format!("c{}", i), format!("/c/{}.mp4", i)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_renders_and_plays() {
        let (driver, commands) = driver();
        let stats = driver.stats_handle();
        commands.send(HostCommand::SetData(catalog(50))).unwrap();

        let host = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let live = stats.get();
            commands.send(HostCommand::Shutdown).unwrap();
            live
        };
        let (result, live) = tokio::join!(driver.run(), host);

        assert_eq!(live.total_items, 50);
        assert_eq!(live.rendered_count, 40);
        assert_eq!(live.playing_count, 18);
        assert_eq!(live.active_decoder_count, 18);

        let last = result.unwrap();
        assert_eq!(last.rendered_count, 0);
        assert_eq!(last.active_decoder_count, 0);
        assert_eq!(stats.get(), last);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_scroll_and_columns() {
        let (driver, commands) = driver();
        let stats = driver.stats_handle();
        commands.send(HostCommand::SetData(catalog(1000))).unwrap();

        let host = async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            commands.send(HostCommand::Scroll(50.0 * 208.0)).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            let scrolled = stats.get();
            commands.send(HostCommand::SetColumns(10)).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            let widened = stats.get();
            drop(commands);
            (scrolled, widened)
        };
        let (result, (scrolled, widened)) = tokio::join!(driver.run(), host);
        result.unwrap();

        assert_eq!(scrolled.rendered_count, 40);
        assert!(scrolled.nodes_destroyed >= 40);
        assert!(scrolled.peak_active <= 18);
        assert_eq!(widened.rendered_count, 80);
        assert!(widened.active_decoder_count <= 18);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_stops_on_closed_channel() {
        let (driver, commands) = driver();
        drop(commands);
        let stats = driver.run().await.unwrap();
        assert_eq!(stats.rendered_count, 0);
    }
}
