//! The media-surface seam.
//!
//! A surface wraps whatever actually decodes video (libmpv, a GStreamer
//! pipeline, a simulator). Assignment is asynchronous: the surface reports the
//! outcome later through the `EventSink` it was created with, tagged with the
//! `LoadTicket` it was given. The lifecycle manager compares that ticket
//! against the item's current generation and drops anything stale.

use std::path::Path;

use crate::models::CatalogItem;

/// Identifies one assignment of a source to one item's surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadTicket {
    pub index: usize,
    pub generation: u64,
}

/// Basic metadata resolved by a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SurfaceMeta {
    /// Seconds.
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEventKind {
    /// Metadata resolved; the surface can play.
    Loaded(SurfaceMeta),
    /// The source was rejected.
    Failed(String),
    /// Playback position, seconds.
    Progress(f64),
    /// Playback reached the end of the clip.
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceEvent {
    pub ticket: LoadTicket,
    pub kind: SurfaceEventKind,
}

impl SurfaceEvent {
    pub fn new(ticket: LoadTicket, kind: SurfaceEventKind) -> Self {
        Self { ticket, kind }
    }
}

/// Where surfaces deliver their asynchronous outcomes.
pub type EventSink = flume::Sender<SurfaceEvent>;

/// One item's decoder resource.
pub trait MediaSurface {
    /// Start loading `source`. The outcome arrives later as a `SurfaceEvent`
    /// carrying `ticket`.
    fn assign(&mut self, source: &Path, ticket: LoadTicket);
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, position: f64);
    /// Drop the source and stop any in-flight work. Must be synchronous.
    fn release(&mut self);
}

/// Creates a surface for each materialized item.
pub trait SurfaceFactory {
    fn create(&mut self, item: &CatalogItem, index: usize, events: EventSink)
        -> Box<dyn MediaSurface>;
}

impl<F> SurfaceFactory for F
where
    F: FnMut(&CatalogItem, usize, EventSink) -> Box<dyn MediaSurface>,
{
    fn create(
        &mut self,
        item: &CatalogItem,
        index: usize,
        events: EventSink,
    ) -> Box<dyn MediaSurface> {
        self(item, index, events)
    }
}
