//! Playback surface lifecycle.
//!
//! - `MediaSurface` - the seam to the decoder primitive
//! - `TimerQueue` - cooperative timers for retries and stall detection
//! - `VideoLifecycleManager` - per-item state machine with a decoder cap
//! - `StuckWatchdog` - periodic sweep repairing lost or stalled loads

pub mod manager;
pub mod surface;
pub mod timers;
pub mod watchdog;

pub use manager::{PlaybackStats, StatusCallback, VideoLifecycleManager};
pub use surface::{
    EventSink, LoadTicket, MediaSurface, SurfaceEvent, SurfaceEventKind, SurfaceFactory,
    SurfaceMeta,
};
pub use timers::{Timer, TimerQueue};
pub use watchdog::{ResourceProbe, StuckWatchdog};
