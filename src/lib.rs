//! Viewport-driven video grid.
//!
//! Lays a large catalog of clips out on a column grid, materializes only the
//! rows near the viewport, and manages one decoder surface per materialized
//! item under a global cap, with backed-off retries and a watchdog for loads
//! that go missing or stall.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod layout;
pub mod models;
pub mod playback;
pub mod runtime;
pub mod sim;

pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use config::{EngineConfig, GridConfig, PlaybackConfig, WatchdogConfig};
pub use engine::{GridStats, ItemFactory, VideoGrid};
pub use error::{ConfigError, LoadError};
pub use layout::{GridContainer, ItemRect, RenderWindow, ViewportMetrics};
pub use models::{CatalogItem, LoopWindow, PlaybackState, PlaybackStatus};
pub use playback::{MediaSurface, SurfaceEvent, SurfaceFactory, VideoLifecycleManager};
