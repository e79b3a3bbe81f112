//! Hosts that drive a `VideoGrid` cooperatively.
//!
//! - `GridDriver` - tokio current-thread driver fed by a command channel
//! - `GlibTicker` - frame ticks from a glib main context (feature `glib`)

pub mod driver;
#[cfg(feature = "glib")]
pub mod glib_host;

pub use driver::{GridDriver, HostCommand, StatsHandle, FRAME_INTERVAL};
#[cfg(feature = "glib")]
pub use glib_host::GlibTicker;
