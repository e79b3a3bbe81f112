//! Headless simulation: fake decoders, a pixel-free container, and the
//! scroll session the binary runs.

pub mod container;
pub mod session;
pub mod surface;

pub use container::{HeadlessContainer, HeadlessNode};
pub use session::{parse_args, run_session, SessionArgs, SessionReport, USAGE};
pub use surface::{SimCounters, SimProfile, SimSurfaceFactory, SimulatedSurface};
