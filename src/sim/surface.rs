//! Simulated media surfaces.
//!
//! Each assignment resolves after a random latency on a tokio task, or fails,
//! or never resolves at all (a stall), according to a `SimProfile`. Playback
//! emits position updates so the preview loop and end-of-clip paths run.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::models::CatalogItem;
use crate::playback::{
    EventSink, LoadTicket, MediaSurface, SurfaceEvent, SurfaceEventKind, SurfaceFactory,
    SurfaceMeta,
};

/// Failure injection and timing for simulated surfaces.
#[derive(Debug, Clone)]
pub struct SimProfile {
    pub min_latency: Duration,
    pub max_latency: Duration,
    /// Probability that an assignment is rejected.
    pub fail_rate: f64,
    /// Probability that an assignment never resolves.
    pub stall_rate: f64,
    pub progress_interval: Duration,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_millis(40),
            max_latency: Duration::from_millis(400),
            fail_rate: 0.0,
            stall_rate: 0.0,
            progress_interval: Duration::from_millis(250),
        }
    }
}

/// What the simulated decoders were asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCounters {
    pub surfaces: u64,
    pub assigns: u64,
    pub injected_failures: u64,
    pub injected_stalls: u64,
    pub releases: u64,
}

pub struct SimSurfaceFactory {
    profile: SimProfile,
    rng: StdRng,
    counters: Arc<Mutex<SimCounters>>,
}

impl SimSurfaceFactory {
    pub fn new(profile: SimProfile, seed: u64) -> Self {
        Self {
            profile,
            rng: StdRng::seed_from_u64(seed),
            counters: Arc::new(Mutex::new(SimCounters::default())),
        }
    }

    pub fn counters(&self) -> Arc<Mutex<SimCounters>> {
        Arc::clone(&self.counters)
    }
}

impl SurfaceFactory for SimSurfaceFactory {
    fn create(&mut self, item: &CatalogItem, index: usize, sink: EventSink) -> Box<dyn MediaSurface> {
        self.counters.lock().surfaces += 1;
        Box::new(SimulatedSurface {
            index,
            catalog_duration: item.duration,
            dimensions: (item.width.unwrap_or(1920), item.height.unwrap_or(1080)),
            profile: self.profile.clone(),
            rng: StdRng::seed_from_u64(self.rng.gen()),
            sink,
            counters: Arc::clone(&self.counters),
            pending: None,
            playback: None,
            clip_duration: 0.0,
            position: Arc::new(Mutex::new(0.0)),
            ticket: None,
        })
    }
}

pub struct SimulatedSurface {
    index: usize,
    catalog_duration: Option<f64>,
    dimensions: (u32, u32),
    profile: SimProfile,
    rng: StdRng,
    sink: EventSink,
    counters: Arc<Mutex<SimCounters>>,
    pending: Option<JoinHandle<()>>,
    playback: Option<JoinHandle<()>>,
    clip_duration: f64,
    position: Arc<Mutex<f64>>,
    ticket: Option<LoadTicket>,
}

impl SimulatedSurface {
    fn abort_all(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
        if let Some(handle) = self.playback.take() {
            handle.abort();
        }
    }
}

impl MediaSurface for SimulatedSurface {
    fn assign(&mut self, _source: &Path, ticket: LoadTicket) {
        self.abort_all();
        self.ticket = Some(ticket);
        self.clip_duration = self
            .catalog_duration
            .unwrap_or_else(|| self.rng.gen_range(2.0..180.0));
        *self.position.lock() = 0.0;
        self.counters.lock().assigns += 1;

        let roll: f64 = self.rng.gen();
        if roll < self.profile.stall_rate {
            self.counters.lock().injected_stalls += 1;
            trace!(index = self.index, "Simulated stall");
            return;
        }
        let fail = roll < self.profile.stall_rate + self.profile.fail_rate;
        if fail {
            self.counters.lock().injected_failures += 1;
        }

        let latency = if self.profile.max_latency > self.profile.min_latency {
            self.rng
                .gen_range(self.profile.min_latency..=self.profile.max_latency)
        } else {
            self.profile.min_latency
        };
        let kind = if fail {
            SurfaceEventKind::Failed("simulated decoder error".to_string())
        } else {
            SurfaceEventKind::Loaded(SurfaceMeta {
                duration: self.clip_duration,
                width: self.dimensions.0,
                height: self.dimensions.1,
            })
        };
        let sink = self.sink.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let _ = sink.send(SurfaceEvent::new(ticket, kind));
        }));
    }

    fn play(&mut self) {
        let Some(ticket) = self.ticket else {
            return;
        };
        if let Some(handle) = self.playback.take() {
            handle.abort();
        }
        let sink = self.sink.clone();
        let position = Arc::clone(&self.position);
        let step = self.profile.progress_interval;
        let duration = self.clip_duration;

        self.playback = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(step).await;
                let now = {
                    let mut position = position.lock();
                    *position += step.as_secs_f64();
                    *position
                };
                if now >= duration {
                    let _ = sink.send(SurfaceEvent::new(ticket, SurfaceEventKind::Ended));
                    break;
                }
                if sink
                    .send(SurfaceEvent::new(ticket, SurfaceEventKind::Progress(now)))
                    .is_err()
                {
                    break;
                }
            }
        }));
    }

    fn pause(&mut self) {
        if let Some(handle) = self.playback.take() {
            handle.abort();
        }
    }

    fn seek(&mut self, position: f64) {
        *self.position.lock() = position.max(0.0);
    }

    fn release(&mut self) {
        self.abort_all();
        self.ticket = None;
        self.counters.lock().releases += 1;
    }
}

impl Drop for SimulatedSurface {
    fn drop(&mut self) {
        self.abort_all();
    }
}
