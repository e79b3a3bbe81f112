//! Stuck-resource watchdog.
//!
//! A periodic sweep over visible items that catches what the event-driven
//! paths can miss: items that silently lost their source, and loads that never
//! resolved. Items the manager reclaimed at the decoder cap are waiting for a
//! slot, not lost, and are left alone. It only classifies; the manager
//! performs the repair.

use std::time::Instant;

use tracing::{debug, trace};

use crate::config::WatchdogConfig;

/// What the watchdog reads from one visible item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceProbe {
    pub has_source: bool,
    pub is_loading: bool,
    pub is_error: bool,
    pub is_reclaimed: bool,
    pub loading_started_at: Option<Instant>,
}

#[derive(Debug)]
pub struct StuckWatchdog {
    config: WatchdogConfig,
    next_sweep: Option<Instant>,
    sweeps: u64,
    repairs: u64,
}

impl StuckWatchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            next_sweep: None,
            sweeps: 0,
            repairs: 0,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.next_sweep = Some(now + self.config.interval);
        debug!(interval = ?self.config.interval, "Watchdog started");
    }

    /// Cancel the periodic sweep. A stopped watchdog is never due.
    pub fn stop(&mut self) {
        if self.next_sweep.take().is_some() {
            debug!(sweeps = self.sweeps, repairs = self.repairs, "Watchdog stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.next_sweep.is_some()
    }

    pub fn next_sweep(&self) -> Option<Instant> {
        self.next_sweep
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_sweep.is_some_and(|at| now >= at)
    }

    /// Whether one item has drifted from what visibility implies.
    pub fn is_stuck(&self, probe: &ResourceProbe, now: Instant) -> bool {
        let dropped =
            !probe.has_source && !probe.is_loading && !probe.is_error && !probe.is_reclaimed;
        let stalled = probe.is_loading
            && probe
                .loading_started_at
                .is_some_and(|started| now.saturating_duration_since(started) > self.config.stall_threshold);
        dropped || stalled
    }

    /// Run one sweep if due. Returns the indices that need a fresh load.
    pub fn sweep<I>(&mut self, now: Instant, probes: I) -> Vec<usize>
    where
        I: IntoIterator<Item = (usize, ResourceProbe)>,
    {
        if !self.is_due(now) {
            return Vec::new();
        }
        self.next_sweep = Some(now + self.config.interval);
        self.sweeps += 1;

        let stuck: Vec<usize> = probes
            .into_iter()
            .filter(|(_, probe)| self.is_stuck(probe, now))
            .map(|(index, _)| index)
            .collect();

        if stuck.is_empty() {
            trace!(sweep = self.sweeps, "Watchdog sweep clean");
        } else {
            self.repairs += stuck.len() as u64;
            debug!(sweep = self.sweeps, count = stuck.len(), "Watchdog found stuck items");
        }
        stuck
    }

    pub fn sweeps(&self) -> u64 {
        self.sweeps
    }

    pub fn repairs(&self) -> u64 {
        self.repairs
    }
}
