//! Viewport video lifecycle manager.
//!
//! One state machine per materialized item, all driven from a single thread:
//!
//! - `unloaded -> loading` when the item becomes visible (reclaiming the
//!   least-recently-active surface first if the decoder cap is reached)
//! - `loading -> loaded` on resolved metadata, then `-> playing` if visible
//! - `loading -> loading` on failure or stall, with exponential backoff
//! - `-> error` once retries are exhausted, until a manual retry
//! - `playing <-> paused` as the item leaves and re-enters the viewport
//! - `-> unloaded` when reclaimed at the cap; a reclaimed item that is still
//!   visible resumes once a slot frees up or an off-screen item can give one
//! - `-> unloaded` when the item leaves the render window
//!
//! Every assignment is stamped with a fresh generation; surface events and
//! timers carrying an older generation are dropped on arrival.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use lru::LruCache;
use tracing::{debug, info, trace, warn};

use super::surface::{
    LoadTicket, MediaSurface, SurfaceEvent, SurfaceEventKind, SurfaceFactory, SurfaceMeta,
};
use super::timers::{Timer, TimerQueue};
use super::watchdog::{ResourceProbe, StuckWatchdog};
use crate::clock::Clock;
use crate::config::{PlaybackConfig, WatchdogConfig};
use crate::error::LoadError;
use crate::layout::RenderObserver;
use crate::models::{CatalogItem, LoopWindow, PlaybackState, PlaybackStatus};

/// Callback for status transitions (index, new status).
pub type StatusCallback = Box<dyn Fn(usize, PlaybackStatus) + 'static>;

struct PlaybackEntry {
    item_id: String,
    source: PathBuf,
    /// Duration the catalog already knew, used if the surface reports none.
    catalog_duration: Option<f64>,
    surface: Box<dyn MediaSurface>,
    state: PlaybackState,
    generation: u64,
    has_source: bool,
    visible: bool,
    /// Unloaded to make room for another item, not lost.
    reclaimed: bool,
    meta: Option<SurfaceMeta>,
}

impl PlaybackEntry {
    fn probe(&self) -> ResourceProbe {
        ResourceProbe {
            has_source: self.has_source,
            is_loading: self.state.status == PlaybackStatus::Loading,
            is_error: self.state.status == PlaybackStatus::Error,
            is_reclaimed: self.reclaimed,
            loading_started_at: self.state.loading_started_at,
        }
    }
}

/// Snapshot of the manager's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub entries: usize,
    pub visible: usize,
    pub unloaded: usize,
    pub loading: usize,
    pub loaded: usize,
    pub playing: usize,
    pub paused: usize,
    pub error: usize,
    pub active: usize,
    pub peak_active: usize,
    pub retries_scheduled: u64,
    pub evictions: u64,
    pub stale_events: u64,
    pub watchdog_repairs: u64,
}

pub struct VideoLifecycleManager {
    config: PlaybackConfig,
    clock: Rc<dyn Clock>,
    surfaces: Box<dyn SurfaceFactory>,
    entries: BTreeMap<usize, PlaybackEntry>,
    /// Items in loading/loaded/playing. Moves in lock-step with `recency`.
    active_count: usize,
    /// Active items, most recently active first.
    recency: LruCache<usize, ()>,
    next_generation: u64,
    timers: TimerQueue,
    watchdog: StuckWatchdog,
    events_tx: flume::Sender<SurfaceEvent>,
    events_rx: flume::Receiver<SurfaceEvent>,
    status_callbacks: Vec<StatusCallback>,
    peak_active: usize,
    retries_scheduled: u64,
    evictions: u64,
    stale_events: u64,
    shut_down: bool,
}

impl VideoLifecycleManager {
    /// Create a manager. The watchdog starts immediately.
    pub fn new(
        config: PlaybackConfig,
        watchdog: WatchdogConfig,
        clock: Rc<dyn Clock>,
        surfaces: Box<dyn SurfaceFactory>,
    ) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        let mut watchdog = StuckWatchdog::new(watchdog);
        watchdog.start(clock.now());

        debug!(
            max_active = config.max_active,
            max_retries = config.max_retries,
            "Started playback lifecycle manager"
        );

        Self {
            config,
            clock,
            surfaces,
            entries: BTreeMap::new(),
            active_count: 0,
            recency: LruCache::unbounded(),
            next_generation: 0,
            timers: TimerQueue::new(),
            watchdog,
            events_tx,
            events_rx,
            status_callbacks: Vec::new(),
            peak_active: 0,
            retries_scheduled: 0,
            evictions: 0,
            stale_events: 0,
            shut_down: false,
        }
    }

    /// Register a callback for status transitions.
    pub fn connect_status_changed<F>(&mut self, callback: F)
    where
        F: Fn(usize, PlaybackStatus) + 'static,
    {
        self.status_callbacks.push(Box::new(callback));
    }

    /// Receiver for surface events, for drivers that want to await them.
    pub fn event_receiver(&self) -> flume::Receiver<SurfaceEvent> {
        self.events_rx.clone()
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Create the (unloaded) entry for a newly materialized item.
    pub fn attach(&mut self, index: usize, item: &CatalogItem) {
        if self.shut_down {
            return;
        }
        if self.entries.contains_key(&index) {
            self.unload(index);
        }
        let surface = self.surfaces.create(item, index, self.events_tx.clone());
        self.entries.insert(
            index,
            PlaybackEntry {
                item_id: item.id.clone(),
                source: item.path.clone(),
                catalog_duration: item.duration,
                surface,
                state: PlaybackState::new(),
                generation: 0,
                has_source: false,
                visible: false,
                reclaimed: false,
                meta: None,
            },
        );
        trace!(index, id = %item.id, "Playback entry attached");
    }

    /// Release an item's surface and forget it. Cancels its pending timers.
    pub fn unload(&mut self, index: usize) {
        if !self.entries.contains_key(&index) {
            return;
        }
        self.timers.cancel_for(index);
        if let Some(entry) = self.entries.get_mut(&index) {
            entry.surface.release();
            entry.has_source = false;
            entry.state.loop_window = None;
        }
        self.set_status(index, PlaybackStatus::Unloaded);
        self.entries.remove(&index);
        trace!(index, "Playback entry released");
    }

    /// Viewport entry/exit for a materialized item.
    pub fn set_visible(&mut self, index: usize, visible: bool) {
        let Some(entry) = self.entries.get_mut(&index) else {
            return;
        };
        if entry.visible == visible {
            return;
        }
        entry.visible = visible;
        let status = entry.state.status;

        if visible {
            match status {
                PlaybackStatus::Unloaded => self.start_load(index),
                PlaybackStatus::Loaded | PlaybackStatus::Paused => self.begin_playback(index),
                _ => {}
            }
        } else if status == PlaybackStatus::Playing {
            if let Some(entry) = self.entries.get_mut(&index) {
                entry.surface.pause();
            }
            self.set_status(index, PlaybackStatus::Paused);
        }
    }

    /// Apply one surface event. Events for an older generation are dropped.
    pub fn handle_event(&mut self, event: SurfaceEvent) {
        let SurfaceEvent { ticket, kind } = event;
        let index = ticket.index;
        let Some(entry) = self.entries.get(&index) else {
            self.stale_events += 1;
            trace!(index, generation = ticket.generation, "Event for released item dropped");
            return;
        };
        if entry.generation != ticket.generation || !entry.has_source {
            self.stale_events += 1;
            trace!(
                index,
                generation = ticket.generation,
                current = entry.generation,
                "Stale surface event dropped"
            );
            return;
        }
        let status = entry.state.status;

        match kind {
            SurfaceEventKind::Loaded(meta) => {
                if status == PlaybackStatus::Loading {
                    self.on_loaded(index, meta);
                } else {
                    self.stale_events += 1;
                }
            }
            SurfaceEventKind::Failed(reason) => {
                if matches!(
                    status,
                    PlaybackStatus::Loading
                        | PlaybackStatus::Loaded
                        | PlaybackStatus::Playing
                        | PlaybackStatus::Paused
                ) {
                    self.on_failure(index, LoadError::failure(reason));
                }
            }
            SurfaceEventKind::Progress(position) => self.on_progress(index, position),
            SurfaceEventKind::Ended => self.on_ended(index),
        }
    }

    /// Drain queued surface events. Returns how many were handled.
    pub fn pump_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Fire due retry/stall timers, then run the watchdog if its sweep is due.
    pub fn tick(&mut self) {
        if self.shut_down {
            return;
        }
        let now = self.clock.now();
        while let Some(timer) = self.timers.pop_due(now) {
            self.on_timer(timer);
        }

        if self.watchdog.is_due(now) {
            let probes: Vec<(usize, ResourceProbe)> = self
                .entries
                .iter()
                .filter(|(_, entry)| entry.visible)
                .map(|(index, entry)| (*index, entry.probe()))
                .collect();
            for index in self.watchdog.sweep(now, probes) {
                info!(index, "Watchdog reloading stuck item");
                self.force_reload(index);
            }
        }
        self.resume_reclaimed();
    }

    /// Discard whatever the item is doing and load it from scratch.
    ///
    /// Resets the retry count. Returns false if the index is not materialized.
    pub fn force_reload(&mut self, index: usize) -> bool {
        if self.shut_down || !self.entries.contains_key(&index) {
            return false;
        }
        self.timers.cancel_for(index);
        let generation = self.bump_generation();
        if let Some(entry) = self.entries.get_mut(&index) {
            if entry.has_source {
                entry.surface.release();
            }
            entry.has_source = false;
            entry.generation = generation;
            entry.state.retry_count = 0;
            entry.state.loading_started_at = None;
            entry.state.loop_window = None;
            entry.state.last_error = None;
        }
        self.set_status(index, PlaybackStatus::Unloaded);
        self.start_load(index);
        true
    }

    /// Manual retry for an item in `error`.
    pub fn retry(&mut self, index: usize) -> bool {
        if self.status(index) != Some(PlaybackStatus::Error) {
            return false;
        }
        info!(index, "Manual retry");
        self.force_reload(index)
    }

    /// Whether a new load could start without reclaiming another surface.
    pub fn has_capacity(&self) -> bool {
        self.active_count < self.config.max_active
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn status(&self, index: usize) -> Option<PlaybackStatus> {
        self.entries.get(&index).map(|entry| entry.state.status)
    }

    pub fn state(&self, index: usize) -> Option<&PlaybackState> {
        self.entries.get(&index).map(|entry| &entry.state)
    }

    pub fn probe(&self, index: usize) -> Option<ResourceProbe> {
        self.entries.get(&index).map(PlaybackEntry::probe)
    }

    pub fn item_id(&self, index: usize) -> Option<&str> {
        self.entries.get(&index).map(|entry| entry.item_id.as_str())
    }

    /// Indices currently in `error`.
    pub fn errored(&self) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.state.status == PlaybackStatus::Error)
            .map(|(index, _)| *index)
            .collect()
    }

    /// Earliest instant at which `tick` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.timers.next_deadline(), self.watchdog.next_sweep()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn stats(&self) -> PlaybackStats {
        let mut stats = PlaybackStats {
            entries: self.entries.len(),
            active: self.active_count,
            peak_active: self.peak_active,
            retries_scheduled: self.retries_scheduled,
            evictions: self.evictions,
            stale_events: self.stale_events,
            watchdog_repairs: self.watchdog.repairs(),
            ..Default::default()
        };
        for entry in self.entries.values() {
            if entry.visible {
                stats.visible += 1;
            }
            match entry.state.status {
                PlaybackStatus::Unloaded => stats.unloaded += 1,
                PlaybackStatus::Loading => stats.loading += 1,
                PlaybackStatus::Loaded => stats.loaded += 1,
                PlaybackStatus::Playing => stats.playing += 1,
                PlaybackStatus::Paused => stats.paused += 1,
                PlaybackStatus::Error => stats.error += 1,
            }
        }
        stats
    }

    /// Stop the watchdog, cancel every timer and release every surface.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.watchdog.stop();
        self.timers.clear();
        let indices: Vec<usize> = self.entries.keys().copied().collect();
        for index in indices {
            self.unload(index);
        }
        while self.events_rx.try_recv().is_ok() {}
        self.shut_down = true;
        debug!(
            evictions = self.evictions,
            retries = self.retries_scheduled,
            "Playback lifecycle manager shut down"
        );
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// The single place status changes; keeps the active count and recency
    /// order in step with it.
    fn set_status(&mut self, index: usize, status: PlaybackStatus) {
        let Some(entry) = self.entries.get_mut(&index) else {
            return;
        };
        let previous = entry.state.status;
        if previous == status {
            return;
        }
        entry.state.status = status;

        match (previous.is_active(), status.is_active()) {
            (false, true) => {
                self.active_count += 1;
                self.recency.put(index, ());
                self.peak_active = self.peak_active.max(self.active_count);
            }
            (true, false) => {
                self.active_count -= 1;
                self.recency.pop(&index);
            }
            _ => {}
        }
        debug_assert_eq!(self.active_count, self.recency.len());

        debug!(
            index,
            from = previous.as_str(),
            to = status.as_str(),
            active = self.active_count,
            "Playback transition"
        );
        for callback in &self.status_callbacks {
            callback(index, status);
        }
    }

    /// Reclaim surfaces until one more item can become active.
    fn ensure_capacity(&mut self, requester: usize) {
        while self.active_count >= self.config.max_active {
            let Some(victim) = self.pick_victim(requester) else {
                warn!(index = requester, "No surface to reclaim at the decoder cap");
                break;
            };
            self.reclaim(victim);
        }
    }

    /// Reload visible items that were reclaimed, while doing so costs no
    /// other visible item its surface.
    fn resume_reclaimed(&mut self) {
        let waiting: Vec<usize> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.reclaimed
                    && entry.visible
                    && entry.state.status == PlaybackStatus::Unloaded
            })
            .map(|(index, _)| *index)
            .collect();
        for index in waiting {
            let room = self.has_capacity()
                || self
                    .pick_victim(index)
                    .is_some_and(|victim| !self.is_visible(victim));
            if !room {
                break;
            }
            debug!(index, "Resuming reclaimed item");
            self.start_load(index);
        }
    }

    fn is_visible(&self, index: usize) -> bool {
        self.entries.get(&index).is_some_and(|entry| entry.visible)
    }

    /// Least-recently-active item, preferring ones outside the viewport.
    fn pick_victim(&self, requester: usize) -> Option<usize> {
        let mut fallback = None;
        for (index, _) in self.recency.iter().rev() {
            if *index == requester {
                continue;
            }
            if !self.is_visible(*index) {
                return Some(*index);
            }
            if fallback.is_none() {
                fallback = Some(*index);
            }
        }
        fallback
    }

    fn reclaim(&mut self, index: usize) {
        self.timers.cancel_for(index);
        let generation = self.bump_generation();
        if let Some(entry) = self.entries.get_mut(&index) {
            entry.surface.release();
            entry.has_source = false;
            entry.reclaimed = true;
            entry.generation = generation;
            entry.state.loading_started_at = None;
            entry.state.loop_window = None;
        }
        self.evictions += 1;
        debug!(index, "Reclaimed least-recently-active surface");
        self.set_status(index, PlaybackStatus::Unloaded);
    }

    fn start_load(&mut self, index: usize) {
        let Some(status) = self.status(index) else {
            return;
        };
        if !status.is_active() {
            self.ensure_capacity(index);
        }

        let generation = self.bump_generation();
        let now = self.clock.now();
        let ticket = LoadTicket { index, generation };
        let Some(entry) = self.entries.get_mut(&index) else {
            return;
        };
        entry.generation = generation;
        entry.has_source = true;
        entry.reclaimed = false;
        entry.state.loading_started_at = Some(now);
        entry.state.loop_window = None;
        entry.surface.assign(&entry.source, ticket);
        let attempt = entry.state.retry_count + 1;

        self.set_status(index, PlaybackStatus::Loading);
        self.timers
            .schedule(now + self.config.stall_timeout, Timer::Stall(ticket));
        debug!(index, generation, attempt, "Load started");
    }

    fn on_loaded(&mut self, index: usize, meta: SurfaceMeta) {
        self.timers.cancel_stall(index);
        let Some(entry) = self.entries.get_mut(&index) else {
            return;
        };
        entry.state.retry_count = 0;
        entry.state.loading_started_at = None;
        entry.state.last_error = None;
        entry.meta = Some(meta);
        let visible = entry.visible;

        self.set_status(index, PlaybackStatus::Loaded);
        if visible {
            self.begin_playback(index);
        }
    }

    fn begin_playback(&mut self, index: usize) {
        let Some(status) = self.status(index) else {
            return;
        };
        if !matches!(status, PlaybackStatus::Loaded | PlaybackStatus::Paused) {
            return;
        }
        if !status.is_active() {
            self.ensure_capacity(index);
        }

        let threshold = self.config.preview_threshold;
        let span = self.config.preview_span;
        let Some(entry) = self.entries.get_mut(&index) else {
            return;
        };
        if status == PlaybackStatus::Loaded {
            let duration = entry
                .meta
                .map(|meta| meta.duration)
                .filter(|duration| *duration > 0.0)
                .or(entry.catalog_duration);
            entry.state.loop_window =
                duration.and_then(|duration| LoopWindow::for_duration(duration, threshold, span));
            let start = entry.state.loop_window.map_or(0.0, |window| window.start);
            entry.surface.seek(start);
        }
        entry.surface.play();

        self.set_status(index, PlaybackStatus::Playing);
        self.recency.promote(&index);
    }

    fn on_progress(&mut self, index: usize, position: f64) {
        let Some(entry) = self.entries.get_mut(&index) else {
            return;
        };
        if entry.state.status != PlaybackStatus::Playing {
            return;
        }
        if let Some(window) = entry.state.loop_window {
            if !window.contains(position) {
                trace!(index, position, start = window.start, "Preview loop wrap");
                entry.surface.seek(window.start);
            }
        }
    }

    fn on_ended(&mut self, index: usize) {
        let Some(entry) = self.entries.get_mut(&index) else {
            return;
        };
        if entry.state.status != PlaybackStatus::Playing {
            return;
        }
        let start = entry.state.loop_window.map_or(0.0, |window| window.start);
        entry.surface.seek(start);
        entry.surface.play();
    }

    /// Failure or stall: back off and retry, or give up after the last retry.
    fn on_failure(&mut self, index: usize, error: LoadError) {
        let Some((status, retry_count)) = self
            .entries
            .get(&index)
            .map(|entry| (entry.state.status, entry.state.retry_count))
        else {
            return;
        };
        self.timers.cancel_for(index);

        if error.is_retryable() && retry_count < self.config.max_retries {
            if !status.is_active() {
                self.ensure_capacity(index);
            }
            let attempt = retry_count + 1;
            let delay = self.config.backoff_delay(attempt);
            let generation = self.bump_generation();
            let retry_at = self.clock.now() + delay;
            if let Some(entry) = self.entries.get_mut(&index) {
                entry.surface.release();
                entry.has_source = false;
                entry.generation = generation;
                entry.state.retry_count = attempt;
                entry.state.loading_started_at = None;
                entry.state.loop_window = None;
                entry.state.last_error = Some(error.clone());
            }
            self.set_status(index, PlaybackStatus::Loading);
            self.timers
                .schedule(retry_at, Timer::Retry(LoadTicket { index, generation }));
            self.retries_scheduled += 1;
            debug!(
                index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retry scheduled"
            );
        } else {
            let exhausted = LoadError::RetriesExhausted {
                attempts: retry_count + 1,
                last: Box::new(error),
            };
            let generation = self.bump_generation();
            if let Some(entry) = self.entries.get_mut(&index) {
                entry.surface.release();
                entry.has_source = false;
                entry.generation = generation;
                entry.state.loading_started_at = None;
                entry.state.loop_window = None;
                entry.state.last_error = Some(exhausted.clone());
            }
            warn!(index, error = %exhausted, "Playback failed");
            self.set_status(index, PlaybackStatus::Error);
        }
    }

    fn on_timer(&mut self, timer: Timer) {
        let ticket = timer.ticket();
        let Some(entry) = self.entries.get(&ticket.index) else {
            return;
        };
        if entry.generation != ticket.generation || entry.state.status != PlaybackStatus::Loading {
            trace!(?timer, "Stale timer ignored");
            return;
        }

        match timer {
            Timer::Retry(_) if !entry.has_source => {
                trace!(index = ticket.index, "Retry backoff elapsed");
                self.start_load(ticket.index);
            }
            Timer::Stall(_) if entry.has_source => {
                let after = self.config.stall_timeout;
                debug!(index = ticket.index, ?after, "Load stalled");
                self.on_failure(ticket.index, LoadError::Timeout { after });
            }
            _ => trace!(?timer, "Timer no longer applies"),
        }
    }
}

impl RenderObserver for VideoLifecycleManager {
    fn on_materialize(&mut self, index: usize, item: &CatalogItem) {
        self.attach(index, item);
    }

    fn on_release(&mut self, index: usize) {
        self.unload(index);
    }

    fn on_visibility(&mut self, index: usize, visible: bool) {
        self.set_visible(index, visible);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::playback::surface::EventSink;
    use std::cell::RefCell;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Assign(LoadTicket),
        Play,
        Pause,
        Seek(f64),
        Release,
    }

    type Log = Rc<RefCell<Vec<(usize, Call)>>>;

    struct FakeSurface {
        index: usize,
        log: Log,
    }

    impl MediaSurface for FakeSurface {
        fn assign(&mut self, _source: &std::path::Path, ticket: LoadTicket) {
            self.log.borrow_mut().push((self.index, Call::Assign(ticket)));
        }

        fn play(&mut self) {
            self.log.borrow_mut().push((self.index, Call::Play));
        }

        fn pause(&mut self) {
            self.log.borrow_mut().push((self.index, Call::Pause));
        }

        fn seek(&mut self, position: f64) {
            self.log.borrow_mut().push((self.index, Call::Seek(position)));
        }

        fn release(&mut self) {
            self.log.borrow_mut().push((self.index, Call::Release));
        }
    }

    struct Harness {
        manager: VideoLifecycleManager,
        clock: ManualClock,
        log: Log,
    }

    impl Harness {
        fn new(config: PlaybackConfig, watchdog: WatchdogConfig) -> Self {
            let clock = ManualClock::new();
            let log: Log = Rc::new(RefCell::new(Vec::new()));
            let factory_log = log.clone();
            let factory = move |_: &CatalogItem, index: usize, _: EventSink| -> Box<dyn MediaSurface> {
                Box::new(FakeSurface {
                    index,
                    log: factory_log.clone(),
                })
            };
            let manager =
                VideoLifecycleManager::new(config, watchdog, Rc::new(clock.clone()), Box::new(factory));
            Self {
                manager,
                clock,
                log,
            }
        }

        fn quiet() -> Self {
            // Keep the watchdog out of the way unless a test wants it
            Self::new(
                PlaybackConfig::default(),
                WatchdogConfig {
                    interval: Duration::from_secs(3600),
                    ..Default::default()
                },
            )
        }

        fn show(&mut self, index: usize) {
            let item = CatalogItem::new(format!("v{}", index), format!("/v/{}.mp4", index));
            self.manager.attach(index, &item);
            self.manager.set_visible(index, true);
        }

        fn last_ticket(&self, index: usize) -> LoadTicket {
            self.log
                .borrow()
                .iter()
                .rev()
                .find_map(|(i, call)| match call {
                    Call::Assign(ticket) if *i == index => Some(*ticket),
                    _ => None,
                })
                .expect("no assignment recorded")
        }

        fn assign_count(&self, index: usize) -> usize {
            self.log
                .borrow()
                .iter()
                .filter(|(i, call)| *i == index && matches!(call, Call::Assign(_)))
                .count()
        }

        fn calls(&self, index: usize) -> Vec<Call> {
            self.log
                .borrow()
                .iter()
                .filter(|(i, _)| *i == index)
                .map(|(_, call)| call.clone())
                .collect()
        }

        fn load(&mut self, index: usize, duration: f64) {
            let ticket = self.last_ticket(index);
            self.manager.handle_event(SurfaceEvent::new(
                ticket,
                SurfaceEventKind::Loaded(SurfaceMeta {
                    duration,
                    width: 1920,
                    height: 1080,
                }),
            ));
        }

        fn fail(&mut self, index: usize) {
            let ticket = self.last_ticket(index);
            self.manager.handle_event(SurfaceEvent::new(
                ticket,
                SurfaceEventKind::Failed("decoder error".to_string()),
            ));
        }

        fn advance(&mut self, by: Duration) {
            self.clock.advance(by);
            self.manager.tick();
        }
    }

    #[test]
    fn test_visible_item_loads_and_plays() {
        let mut h = Harness::quiet();
        h.show(0);
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Loading));
        assert_eq!(h.manager.active_count(), 1);

        h.load(0, 3.0);
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Playing));
        let state = h.manager.state(0).unwrap();
        assert!(state.loop_window.is_none());
        assert!(state.loading_started_at.is_none());
        assert!(h.calls(0).ends_with(&[Call::Seek(0.0), Call::Play]));
    }

    #[test]
    fn test_buffered_item_waits_for_visibility() {
        let mut h = Harness::quiet();
        let item = CatalogItem::new("v0", "/v/0.mp4");
        h.manager.attach(0, &item);

        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Unloaded));
        assert_eq!(h.assign_count(0), 0);
    }

    #[test]
    fn test_preview_loop_for_long_clip() {
        let mut h = Harness::quiet();
        h.show(0);
        h.load(0, 100.0);

        let window = h.manager.state(0).unwrap().loop_window.unwrap();
        assert_eq!((window.start, window.end), (47.5, 52.5));
        assert!(h.calls(0).ends_with(&[Call::Seek(47.5), Call::Play]));

        let ticket = h.last_ticket(0);
        h.manager
            .handle_event(SurfaceEvent::new(ticket, SurfaceEventKind::Progress(50.0)));
        assert_eq!(h.calls(0).last(), Some(&Call::Play));

        h.manager
            .handle_event(SurfaceEvent::new(ticket, SurfaceEventKind::Progress(52.6)));
        assert_eq!(h.calls(0).last(), Some(&Call::Seek(47.5)));

        // A decoder that drifted before the window is pulled back too
        h.manager
            .handle_event(SurfaceEvent::new(ticket, SurfaceEventKind::Progress(10.0)));
        let seeks = h
            .calls(0)
            .iter()
            .filter(|call| **call == Call::Seek(47.5))
            .count();
        assert_eq!(seeks, 3);
    }

    #[test]
    fn test_short_clip_loops_from_start() {
        let mut h = Harness::quiet();
        h.show(0);
        h.load(0, 3.0);

        let ticket = h.last_ticket(0);
        h.manager
            .handle_event(SurfaceEvent::new(ticket, SurfaceEventKind::Ended));
        assert!(h.calls(0).ends_with(&[Call::Seek(0.0), Call::Play]));
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Playing));
    }

    #[test]
    fn test_retry_backoff_schedule() {
        let mut h = Harness::quiet();
        h.show(0);

        let mut delays = Vec::new();
        for attempt in 1..=3u32 {
            let failed_at = h.clock.now();
            h.fail(0);
            assert_eq!(h.manager.status(0), Some(PlaybackStatus::Loading));
            assert_eq!(h.manager.state(0).unwrap().retry_count, attempt);
            assert!(!h.manager.probe(0).unwrap().has_source);

            let deadlines = h.manager.timers.deadlines_for(0);
            assert_eq!(deadlines.len(), 1);
            assert!(matches!(deadlines[0].1, Timer::Retry(_)));
            let delay = deadlines[0].0 - failed_at;
            delays.push(delay.as_millis());

            // Nothing happens a millisecond early
            h.advance(delay - Duration::from_millis(1));
            assert_eq!(h.assign_count(0), attempt as usize);
            h.advance(Duration::from_millis(1));
            assert_eq!(h.assign_count(0), attempt as usize + 1);
        }
        assert_eq!(delays, vec![1000, 2000, 4000]);

        // Fourth consecutive failure is terminal
        h.fail(0);
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Error));
        assert!(h.manager.timers.is_empty());
        assert_eq!(h.manager.active_count(), 0);
        assert!(matches!(
            h.manager.state(0).unwrap().last_error,
            Some(LoadError::RetriesExhausted { attempts: 4, .. })
        ));

        // And stays there
        h.advance(Duration::from_secs(60));
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Error));
    }

    #[test]
    fn test_manual_retry_resets_count() {
        let mut h = Harness::new(
            PlaybackConfig::default().with_max_retries(0),
            WatchdogConfig::default(),
        );
        h.show(0);
        h.fail(0);
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Error));
        assert_eq!(h.manager.errored(), vec![0]);

        assert!(h.manager.retry(0));
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Loading));
        assert_eq!(h.manager.state(0).unwrap().retry_count, 0);
        assert!(h.manager.state(0).unwrap().last_error.is_none());

        // Retry only applies to errored items
        assert!(!h.manager.retry(0));
    }

    #[test]
    fn test_stall_timeout_retries() {
        let mut h = Harness::quiet();
        h.show(0);

        h.advance(Duration::from_millis(9_999));
        assert_eq!(h.manager.state(0).unwrap().retry_count, 0);

        h.advance(Duration::from_millis(1));
        let state = h.manager.state(0).unwrap();
        assert_eq!(state.retry_count, 1);
        assert!(matches!(state.last_error, Some(LoadError::Timeout { .. })));

        h.advance(Duration::from_secs(1));
        assert_eq!(h.assign_count(0), 2);
    }

    #[test]
    fn test_stale_callback_is_ignored() {
        let mut h = Harness::quiet();
        h.show(0);
        let ticket_a = h.last_ticket(0);

        // Source B replaces A while A is still in flight
        h.manager.unload(0);
        let item_b = CatalogItem::new("b", "/v/b.mp4");
        h.manager.attach(0, &item_b);
        h.manager.set_visible(0, true);
        let ticket_b = h.last_ticket(0);
        assert_ne!(ticket_a, ticket_b);

        // A's late success must not mark B loaded
        h.manager.handle_event(SurfaceEvent::new(
            ticket_a,
            SurfaceEventKind::Loaded(SurfaceMeta::default()),
        ));
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Loading));

        // B's own failure is what counts
        h.manager.handle_event(SurfaceEvent::new(
            ticket_b,
            SurfaceEventKind::Failed("missing".to_string()),
        ));
        assert_eq!(h.manager.state(0).unwrap().retry_count, 1);

        // A's late failure does not burn another retry
        h.manager.handle_event(SurfaceEvent::new(
            ticket_a,
            SurfaceEventKind::Failed("late".to_string()),
        ));
        assert_eq!(h.manager.state(0).unwrap().retry_count, 1);
        assert_eq!(h.manager.item_id(0), Some("b"));
        assert!(h.manager.stats().stale_events >= 2);
    }

    #[test]
    fn test_stale_callback_after_force_reload() {
        let mut h = Harness::quiet();
        h.show(0);
        let first = h.last_ticket(0);

        assert!(h.manager.force_reload(0));
        let second = h.last_ticket(0);
        assert!(second.generation > first.generation);

        h.manager.handle_event(SurfaceEvent::new(
            first,
            SurfaceEventKind::Failed("old".to_string()),
        ));
        assert_eq!(h.manager.state(0).unwrap().retry_count, 0);

        h.load(0, 5.0);
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Playing));
    }

    #[test]
    fn test_active_cap_never_exceeded() {
        let mut h = Harness::new(
            PlaybackConfig::default().with_max_active(3),
            WatchdogConfig::default(),
        );
        for index in 0..8 {
            h.show(index);
            assert!(h.manager.active_count() <= 3);
            if index % 2 == 0 {
                h.load(index, 10.0);
                assert!(h.manager.active_count() <= 3);
            }
        }
        // Hide some, show them again
        for index in 0..8 {
            h.manager.set_visible(index, false);
            assert!(h.manager.active_count() <= 3);
        }
        for index in (0..8).rev() {
            h.manager.set_visible(index, true);
            assert!(h.manager.active_count() <= 3);
        }
        for _ in 0..20 {
            h.advance(Duration::from_secs(1));
            assert!(h.manager.active_count() <= 3);
        }
        assert_eq!(h.manager.stats().peak_active, 3);
        assert!(h.manager.stats().evictions > 0);
    }

    #[test]
    fn test_reclaim_prefers_offscreen_items() {
        let mut h = Harness::new(
            PlaybackConfig::default().with_max_active(2),
            WatchdogConfig::default(),
        );
        h.show(0);
        h.load(0, 5.0);
        h.show(1);
        h.load(1, 5.0);
        // 1 scrolls into the buffer while still loaded and playing
        h.manager.set_visible(1, false);
        h.show(2);
        h.show(3);

        // Paused 1 holds no slot; 0 is the least recently active
        assert_eq!(h.manager.status(1), Some(PlaybackStatus::Paused));
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Unloaded));
        assert_eq!(h.manager.active_count(), 2);
    }

    #[test]
    fn test_reclaim_picks_least_recent_hidden_loaded() {
        let mut h = Harness::new(
            PlaybackConfig::default().with_max_active(2),
            WatchdogConfig::default(),
        );
        // 0 and 1 load while hidden: they stay `loaded` and hold slots
        for index in 0..2 {
            let item = CatalogItem::new(format!("v{}", index), format!("/v/{}.mp4", index));
            h.manager.attach(index, &item);
            h.manager.set_visible(index, true);
            h.manager.set_visible(index, false);
        }
        h.load(0, 5.0);
        h.load(1, 5.0);
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Loaded));
        assert_eq!(h.manager.active_count(), 2);

        h.show(2);
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Unloaded));
        assert_eq!(h.manager.status(1), Some(PlaybackStatus::Loaded));
        assert_eq!(h.manager.status(2), Some(PlaybackStatus::Loading));
    }

    #[test]
    fn test_pause_and_resume_keep_source() {
        let mut h = Harness::quiet();
        h.show(0);
        h.load(0, 30.0);
        assert_eq!(h.manager.active_count(), 1);

        h.manager.set_visible(0, false);
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Paused));
        assert_eq!(h.calls(0).last(), Some(&Call::Pause));
        assert_eq!(h.manager.active_count(), 0);
        assert!(h.manager.probe(0).unwrap().has_source);

        h.manager.set_visible(0, true);
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Playing));
        assert_eq!(h.calls(0).last(), Some(&Call::Play));
        assert_eq!(h.assign_count(0), 1);
        assert_eq!(h.manager.active_count(), 1);
    }

    #[test]
    fn test_unload_cancels_pending_retry() {
        let mut h = Harness::quiet();
        h.show(0);
        h.fail(0);
        assert_eq!(h.manager.timers.len(), 1);

        h.manager.unload(0);
        assert!(h.manager.timers.is_empty());
        assert_eq!(h.manager.active_count(), 0);
        assert!(h.manager.status(0).is_none());
        assert_eq!(h.calls(0).last(), Some(&Call::Release));

        // The retry never fires
        h.advance(Duration::from_secs(10));
        assert_eq!(h.assign_count(0), 1);
    }

    #[test]
    fn test_failure_while_playing_reenters_loading() {
        let mut h = Harness::quiet();
        h.show(0);
        h.load(0, 5.0);
        h.fail(0);

        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Loading));
        assert_eq!(h.manager.state(0).unwrap().retry_count, 1);
        assert_eq!(h.manager.active_count(), 1);
    }

    #[test]
    fn test_successful_load_clears_retries() {
        let mut h = Harness::quiet();
        h.show(0);
        h.fail(0);
        h.advance(Duration::from_secs(1));
        h.load(0, 5.0);

        let state = h.manager.state(0).unwrap();
        assert_eq!(state.retry_count, 0);
        assert!(state.last_error.is_none());
        // The stall timer for the successful attempt is gone
        assert!(h.manager.timers.is_empty());
    }

    #[test]
    fn test_watchdog_recovers_stalled_load() {
        // Long stall timeout so only the watchdog can notice
        let mut h = Harness::new(
            PlaybackConfig::default().with_stall_timeout(Duration::from_secs(60)),
            WatchdogConfig::default(),
        );
        h.show(0);
        h.clock.advance(Duration::from_secs(6));
        h.show(1);

        // t = 11s: item 0 has been loading 11s, item 1 only 5s
        h.advance(Duration::from_secs(5));
        assert_eq!(h.assign_count(0), 2);
        assert_eq!(h.assign_count(1), 1);
        assert_eq!(h.manager.state(0).unwrap().retry_count, 0);
        assert_eq!(h.manager.stats().watchdog_repairs, 1);
    }

    #[test]
    fn test_watchdog_recovers_dropped_item() {
        let mut h = Harness::new(PlaybackConfig::default(), WatchdogConfig::default());
        h.show(0);
        h.load(0, 5.0);

        // The surface loses its source without any event reaching us
        if let Some(entry) = h.manager.entries.get_mut(&0) {
            entry.surface.release();
            entry.has_source = false;
        }
        h.manager.set_status(0, PlaybackStatus::Unloaded);

        h.advance(Duration::from_secs(2));
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Loading));
        assert_eq!(h.assign_count(0), 2);
        assert_eq!(h.manager.stats().watchdog_repairs, 1);
    }

    #[test]
    fn test_reclaimed_visible_item_waits_for_a_slot() {
        let mut h = Harness::new(
            PlaybackConfig::default().with_max_active(1),
            WatchdogConfig::default(),
        );
        h.show(0);
        h.show(1);
        h.load(1, 5.0);
        // Both visible, cap of one: 0 was reclaimed for 1
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Unloaded));
        assert!(h.manager.probe(0).unwrap().is_reclaimed);

        for _ in 0..5 {
            h.advance(Duration::from_secs(2));
        }
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Unloaded));
        assert_eq!(h.manager.status(1), Some(PlaybackStatus::Playing));
        assert_eq!(h.assign_count(0), 1);
        assert_eq!(h.manager.stats().evictions, 1);
        assert_eq!(h.manager.stats().watchdog_repairs, 0);

        // 1 scrolls away and its slot goes back to 0
        h.manager.set_visible(1, false);
        h.advance(Duration::from_millis(16));
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Loading));
        assert!(!h.manager.probe(0).unwrap().is_reclaimed);
        assert_eq!(h.manager.active_count(), 1);
    }

    #[test]
    fn test_reclaimed_item_takes_offscreen_slot() {
        let mut h = Harness::new(
            PlaybackConfig::default().with_max_active(2),
            WatchdogConfig::default(),
        );
        h.show(0);
        h.show(1);
        h.show(2);
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Unloaded));

        // 1 leaves the viewport mid-load and still holds a slot
        h.manager.set_visible(1, false);
        assert_eq!(h.manager.status(1), Some(PlaybackStatus::Loading));

        h.advance(Duration::from_millis(16));
        assert_eq!(h.manager.status(0), Some(PlaybackStatus::Loading));
        assert_eq!(h.manager.status(1), Some(PlaybackStatus::Unloaded));
        assert_eq!(h.manager.status(2), Some(PlaybackStatus::Loading));
        assert_eq!(h.manager.active_count(), 2);
    }

    #[test]
    fn test_watchdog_ignores_healthy_items() {
        let mut h = Harness::new(PlaybackConfig::default(), WatchdogConfig::default());
        h.show(0);
        h.load(0, 5.0);
        h.show(1);
        // Backoff waits are not stalls
        for _ in 0..3 {
            h.fail(1);
            h.advance(Duration::from_secs(5));
        }
        // Errors are left for the user
        h.fail(1);
        assert_eq!(h.manager.status(1), Some(PlaybackStatus::Error));
        assert_eq!(h.assign_count(1), 4);

        h.advance(Duration::from_secs(2));
        h.advance(Duration::from_secs(2));
        assert_eq!(h.assign_count(0), 1);
        assert_eq!(h.assign_count(1), 4);
        assert_eq!(h.manager.stats().watchdog_repairs, 0);
    }

    #[test]
    fn test_shutdown_cancels_everything() {
        let mut h = Harness::quiet();
        h.show(0);
        h.show(1);
        h.fail(1);

        h.manager.shutdown();
        assert!(h.manager.is_shut_down());
        assert!(h.manager.timers.is_empty());
        assert!(!h.manager.watchdog.is_running());
        assert_eq!(h.manager.active_count(), 0);
        assert_eq!(h.manager.stats().entries, 0);

        h.advance(Duration::from_secs(30));
        assert_eq!(h.assign_count(1), 1);
        assert!(!h.manager.force_reload(0));
    }

    #[test]
    fn test_status_callbacks() {
        let mut h = Harness::quiet();
        let seen: Rc<RefCell<Vec<(usize, PlaybackStatus)>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        h.manager
            .connect_status_changed(move |index, status| sink.borrow_mut().push((index, status)));

        h.show(0);
        h.load(0, 5.0);
        assert_eq!(
            *seen.borrow(),
            vec![
                (0, PlaybackStatus::Loading),
                (0, PlaybackStatus::Loaded),
                (0, PlaybackStatus::Playing),
            ]
        );
    }

    #[test]
    fn test_pump_events_from_sink() {
        let clock = ManualClock::new();
        let sinks: Rc<RefCell<Vec<EventSink>>> = Rc::new(RefCell::new(Vec::new()));
        let captured = sinks.clone();
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let factory_log = log.clone();
        let factory = move |_: &CatalogItem, index: usize, sink: EventSink| -> Box<dyn MediaSurface> {
            captured.borrow_mut().push(sink);
            Box::new(FakeSurface {
                index,
                log: factory_log.clone(),
            })
        };
        let mut manager = VideoLifecycleManager::new(
            PlaybackConfig::default(),
            WatchdogConfig::default(),
            Rc::new(clock),
            Box::new(factory),
        );
        manager.attach(0, &CatalogItem::new("v0", "/v/0.mp4"));
        manager.set_visible(0, true);

        let ticket = log
            .borrow()
            .iter()
            .find_map(|(_, call)| match call {
                Call::Assign(ticket) => Some(*ticket),
                _ => None,
            })
            .unwrap();
        sinks.borrow()[0]
            .send(SurfaceEvent::new(
                ticket,
                SurfaceEventKind::Loaded(SurfaceMeta::default()),
            ))
            .unwrap();

        assert_eq!(manager.pump_events(), 1);
        assert_eq!(manager.status(0), Some(PlaybackStatus::Playing));
    }
}
