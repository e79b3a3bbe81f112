//! Cooperative timers.
//!
//! Nothing here sleeps: timers are deadlines that the owner fires from its
//! tick, in deadline order, on the same thread as every other transition.

use std::collections::BTreeMap;
use std::time::Instant;

use super::surface::LoadTicket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Backoff elapsed; reassign the source.
    Retry(LoadTicket),
    /// The load has gone unresolved for the stall window.
    Stall(LoadTicket),
}

impl Timer {
    pub fn ticket(&self) -> LoadTicket {
        match self {
            Self::Retry(ticket) | Self::Stall(ticket) => *ticket,
        }
    }
}

/// Deadline-ordered timers, cancellable per item.
#[derive(Debug, Default)]
pub struct TimerQueue {
    // Sequence number keeps insertion order for equal deadlines
    entries: BTreeMap<(Instant, u64), Timer>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant, timer: Timer) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((at, seq), timer);
    }

    /// Cancel every timer for `index`. Returns how many were dropped.
    pub fn cancel_for(&mut self, index: usize) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, timer| timer.ticket().index != index);
        before - self.entries.len()
    }

    /// Cancel only stall timers for `index`.
    pub fn cancel_stall(&mut self, index: usize) {
        self.entries
            .retain(|_, timer| !matches!(timer, Timer::Stall(t) if t.index == index));
    }

    /// Remove and return the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Timer> {
        let key = *self.entries.keys().next()?;
        if key.0 > now {
            return None;
        }
        self.entries.remove(&key)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(at, _)| *at)
    }

    /// Pending deadlines for `index`, earliest first.
    pub fn deadlines_for(&self, index: usize) -> Vec<(Instant, Timer)> {
        self.entries
            .iter()
            .filter(|(_, timer)| timer.ticket().index == index)
            .map(|((at, _), timer)| (*at, *timer))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ticket(index: usize, generation: u64) -> LoadTicket {
        LoadTicket { index, generation }
    }

    #[test]
    fn test_pop_in_deadline_order() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule(start + Duration::from_secs(2), Timer::Retry(ticket(1, 1)));
        timers.schedule(start + Duration::from_secs(1), Timer::Stall(ticket(2, 1)));
        timers.schedule(start + Duration::from_secs(1), Timer::Retry(ticket(3, 1)));

        assert_eq!(timers.pop_due(start), None);

        let now = start + Duration::from_secs(5);
        assert_eq!(timers.pop_due(now), Some(Timer::Stall(ticket(2, 1))));
        assert_eq!(timers.pop_due(now), Some(Timer::Retry(ticket(3, 1))));
        assert_eq!(timers.pop_due(now), Some(Timer::Retry(ticket(1, 1))));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancel_for_index() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule(start, Timer::Retry(ticket(1, 1)));
        timers.schedule(start, Timer::Stall(ticket(1, 2)));
        timers.schedule(start, Timer::Stall(ticket(2, 1)));

        assert_eq!(timers.cancel_for(1), 2);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.deadlines_for(2).len(), 1);
    }

    #[test]
    fn test_cancel_stall_keeps_retry() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule(start, Timer::Retry(ticket(1, 1)));
        timers.schedule(start, Timer::Stall(ticket(1, 1)));

        timers.cancel_stall(1);
        assert_eq!(timers.pop_due(start), Some(Timer::Retry(ticket(1, 1))));
        assert_eq!(timers.next_deadline(), None);
    }
}
