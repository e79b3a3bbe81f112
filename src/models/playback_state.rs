use std::time::{Duration, Instant};

use crate::error::LoadError;

/// Lifecycle status of one item's playback surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackStatus {
    Unloaded,
    Loading,
    Loaded,
    Playing,
    Paused,
    Error,
}

impl PlaybackStatus {
    /// Whether this status holds a slot against the active-decoder cap.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Loading | Self::Loaded | Self::Playing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }
}

/// A repeating excerpt of a long clip, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopWindow {
    pub start: f64,
    pub end: f64,
}

impl LoopWindow {
    /// Compute the preview loop for a clip.
    ///
    /// Clips no longer than `threshold` play in full and get no window. Longer
    /// clips loop `span` seconds centred on their midpoint, clamped to the clip.
    pub fn for_duration(duration: f64, threshold: Duration, span: Duration) -> Option<Self> {
        if !duration.is_finite() || duration <= threshold.as_secs_f64() {
            return None;
        }
        let mid = duration / 2.0;
        let half = span.as_secs_f64() / 2.0;
        Some(Self {
            start: (mid - half).max(0.0),
            end: (mid + half).min(duration),
        })
    }

    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position < self.end
    }
}

/// Per-item playback bookkeeping owned by the lifecycle manager.
#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub retry_count: u32,
    /// Set when a source is assigned; cleared on resolution or while a retry
    /// is waiting out its backoff.
    pub loading_started_at: Option<Instant>,
    pub loop_window: Option<LoopWindow>,
    /// Most recent failure, kept until the next successful load.
    pub last_error: Option<LoadError>,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self {
            status: PlaybackStatus::Unloaded,
            retry_count: 0,
            loading_started_at: None,
            loop_window: None,
            last_error: None,
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: Duration = Duration::from_secs(20);
    const SPAN: Duration = Duration::from_millis(5000);

    #[test]
    fn test_active_statuses() {
        assert!(PlaybackStatus::Loading.is_active());
        assert!(PlaybackStatus::Loaded.is_active());
        assert!(PlaybackStatus::Playing.is_active());
        assert!(!PlaybackStatus::Paused.is_active());
        assert!(!PlaybackStatus::Unloaded.is_active());
        assert!(!PlaybackStatus::Error.is_active());
    }

    #[test]
    fn test_loop_window_long_clip() {
        let window = LoopWindow::for_duration(100.0, THRESHOLD, SPAN).unwrap();
        assert_eq!(window.start, 47.5);
        assert_eq!(window.end, 52.5);
        assert!(window.contains(50.0));
        assert!(!window.contains(52.5));
    }

    #[test]
    fn test_loop_window_short_clip() {
        assert!(LoopWindow::for_duration(3.0, THRESHOLD, SPAN).is_none());
        // Exactly at the threshold still plays in full
        assert!(LoopWindow::for_duration(20.0, THRESHOLD, SPAN).is_none());
    }

    #[test]
    fn test_loop_window_clamped() {
        // A span wider than the clip clamps to [0, duration]
        let window = LoopWindow::for_duration(21.0, THRESHOLD, Duration::from_secs(30)).unwrap();
        assert_eq!(window.start, 0.0);
        assert_eq!(window.end, 21.0);
    }

    #[test]
    fn test_loop_window_rejects_nan() {
        assert!(LoopWindow::for_duration(f64::NAN, THRESHOLD, SPAN).is_none());
    }
}
