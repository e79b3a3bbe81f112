//! Tunables for layout, playback, and the watchdog.
//!
//! Defaults are the tuned production values; everything is overridable through
//! the `with_*` setters.

use std::time::Duration;

use crate::error::ConfigError;

/// Layout parameters for the windowed grid.
#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Items per row.
    pub columns: usize,
    /// Tile height in pixels.
    pub item_height: f32,
    /// Spacing between tiles, both axes.
    pub gap: f32,
    /// Extra rows materialized above and below the viewport.
    pub buffer_rows: usize,
    /// Scroll deltas smaller than this fraction of the item height do not
    /// schedule a render.
    pub min_scroll_delta_ratio: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            columns: 5,
            item_height: 200.0,
            gap: 8.0,
            buffer_rows: 2,
            min_scroll_delta_ratio: 0.5,
        }
    }
}

impl GridConfig {
    pub fn with_columns(mut self, columns: usize) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_item_height(mut self, item_height: f32) -> Self {
        self.item_height = item_height;
        self
    }

    pub fn with_gap(mut self, gap: f32) -> Self {
        self.gap = gap;
        self
    }

    pub fn with_buffer_rows(mut self, buffer_rows: usize) -> Self {
        self.buffer_rows = buffer_rows;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.columns == 0 {
            return Err(ConfigError::ZeroColumns);
        }
        if !(self.item_height > 0.0) {
            return Err(ConfigError::InvalidItemHeight(self.item_height));
        }
        if !(self.gap >= 0.0) {
            return Err(ConfigError::InvalidGap(self.gap));
        }
        Ok(())
    }
}

/// Playback lifecycle policy.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Cap on surfaces in loading/loaded/playing at once.
    pub max_active: usize,
    /// Automatic retries before an item lands in `error`.
    pub max_retries: u32,
    /// First retry delay; doubles on each further attempt.
    pub backoff_base: Duration,
    /// How long a load may go unresolved before it counts as a timeout.
    pub stall_timeout: Duration,
    /// Clips longer than this play a preview loop instead of the full clip.
    pub preview_threshold: Duration,
    /// Length of the preview loop.
    pub preview_span: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_active: 18,
            max_retries: 3,
            backoff_base: Duration::from_millis(1000),
            stall_timeout: Duration::from_secs(10),
            preview_threshold: Duration::from_secs(20),
            preview_span: Duration::from_millis(5000),
        }
    }
}

impl PlaybackConfig {
    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base...
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_active == 0 {
            return Err(ConfigError::ZeroActiveCap);
        }
        if self.stall_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "stall_timeout",
            });
        }
        if self.preview_span.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "preview_span",
            });
        }
        Ok(())
    }
}

/// Stuck-resource sweep settings.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub interval: Duration,
    /// A load older than this is considered stalled.
    pub stall_threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            stall_threshold: Duration::from_secs(10),
        }
    }
}

impl WatchdogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::ZeroDuration { name: "interval" });
        }
        if self.stall_threshold.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "stall_threshold",
            });
        }
        Ok(())
    }
}

/// Everything the engine needs, bundled.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub grid: GridConfig,
    pub playback: PlaybackConfig,
    pub watchdog: WatchdogConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        self.playback.validate()?;
        self.watchdog.validate()
    }
}
