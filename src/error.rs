//! Error types for the grid core.
//!
//! Load failures are typed so the retry policy can match on them; everything
//! that merely propagates to the caller (factory failures, CLI parsing) uses
//! `anyhow`.

use std::time::Duration;

use thiserror::Error;

/// Why a playback surface failed to become ready.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// No resolution arrived within the stall window.
    #[error("load timed out after {after:?}")]
    Timeout { after: Duration },

    /// The media surface rejected the source.
    #[error("load failed: {reason}")]
    Failure { reason: String },

    /// Terminal: every retry was spent. Cleared only by a manual retry.
    #[error("gave up after {attempts} attempts (last: {last})")]
    RetriesExhausted { attempts: u32, last: Box<LoadError> },
}

impl LoadError {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    /// Whether the retry policy handles this error automatically.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::RetriesExhausted { .. })
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("columns must be at least 1")]
    ZeroColumns,

    #[error("item height must be positive, got {0}")]
    InvalidItemHeight(f32),

    #[error("gap must be non-negative, got {0}")]
    InvalidGap(f32),

    #[error("active decoder cap must be at least 1")]
    ZeroActiveCap,

    #[error("{name} must be non-zero")]
    ZeroDuration { name: &'static str },
}
