//! Tunables for the capture loop and the consumer side.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_types::TetherError;

/// Configuration for a [`TetheredCamera`][crate::TetheredCamera].
///
/// Every field has a default, so a partial TOML/JSON table deserialises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Live-view frames buffered between producer and consumer.  With 1 the
    /// consumer always sees the newest frame; larger values absorb consumer
    /// stalls at the cost of latency.
    pub ring_capacity: usize,
    /// Sleep between capture-loop iterations, independent of camera fps.
    pub poll_interval_ms: u64,
    /// Sleep between checks while `take_photo(true)` waits.
    pub photo_poll_interval_ms: u64,
    /// Send a keep-alive this often so the camera does not power down.
    /// `0` disables the periodic keep-alive.
    pub reset_interval_minutes: f32,
    /// Start live view as soon as the camera connects.
    pub live_view_on_connect: bool,
    /// Smoothing factor for the bytes-per-frame moving average.
    pub bytes_ema_alpha: f32,
    /// Time constant of the frame-rate estimator.
    pub fps_time_constant_ms: u64,
    /// Clockwise quarter turns applied to decoded images (0-3).
    pub orientation: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1,
            poll_interval_ms: 5,
            photo_poll_interval_ms: 10,
            reset_interval_minutes: 15.0,
            live_view_on_connect: true,
            bytes_ema_alpha: 0.01,
            fps_time_constant_ms: 250,
            orientation: 0,
        }
    }
}

impl CaptureConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn photo_poll_interval(&self) -> Duration {
        Duration::from_millis(self.photo_poll_interval_ms)
    }

    pub fn fps_time_constant(&self) -> Duration {
        Duration::from_millis(self.fps_time_constant_ms)
    }

    /// `Duration::ZERO` when the periodic keep-alive is disabled.  An
    /// interval too large for a `Duration` saturates to `Duration::MAX`.
    pub fn reset_interval(&self) -> Duration {
        let minutes = self.reset_interval_minutes;
        if minutes.is_nan() || minutes <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f32(minutes * 60.0).unwrap_or(Duration::MAX)
    }

    /// Reject values the capture loop cannot run with.
    pub fn validate(&self) -> Result<(), TetherError> {
        if self.ring_capacity == 0 {
            return Err(TetherError::InvalidConfig(
                "ring_capacity must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 || self.photo_poll_interval_ms == 0 {
            return Err(TetherError::InvalidConfig(
                "poll intervals must be positive".to_string(),
            ));
        }
        if !(self.bytes_ema_alpha > 0.0 && self.bytes_ema_alpha <= 1.0) {
            return Err(TetherError::InvalidConfig(format!(
                "bytes_ema_alpha must be in (0, 1], got {}",
                self.bytes_ema_alpha
            )));
        }
        if !self.reset_interval_minutes.is_finite() || self.reset_interval_minutes < 0.0 {
            return Err(TetherError::InvalidConfig(
                "reset_interval_minutes must be a non-negative number".to_string(),
            ));
        }
        if Duration::try_from_secs_f32(self.reset_interval_minutes * 60.0).is_err() {
            return Err(TetherError::InvalidConfig(format!(
                "reset_interval_minutes is too large, got {}",
                self.reset_interval_minutes
            )));
        }
        if self.orientation > 3 {
            return Err(TetherError::InvalidConfig(format!(
                "orientation must be 0-3 quarter turns, got {}",
                self.orientation
            )));
        }
        Ok(())
    }
}
