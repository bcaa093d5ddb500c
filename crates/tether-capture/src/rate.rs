//! [`RateEstimator`] and [`Throughput`] – live-view fps and bandwidth.
//!
//! # Algorithm
//!
//! The estimator smooths the *period* between ticks rather than the
//! instantaneous rate, so symmetric jitter around a steady period averages
//! out instead of biasing the result upward.  Each new period sample is
//! blended in with a weight that depends on how much time it covers:
//!
//! ```text
//! α      = 1 − e^(−dt / τ)
//! period = period + α · (dt − period)
//! rate   = 1 / max(period, time since last tick)
//! ```
//!
//! With the default τ = 250 ms a sustained rate change is tracked to within a
//! few percent in under a second.  The `max` term makes the reported rate
//! fall toward zero when ticks stop arriving.
//!
//! # Example
//!
//! ```rust
//! use std::time::{Duration, Instant};
//! use tether_capture::rate::RateEstimator;
//!
//! let mut fps = RateEstimator::new(Duration::from_millis(250));
//! let start = Instant::now();
//! for i in 0..60 {
//!     fps.tick_at(start + Duration::from_millis(i * 20));
//! }
//! let last = start + Duration::from_millis(59 * 20);
//! assert!((fps.rate_at(last) - 50.0).abs() < 0.5);
//! ```

use std::time::{Duration, Instant};

// ─────────────────────────────────────────────────────────────────────────────
// RateEstimator
// ─────────────────────────────────────────────────────────────────────────────

/// Smoothed events-per-second estimate.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    time_constant: Duration,
    last_tick: Option<Instant>,
    /// Smoothed seconds between ticks; `None` until two ticks were seen.
    period: Option<f32>,
}

impl RateEstimator {
    pub fn new(time_constant: Duration) -> Self {
        Self {
            time_constant,
            last_tick: None,
            period: None,
        }
    }

    /// Record one event now.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Record one event at `now`.
    pub fn tick_at(&mut self, now: Instant) {
        if let Some(last) = self.last_tick {
            let dt = now.saturating_duration_since(last).as_secs_f32();
            if dt > 0.0 {
                self.period = Some(match self.period {
                    None => dt,
                    Some(period) => period + self.weight(dt) * (dt - period),
                });
            }
        }
        self.last_tick = Some(now);
    }

    /// Events per second as of now.
    pub fn rate(&self) -> f32 {
        self.rate_at(Instant::now())
    }

    /// Events per second as of `now`; `0.0` before two ticks were recorded.
    pub fn rate_at(&self, now: Instant) -> f32 {
        let (Some(last), Some(period)) = (self.last_tick, self.period) else {
            return 0.0;
        };
        let since = now.saturating_duration_since(last).as_secs_f32();
        let effective = period.max(since);
        if effective > 0.0 { 1.0 / effective } else { 0.0 }
    }

    /// Forget all history.
    pub fn reset(&mut self) {
        self.last_tick = None;
        self.period = None;
    }

    fn weight(&self, dt: f32) -> f32 {
        let tau = self.time_constant.as_secs_f32();
        if tau <= 0.0 {
            1.0
        } else {
            1.0 - (-dt / tau).exp()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Throughput
// ─────────────────────────────────────────────────────────────────────────────

fn lerp(from: f32, to: f32, t: f32) -> f32 {
    from + (to - from) * t
}

/// Frame rate plus an exponential moving average of frame size.
#[derive(Debug, Clone)]
pub struct Throughput {
    fps: RateEstimator,
    bytes_per_frame: f32,
    alpha: f32,
    frames: u64,
}

impl Throughput {
    /// `alpha` weights each new frame size in the bytes-per-frame average.
    pub fn new(time_constant: Duration, alpha: f32) -> Self {
        Self {
            fps: RateEstimator::new(time_constant),
            bytes_per_frame: 0.0,
            alpha,
            frames: 0,
        }
    }

    /// Record a successfully fetched frame of `size` bytes at `now`.
    ///
    /// The first frame seeds the average directly.
    pub fn record(&mut self, size: usize, now: Instant) {
        self.fps.tick_at(now);
        let size = size as f32;
        self.bytes_per_frame = if self.frames == 0 {
            size
        } else {
            lerp(self.bytes_per_frame, size, self.alpha)
        };
        self.frames += 1;
    }

    pub fn frame_rate(&self, now: Instant) -> f32 {
        self.fps.rate_at(now)
    }

    pub fn bytes_per_frame(&self) -> f32 {
        self.bytes_per_frame
    }

    /// Bytes per second: smoothed frame size times frame rate.
    pub fn bandwidth(&self, now: Instant) -> f32 {
        self.bytes_per_frame * self.fps.rate_at(now)
    }

    /// Frames recorded since creation or the last reset.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn reset(&mut self) {
        self.fps.reset();
        self.bytes_per_frame = 0.0;
        self.frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAU: Duration = Duration::from_millis(250);

    /// Tick at `hz` for `seconds`, returning the instant of the last tick.
    fn drive(est: &mut RateEstimator, start: Instant, hz: f32, seconds: f32) -> Instant {
        let n = (hz * seconds) as u32;
        let step = Duration::from_secs_f32(1.0 / hz);
        let mut now = start;
        for _ in 0..n {
            now += step;
            est.tick_at(now);
        }
        now
    }

    #[test]
    fn no_rate_before_two_ticks() {
        let mut est = RateEstimator::new(TAU);
        let t0 = Instant::now();
        assert_eq!(est.rate_at(t0), 0.0);
        est.tick_at(t0);
        assert_eq!(est.rate_at(t0), 0.0);
    }

    #[test]
    fn converges_to_steady_rate() {
        let mut est = RateEstimator::new(TAU);
        let last = drive(&mut est, Instant::now(), 30.0, 3.0);
        assert!((est.rate_at(last) - 30.0).abs() < 0.3, "rate {}", est.rate_at(last));
    }

    #[test]
    fn tracks_rate_change_within_one_second() {
        let mut est = RateEstimator::new(TAU);
        let t = drive(&mut est, Instant::now(), 60.0, 2.0);
        let t = drive(&mut est, t, 20.0, 1.0);
        let rate = est.rate_at(t);
        assert!((rate - 20.0).abs() < 1.0, "rate {rate}");
    }

    #[test]
    fn stable_under_jitter() {
        let mut est = RateEstimator::new(TAU);
        let mut now = Instant::now();
        for i in 0..400 {
            now += if i % 2 == 0 {
                Duration::from_millis(8)
            } else {
                Duration::from_millis(12)
            };
            est.tick_at(now);
        }
        let rate = est.rate_at(now);
        assert!((rate - 100.0).abs() < 3.0, "rate {rate}");
    }

    #[test]
    fn stalled_stream_decays() {
        let mut est = RateEstimator::new(TAU);
        let last = drive(&mut est, Instant::now(), 50.0, 1.0);
        let later = last + Duration::from_secs(2);
        assert!(est.rate_at(later) <= 0.5 + f32::EPSILON);
    }

    #[test]
    fn duplicate_instants_are_ignored() {
        let mut est = RateEstimator::new(TAU);
        let t0 = Instant::now();
        est.tick_at(t0);
        est.tick_at(t0);
        assert_eq!(est.rate_at(t0), 0.0);
        est.tick_at(t0 + Duration::from_millis(100));
        assert!((est.rate_at(t0 + Duration::from_millis(100)) - 10.0).abs() < 0.01);
    }

    #[test]
    fn reset_clears_history() {
        let mut est = RateEstimator::new(TAU);
        let last = drive(&mut est, Instant::now(), 30.0, 1.0);
        est.reset();
        assert_eq!(est.rate_at(last), 0.0);
    }

    #[test]
    fn throughput_converges_to_rate_times_size() {
        let mut tp = Throughput::new(TAU, 0.01);
        let step = Duration::from_millis(40); // 25 fps
        let mut now = Instant::now();
        for _ in 0..250 {
            now += step;
            tp.record(4096, now);
        }
        assert!((tp.frame_rate(now) - 25.0).abs() < 0.25);
        assert!((tp.bandwidth(now) - 25.0 * 4096.0).abs() < 25.0 * 4096.0 * 0.01);
        assert_eq!(tp.frames(), 250);
    }

    #[test]
    fn bytes_per_frame_is_slow_moving_average() {
        let mut tp = Throughput::new(TAU, 0.01);
        let t0 = Instant::now();
        tp.record(1000, t0);
        assert_eq!(tp.bytes_per_frame(), 1000.0);
        tp.record(2000, t0 + Duration::from_millis(10));
        assert!((tp.bytes_per_frame() - 1010.0).abs() < 1e-3);
    }

    #[test]
    fn throughput_reset() {
        let mut tp = Throughput::new(TAU, 0.5);
        tp.record(10, Instant::now());
        tp.reset();
        assert_eq!(tp.frames(), 0);
        assert_eq!(tp.bytes_per_frame(), 0.0);
    }
}
