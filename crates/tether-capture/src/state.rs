//! Session state shared between the capture thread and the consumer.
//!
//! Instead of a loose set of booleans, each concern gets a small type:
//!
//! | Concern | Type |
//! |---|---|
//! | Connection lifecycle | [`ConnectionState`] |
//! | Photo request | [`PhotoRequest`] |
//! | "New frame" / "new photo" / "photo failed" events | [`Latch`] (read-once) |
//!
//! All of it, together with the [`FrameRing`] and the shared photo slot, lives
//! in one [`Shared`] value behind one mutex.  Every critical section only swaps
//! buffers and flips flags; driver I/O and decoding always happen with the
//! lock released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tether_types::TetherError;

use crate::config::CaptureConfig;
use crate::rate::Throughput;
use crate::ring::{FrameBuffer, FrameRing};

// ────────────────────────────────────────────────────────────────────────────
// Public state types
// ────────────────────────────────────────────────────────────────────────────

/// Where the camera connection is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Progress of the single outstanding photo request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoRequest {
    #[default]
    Idle,
    /// Requested by the consumer, not yet picked up by the capture loop.
    Requested,
    /// The capture loop is running the capture/download sequence.
    InFlight,
}

/// A read-once event slot.
///
/// The producer raises it (optionally with a payload); the first reader to
/// [`take`](Latch::take) it receives the event and lowers it again.
#[derive(Debug)]
pub struct Latch<T = ()> {
    value: Option<T>,
}

impl<T> Default for Latch<T> {
    fn default() -> Self {
        Self { value: None }
    }
}

impl<T> Latch<T> {
    /// Raise the latch with `value`, replacing an unread one.
    pub fn set(&mut self, value: T) {
        self.value = Some(value);
    }

    /// Read and lower the latch.
    pub fn take(&mut self) -> Option<T> {
        self.value.take()
    }

    /// Peek without lowering.
    pub fn is_raised(&self) -> bool {
        self.value.is_some()
    }

    pub fn clear(&mut self) {
        self.value = None;
    }
}

impl Latch<()> {
    pub fn raise(&mut self) {
        self.set(());
    }

    /// Read and lower; `true` at most once per [`raise`](Latch::raise).
    pub fn take_flag(&mut self) -> bool {
        self.take().is_some()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SessionState
// ────────────────────────────────────────────────────────────────────────────

pub(crate) struct SessionState {
    pub connection: ConnectionState,
    pub live_view: bool,
    pub live_data_ready: bool,
    pub frame_new: Latch,
    pub photo_request: PhotoRequest,
    pub photo_new: Latch,
    pub photo_error: Latch<TetherError>,
    pub photo_data_ready: bool,
    /// Photos published / failed since the handle was created.  A blocking
    /// request waits for one of these to move past its starting value.
    pub photos_taken: u64,
    pub photos_failed: u64,
    pub keep_alive_requested: bool,
    pub reset_interval: Duration,
    pub last_reset: Instant,
    pub throughput: Throughput,
}

impl SessionState {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            live_view: false,
            live_data_ready: false,
            frame_new: Latch::default(),
            photo_request: PhotoRequest::Idle,
            photo_new: Latch::default(),
            photo_error: Latch::default(),
            photo_data_ready: false,
            photos_taken: 0,
            photos_failed: 0,
            keep_alive_requested: false,
            reset_interval: config.reset_interval(),
            last_reset: Instant::now(),
            throughput: Throughput::new(config.fps_time_constant(), config.bytes_ema_alpha),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// Queue a photo.  Returns `false` when one is already pending.
    pub fn request_photo(&mut self) -> bool {
        if self.photo_request != PhotoRequest::Idle {
            return false;
        }
        self.photo_request = PhotoRequest::Requested;
        true
    }

    /// Move a pending request to in-flight.  Returns `false` if nothing was
    /// requested.
    pub fn begin_photo(&mut self) -> bool {
        if self.photo_request != PhotoRequest::Requested {
            return false;
        }
        self.photo_request = PhotoRequest::InFlight;
        true
    }

    pub fn keep_alive_due(&self, now: Instant) -> bool {
        self.keep_alive_requested
            || (!self.reset_interval.is_zero()
                && now.saturating_duration_since(self.last_reset) >= self.reset_interval)
    }

    pub fn keep_alive_sent(&mut self, now: Instant) {
        self.keep_alive_requested = false;
        self.last_reset = now;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared
// ────────────────────────────────────────────────────────────────────────────

/// Latest downloaded photo waiting for the consumer.
#[derive(Default)]
pub(crate) struct PhotoSlot {
    pub buffer: FrameBuffer,
    /// `buffer` holds a photo the consumer has not collected yet.
    pub fresh: bool,
}

pub(crate) struct Shared {
    pub ring: FrameRing,
    pub session: SessionState,
    pub photo: PhotoSlot,
}

/// Cloneable handle to the lock-protected [`Shared`] state.
#[derive(Clone)]
pub(crate) struct SharedHandle(Arc<Mutex<Shared>>);

impl SharedHandle {
    pub fn new(config: &CaptureConfig) -> Self {
        Self(Arc::new(Mutex::new(Shared {
            ring: FrameRing::new(config.ring_capacity),
            session: SessionState::new(config),
            photo: PhotoSlot::default(),
        })))
    }

    /// Lock the shared state.  A poisoned lock is recovered: critical
    /// sections only swap buffers and write flags, so the state is consistent
    /// even if a holder panicked.
    pub fn lock(&self) -> MutexGuard<'_, Shared> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        let shared = self.lock();
        let s = &shared.session;
        SessionSnapshot {
            connection: s.connection,
            live_view: s.live_view,
            live_data_ready: s.live_data_ready,
            photo_request: s.photo_request,
            photo_data_ready: s.photo_data_ready,
            photos_taken: s.photos_taken,
            photos_failed: s.photos_failed,
            frame_rate: s.throughput.frame_rate(now),
            bytes_per_frame: s.throughput.bytes_per_frame(),
            bandwidth: s.throughput.bandwidth(now),
            frames_captured: s.throughput.frames(),
            queued_frames: shared.ring.len(),
            dropped_frames: shared.ring.evicted(),
        }
    }
}

/// Point-in-time copy of the session state, taken under one lock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub live_view: bool,
    pub live_data_ready: bool,
    pub photo_request: PhotoRequest,
    pub photo_data_ready: bool,
    pub photos_taken: u64,
    pub photos_failed: u64,
    /// Live-view frames per second.
    pub frame_rate: f32,
    pub bytes_per_frame: f32,
    /// Live-view bytes per second.
    pub bandwidth: f32,
    pub frames_captured: u64,
    pub queued_frames: usize,
    pub dropped_frames: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_is_read_once() {
        let mut latch = Latch::default();
        assert!(!latch.take_flag());
        latch.raise();
        latch.raise();
        assert!(latch.is_raised());
        assert!(latch.take_flag());
        assert!(!latch.take_flag());
    }

    #[test]
    fn latch_carries_payload() {
        let mut latch: Latch<TetherError> = Latch::default();
        latch.set(TetherError::NoPhoto);
        assert_eq!(latch.take(), Some(TetherError::NoPhoto));
        assert_eq!(latch.take(), None);
    }

    #[test]
    fn only_one_photo_request_at_a_time() {
        let mut state = SessionState::new(&CaptureConfig::default());
        assert!(!state.begin_photo());
        assert!(state.request_photo());
        assert!(!state.request_photo());
        assert!(state.begin_photo());
        assert_eq!(state.photo_request, PhotoRequest::InFlight);
        assert!(!state.request_photo());
    }

    #[test]
    fn keep_alive_due_after_interval_or_request() {
        let config = CaptureConfig {
            reset_interval_minutes: 1.0,
            ..CaptureConfig::default()
        };
        let mut state = SessionState::new(&config);
        let start = state.last_reset;
        assert!(!state.keep_alive_due(start + Duration::from_secs(59)));
        assert!(state.keep_alive_due(start + Duration::from_secs(60)));

        state.keep_alive_sent(start + Duration::from_secs(60));
        assert!(!state.keep_alive_due(start + Duration::from_secs(61)));
        state.keep_alive_requested = true;
        assert!(state.keep_alive_due(start + Duration::from_secs(61)));
    }

    #[test]
    fn zero_interval_never_due_on_its_own() {
        let config = CaptureConfig {
            reset_interval_minutes: 0.0,
            ..CaptureConfig::default()
        };
        let state = SessionState::new(&config);
        assert!(!state.keep_alive_due(state.last_reset + Duration::from_secs(86_400)));
    }

    #[test]
    fn snapshot_reflects_state() {
        let shared = SharedHandle::new(&CaptureConfig::default());
        {
            let mut guard = shared.lock();
            guard.session.connection = ConnectionState::Connected;
            guard.session.live_view = true;
        }
        let snap = shared.snapshot(Instant::now());
        assert_eq!(snap.connection, ConnectionState::Connected);
        assert!(snap.live_view);
        assert_eq!(snap.frame_rate, 0.0);
        assert_eq!(snap.queued_frames, 0);
    }
}
