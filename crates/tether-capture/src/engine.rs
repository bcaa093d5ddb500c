//! [`CaptureEngine`] – the background capture loop.
//!
//! The engine owns one OS thread that repeatedly runs a *tick*:
//!
//! 1. Read the session flags under the lock (one short critical section).
//! 2. Send a keep-alive if one is due.
//! 3. If a photo is requested, run capture → download → delete and publish
//!    the photo.  Live view is skipped for that tick.
//! 4. Otherwise, if live view is on, fetch one preview frame and push it into
//!    the ring.
//!
//! Driver calls always run with the lock released.  The stop flag is checked
//! again right before each new driver operation, so once stop is signalled
//! only a driver call that had already started (or the rest of a started
//! photo sequence) can still run.  The thread owns the [`CameraSession`]
//! outright and returns it through its [`JoinHandle`], so the session can
//! only be closed once the loop has stopped: no driver call can race with
//! teardown.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tether_hal::CameraSession;
use tether_types::TetherError;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::CaptureConfig;
use crate::ring::FrameBuffer;
use crate::state::{PhotoRequest, SharedHandle};

// ────────────────────────────────────────────────────────────────────────────
// CaptureEngine
// ────────────────────────────────────────────────────────────────────────────

/// Handle to a running capture thread.
pub(crate) struct CaptureEngine {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Box<dyn CameraSession>>>,
    session_id: Uuid,
}

impl CaptureEngine {
    /// Spawn the capture thread for `session`.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Io`] if the OS refuses to spawn the thread.  The
    /// session is dropped without being closed in that case.
    pub fn start(
        session: Box<dyn CameraSession>,
        shared: SharedHandle,
        config: &CaptureConfig,
        session_id: Uuid,
    ) -> Result<Self, TetherError> {
        let stop = Arc::new(AtomicBool::new(false));
        let worker = CaptureWorker::new(session, shared, Arc::clone(&stop), session_id);
        let poll = config.poll_interval();
        let handle = thread::Builder::new()
            .name("tether-capture".to_string())
            .spawn(move || worker.run(poll))?;
        Ok(Self {
            stop,
            handle: Some(handle),
            session_id,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Ask the loop to exit after its current tick without waiting.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop the loop and wait for it to exit, returning the session for
    /// teardown.  An in-flight driver call runs to completion first.
    ///
    /// Returns `None` if the capture thread panicked; the session was dropped
    /// with it.
    pub fn stop(mut self) -> Option<Box<dyn CameraSession>> {
        self.signal_stop();
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(session) => Some(session),
            Err(_) => {
                error!(session = %self.session_id, "capture thread panicked");
                None
            }
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CaptureWorker
// ────────────────────────────────────────────────────────────────────────────

/// What one tick of the loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// Nothing to do (disconnected, stopping, or live view off and no
    /// photo pending).
    Idle,
    Preview,
    PreviewMissed,
    Photo,
    PhotoFailed,
}

/// State owned by the capture thread.
pub(crate) struct CaptureWorker {
    session: Box<dyn CameraSession>,
    shared: SharedHandle,
    stop: Arc<AtomicBool>,
    /// Producer-owned buffer the next preview frame is written into.
    back: FrameBuffer,
    /// Producer-owned buffer the next photo is downloaded into.
    photo_back: FrameBuffer,
    miss_streak: u32,
    session_id: Uuid,
}

fn photo_failure(stage: &str, err: TetherError) -> TetherError {
    TetherError::PhotoCaptureFailure {
        stage: stage.to_string(),
        details: err.to_string(),
    }
}

impl CaptureWorker {
    pub fn new(
        session: Box<dyn CameraSession>,
        shared: SharedHandle,
        stop: Arc<AtomicBool>,
        session_id: Uuid,
    ) -> Self {
        Self {
            session,
            shared,
            stop,
            back: FrameBuffer::new(),
            photo_back: FrameBuffer::new(),
            miss_streak: 0,
            session_id,
        }
    }

    fn run(mut self, poll: Duration) -> Box<dyn CameraSession> {
        let span = info_span!("capture_loop", session = %self.session_id);
        let _enter = span.enter();
        info!(poll_ms = poll.as_millis() as u64, "capture loop started");

        let mut ticks: u64 = 0;
        while !self.stopping() {
            self.tick();
            ticks += 1;
            thread::sleep(poll);
        }

        info!(ticks, "capture loop stopped");
        self.session
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Run one loop iteration.
    pub fn tick(&mut self) -> TickOutcome {
        let now = Instant::now();
        let (connected, keep_alive, live_view, photo) = {
            let shared = self.shared.lock();
            let s = &shared.session;
            (
                s.is_connected(),
                s.keep_alive_due(now),
                s.live_view,
                s.photo_request == PhotoRequest::Requested,
            )
        };
        if !connected || self.stopping() {
            return TickOutcome::Idle;
        }

        if keep_alive {
            self.send_keep_alive();
        }

        // close() may have begun since the flags were read.
        if self.stopping() || !self.shared.lock().session.is_connected() {
            return TickOutcome::Idle;
        }
        if photo {
            self.take_photo()
        } else if live_view {
            self.fetch_preview()
        } else {
            TickOutcome::Idle
        }
    }

    fn send_keep_alive(&mut self) {
        match self.session.keep_alive() {
            Ok(()) => debug!("keep-alive sent"),
            Err(e) => warn!(error = %e, "keep-alive failed"),
        }
        self.shared.lock().session.keep_alive_sent(Instant::now());
    }

    fn fetch_preview(&mut self) -> TickOutcome {
        let result = match self.session.capture_preview(self.back.bytes_mut()) {
            Ok(()) if self.back.is_empty() => Err(TetherError::TransientCaptureFailure {
                details: "camera returned an empty preview frame".to_string(),
            }),
            Ok(()) => Ok(self.back.len()),
            Err(e) => Err(TetherError::TransientCaptureFailure {
                details: e.to_string(),
            }),
        };

        match result {
            Ok(size) => {
                {
                    let mut shared = self.shared.lock();
                    let shared = &mut *shared;
                    shared.session.throughput.record(size, Instant::now());
                    shared.ring.push(&mut self.back);
                }
                if self.miss_streak > 0 {
                    info!(missed = self.miss_streak, "live view recovered");
                    self.miss_streak = 0;
                }
                TickOutcome::Preview
            }
            Err(e) => {
                self.miss_streak += 1;
                if self.miss_streak == 1 {
                    warn!(error = %e, "preview frame missed");
                } else {
                    debug!(error = %e, streak = self.miss_streak, "preview frame missed");
                }
                TickOutcome::PreviewMissed
            }
        }
    }

    fn take_photo(&mut self) -> TickOutcome {
        if !self.shared.lock().session.begin_photo() {
            return TickOutcome::Idle;
        }
        info!("taking photo");
        let started = Instant::now();
        let result = self.shoot();

        let outcome = {
            let mut shared = self.shared.lock();
            let shared = &mut *shared;
            shared.session.photo_request = PhotoRequest::Idle;
            match &result {
                Ok(_) => {
                    mem::swap(&mut shared.photo.buffer, &mut self.photo_back);
                    shared.photo.fresh = true;
                    shared.session.photos_taken += 1;
                    shared.session.photo_data_ready = true;
                    shared.session.photo_new.raise();
                    TickOutcome::Photo
                }
                Err(e) => {
                    shared.session.photos_failed += 1;
                    shared.session.photo_error.set(e.clone());
                    TickOutcome::PhotoFailed
                }
            }
        };

        match result {
            Ok(bytes) => info!(bytes, elapsed_ms = started.elapsed().as_millis() as u64, "photo ready"),
            Err(e) => error!(error = %e, "photo capture failed"),
        }
        outcome
    }

    /// Capture, download and delete, all outside the lock.  Returns the
    /// photo size on success.
    fn shoot(&mut self) -> Result<usize, TetherError> {
        let image = self
            .session
            .capture_image()
            .map_err(|e| photo_failure("capture", e))?;
        debug!(image = %image, "photo captured on device");

        self.session
            .download(&image, self.photo_back.bytes_mut())
            .map_err(|e| photo_failure("download", e))?;
        if self.photo_back.is_empty() {
            return Err(photo_failure(
                "download",
                TetherError::Decode(format!("{image} is empty")),
            ));
        }

        if let Err(e) = self.session.delete_on_device(&image) {
            warn!(image = %image, error = %e, "could not delete photo from camera");
        }
        Ok(self.photo_back.len())
    }
}
