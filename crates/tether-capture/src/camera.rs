//! [`TetheredCamera`] – the consumer-facing facade.
//!
//! Ties together a [`DriverContext`], the shared session state, the capture
//! thread and the consumer-side [`FrameExchange`].  Typical use from a render
//! or update loop:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_capture::{CaptureConfig, TetheredCamera};
//! use tether_hal::{DriverContext, SimDriver};
//!
//! # fn main() -> Result<(), tether_types::TetherError> {
//! let context = Arc::new(DriverContext::new(Box::new(SimDriver::new().with_default_camera())));
//! let mut camera = TetheredCamera::new(context, CaptureConfig::default())?;
//! camera.setup(0usize)?;
//!
//! loop {
//!     camera.update();
//!     if camera.is_frame_new() {
//!         let _pixels = camera.live_pixels();
//!     }
//!     if camera.is_photo_new() {
//!         camera.save_photo("photo.jpg")?;
//!         break;
//!     }
//! #   camera.take_photo(false)?;
//! }
//!
//! camera.close();
//! # Ok(())
//! # }
//! ```
//!
//! A camera must be [`close`](TetheredCamera::close)d before it is dropped.
//! Dropping a connected camera stops the loop but cannot close the driver
//! session cleanly, and trips an assertion in debug builds.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tether_hal::DriverContext;
use tether_types::{CameraInfo, DeviceSelector, TetherError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::CaptureConfig;
use crate::decode::{DecodedImage, FrameDecoder};
use crate::engine::CaptureEngine;
use crate::exchange::FrameExchange;
use crate::state::{ConnectionState, PhotoRequest, SessionSnapshot, SharedHandle};

/// Lines of the camera summary logged on connect.
const SUMMARY_LINES: usize = 6;

/// One tethered camera: connection lifecycle, live view and photos.
pub struct TetheredCamera {
    context: Arc<DriverContext>,
    config: CaptureConfig,
    shared: SharedHandle,
    exchange: FrameExchange,
    engine: Option<CaptureEngine>,
    info: Option<CameraInfo>,
}

impl TetheredCamera {
    /// # Errors
    ///
    /// [`TetherError::InvalidConfig`] if `config` does not validate.
    pub fn new(context: Arc<DriverContext>, config: CaptureConfig) -> Result<Self, TetherError> {
        config.validate()?;
        let shared = SharedHandle::new(&config);
        let exchange = FrameExchange::new(shared.clone(), &config);
        Ok(Self {
            context,
            config,
            shared,
            exchange,
            engine: None,
            info: None,
        })
    }

    /// Use `decoder` for live frames and photos; `None` keeps raw bytes only.
    pub fn with_decoder(mut self, decoder: Option<Box<dyn FrameDecoder>>) -> Self {
        self.exchange.set_decoder(decoder);
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Cameras currently attached, in detection order.
    pub fn list_devices(&self) -> Result<Vec<CameraInfo>, TetherError> {
        self.context.enumerate()
    }

    // ────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ────────────────────────────────────────────────────────────────────────

    /// Connect to the camera picked by `selector` and start the capture loop.
    /// An already open connection is closed first.
    ///
    /// # Errors
    ///
    /// [`TetherError::DeviceNotFound`] when no camera is attached, otherwise
    /// [`TetherError::ConnectFailure`].  The camera stays disconnected on
    /// error; there is no retry.
    pub fn setup(&mut self, selector: impl Into<DeviceSelector>) -> Result<(), TetherError> {
        let selector = selector.into();
        if self.engine.is_some() {
            self.close();
        }

        {
            let mut shared = self.shared.lock();
            shared.session.connection = ConnectionState::Connecting;
            shared.ring.clear();
        }

        match self.connect(&selector) {
            Ok(info) => {
                info!(camera = %info.name, port = %info.port, "camera connected");
                self.info = Some(info);
                Ok(())
            }
            Err(e) => {
                error!(device = %selector, error = %e, "could not connect to camera");
                self.shared.lock().session.connection = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn connect(&mut self, selector: &DeviceSelector) -> Result<CameraInfo, TetherError> {
        let mut info = self.context.resolve(selector)?;
        let mut session = self.context.open(&info).map_err(|e| match e {
            e @ TetherError::ConnectFailure { .. } => e,
            other => TetherError::ConnectFailure {
                port: info.port.clone(),
                details: other.to_string(),
            },
        })?;

        match session.summary() {
            Ok(text) => {
                for line in text.lines().take(SUMMARY_LINES) {
                    info!("{}", line.trim_end());
                }
            }
            Err(e) => warn!(error = %e, "camera summary unavailable"),
        }
        match session.config_value("Serial Number") {
            Ok(serial) => info.serial_number = Some(serial),
            Err(e) => debug!(error = %e, "serial number unavailable"),
        }

        {
            let mut shared = self.shared.lock();
            let session = &mut shared.session;
            session.connection = ConnectionState::Connected;
            session.live_view = self.config.live_view_on_connect;
            session.photo_request = PhotoRequest::Idle;
            session.keep_alive_requested = false;
            session.last_reset = Instant::now();
            session.throughput.reset();
        }

        let session_id = Uuid::new_v4();
        let engine = CaptureEngine::start(session, self.shared.clone(), &self.config, session_id)
            .map_err(|e| TetherError::ConnectFailure {
                port: info.port.clone(),
                details: e.to_string(),
            })?;
        debug!(session = %engine.session_id(), "capture engine started");
        self.engine = Some(engine);
        Ok(info)
    }

    /// Stop the capture loop, wait for it, then close the driver session.
    ///
    /// Always leaves the camera disconnected.  A failing driver close is
    /// logged as [`TetherError::DisconnectFailure`].  No-op when not
    /// connected.
    pub fn close(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        {
            let mut shared = self.shared.lock();
            shared.session.connection = ConnectionState::Disconnecting;
            shared.session.live_view = false;
        }

        let session_id = engine.session_id();
        if let Some(session) = engine.stop()
            && let Err(e) = session.close()
        {
            let err = TetherError::DisconnectFailure {
                details: e.to_string(),
            };
            error!(session = %session_id, error = %err, "camera did not close cleanly");
        }

        {
            let mut shared = self.shared.lock();
            shared.session.connection = ConnectionState::Disconnected;
            shared.session.photo_request = PhotoRequest::Idle;
        }
        if let Some(info) = self.info.take() {
            info!(camera = %info.name, "camera disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().session.is_connected()
    }

    /// The connected camera, including its serial number when the driver
    /// reported one.
    pub fn camera_info(&self) -> Option<&CameraInfo> {
        self.info.as_ref()
    }

    // ────────────────────────────────────────────────────────────────────────
    // Per-tick consumer API
    // ────────────────────────────────────────────────────────────────────────

    /// Drain at most one frame into the front buffer and decode it.
    pub fn update(&mut self) {
        if self.is_connected() {
            self.exchange.drain_frame();
        }
    }

    /// `true` once per frame drained by [`update`](Self::update).
    pub fn is_frame_new(&self) -> bool {
        self.exchange.is_frame_new()
    }

    /// `true` once per completed photo.
    pub fn is_photo_new(&mut self) -> bool {
        self.exchange.is_photo_new()
    }

    pub fn set_live_view(&self, enabled: bool) {
        self.shared.lock().session.live_view = enabled;
        debug!(enabled, "live view toggled");
    }

    pub fn is_live_view(&self) -> bool {
        self.shared.lock().session.live_view
    }

    /// At least one live frame has been delivered.
    pub fn is_live_data_ready(&self) -> bool {
        self.shared.lock().session.live_data_ready
    }

    /// At least one photo has been delivered.
    pub fn is_photo_data_ready(&self) -> bool {
        self.shared.lock().session.photo_data_ready
    }

    pub fn frame_rate(&self) -> f32 {
        self.exchange.frame_rate()
    }

    /// Live-view bytes per second.
    pub fn bandwidth(&self) -> f32 {
        self.exchange.bandwidth()
    }

    pub fn width(&self) -> u32 {
        self.exchange.width()
    }

    pub fn height(&self) -> u32 {
        self.exchange.height()
    }

    pub fn live_bytes(&self) -> &[u8] {
        self.exchange.live_bytes()
    }

    pub fn live_pixels(&self) -> Option<&DecodedImage> {
        self.exchange.live_pixels()
    }

    pub fn frame_sequence(&self) -> u64 {
        self.exchange.frame_sequence()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.exchange.dropped_frames()
    }

    pub fn status(&self) -> SessionSnapshot {
        self.shared.snapshot(Instant::now())
    }

    /// Ask the loop to poke the camera on its next iteration.
    pub fn send_keep_alive(&self) {
        self.shared.lock().session.keep_alive_requested = true;
    }

    // ────────────────────────────────────────────────────────────────────────
    // Photos
    // ────────────────────────────────────────────────────────────────────────

    /// Request a full-resolution photo.  Live view pauses for the duration of
    /// the capture and resumes by itself.
    ///
    /// With `blocking`, waits until [`is_photo_new`](Self::is_photo_new)
    /// would return `true`.  There is no timeout.
    ///
    /// # Errors
    ///
    /// [`TetherError::NotConnected`] when disconnected; with `blocking`, the
    /// [`TetherError::PhotoCaptureFailure`] of a failed photo.
    pub fn take_photo(&self, blocking: bool) -> Result<(), TetherError> {
        self.exchange.request_photo(blocking)
    }

    /// The error of the most recent failed photo, once.
    pub fn take_photo_error(&self) -> Option<TetherError> {
        self.exchange.take_photo_error()
    }

    pub fn photo_bytes(&mut self) -> Result<&[u8], TetherError> {
        self.exchange.photo_bytes()
    }

    pub fn photo_pixels(&mut self) -> Result<&DecodedImage, TetherError> {
        self.exchange.photo_pixels()
    }

    /// `true` once after each new photo, for renderers that cache textures.
    pub fn take_photo_updated(&mut self) -> bool {
        self.exchange.take_photo_updated()
    }

    /// Write the latest photo, exactly as the camera produced it, to `path`.
    pub fn save_photo(&mut self, path: impl AsRef<Path>) -> Result<(), TetherError> {
        self.exchange.save_photo(path.as_ref())
    }
}

impl Drop for TetheredCamera {
    fn drop(&mut self) {
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        error!(
            session = %engine.session_id(),
            "TetheredCamera dropped while connected; call close() first"
        );
        engine.signal_stop();
        if cfg!(debug_assertions) && !std::thread::panicking() {
            panic!("TetheredCamera dropped while connected; call close() before dropping it");
        }
    }
}
