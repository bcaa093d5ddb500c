//! In-process simulated camera for tests and demos without hardware.
//!
//! [`SimDriver`] implements [`CameraDriver`] over a list of [`SimCamera`]
//! descriptions.  Sessions opened from it serve canned preview frames and a
//! canned photo, optionally slowed down or failing at a chosen stage, and
//! every driver call is appended to a shared [`SimRecorder`] so tests can
//! assert on call ordering.
//!
//! # Example
//!
//! ```rust
//! use tether_hal::{CameraDriver, DriverContext, SimCamera, SimDriver};
//! use tether_types::DeviceSelector;
//!
//! let driver = SimDriver::new().with_camera(SimCamera::new("Sim Camera", "usb:001,002"));
//! let recorder = driver.recorder();
//! let context = DriverContext::new(Box::new(driver));
//!
//! let info = context.resolve(&DeviceSelector::Index(0)).expect("sim camera is attached");
//! let mut session = context.open(&info).expect("sim open must succeed");
//! let mut frame = Vec::new();
//! session.capture_preview(&mut frame).expect("sim preview must succeed");
//! assert!(!frame.is_empty());
//! assert!(recorder.calls().len() >= 4);
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use tether_types::{CameraModel, ImageRef, PortInfo, TetherError};
use tracing::warn;

use crate::driver::{CameraDriver, CameraSession};

/// Folder the simulated camera "stores" captures in.
const SIM_FOLDER: &str = "/store_00010001/DCIM/100SIMCM";

// ────────────────────────────────────────────────────────────────────────────
// Call recording
// ────────────────────────────────────────────────────────────────────────────

/// One driver call observed by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    LoadAbilities,
    LoadPorts,
    Autodetect,
    Open { port: String },
    Summary,
    ConfigValue { key: String },
    CapturePreview,
    CaptureImage,
    Download { name: String },
    DeleteOnDevice { name: String },
    KeepAlive,
    Close,
}

impl SimCall {
    /// `true` for calls that move image data (preview or photo sequence).
    pub fn is_capture(&self) -> bool {
        matches!(
            self,
            SimCall::CapturePreview
                | SimCall::CaptureImage
                | SimCall::Download { .. }
                | SimCall::DeleteOnDevice { .. }
        )
    }
}

/// Shared, ordered log of every call made against a [`SimDriver`] and the
/// sessions it opened.  Clones share the same log.
///
/// Calls are recorded when they *complete*, so the log order is the order in
/// which calls returned to the caller.
#[derive(Clone, Default)]
pub struct SimRecorder {
    calls: Arc<Mutex<Vec<SimCall>>>,
}

impl SimRecorder {
    fn record(&self, call: SimCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    /// Snapshot of every recorded call, oldest first.
    pub fn calls(&self) -> Vec<SimCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded calls equal to `call`.
    pub fn count(&self, call: &SimCall) -> usize {
        self.count_where(|c| c == call)
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count_where(&self, predicate: impl Fn(&SimCall) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| predicate(c))
            .count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated camera description
// ────────────────────────────────────────────────────────────────────────────

/// Step of the photo sequence at which a simulated failure is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoStage {
    Capture,
    Download,
    Delete,
}

/// Description of one simulated camera: what it serves and how it misbehaves.
#[derive(Debug, Clone)]
pub struct SimCamera {
    model: String,
    port: String,
    serial: Option<String>,
    preview_frames: Vec<Vec<u8>>,
    photo: Vec<u8>,
    preview_delay: Duration,
    photo_delay: Duration,
    fail_preview_every: Option<usize>,
    fail_photo: Option<PhotoStage>,
    fail_open: bool,
    fail_close: bool,
}

impl SimCamera {
    /// A well-behaved camera serving four small JPEG preview frames and a
    /// 640×480 JPEG photo.
    pub fn new(model: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            port: port.into(),
            serial: Some("SIM0000001".to_string()),
            preview_frames: (0..4u8).map(|i| synthetic_jpeg(160, 120, i * 60)).collect(),
            photo: synthetic_jpeg(640, 480, 200),
            preview_delay: Duration::ZERO,
            photo_delay: Duration::ZERO,
            fail_preview_every: None,
            fail_photo: None,
            fail_open: false,
            fail_close: false,
        }
    }

    pub fn with_serial(mut self, serial: Option<&str>) -> Self {
        self.serial = serial.map(str::to_string);
        self
    }

    /// Serve exactly these preview frames, cycling.
    pub fn with_preview_frames(mut self, frames: Vec<Vec<u8>>) -> Self {
        self.preview_frames = frames;
        self
    }

    /// Serve opaque preview frames of the given sizes, cycling.  Frame `i` is
    /// filled with the byte value `i + 1`.
    pub fn with_preview_sizes(mut self, sizes: &[usize]) -> Self {
        self.preview_frames = sizes
            .iter()
            .enumerate()
            .map(|(i, &len)| vec![(i + 1) as u8; len])
            .collect();
        self
    }

    pub fn with_photo(mut self, bytes: Vec<u8>) -> Self {
        self.photo = bytes;
        self
    }

    /// Block every preview call for `delay` before answering.
    pub fn with_preview_delay(mut self, delay: Duration) -> Self {
        self.preview_delay = delay;
        self
    }

    /// Block the capture step of the photo sequence for `delay`.
    pub fn with_photo_delay(mut self, delay: Duration) -> Self {
        self.photo_delay = delay;
        self
    }

    /// Fail every `n`-th preview call (1-based); `n == 1` fails them all.
    pub fn failing_preview_every(mut self, n: usize) -> Self {
        self.fail_preview_every = Some(n.max(1));
        self
    }

    pub fn failing_photo_at(mut self, stage: PhotoStage) -> Self {
        self.fail_photo = Some(stage);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    fn summary_text(&self) -> String {
        format!(
            "Manufacturer: Simulated Optics\n\
             Model: {}\n  Version: 1.0\n  Serial Number: {}\n\
             Vendor Extension ID: 0x0 (0.0)\n\
             Capture Formats: JPEG\n\
             Display Formats: Association/Directory, JPEG\n\
             Device Capabilities:\n  File Download, File Deletion\n",
            self.model,
            self.serial.as_deref().unwrap_or("unknown"),
        )
    }
}

/// Encode a `width`×`height` gradient as JPEG.  `seed` shifts the colours so
/// successive frames differ.
pub fn synthetic_jpeg(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgb([r.wrapping_add(seed), g, seed])
    });
    let mut buf = Vec::new();
    if let Err(e) = JpegEncoder::new_with_quality(&mut buf, 80).encode_image(&img) {
        warn!(error = %e, "synthetic JPEG encode failed");
        buf.clear();
    }
    buf
}

// ────────────────────────────────────────────────────────────────────────────
// SimDriver
// ────────────────────────────────────────────────────────────────────────────

/// A [`CameraDriver`] backed by [`SimCamera`] descriptions.
///
/// Build it with [`SimDriver::new`] and the `with_*` methods, grab a
/// [`SimRecorder`] handle with [`SimDriver::recorder`], then hand the driver
/// to a [`DriverContext`][crate::context::DriverContext].
#[derive(Default)]
pub struct SimDriver {
    cameras: Vec<SimCamera>,
    recorder: SimRecorder,
}

impl SimDriver {
    /// A driver with no cameras attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a simulated camera.  Cameras are detected in attach order.
    pub fn with_camera(mut self, camera: SimCamera) -> Self {
        self.cameras.push(camera);
        self
    }

    /// Attach a default [`SimCamera`] named `"Sim Camera"` on `usb:001,002`.
    pub fn with_default_camera(self) -> Self {
        self.with_camera(SimCamera::new("Sim Camera", "usb:001,002"))
    }

    /// Handle to the shared call log.
    pub fn recorder(&self) -> SimRecorder {
        self.recorder.clone()
    }
}

impl CameraDriver for SimDriver {
    fn name(&self) -> &str {
        "sim"
    }

    fn load_abilities(&self) -> Result<Vec<CameraModel>, TetherError> {
        self.recorder.record(SimCall::LoadAbilities);
        let mut models: Vec<CameraModel> = Vec::new();
        for cam in &self.cameras {
            if !models.iter().any(|m| m.model == cam.model) {
                models.push(CameraModel {
                    model: cam.model.clone(),
                    preview: true,
                });
            }
        }
        models.push(CameraModel {
            model: "USB PTP Class Camera".to_string(),
            preview: false,
        });
        Ok(models)
    }

    fn load_ports(&self) -> Result<Vec<PortInfo>, TetherError> {
        self.recorder.record(SimCall::LoadPorts);
        let mut ports: Vec<PortInfo> = self
            .cameras
            .iter()
            .map(|cam| PortInfo {
                path: cam.port.clone(),
                name: "Universal Serial Bus".to_string(),
            })
            .collect();
        ports.push(PortInfo {
            path: "usb:".to_string(),
            name: "Universal Serial Bus".to_string(),
        });
        Ok(ports)
    }

    fn autodetect(&self) -> Result<Vec<(String, String)>, TetherError> {
        self.recorder.record(SimCall::Autodetect);
        Ok(self
            .cameras
            .iter()
            .map(|cam| (cam.model.clone(), cam.port.clone()))
            .collect())
    }

    fn open(
        &self,
        model: &CameraModel,
        port: &PortInfo,
    ) -> Result<Box<dyn CameraSession>, TetherError> {
        self.recorder.record(SimCall::Open {
            port: port.path.clone(),
        });
        let camera = self
            .cameras
            .iter()
            .find(|cam| cam.model == model.model && cam.port == port.path)
            .ok_or_else(|| TetherError::ConnectFailure {
                port: port.path.clone(),
                details: format!("no simulated '{}' attached", model.model),
            })?;
        if camera.fail_open {
            return Err(TetherError::ConnectFailure {
                port: port.path.clone(),
                details: "Could not claim the USB device".to_string(),
            });
        }
        Ok(Box::new(SimSession {
            camera: camera.clone(),
            recorder: self.recorder.clone(),
            previews: 0,
            shots: 0,
            storage: HashSet::new(),
        }))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimSession
// ────────────────────────────────────────────────────────────────────────────

struct SimSession {
    camera: SimCamera,
    recorder: SimRecorder,
    previews: usize,
    shots: usize,
    storage: HashSet<ImageRef>,
}

fn file_not_found(image: &ImageRef) -> TetherError {
    TetherError::Driver {
        code: -108,
        details: format!("File not found: {image}"),
    }
}

impl CameraSession for SimSession {
    fn summary(&mut self) -> Result<String, TetherError> {
        self.recorder.record(SimCall::Summary);
        Ok(self.camera.summary_text())
    }

    fn config_value(&mut self, key: &str) -> Result<String, TetherError> {
        self.recorder.record(SimCall::ConfigValue {
            key: key.to_string(),
        });
        match key {
            "Serial Number" | "serialnumber" => {
                self.camera.serial.clone().ok_or(TetherError::Driver {
                    code: -2,
                    details: "Bad parameters".to_string(),
                })
            }
            _ => Err(TetherError::Driver {
                code: -2,
                details: format!("lookup widget '{key}' failed"),
            }),
        }
    }

    fn capture_preview(&mut self, buf: &mut Vec<u8>) -> Result<(), TetherError> {
        if !self.camera.preview_delay.is_zero() {
            thread::sleep(self.camera.preview_delay);
        }
        self.previews += 1;
        self.recorder.record(SimCall::CapturePreview);

        if let Some(n) = self.camera.fail_preview_every
            && self.previews % n == 0
        {
            return Err(TetherError::Driver {
                code: -110,
                details: "I/O in progress".to_string(),
            });
        }
        if self.camera.preview_frames.is_empty() {
            return Err(TetherError::Driver {
                code: -6,
                details: "Unsupported operation".to_string(),
            });
        }
        let frame = &self.camera.preview_frames[(self.previews - 1) % self.camera.preview_frames.len()];
        buf.clear();
        buf.extend_from_slice(frame);
        Ok(())
    }

    fn capture_image(&mut self) -> Result<ImageRef, TetherError> {
        if !self.camera.photo_delay.is_zero() {
            thread::sleep(self.camera.photo_delay);
        }
        self.recorder.record(SimCall::CaptureImage);
        if self.camera.fail_photo == Some(PhotoStage::Capture) {
            return Err(TetherError::Driver {
                code: -1,
                details: "Unspecified error".to_string(),
            });
        }
        self.shots += 1;
        let image = ImageRef {
            folder: SIM_FOLDER.to_string(),
            name: format!("SIM_{:04}.JPG", self.shots),
        };
        self.storage.insert(image.clone());
        Ok(image)
    }

    fn download(&mut self, image: &ImageRef, buf: &mut Vec<u8>) -> Result<(), TetherError> {
        self.recorder.record(SimCall::Download {
            name: image.name.clone(),
        });
        if self.camera.fail_photo == Some(PhotoStage::Download) {
            return Err(TetherError::Driver {
                code: -7,
                details: "I/O problem".to_string(),
            });
        }
        if !self.storage.contains(image) {
            return Err(file_not_found(image));
        }
        buf.clear();
        buf.extend_from_slice(&self.camera.photo);
        Ok(())
    }

    fn delete_on_device(&mut self, image: &ImageRef) -> Result<(), TetherError> {
        self.recorder.record(SimCall::DeleteOnDevice {
            name: image.name.clone(),
        });
        if self.camera.fail_photo == Some(PhotoStage::Delete) {
            return Err(TetherError::Driver {
                code: -1,
                details: "Access denied".to_string(),
            });
        }
        if !self.storage.remove(image) {
            return Err(file_not_found(image));
        }
        Ok(())
    }

    fn keep_alive(&mut self) -> Result<(), TetherError> {
        self.recorder.record(SimCall::KeepAlive);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), TetherError> {
        self.recorder.record(SimCall::Close);
        if self.camera.fail_close {
            return Err(TetherError::Driver {
                code: -7,
                details: "Could not release USB interface".to_string(),
            });
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn open_first(driver: &SimDriver) -> Box<dyn CameraSession> {
        let (model, port) = driver.autodetect().unwrap().remove(0);
        driver
            .open(
                &CameraModel {
                    model,
                    preview: true,
                },
                &PortInfo {
                    path: port,
                    name: String::new(),
                },
            )
            .expect("sim open must succeed")
    }

    #[test]
    fn preview_cycles_through_frames() {
        let driver = SimDriver::new()
            .with_camera(SimCamera::new("Sim", "usb:001,002").with_preview_sizes(&[3, 5]));
        let mut session = open_first(&driver);
        let mut buf = Vec::new();

        session.capture_preview(&mut buf).unwrap();
        assert_eq!(buf, vec![1u8; 3]);
        session.capture_preview(&mut buf).unwrap();
        assert_eq!(buf, vec![2u8; 5]);
        session.capture_preview(&mut buf).unwrap();
        assert_eq!(buf, vec![1u8; 3]);
    }

    #[test]
    fn preview_fails_every_nth_call() {
        let driver = SimDriver::new().with_camera(
            SimCamera::new("Sim", "usb:001,002")
                .with_preview_sizes(&[4])
                .failing_preview_every(3),
        );
        let mut session = open_first(&driver);
        let mut buf = Vec::new();
        let results: Vec<bool> = (0..6).map(|_| session.capture_preview(&mut buf).is_ok()).collect();
        assert_eq!(results, vec![true, true, false, true, true, false]);
    }

    #[test]
    fn photo_sequence_downloads_then_deletes() {
        let driver = SimDriver::new()
            .with_camera(SimCamera::new("Sim", "usb:001,002").with_photo(vec![7u8; 10]));
        let recorder = driver.recorder();
        let mut session = open_first(&driver);

        let image = session.capture_image().unwrap();
        let mut buf = Vec::new();
        session.download(&image, &mut buf).unwrap();
        assert_eq!(buf, vec![7u8; 10]);
        session.delete_on_device(&image).unwrap();

        // Already gone from the device.
        assert!(session.download(&image, &mut buf).is_err());
        assert!(session.delete_on_device(&image).is_err());
        assert_eq!(recorder.count_where(SimCall::is_capture), 5);
    }

    #[test]
    fn injected_photo_failure_hits_requested_stage() {
        let driver = SimDriver::new().with_camera(
            SimCamera::new("Sim", "usb:001,002").failing_photo_at(PhotoStage::Download),
        );
        let mut session = open_first(&driver);
        let image = session.capture_image().unwrap();
        let mut buf = Vec::new();
        assert!(session.download(&image, &mut buf).is_err());
    }

    #[test]
    fn open_unknown_camera_fails() {
        let driver = SimDriver::new().with_default_camera();
        let result = driver.open(
            &CameraModel {
                model: "Nikon DSC D750".to_string(),
                preview: true,
            },
            &PortInfo {
                path: "usb:001,002".to_string(),
                name: String::new(),
            },
        );
        assert!(matches!(result, Err(TetherError::ConnectFailure { .. })));
    }

    #[test]
    fn failing_open_reports_connect_failure() {
        let driver = SimDriver::new().with_camera(SimCamera::new("Sim", "usb:001,002").failing_open());
        let (model, port) = driver.autodetect().unwrap().remove(0);
        let result = driver.open(
            &CameraModel {
                model,
                preview: true,
            },
            &PortInfo {
                path: port,
                name: String::new(),
            },
        );
        assert!(matches!(result, Err(TetherError::ConnectFailure { .. })));
    }

    #[test]
    fn serial_number_config_value() {
        let driver = SimDriver::new()
            .with_camera(SimCamera::new("Sim", "usb:001,002").with_serial(Some("ABC123")));
        let mut session = open_first(&driver);
        assert_eq!(session.config_value("Serial Number").unwrap(), "ABC123");
        assert!(session.config_value("iso").is_err());
    }

    #[test]
    fn recorder_keeps_call_order() {
        let driver = SimDriver::new().with_default_camera();
        let recorder = driver.recorder();
        let mut session = open_first(&driver);
        session.keep_alive().unwrap();
        session.close().unwrap();

        let calls = recorder.calls();
        assert_eq!(calls[0], SimCall::Autodetect);
        assert!(matches!(calls[1], SimCall::Open { .. }));
        assert_eq!(calls[2], SimCall::KeepAlive);
        assert_eq!(calls.last(), Some(&SimCall::Close));

        recorder.clear();
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn synthetic_jpeg_decodes_to_requested_size() {
        let bytes = synthetic_jpeg(32, 24, 10);
        let img = image::load_from_memory(&bytes).expect("valid jpeg");
        assert_eq!(img.width(), 32);
        assert_eq!(img.height(), 24);
    }

    #[test]
    fn summary_has_more_than_six_lines() {
        let driver = SimDriver::new().with_default_camera();
        let mut session = open_first(&driver);
        let text = session.summary().unwrap();
        assert!(text.lines().count() > 6);
        assert!(text.contains("Sim Camera"));
    }
}
