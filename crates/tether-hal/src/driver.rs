//! Driver and session traits for tethered cameras.

use tether_types::{CameraModel, ImageRef, PortInfo, TetherError};

/// A camera driver backend (one per transport library).
///
/// Every call is synchronous and may block for as long as the underlying
/// transport takes.  Implementations must be shareable across threads because
/// a single [`DriverContext`][crate::context::DriverContext] serves every
/// enumerate/open call in the process.
pub trait CameraDriver: Send + Sync {
    /// Short backend name used in log output, e.g. `"sim"`.
    fn name(&self) -> &str;

    /// Load the list of camera models this backend supports.
    fn load_abilities(&self) -> Result<Vec<CameraModel>, TetherError>;

    /// Load the list of ports this backend can reach.
    fn load_ports(&self) -> Result<Vec<PortInfo>, TetherError>;

    /// Detect attached cameras, returning `(model, port path)` pairs in
    /// detection order.
    fn autodetect(&self) -> Result<Vec<(String, String)>, TetherError>;

    /// Open a session to the camera `model` attached at `port`.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::ConnectFailure`] when the device cannot be
    /// initialised.
    fn open(
        &self,
        model: &CameraModel,
        port: &PortInfo,
    ) -> Result<Box<dyn CameraSession>, TetherError>;
}

/// One open connection to a camera.
///
/// A session is owned by exactly one thread at a time: the capture loop holds
/// it while running and hands it back for teardown once it has stopped.
pub trait CameraSession: Send {
    /// Human-readable multi-line description of the camera.
    fn summary(&mut self) -> Result<String, TetherError>;

    /// Read a string-valued configuration entry by name or label
    /// (e.g. `"Serial Number"`).
    fn config_value(&mut self, key: &str) -> Result<String, TetherError>;

    /// Fetch one live-view frame.  `buf` is cleared and refilled; its
    /// allocation is reused across calls.
    fn capture_preview(&mut self, buf: &mut Vec<u8>) -> Result<(), TetherError>;

    /// Trigger a full-resolution capture and return where the camera stored it.
    fn capture_image(&mut self) -> Result<ImageRef, TetherError>;

    /// Download `image` into `buf` (cleared first).
    fn download(&mut self, image: &ImageRef, buf: &mut Vec<u8>) -> Result<(), TetherError>;

    /// Remove `image` from the camera's storage.
    fn delete_on_device(&mut self, image: &ImageRef) -> Result<(), TetherError>;

    /// Poke the camera so it does not power down during long idle previews.
    fn keep_alive(&mut self) -> Result<(), TetherError> {
        self.summary().map(|_| ())
    }

    /// Tear the session down.
    fn close(self: Box<Self>) -> Result<(), TetherError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockSession {
        summaries: usize,
    }

    impl CameraSession for MockSession {
        fn summary(&mut self) -> Result<String, TetherError> {
            self.summaries += 1;
            Ok("Model: Mock\nPort: usb:".to_string())
        }

        fn config_value(&mut self, key: &str) -> Result<String, TetherError> {
            Err(TetherError::Driver {
                code: -2,
                details: format!("no widget '{key}'"),
            })
        }

        fn capture_preview(&mut self, buf: &mut Vec<u8>) -> Result<(), TetherError> {
            buf.clear();
            buf.extend_from_slice(&[0xff, 0xd8, 0xff, 0xd9]);
            Ok(())
        }

        fn capture_image(&mut self) -> Result<ImageRef, TetherError> {
            Ok(ImageRef {
                folder: "/".to_string(),
                name: "capt0000.jpg".to_string(),
            })
        }

        fn download(&mut self, _image: &ImageRef, buf: &mut Vec<u8>) -> Result<(), TetherError> {
            buf.clear();
            buf.push(1);
            Ok(())
        }

        fn delete_on_device(&mut self, _image: &ImageRef) -> Result<(), TetherError> {
            Ok(())
        }

        fn close(self: Box<Self>) -> Result<(), TetherError> {
            Ok(())
        }
    }

    #[test]
    fn default_keep_alive_queries_summary() {
        let mut session = MockSession { summaries: 0 };
        session.keep_alive().unwrap();
        session.keep_alive().unwrap();
        assert_eq!(session.summaries, 2);
    }

    #[test]
    fn preview_reuses_caller_buffer() {
        let mut session = MockSession { summaries: 0 };
        let mut buf = vec![9u8; 64];
        session.capture_preview(&mut buf).unwrap();
        assert_eq!(buf, vec![0xff, 0xd8, 0xff, 0xd9]);
        assert!(buf.capacity() >= 64);
    }

    #[test]
    fn boxed_session_closes() {
        let session: Box<dyn CameraSession> = Box::new(MockSession { summaries: 0 });
        assert!(session.close().is_ok());
    }
}
