use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A camera found by driver autodetection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Position in the autodetect list; stable only for one enumeration.
    pub id: usize,
    /// Driver model name, e.g. "Canon EOS 5D Mark III".
    pub name: String,
    /// Port path, e.g. "usb:001,004".
    pub port: String,
    /// Filled in once a session has been opened and the camera reported it.
    pub serial_number: Option<String>,
}

/// One entry of the driver's ability (supported model) list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraModel {
    pub model: String,
    /// Whether the model supports preview capture at all.
    pub preview: bool,
}

/// One entry of the driver's port list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Path with its transport prefix, e.g. "usb:001,004" or "serial:/dev/ttyS0".
    pub path: String,
    pub name: String,
}

/// Location of a captured image on the device's storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub folder: String,
    pub name: String,
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.folder.trim_end_matches('/'), self.name)
    }
}

/// How the caller picks a camera at setup time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceSelector {
    Index(usize),
    Name(String),
}

impl Default for DeviceSelector {
    fn default() -> Self {
        DeviceSelector::Index(0)
    }
}

impl From<usize> for DeviceSelector {
    fn from(index: usize) -> Self {
        DeviceSelector::Index(index)
    }
}

impl From<&str> for DeviceSelector {
    fn from(name: &str) -> Self {
        DeviceSelector::Name(name.to_string())
    }
}

impl From<String> for DeviceSelector {
    fn from(name: String) -> Self {
        DeviceSelector::Name(name)
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSelector::Index(i) => write!(f, "#{i}"),
            DeviceSelector::Name(n) => write!(f, "'{n}'"),
        }
    }
}

/// Error type shared by the driver seam, the capture engine and the consumer API.
///
/// Driver failures inside the capture loop are logged and recovered locally;
/// only connection setup (and explicit consumer calls such as saving a photo)
/// hand these back to the caller.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TetherError {
    #[error("No camera matching {query} was found")]
    DeviceNotFound { query: String },

    #[error("Could not connect to camera on {port}: {details}")]
    ConnectFailure { port: String, details: String },

    #[error("Preview capture failed: {details}")]
    TransientCaptureFailure { details: String },

    #[error("Photo capture failed during {stage}: {details}")]
    PhotoCaptureFailure { stage: String, details: String },

    #[error("Camera disconnection error: {details}")]
    DisconnectFailure { details: String },

    #[error("Camera is not connected")]
    NotConnected,

    #[error("No photo has been captured yet")]
    NoPhoto,

    #[error("Image decode error: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Driver error {code}: {details}")]
    Driver { code: i32, details: String },

    #[error("Invalid capture configuration: {0}")]
    InvalidConfig(String),
}

impl From<std::io::Error> for TetherError {
    fn from(e: std::io::Error) -> Self {
        TetherError::Io(e.to_string())
    }
}
