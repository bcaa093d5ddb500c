//! [`DriverContext`] – the single owner of driver-wide lookup state.
//!
//! Opening a camera needs the driver's ability list (which models it knows)
//! and port list (which transports it can reach).  Both are expensive to load
//! and never change while the process runs, so the context loads each one on
//! first use and serves every later `enumerate`/`open` call from that cache.
//! Callers share one context by reference (or `Arc`) instead of relying on
//! hidden globals.

use std::sync::OnceLock;

use tether_types::{CameraInfo, CameraModel, DeviceSelector, PortInfo, TetherError};
use tracing::{debug, error, info, warn};

use crate::driver::{CameraDriver, CameraSession};

/// A camera driver plus its lazily loaded ability and port lists.
pub struct DriverContext {
    driver: Box<dyn CameraDriver>,
    abilities: OnceLock<Vec<CameraModel>>,
    ports: OnceLock<Vec<PortInfo>>,
}

impl DriverContext {
    pub fn new(driver: Box<dyn CameraDriver>) -> Self {
        Self {
            driver,
            abilities: OnceLock::new(),
            ports: OnceLock::new(),
        }
    }

    /// Backend name of the wrapped driver.
    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Supported camera models, loaded on first call.
    pub fn abilities(&self) -> Result<&[CameraModel], TetherError> {
        if let Some(list) = self.abilities.get() {
            return Ok(list);
        }
        let loaded = self.driver.load_abilities()?;
        debug!(driver = self.driver.name(), count = loaded.len(), "loaded camera abilities");
        Ok(self.abilities.get_or_init(|| loaded))
    }

    /// Reachable ports, loaded on first call.
    pub fn ports(&self) -> Result<&[PortInfo], TetherError> {
        if let Some(list) = self.ports.get() {
            return Ok(list);
        }
        let loaded = self.driver.load_ports()?;
        debug!(driver = self.driver.name(), count = loaded.len(), "loaded port list");
        Ok(self.ports.get_or_init(|| loaded))
    }

    /// List attached cameras in detection order.  An empty list is not an
    /// error.
    pub fn enumerate(&self) -> Result<Vec<CameraInfo>, TetherError> {
        let detected = self.driver.autodetect()?;
        if detected.is_empty() {
            info!("No cameras detected");
        } else {
            info!(count = detected.len(), "Number of cameras");
        }
        Ok(detected
            .into_iter()
            .enumerate()
            .map(|(id, (name, port))| CameraInfo {
                id,
                name,
                port,
                serial_number: None,
            })
            .collect())
    }

    /// Pick one attached camera.
    ///
    /// An index past the end of the list, or a name that matches nothing,
    /// falls back to the first camera with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::DeviceNotFound`] when no camera is attached.
    pub fn resolve(&self, selector: &DeviceSelector) -> Result<CameraInfo, TetherError> {
        let mut devices = self.enumerate()?;
        if devices.is_empty() {
            return Err(TetherError::DeviceNotFound {
                query: selector.to_string(),
            });
        }
        let index = match selector {
            DeviceSelector::Index(i) if *i < devices.len() => *i,
            DeviceSelector::Index(i) => {
                warn!(requested = i, available = devices.len(), "Camera id not available, taking ID 0");
                0
            }
            DeviceSelector::Name(name) => match devices.iter().position(|d| &d.name == name) {
                Some(i) => i,
                None => {
                    warn!(device = %name, "device not found, using device with ID 0");
                    0
                }
            },
        };
        Ok(devices.swap_remove(index))
    }

    /// Open a session to `info`, validating its model and port against the
    /// cached driver lists first.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::ConnectFailure`] for an unknown model or port, or
    /// whatever the driver reports while initialising the device.
    pub fn open(&self, info: &CameraInfo) -> Result<Box<dyn CameraSession>, TetherError> {
        let model = self
            .abilities()?
            .iter()
            .find(|m| m.model == info.name)
            .ok_or_else(|| TetherError::ConnectFailure {
                port: info.port.clone(),
                details: format!("unknown camera model '{}'", info.name),
            })?;

        let port = match self.ports()?.iter().find(|p| p.path == info.port) {
            Some(port) => port,
            None => {
                error!(
                    port = %info.port,
                    "The port you specified can not be found; use a port path reported by the driver, \
                     including its 'serial:' or 'usb:' prefix"
                );
                return Err(TetherError::ConnectFailure {
                    port: info.port.clone(),
                    details: "unknown port".to_string(),
                });
            }
        };

        self.driver.open(model, port)
    }
}
