//! `tether-hal` – the camera driver seam.
//!
//! Everything that actually talks to a tethered camera lives behind two
//! traits.  The capture core never sees transport details; it only calls the
//! synchronous, fallible operations defined here.
//!
//! # Modules
//!
//! - [`driver`] – [`CameraDriver`][driver::CameraDriver] (enumeration and
//!   opening) and [`CameraSession`][driver::CameraSession] (one open
//!   connection: preview, capture, download, delete, summary).
//! - [`context`] – [`DriverContext`][context::DriverContext]: owns a driver
//!   plus its lazily loaded ability and port lists, and resolves a
//!   [`DeviceSelector`][tether_types::DeviceSelector] to an open session.
//! - [`sim`] – [`SimDriver`][sim::SimDriver]: an in-process simulated camera
//!   with call recording and failure injection, for tests and demos that run
//!   without hardware.

pub mod context;
pub mod driver;
pub mod sim;

pub use context::DriverContext;
pub use driver::{CameraDriver, CameraSession};
pub use sim::{PhotoStage, SimCall, SimCamera, SimDriver, SimRecorder};
