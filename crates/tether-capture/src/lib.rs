//! `tether-capture` – live-view and photo capture pipeline for a tethered
//! camera.
//!
//! A background thread pulls preview frames (and, on request, full
//! photos) from a [`CameraSession`][tether_hal::CameraSession]; the consumer
//! thread drains them once per tick without blocking on the camera.  Buffers
//! change hands by swapping under one short-lived lock, never by copying.
//!
//! # Modules
//!
//! | Module | Contents |
//! |---|---|
//! | [`rate`] | [`RateEstimator`] (fps) and [`Throughput`] (fps + bytes/frame) |
//! | [`ring`] | [`FrameBuffer`] and the overwrite-on-full [`FrameRing`] |
//! | [`state`] | [`ConnectionState`], [`PhotoRequest`], read-once [`Latch`], [`SessionSnapshot`] |
//! | [`decode`] | [`FrameDecoder`] seam and the `image`-based [`ImageDecoder`] |
//! | [`config`] | [`CaptureConfig`] |
//! | `engine` | the capture thread |
//! | `exchange` | the consumer side |
//! | [`camera`] | [`TetheredCamera`], the facade tying it together |
//!
//! # Threading
//!
//! Exactly two threads touch a camera: the capture thread spawned by
//! [`TetheredCamera::setup`] and whichever thread owns the
//! [`TetheredCamera`].  [`TetheredCamera::close`] stops and joins the capture
//! thread before the driver session is closed.

pub mod camera;
pub mod config;
pub mod decode;
mod engine;
mod exchange;
pub mod rate;
pub mod ring;
pub mod state;

pub use camera::TetheredCamera;
pub use config::CaptureConfig;
pub use decode::{DecodedImage, FrameDecoder, ImageDecoder};
pub use rate::{RateEstimator, Throughput};
pub use ring::{FrameBuffer, FrameRing};
pub use state::{ConnectionState, Latch, PhotoRequest, SessionSnapshot};
