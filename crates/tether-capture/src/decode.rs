//! Decoding encoded camera frames into RGB pixels on the consumer side.

use image::{DynamicImage, imageops};
use tether_types::TetherError;

/// Tightly packed RGB8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes, row-major.
    pub pixels: Vec<u8>,
}

/// Turns the bytes a camera returns into pixels.
///
/// Called from the consumer thread only, never while the session lock is
/// held.
pub trait FrameDecoder: Send {
    fn decode(&mut self, bytes: &[u8]) -> Result<DecodedImage, TetherError>;
}

/// [`FrameDecoder`] backed by the `image` crate (JPEG and PNG), with an
/// optional clockwise rotation in quarter turns.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder {
    quarter_turns: u8,
}

impl ImageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rotate every decoded image by `quarter_turns × 90°` clockwise.
    pub fn with_orientation(quarter_turns: u8) -> Self {
        Self {
            quarter_turns: quarter_turns % 4,
        }
    }
}

impl FrameDecoder for ImageDecoder {
    fn decode(&mut self, bytes: &[u8]) -> Result<DecodedImage, TetherError> {
        if bytes.is_empty() {
            return Err(TetherError::Decode("empty buffer".to_string()));
        }
        let rgb = image::load_from_memory(bytes)
            .map(DynamicImage::into_rgb8)
            .map_err(|e| TetherError::Decode(e.to_string()))?;
        let rgb = match self.quarter_turns {
            1 => imageops::rotate90(&rgb),
            2 => imageops::rotate180(&rgb),
            3 => imageops::rotate270(&rgb),
            _ => rgb,
        };
        Ok(DecodedImage {
            width: rgb.width(),
            height: rgb.height(),
            pixels: rgb.into_raw(),
        })
    }
}
