//! [`FrameExchange`] – the consumer side of the pipeline.
//!
//! Owned by the thread that renders or otherwise consumes frames.  It holds
//! the *front* buffers (live frame and photo), pulls new ones out of the
//! shared state with O(1) swaps, and decodes them after the lock has been
//! released.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tether_types::TetherError;
use tracing::{debug, info};

use crate::config::CaptureConfig;
use crate::decode::{DecodedImage, FrameDecoder, ImageDecoder};
use crate::ring::FrameBuffer;
use crate::state::{Shared, SharedHandle};

/// Swap a freshly published photo out of the shared slot into `front`.
/// Returns `true` if there was one.
fn collect_photo(shared: &mut Shared, front: &mut FrameBuffer) -> bool {
    if !shared.photo.fresh {
        return false;
    }
    std::mem::swap(&mut shared.photo.buffer, front);
    shared.photo.fresh = false;
    true
}

pub(crate) struct FrameExchange {
    shared: SharedHandle,
    front: FrameBuffer,
    photo_front: FrameBuffer,
    decoder: Option<Box<dyn FrameDecoder>>,
    live_pixels: Option<DecodedImage>,
    photo_pixels: Option<DecodedImage>,
    photo_collected: bool,
    photo_needs_decode: bool,
    photo_needs_upload: bool,
    photo_poll_interval: Duration,
}

impl FrameExchange {
    pub fn new(shared: SharedHandle, config: &CaptureConfig) -> Self {
        Self {
            shared,
            front: FrameBuffer::new(),
            photo_front: FrameBuffer::new(),
            decoder: Some(Box::new(ImageDecoder::with_orientation(config.orientation))),
            live_pixels: None,
            photo_pixels: None,
            photo_collected: false,
            photo_needs_decode: false,
            photo_needs_upload: false,
            photo_poll_interval: config.photo_poll_interval(),
        }
    }

    /// Replace the decoder; `None` disables decoding entirely (raw bytes
    /// only).
    pub fn set_decoder(&mut self, decoder: Option<Box<dyn FrameDecoder>>) {
        self.decoder = decoder;
    }

    // ── live view ───────────────────────────────────────────────────────────

    /// Move the oldest queued frame into the front buffer and decode it.
    /// Returns `false` when no frame was waiting.
    pub fn drain_frame(&mut self) -> bool {
        let popped = {
            let mut shared = self.shared.lock();
            let shared = &mut *shared;
            let popped = shared.ring.pop(&mut self.front);
            if popped {
                shared.session.live_data_ready = true;
                shared.session.frame_new.raise();
            }
            popped
        };
        if popped {
            self.decode_live();
        }
        popped
    }

    fn decode_live(&mut self) {
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        match decoder.decode(self.front.bytes()) {
            Ok(image) => self.live_pixels = Some(image),
            Err(e) => debug!(sequence = self.front.sequence(), error = %e, "live frame not decodable"),
        }
    }

    /// `true` once per drained frame.
    pub fn is_frame_new(&self) -> bool {
        self.shared.lock().session.frame_new.take_flag()
    }

    pub fn frame_rate(&self) -> f32 {
        self.shared
            .lock()
            .session
            .throughput
            .frame_rate(Instant::now())
    }

    /// Live-view bytes per second.
    pub fn bandwidth(&self) -> f32 {
        self.shared
            .lock()
            .session
            .throughput
            .bandwidth(Instant::now())
    }

    /// Width of the last decoded live frame, `0` before the first one.
    pub fn width(&self) -> u32 {
        self.live_pixels.as_ref().map_or(0, |img| img.width)
    }

    pub fn height(&self) -> u32 {
        self.live_pixels.as_ref().map_or(0, |img| img.height)
    }

    /// Encoded bytes of the current front frame.
    pub fn live_bytes(&self) -> &[u8] {
        self.front.bytes()
    }

    pub fn live_pixels(&self) -> Option<&DecodedImage> {
        self.live_pixels.as_ref()
    }

    /// Ring sequence number of the current front frame.
    pub fn frame_sequence(&self) -> u64 {
        self.front.sequence()
    }

    /// Frames the ring overwrote before they could be drained.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.lock().ring.evicted()
    }

    // ── photos ──────────────────────────────────────────────────────────────

    /// Queue a photo.  With `blocking`, the call waits until a photo
    /// published after this call is observable, or until it has failed.
    /// Events the consumer has not read yet stay pending.
    ///
    /// # Errors
    ///
    /// [`TetherError::NotConnected`] if the camera is not connected (or
    /// disconnects while waiting); the photo's [`TetherError::PhotoCaptureFailure`]
    /// when a blocking request fails.
    pub fn request_photo(&self, blocking: bool) -> Result<(), TetherError> {
        let (taken, failed) = {
            let mut shared = self.shared.lock();
            let session = &mut shared.session;
            if !session.is_connected() {
                return Err(TetherError::NotConnected);
            }
            if !session.request_photo() {
                debug!("photo already pending, request merged");
            }
            (session.photos_taken, session.photos_failed)
        };
        if blocking { self.wait_for_photo(taken, failed) } else { Ok(()) }
    }

    /// Poll until the photo counters move past `taken`/`failed`.  `photo_new`
    /// is left raised so that [`is_photo_new`](Self::is_photo_new) still
    /// reports the photo afterwards.  No timeout: a hung driver call blocks
    /// this call too.
    fn wait_for_photo(&self, taken: u64, failed: u64) -> Result<(), TetherError> {
        loop {
            {
                let mut shared = self.shared.lock();
                let session = &mut shared.session;
                if session.photos_taken > taken {
                    return Ok(());
                }
                if session.photos_failed > failed {
                    return Err(session.photo_error.take().unwrap_or_else(|| {
                        TetherError::PhotoCaptureFailure {
                            stage: "capture".to_string(),
                            details: "photo failed".to_string(),
                        }
                    }));
                }
                if !session.is_connected() {
                    return Err(TetherError::NotConnected);
                }
            }
            thread::sleep(self.photo_poll_interval);
        }
    }

    /// `true` once per published photo.  The photo is collected into the
    /// consumer's buffer in the same critical section.
    pub fn is_photo_new(&mut self) -> bool {
        let (new, collected) = {
            let mut shared = self.shared.lock();
            let new = shared.session.photo_new.take_flag();
            let collected = collect_photo(&mut shared, &mut self.photo_front);
            (new, collected)
        };
        if collected {
            self.mark_collected();
        }
        new
    }

    /// The error of the last failed photo, once.
    pub fn take_photo_error(&self) -> Option<TetherError> {
        self.shared.lock().session.photo_error.take()
    }

    fn collect(&mut self) {
        let collected = collect_photo(&mut self.shared.lock(), &mut self.photo_front);
        if collected {
            self.mark_collected();
        }
    }

    fn mark_collected(&mut self) {
        self.photo_collected = true;
        self.photo_needs_decode = true;
        self.photo_needs_upload = true;
    }

    /// Raw bytes of the latest photo exactly as the camera returned them.
    ///
    /// # Errors
    ///
    /// [`TetherError::NoPhoto`] before the first photo arrived.
    pub fn photo_bytes(&mut self) -> Result<&[u8], TetherError> {
        self.collect();
        if !self.photo_collected {
            return Err(TetherError::NoPhoto);
        }
        Ok(self.photo_front.bytes())
    }

    /// Decoded pixels of the latest photo, decoded on first access.
    ///
    /// # Errors
    ///
    /// [`TetherError::NoPhoto`] before the first photo arrived,
    /// [`TetherError::Decode`] if it cannot be decoded or decoding is off.
    pub fn photo_pixels(&mut self) -> Result<&DecodedImage, TetherError> {
        self.collect();
        if !self.photo_collected {
            return Err(TetherError::NoPhoto);
        }
        if self.photo_needs_decode || self.photo_pixels.is_none() {
            let decoder = self
                .decoder
                .as_mut()
                .ok_or_else(|| TetherError::Decode("no decoder configured".to_string()))?;
            let image = decoder.decode(self.photo_front.bytes())?;
            debug!(width = image.width, height = image.height, "photo decoded");
            self.photo_pixels = Some(image);
            self.photo_needs_decode = false;
        }
        self.photo_pixels.as_ref().ok_or(TetherError::NoPhoto)
    }

    /// `true` once after each new photo: pixels changed and need re-upload.
    pub fn take_photo_updated(&mut self) -> bool {
        self.collect();
        std::mem::take(&mut self.photo_needs_upload)
    }

    /// Write the raw photo bytes to `path` without re-encoding.
    ///
    /// # Errors
    ///
    /// [`TetherError::NoPhoto`] before the first photo, [`TetherError::Io`]
    /// if the file cannot be written.
    pub fn save_photo(&mut self, path: &Path) -> Result<(), TetherError> {
        let bytes = self.photo_bytes()?;
        fs::write(path, bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), "photo saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionState;
    use tether_hal::sim::synthetic_jpeg;

    fn exchange(capacity: usize) -> (FrameExchange, SharedHandle) {
        let config = CaptureConfig {
            ring_capacity: capacity,
            photo_poll_interval_ms: 1,
            ..CaptureConfig::default()
        };
        let shared = SharedHandle::new(&config);
        shared.lock().session.connection = ConnectionState::Connected;
        (FrameExchange::new(shared.clone(), &config), shared)
    }

    fn push(shared: &SharedHandle, back: &mut FrameBuffer, bytes: &[u8]) {
        back.bytes_mut().clear();
        back.bytes_mut().extend_from_slice(bytes);
        shared.lock().ring.push(back);
    }

    fn publish_photo(shared: &SharedHandle, bytes: &[u8]) {
        let mut guard = shared.lock();
        let guard = &mut *guard;
        guard.photo.buffer.bytes_mut().clear();
        guard.photo.buffer.bytes_mut().extend_from_slice(bytes);
        guard.photo.fresh = true;
        guard.session.photo_data_ready = true;
        guard.session.photos_taken += 1;
        guard.session.photo_new.raise();
    }

    /// Answer the next photo request from a background thread, once it is
    /// in flight, with `bytes`.
    fn answer_next_request(shared: &SharedHandle, bytes: &'static [u8]) -> thread::JoinHandle<()> {
        let shared = shared.clone();
        thread::spawn(move || {
            loop {
                {
                    let mut guard = shared.lock();
                    if guard.session.begin_photo() {
                        guard.session.photo_request = crate::state::PhotoRequest::Idle;
                        drop(guard);
                        publish_photo(&shared, bytes);
                        return;
                    }
                }
                thread::sleep(Duration::from_millis(1));
            }
        })
    }

    #[test]
    fn drain_yields_newest_of_three_pushes() {
        let (mut ex, shared) = exchange(1);
        ex.set_decoder(None);
        let mut back = FrameBuffer::new();
        for len in [100, 200, 150] {
            push(&shared, &mut back, &vec![1u8; len]);
        }

        assert!(ex.drain_frame());
        assert_eq!(ex.live_bytes().len(), 150);
        assert!(!ex.drain_frame());
        assert_eq!(ex.live_bytes().len(), 150);
        assert_eq!(ex.dropped_frames(), 2);
        assert_eq!(ex.frame_sequence(), 3);
    }

    #[test]
    fn frame_new_is_read_once() {
        let (mut ex, shared) = exchange(1);
        ex.set_decoder(None);
        assert!(!ex.is_frame_new());

        let mut back = FrameBuffer::new();
        push(&shared, &mut back, &[1, 2, 3]);
        assert!(!ex.is_frame_new());
        assert!(ex.drain_frame());
        assert!(ex.is_frame_new());
        assert!(!ex.is_frame_new());
        assert!(shared.lock().session.live_data_ready);
    }

    #[test]
    fn drained_jpeg_is_decoded() {
        let (mut ex, shared) = exchange(1);
        assert_eq!((ex.width(), ex.height()), (0, 0));
        let mut back = FrameBuffer::new();
        push(&shared, &mut back, &synthetic_jpeg(64, 48, 1));
        assert!(ex.drain_frame());
        assert_eq!((ex.width(), ex.height()), (64, 48));
        assert!(ex.live_pixels().is_some());
    }

    #[test]
    fn undecodable_frame_keeps_previous_pixels() {
        let (mut ex, shared) = exchange(1);
        let mut back = FrameBuffer::new();
        push(&shared, &mut back, &synthetic_jpeg(64, 48, 1));
        ex.drain_frame();
        push(&shared, &mut back, &[0u8; 16]);
        assert!(ex.drain_frame());
        assert_eq!(ex.live_bytes(), &[0u8; 16]);
        assert_eq!(ex.width(), 64);
    }

    #[test]
    fn photo_new_is_read_once_and_collects() {
        let (mut ex, shared) = exchange(1);
        assert!(matches!(ex.photo_bytes(), Err(TetherError::NoPhoto)));

        publish_photo(&shared, &[9, 9, 9]);
        assert!(ex.is_photo_new());
        assert!(!ex.is_photo_new());
        assert!(!shared.lock().photo.fresh);
        assert_eq!(ex.photo_bytes().unwrap(), &[9, 9, 9]);
        assert!(ex.take_photo_updated());
        assert!(!ex.take_photo_updated());
    }

    #[test]
    fn photo_pixels_decoded_lazily() {
        let (mut ex, shared) = exchange(1);
        publish_photo(&shared, &synthetic_jpeg(80, 60, 3));
        let img = ex.photo_pixels().unwrap();
        assert_eq!((img.width, img.height), (80, 60));

        ex.set_decoder(None);
        publish_photo(&shared, &synthetic_jpeg(40, 30, 3));
        assert!(matches!(ex.photo_pixels(), Err(TetherError::Decode(_))));
    }

    #[test]
    fn request_requires_connection() {
        let (ex, shared) = exchange(1);
        shared.lock().session.connection = ConnectionState::Disconnected;
        assert_eq!(ex.request_photo(false), Err(TetherError::NotConnected));
        assert_eq!(ex.request_photo(true), Err(TetherError::NotConnected));
    }

    fn fail_next_request(shared: &SharedHandle) -> thread::JoinHandle<()> {
        let shared = shared.clone();
        thread::spawn(move || {
            loop {
                {
                    let mut guard = shared.lock();
                    if guard.session.begin_photo() {
                        guard.session.photo_request = crate::state::PhotoRequest::Idle;
                        guard.session.photos_failed += 1;
                        guard.session.photo_error.set(TetherError::PhotoCaptureFailure {
                            stage: "capture".to_string(),
                            details: "busy".to_string(),
                        });
                        return;
                    }
                }
                thread::sleep(Duration::from_millis(1));
            }
        })
    }

    #[test]
    fn blocking_request_returns_error_of_failed_photo() {
        let (ex, shared) = exchange(1);
        let producer = fail_next_request(&shared);
        let result = ex.request_photo(true);
        producer.join().unwrap();
        assert!(matches!(result, Err(TetherError::PhotoCaptureFailure { .. })));
        assert_eq!(ex.take_photo_error(), None);
    }

    #[test]
    fn failed_blocking_request_leaves_unread_photo_reportable() {
        let (mut ex, shared) = exchange(1);
        publish_photo(&shared, b"first");

        let producer = fail_next_request(&shared);
        assert!(ex.request_photo(true).is_err());
        producer.join().unwrap();

        assert!(ex.is_photo_new());
        assert_eq!(ex.photo_bytes().unwrap(), b"first");
    }

    #[test]
    fn blocking_request_waits_past_unread_photo() {
        let (mut ex, shared) = exchange(1);
        publish_photo(&shared, b"first");

        let producer = answer_next_request(&shared, b"second");
        ex.request_photo(true).unwrap();
        producer.join().unwrap();

        assert!(ex.is_photo_new());
        assert!(!ex.is_photo_new());
        assert_eq!(ex.photo_bytes().unwrap(), b"second");
    }

    #[test]
    fn blocking_request_keeps_unread_events() {
        let (mut ex, shared) = exchange(1);
        let stale = TetherError::PhotoCaptureFailure {
            stage: "capture".to_string(),
            details: "earlier shot".to_string(),
        };
        shared.lock().session.photo_error.set(stale.clone());

        let producer = answer_next_request(&shared, b"fresh");
        ex.request_photo(true).unwrap();
        producer.join().unwrap();

        assert_eq!(ex.take_photo_error(), Some(stale));
        assert!(ex.is_photo_new());
    }

    #[test]
    fn save_photo_writes_raw_bytes() {
        let (mut ex, shared) = exchange(1);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        assert_eq!(ex.save_photo(&path), Err(TetherError::NoPhoto));

        publish_photo(&shared, b"not really a jpeg");
        ex.save_photo(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"not really a jpeg");
    }
}
