//! [`FrameBuffer`] and [`FrameRing`] – move-only frame hand-off between the
//! capture thread and the consumer.
//!
//! The producer fills a *back* buffer it owns, the consumer reads a *front*
//! buffer it owns, and the ring holds `capacity` buffers in between.  Both
//! [`FrameRing::push`] and [`FrameRing::pop`] exchange whole buffers with
//! [`std::mem::swap`], so frame bytes are never copied and every allocation is
//! reused once the pipeline has warmed up.
//!
//! ```text
//!   producer            FrameRing (capacity N)            consumer
//!  ┌────────┐  push   ┌──────────────────────────┐  pop   ┌─────────┐
//!  │  back  │ ──────► │ queued (FIFO) │  spare   │ ─────► │  front  │
//!  └────────┘         └──────────────────────────┘        └─────────┘
//! ```
//!
//! `queued.len() + spare.len() == capacity` holds after every call, so
//! together with `back` and `front` exactly `capacity + 2` buffers exist.
//! When no spare slot is left a push recycles the oldest queued frame, which
//! is how a full ring overwrites instead of blocking.

use std::collections::VecDeque;
use std::mem;

// ────────────────────────────────────────────────────────────────────────────
// FrameBuffer
// ────────────────────────────────────────────────────────────────────────────

/// One encoded image (preview frame or photo) plus the sequence number the
/// ring stamped on it.
///
/// Deliberately not `Clone`: a buffer changes hands, it is never duplicated.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    bytes: Vec<u8>,
    sequence: u64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The underlying allocation, for drivers to clear and refill.
    pub fn bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Ring sequence number; `0` for a buffer that was never pushed.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FrameRing
// ────────────────────────────────────────────────────────────────────────────

/// Bounded FIFO of owned [`FrameBuffer`]s with overwrite-on-full semantics.
#[derive(Debug)]
pub struct FrameRing {
    queued: VecDeque<FrameBuffer>,
    spare: Vec<FrameBuffer>,
    next_sequence: u64,
    evicted: u64,
}

impl FrameRing {
    /// Create a ring holding `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queued: VecDeque::with_capacity(capacity),
            spare: (0..capacity).map(|_| FrameBuffer::default()).collect(),
            next_sequence: 1,
            evicted: 0,
        }
    }

    /// Move `back` into the tail of the queue and hand the producer an empty
    /// (recycled) buffer in its place.
    ///
    /// If every slot is already queued the oldest frame is recycled and
    /// counted in [`evicted`](Self::evicted).  Never blocks.
    pub fn push(&mut self, back: &mut FrameBuffer) {
        let mut slot = match self.spare.pop() {
            Some(slot) => slot,
            None => match self.queued.pop_front() {
                Some(oldest) => {
                    self.evicted += 1;
                    oldest
                }
                // Unreachable while the slot count invariant holds.
                None => FrameBuffer::default(),
            },
        };
        mem::swap(back, &mut slot);
        slot.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queued.push_back(slot);
    }

    /// Move the oldest queued frame into `front`, recycling the buffer `front`
    /// held before.  Returns `false` and leaves `front` untouched when the
    /// queue is empty.  Never blocks.
    pub fn pop(&mut self, front: &mut FrameBuffer) -> bool {
        match self.queued.pop_front() {
            Some(mut slot) => {
                mem::swap(front, &mut slot);
                self.spare.push(slot);
                true
            }
            None => false,
        }
    }

    /// Recycle every queued frame without delivering it.
    pub fn clear(&mut self) {
        self.spare.extend(self.queued.drain(..));
    }

    /// Frames waiting to be popped.
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slot_count()
    }

    /// Buffers owned by the ring, queued or spare.  Always equals the
    /// capacity the ring was created with.
    pub fn slot_count(&self) -> usize {
        self.queued.len() + self.spare.len()
    }

    /// Frames overwritten before the consumer popped them.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
