//! Frame ownership and the capture-to-worker hand-off.
//!
//! - `Frame`: owned RGB24 pixel buffer. Not `Clone`; it moves from the source to the
//!   queue to the worker, so no two stages ever hold the same buffer.
//! - `FrameSender` / `FrameReceiver`: bounded, lossy queue between the capture loop
//!   and the pipeline worker. The producer never blocks; a full queue drops the
//!   newest frame.
//!
//! Frames are not `Clone`:
//!
//! ```compile_fail
//! fn duplicate(frame: &plate_relay::Frame) -> plate_relay::Frame {
//!     frame.clone()
//! }
//! ```

use anyhow::{anyhow, Result};
use image::{ImageBuffer, Rgb};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

/// Default depth of the frame queue.
pub const FRAME_QUEUE_CAPACITY: usize = 10;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured image, RGB24, row-major, no padding.
pub struct Frame {
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Capture order assigned by the source (monotonic per source).
    sequence: u64,
}

impl Frame {
    /// Wrap an RGB24 buffer. Fails when the buffer does not match the dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Borrowed image view over the pixel buffer (no copy).
    pub fn as_rgb_image(&self) -> Option<ImageBuffer<Rgb<u8>, &[u8]>> {
        ImageBuffer::from_raw(self.width, self.height, self.data.as_slice())
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Frame queue
// ----------------------------------------------------------------------------

/// Result of offering a frame to the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    Queued,
    /// Queue at capacity; the offered frame was discarded.
    Dropped,
    /// The worker is gone; the offered frame was discarded.
    Closed,
}

/// Result of waiting on the queue.
#[derive(Debug)]
pub enum Recv {
    Frame(Frame),
    /// Nothing arrived within the wait.
    Idle,
    /// Every sender has been dropped and the queue is empty.
    Closed,
}

/// Create a bounded frame queue.
pub fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (
        FrameSender {
            tx,
            capacity,
            dropped: 0,
        },
        FrameReceiver { rx },
    )
}

/// Producer half, owned by the capture loop.
pub struct FrameSender {
    tx: SyncSender<Frame>,
    capacity: usize,
    dropped: u64,
}

impl FrameSender {
    /// Enqueue without blocking. A full queue drops `frame`, never an older one.
    pub fn offer(&mut self, frame: Frame) -> Offer {
        match self.tx.try_send(frame) {
            Ok(()) => Offer::Queued,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                Offer::Dropped
            }
            Err(TrySendError::Disconnected(_)) => Offer::Closed,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Consumer half, owned by the pipeline worker.
pub struct FrameReceiver {
    rx: Receiver<Frame>,
}

impl FrameReceiver {
    /// Wait up to `wait` for the next frame, in capture order.
    pub fn recv(&self, wait: Duration) -> Recv {
        match self.rx.recv_timeout(wait) {
            Ok(frame) => Recv::Frame(frame),
            Err(RecvTimeoutError::Timeout) => Recv::Idle,
            Err(RecvTimeoutError::Disconnected) => Recv::Closed,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
