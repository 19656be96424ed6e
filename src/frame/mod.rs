// SPDX-License-Identifier: GPL-3.0-only

//! Frame wrapper with explicit close semantics
//!
//! A [`Frame`] wraps one camera image buffer handed over by the capture layer
//! and owns its closing semantics: after `close()` no attribute accessor
//! succeeds, and the underlying buffer is released exactly once no matter how
//! many times `close()` is called. Attributes are queried from the live
//! buffer on every access, never cached at construction.
//!
//! Ownership model: a frame has exactly one owner at any instant (the capture
//! thread during dispatch, the script context during processor execution).
//! The internal mutex exists for the close-once contract and so the
//! [`registry::FrameRegistry`] can observe liveness through weak references;
//! it is not a license for concurrent shared access from two threads.

pub mod registry;

use crate::errors::FrameClosedError;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Boundary to the camera capture layer's raw buffer
///
/// Implemented by whatever owns the actual image memory. All attribute
/// methods query the live buffer; `release` gives the buffer back to the
/// capture layer and is called at most once per buffer.
pub trait FrameBuffer: Send {
    /// Frame width in pixels
    fn width(&self) -> u32;
    /// Frame height in pixels
    fn height(&self) -> u32;
    /// Row stride in bytes (may include padding)
    fn bytes_per_row(&self) -> u32;
    /// Number of image planes
    fn planes_count(&self) -> u32;
    /// Hand the buffer back to the capture layer
    fn release(&mut self);
}

/// A single camera frame with close-once semantics
pub struct Frame {
    /// `None` once closed; holding the buffer in an Option gives the
    /// release-exactly-once guarantee via `take()`
    buffer: Mutex<Option<Box<dyn FrameBuffer>>>,
}

impl Frame {
    /// Wrap a raw capture buffer into a shareable frame
    pub fn new(buffer: Box<dyn FrameBuffer>) -> Arc<Self> {
        Arc::new(Self {
            buffer: Mutex::new(Some(buffer)),
        })
    }

    /// Frame width, failing if the frame has been closed
    pub fn width(&self) -> Result<u32, FrameClosedError> {
        self.access("width", |buffer| buffer.width())
    }

    /// Frame height, failing if the frame has been closed
    pub fn height(&self) -> Result<u32, FrameClosedError> {
        self.access("height", |buffer| buffer.height())
    }

    /// Row stride in bytes, failing if the frame has been closed
    pub fn bytes_per_row(&self) -> Result<u32, FrameClosedError> {
        self.access("bytesPerRow", |buffer| buffer.bytes_per_row())
    }

    /// Number of planes, failing if the frame has been closed
    pub fn planes_count(&self) -> Result<u32, FrameClosedError> {
        self.access("planesCount", |buffer| buffer.planes_count())
    }

    /// Whether the frame is still open
    ///
    /// Never fails, even after close; defensive probe for script code to call
    /// before touching other properties.
    pub fn is_valid(&self) -> bool {
        self.buffer.lock().unwrap().is_some()
    }

    /// Release the underlying buffer
    ///
    /// Safe to call any number of times; only the first call releases.
    pub fn close(&self) {
        let mut slot = self.buffer.lock().unwrap();
        match slot.take() {
            Some(mut buffer) => buffer.release(),
            None => debug!("Frame already closed, ignoring close()"),
        }
    }

    fn access<T>(
        &self,
        property: &'static str,
        get: impl FnOnce(&dyn FrameBuffer) -> T,
    ) -> Result<T, FrameClosedError> {
        let slot = self.buffer.lock().unwrap();
        match slot.as_deref() {
            Some(buffer) => Ok(get(buffer)),
            None => Err(FrameClosedError { property }),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.buffer.lock().unwrap();
        match slot.as_deref() {
            Some(buffer) => write!(f, "{} x {} Frame", buffer.width(), buffer.height()),
            None => write!(f, "[closed frame]"),
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        // Discarding the wrapper releases the buffer if script code never
        // closed it explicitly.
        self.close();
    }
}

/// An owned in-memory frame buffer
///
/// Used by the simulator and tests in place of real capture hardware. The
/// release counter is shared so callers can observe how many times the
/// capture layer got its buffer back.
pub struct MemoryFrameBuffer {
    width: u32,
    height: u32,
    bytes_per_row: u32,
    planes_count: u32,
    data: Vec<u8>,
    releases: Arc<AtomicUsize>,
}

impl MemoryFrameBuffer {
    /// Create a buffer with a zeroed single-plane payload
    pub fn new(width: u32, height: u32) -> Self {
        let bytes_per_row = width.saturating_mul(4);
        Self {
            width,
            height,
            bytes_per_row,
            planes_count: 1,
            data: vec![0; (bytes_per_row as u64 * height as u64) as usize],
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Override stride and plane count (planar formats)
    pub fn with_layout(mut self, bytes_per_row: u32, planes_count: u32) -> Self {
        self.bytes_per_row = bytes_per_row;
        self.planes_count = planes_count;
        self
    }

    /// Shared release counter, incremented once per `release()`
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.releases)
    }

    /// Raw payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl FrameBuffer for MemoryFrameBuffer {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn bytes_per_row(&self) -> u32 {
        self.bytes_per_row
    }

    fn planes_count(&self) -> u32 {
        self.planes_count
    }

    fn release(&mut self) {
        self.data = Vec::new();
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_on_live_frame() {
        let frame = Frame::new(Box::new(MemoryFrameBuffer::new(1280, 720)));
        assert_eq!(frame.width().unwrap(), 1280);
        assert_eq!(frame.height().unwrap(), 720);
        assert_eq!(frame.bytes_per_row().unwrap(), 1280 * 4);
        assert_eq!(frame.planes_count().unwrap(), 1);
        assert!(frame.is_valid());
    }

    #[test]
    fn test_accessors_fail_after_close() {
        let frame = Frame::new(Box::new(MemoryFrameBuffer::new(640, 480)));
        frame.close();

        assert_eq!(
            frame.width().unwrap_err(),
            FrameClosedError { property: "width" }
        );
        assert_eq!(
            frame.bytes_per_row().unwrap_err(),
            FrameClosedError {
                property: "bytesPerRow"
            }
        );
        // is_valid never fails, it just reports false
        assert!(!frame.is_valid());
    }

    #[test]
    fn test_close_releases_exactly_once() {
        let buffer = MemoryFrameBuffer::new(320, 240);
        let releases = buffer.release_counter();
        let frame = Frame::new(Box::new(buffer));

        frame.close();
        frame.close();
        frame.close();

        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_unclosed_frame() {
        let buffer = MemoryFrameBuffer::new(320, 240);
        let releases = buffer.release_counter();

        {
            let _frame = Frame::new(Box::new(buffer));
        }

        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_after_close_does_not_double_release() {
        let buffer = MemoryFrameBuffer::new(320, 240);
        let releases = buffer.release_counter();

        {
            let frame = Frame::new(Box::new(buffer));
            frame.close();
        }

        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_display_format() {
        let frame = Frame::new(Box::new(MemoryFrameBuffer::new(1920, 1080)));
        assert_eq!(frame.to_string(), "1920 x 1080 Frame");

        frame.close();
        assert_eq!(frame.to_string(), "[closed frame]");
    }

    #[test]
    fn test_with_layout_overrides() {
        let buffer = MemoryFrameBuffer::new(100, 100).with_layout(128, 3);
        let frame = Frame::new(Box::new(buffer));
        assert_eq!(frame.bytes_per_row().unwrap(), 128);
        assert_eq!(frame.planes_count().unwrap(), 3);
    }
}
