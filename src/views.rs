// SPDX-License-Identifier: GPL-3.0-only

//! Camera view identity and per-view processor state
//!
//! Each camera view is known to script code by an integer tag. The view
//! holds the single installed capture callback for that tag; installing
//! replaces any prior callback atomically, and delivery with no callback
//! installed is a quiet drop, not an error (it is the steady state during
//! drain/teardown races).

use crate::frame::FrameBuffer;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Callback invoked by the capture layer for every raw frame
///
/// Runs on the capture thread; implementations hand off to the scheduler and
/// return without blocking.
pub type CaptureCallback = Arc<dyn Fn(Box<dyn FrameBuffer>) + Send + Sync>;

/// A camera view with at most one installed frame processor
pub struct CameraView {
    tag: i64,
    callback: Mutex<Option<CaptureCallback>>,
}

impl CameraView {
    fn new(tag: i64) -> Arc<Self> {
        Arc::new(Self {
            tag,
            callback: Mutex::new(None),
        })
    }

    /// View tag
    pub fn tag(&self) -> i64 {
        self.tag
    }

    /// Capture-thread entry point for a raw frame
    pub fn deliver_frame(&self, buffer: Box<dyn FrameBuffer>) {
        let callback = self.callback.lock().unwrap().clone();
        match callback {
            Some(callback) => callback(buffer),
            None => {
                // Drop the buffer; its owner reclaims it.
                debug!(tag = self.tag, "No frame processor installed, dropping frame");
                drop(buffer);
            }
        }
    }

    /// Install or replace the capture callback
    pub(crate) fn set_frame_processor(&self, callback: CaptureCallback) {
        *self.callback.lock().unwrap() = Some(callback);
        info!(tag = self.tag, "Frame processor set");
    }

    /// Clear the capture callback; subsequent frames are dropped
    pub(crate) fn unset_frame_processor(&self) {
        let previous = self.callback.lock().unwrap().take();
        if previous.is_some() {
            info!(tag = self.tag, "Frame processor removed");
        } else {
            debug!(tag = self.tag, "No frame processor to remove");
        }
    }

    /// Whether a processor is currently installed
    pub fn has_frame_processor(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }
}

/// Registry of camera views keyed by tag
///
/// The single place per-view processor state lives; shared between the
/// script thread (install/uninstall) and the capture thread.
pub struct ViewRegistry {
    views: Mutex<HashMap<i64, Arc<CameraView>>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self {
            views: Mutex::new(HashMap::new()),
        }
    }

    /// Register a view under `tag`, replacing any prior registration
    pub fn register(&self, tag: i64) -> Arc<CameraView> {
        let view = CameraView::new(tag);
        self.views.lock().unwrap().insert(tag, Arc::clone(&view));
        debug!(tag, "Registered camera view");
        view
    }

    /// Resolve a view by tag
    pub fn resolve(&self, tag: i64) -> Option<Arc<CameraView>> {
        self.views.lock().unwrap().get(&tag).cloned()
    }

    /// Remove a view at the end of its lifetime
    pub fn remove(&self, tag: i64) -> Option<Arc<CameraView>> {
        let removed = self.views.lock().unwrap().remove(&tag);
        if removed.is_some() {
            debug!(tag, "Removed camera view");
        }
        removed
    }
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::new()
    }
}
