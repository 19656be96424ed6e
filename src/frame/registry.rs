// SPDX-License-Identifier: GPL-3.0-only

//! Leak containment for outstanding frames
//!
//! The registry keeps weak references to every frame handed to script code.
//! It is bookkeeping only, never an ownership source: eviction stops
//! tracking a frame but does not close it, so misbehaving script code is
//! bounded in registry memory, not guaranteed leak-free for the buffer
//! itself.

use super::Frame;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

/// Tunable eviction policy for the frame registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryPolicy {
    /// Soft cap on tracked frames; exceeding it triggers an eviction pass
    pub cap: usize,
    /// Eviction target; live entries above this count are dropped oldest-first
    pub watermark: usize,
}

impl Default for RegistryPolicy {
    fn default() -> Self {
        Self {
            cap: 10,
            watermark: 5,
        }
    }
}

/// Bounded tracking of live frames
///
/// Shared between the capture thread (tracking) and the processing thread,
/// so the table sits behind a mutex.
pub struct FrameRegistry {
    policy: RegistryPolicy,
    // Insertion order is age order; eviction pops from the front.
    frames: Mutex<VecDeque<Weak<Frame>>>,
}

impl FrameRegistry {
    /// Create a registry with the default cap/watermark
    pub fn new() -> Self {
        Self::with_policy(RegistryPolicy::default())
    }

    /// Create a registry with an explicit policy
    ///
    /// A watermark above the cap cannot be honored (the eviction pass would
    /// have nothing to drain to); it is clamped to the cap.
    pub fn with_policy(mut policy: RegistryPolicy) -> Self {
        if policy.watermark > policy.cap {
            warn!(
                cap = policy.cap,
                watermark = policy.watermark,
                "Registry watermark exceeds cap, clamping to cap"
            );
            policy.watermark = policy.cap;
        }
        Self {
            policy,
            frames: Mutex::new(VecDeque::new()),
        }
    }

    /// Register a frame for leak bookkeeping
    ///
    /// Runs an eviction pass when the soft cap is exceeded: expired entries
    /// are dropped first, then the oldest live entries down to the watermark.
    pub fn track(&self, frame: &Arc<Frame>) {
        let mut frames = self.frames.lock().unwrap();
        frames.push_back(Arc::downgrade(frame));

        if frames.len() <= self.policy.cap {
            return;
        }

        // Pass 1: passive cleanup of frames that were already destroyed.
        frames.retain(|entry| entry.upgrade().is_some());

        // Pass 2: lossy backpressure valve. Stop tracking the oldest live
        // frames; their buffers stay open until their owners let go.
        if frames.len() > self.policy.cap {
            let excess = frames.len() - self.policy.watermark;
            warn!(
                tracked = frames.len(),
                evicting = excess,
                "Frame registry over cap; script code is not closing frames"
            );
            frames.drain(..excess);
        } else {
            debug!(tracked = frames.len(), "Frame registry cleanup pass");
        }
    }

    /// Number of tracked entries (live or not yet cleaned up)
    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    /// Whether the registry tracks nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FrameRegistry {
    fn default() -> Self {
        Self::new()
    }
}
