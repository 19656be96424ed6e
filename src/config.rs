// SPDX-License-Identifier: GPL-3.0-only

//! Bridge configuration

use crate::frame::registry::RegistryPolicy;
use crate::processor::DisarmPolicy;
use serde::{Deserialize, Serialize};

/// Default name of the dedicated processing thread
pub const DEFAULT_PROCESSING_THREAD: &str = "frame-processor";

/// Tunable knobs for the frame processor bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Eviction policy for the frame leak-containment registry
    pub registry: RegistryPolicy,
    /// When a native per-frame failure disarms the processor
    pub disarm_policy: DisarmPolicy,
    /// Upper bound on processed frames per second; `None` processes every
    /// frame the capture layer delivers
    pub max_fps: Option<f64>,
    /// Name given to the processing thread (shows up in logs and debuggers)
    pub processing_thread_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            registry: RegistryPolicy::default(),
            disarm_policy: DisarmPolicy::default(),
            max_fps: None,
            processing_thread_name: DEFAULT_PROCESSING_THREAD.to_string(),
        }
    }
}
