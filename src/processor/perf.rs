// SPDX-License-Identifier: GPL-3.0-only

//! Frame processor execution-time sampling
//!
//! Collects per-invocation durations in a rolling window and derives a
//! sustainable frame rate from them, so a slow processor can be surfaced in
//! logs instead of silently backing up the scheduler queue.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Default number of samples per evaluation window
pub const DEFAULT_SAMPLE_WINDOW: usize = 15;

/// Rolling collector of frame-processor execution times
pub struct PerformanceCollector {
    samples: Mutex<VecDeque<Duration>>,
    window: usize,
}

impl PerformanceCollector {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_SAMPLE_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(window)),
            window,
        }
    }

    /// Record one invocation's execution time
    pub fn record(&self, elapsed: Duration) {
        let mut samples = self.samples.lock().unwrap();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(elapsed);
    }

    /// Whether a full window of samples has been collected
    pub fn has_enough_data(&self) -> bool {
        self.samples.lock().unwrap().len() >= self.window
    }

    /// Mean execution time over the current window
    pub fn average_execution_time(&self) -> Duration {
        let samples = self.samples.lock().unwrap();
        if samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = samples.iter().sum();
        total / samples.len() as u32
    }

    /// Frame rate the processor can sustain, capped at `target_fps`
    pub fn suggested_frame_rate(&self, target_fps: f64) -> f64 {
        let average = self.average_execution_time().as_secs_f64();
        if average <= 0.0 {
            return target_fps;
        }
        (1.0 / average).min(target_fps)
    }

    /// Discard all samples and start a new window
    pub fn clear(&self) {
        self.samples.lock().unwrap().clear();
    }
}

impl Default for PerformanceCollector {
    fn default() -> Self {
        Self::new()
    }
}
