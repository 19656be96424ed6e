// SPDX-License-Identifier: GPL-3.0-only

//! Cross-thread job relay onto the processing thread
//!
//! The scheduler owns one dedicated thread on which all frame-processor and
//! plugin work runs. It owns no camera or script state; it is a pure relay
//! decoupling producer (capture thread) and consumer cadence.
//!
//! Guarantees: `schedule` never blocks the caller; jobs from a single caller
//! thread run in FIFO order relative to each other; a job that panics is
//! caught and logged so the processing thread survives for the next frame.
//! Delivery is fire-and-forget: once the processing thread is gone, jobs are
//! dropped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Single-thread job scheduler for the processing thread
pub struct Scheduler {
    sender: Sender<Job>,
    thread_handle: Option<JoinHandle<()>>,
    name: String,
}

impl Scheduler {
    /// Spawn the processing thread and return its scheduler
    pub fn start(name: &str) -> Self {
        let (sender, receiver) = channel::<Job>();
        let thread_name = name.to_string();

        info!(name = %name, "Starting processing thread");

        let thread_handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || Self::run(receiver, &thread_name))
            .expect("failed to spawn processing thread");

        Self {
            sender,
            thread_handle: Some(thread_handle),
            name: name.to_string(),
        }
    }

    fn run(receiver: Receiver<Job>, name: &str) {
        debug!(name = %name, "Processing thread started");

        // Drains until every Sender is dropped.
        while let Ok(job) = receiver.recv() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                warn!(name = %name, error = %detail, "Scheduled job panicked");
            }
        }

        info!(name = %name, "Processing thread exiting");
    }

    /// Enqueue a job for asynchronous execution on the processing thread
    ///
    /// Returns immediately after queueing; never waits for the job to run.
    /// If the processing thread has already exited, the job is dropped.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) {
        if self.sender.send(Box::new(job)).is_err() {
            debug!(name = %self.name, "Processing thread is gone, dropping job");
        }
    }

    /// Whether the processing thread is still alive
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the processing thread after draining already-queued jobs
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            // Dropping our sender closes the channel once queued jobs drain.
            // A placeholder channel keeps `self.sender` valid for late
            // callers, whose jobs are then dropped fire-and-forget.
            let (dead_sender, _) = channel();
            self.sender = dead_sender;

            debug!(name = %self.name, "Waiting for processing thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Processing thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Processing thread finished");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "Scheduler dropped, stopping processing thread");
            self.shutdown();
        }
    }
}
