// SPDX-License-Identifier: GPL-3.0-only

//! framelink - a frame processor bridge between camera capture and script
//!
//! This library connects a live camera capture pipeline to a managed script
//! runtime: user-supplied "frame processor" callbacks inspect camera frames
//! in near real time, and native plugins are invocable from script code with
//! marshalled arguments. The crate owns the cross-thread handoff, the frame
//! resource lifecycle, and failure containment between the capture thread,
//! the dedicated processing thread, and the worklet execution context.
//!
//! # Architecture
//!
//! - [`frame`]: frame wrapper with close-once semantics, plus the bounded
//!   leak-containment registry
//! - [`scheduler`]: job relay from the capture thread onto the processing
//!   thread
//! - [`processor`]: the frame-processor install/execute/uninstall state
//!   machine with error containment
//! - [`plugins`]: registry of native plugins exposed into the worklet
//!   context
//! - [`script`]: trait seams to the host script runtime, value interchange
//!   and argument marshalling, and an in-process runtime for tests and the
//!   simulator
//! - [`views`]: camera view identity by integer tag
//!
//! The camera hardware, the real script runtime, and any UI are external
//! collaborators behind the [`frame::FrameBuffer`], [`script::HostRuntime`]
//! and [`script::WorkletContext`] traits.

pub mod config;
pub mod errors;
pub mod frame;
pub mod plugins;
pub mod processor;
pub mod scheduler;
pub mod script;
pub mod views;

// Re-export commonly used types
pub use config::BridgeConfig;
pub use errors::{BridgeError, BridgeResult};
pub use frame::registry::{FrameRegistry, RegistryPolicy};
pub use frame::{Frame, FrameBuffer, MemoryFrameBuffer};
pub use plugins::{FrameProcessorPlugin, PluginRegistry};
pub use processor::{DisarmPolicy, FrameProcessorController};
pub use scheduler::Scheduler;
pub use script::{HostRuntime, ScriptValue, ShareableCallback, WorkletContext};
pub use views::{CameraView, ViewRegistry};
