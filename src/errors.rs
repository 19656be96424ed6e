// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the frame processor bridge
//!
//! Setup-time errors (install/uninstall/plugin registration) propagate to the
//! synchronous caller as [`BridgeError`]. Per-frame errors are classified as
//! [`CallbackError`] and contained at the processing-thread boundary; they are
//! logged, never propagated to the capture thread.

use std::fmt;

/// Result type alias using BridgeError
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Top-level error type for setup and plugin-call operations
#[derive(Debug, Clone)]
pub enum BridgeError {
    /// Bad argument types or arity at a script call site
    Argument(String),
    /// The provided worklet context handle could not be resolved
    ContextResolution(String),
    /// No camera view is registered under the given tag
    ViewNotFound(i64),
    /// A worklet context must be bound before this operation
    ContextNotReady,
    /// Plugin argument conversion failed
    Marshal(MarshalError),
    /// Frame property accessed after close
    FrameClosed(FrameClosedError),
    /// Plugin registration or invocation error
    Plugin(String),
}

/// Error raised when a frame property is accessed after `close()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameClosedError {
    /// Name of the property that was accessed
    pub property: &'static str,
}

/// Error raised when a single plugin argument cannot be marshalled
///
/// Marshalling happens one argument at a time, in order. The first failure
/// aborts the whole plugin call before the plugin body runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarshalError {
    /// Zero-based position of the offending argument in the script call
    /// (position 0 is always the frame, so this is never 0)
    pub argument: usize,
    /// Why the conversion failed
    pub reason: String,
}

/// Per-frame callback failure, classified for the containment policy
#[derive(Debug, Clone)]
pub enum CallbackError {
    /// The user script threw; recoverable, never disarms the processor
    Script(ScriptError),
    /// A native failure during marshalling or buffer access
    Native(NativeError),
}

/// A script-level exception with diagnostic detail
#[derive(Debug, Clone)]
pub struct ScriptError {
    /// Exception message
    pub message: String,
    /// Stack trace if the runtime provided one
    pub stack: Option<String>,
}

/// A native-level failure raised while running a frame processor
#[derive(Debug, Clone)]
pub struct NativeError {
    /// Recognized category, or `Unknown` for the residual catch-all
    pub kind: NativeErrorKind,
    /// Failure detail
    pub message: String,
}

/// Categories of native per-frame failures
///
/// Recognized categories are logged with distinguishing detail and are
/// considered recoverable. `Unknown` is the residual catch-all; under the
/// default containment policy it disarms the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeErrorKind {
    /// Underlying frame buffer was invalid or already released
    BufferAccess,
    /// A value could not cross the native/script boundary
    Marshal,
    /// The worklet runtime itself failed
    Runtime,
    /// Anything else; unrecoverable as far as this core can tell
    Unknown,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Argument(msg) => write!(f, "Invalid argument: {}", msg),
            BridgeError::ContextResolution(msg) => {
                write!(f, "Failed to resolve worklet context: {}", msg)
            }
            BridgeError::ViewNotFound(tag) => {
                write!(f, "No camera view found for tag {}", tag)
            }
            BridgeError::ContextNotReady => {
                write!(
                    f,
                    "Worklet context is not bound yet; set a frame processor first"
                )
            }
            BridgeError::Marshal(e) => write!(f, "{}", e),
            BridgeError::FrameClosed(e) => write!(f, "{}", e),
            BridgeError::Plugin(msg) => write!(f, "Plugin error: {}", msg),
        }
    }
}

impl fmt::Display for FrameClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cannot get `{}` from a Frame that has already been closed! Did you call `frame.close()`?",
            self.property
        )
    }
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to marshal argument {}: {}",
            self.argument, self.reason
        )
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackError::Script(e) => write!(f, "Script error: {}", e),
            CallbackError::Native(e) => write!(f, "Native error: {}", e),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl fmt::Display for NativeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeErrorKind::BufferAccess => write!(f, "buffer-access"),
            NativeErrorKind::Marshal => write!(f, "marshal"),
            NativeErrorKind::Runtime => write!(f, "runtime"),
            NativeErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::error::Error for BridgeError {}
impl std::error::Error for FrameClosedError {}
impl std::error::Error for MarshalError {}
impl std::error::Error for CallbackError {}
impl std::error::Error for ScriptError {}
impl std::error::Error for NativeError {}

// Conversions from sub-errors to BridgeError
impl From<MarshalError> for BridgeError {
    fn from(err: MarshalError) -> Self {
        BridgeError::Marshal(err)
    }
}

impl From<FrameClosedError> for BridgeError {
    fn from(err: FrameClosedError) -> Self {
        BridgeError::FrameClosed(err)
    }
}

impl ScriptError {
    /// Build a script error without stack information
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    /// Build a script error with a stack trace
    pub fn with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Some(stack.into()),
        }
    }

    /// Stack trace with continuation lines indented, for one-look log output
    pub fn normalized_stack(&self) -> Option<String> {
        self.stack
            .as_ref()
            .map(|stack| stack.replace('\n', "\n    "))
    }
}

impl NativeError {
    /// Build a native error of the given category
    pub fn new(kind: NativeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
