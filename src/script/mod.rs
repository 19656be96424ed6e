// SPDX-License-Identifier: GPL-3.0-only

//! Script runtime boundary
//!
//! The host script runtime and its worklet sub-runtime are external
//! collaborators; this module defines the trait seams the core talks
//! through, the [`ScriptValue`] interchange representation, argument
//! marshalling, and an in-process implementation ([`local`]) used by the
//! simulator and tests.

pub mod local;
pub mod marshal;
pub mod value;

pub use marshal::{ArgumentCodec, JsonArgumentCodec};
pub use value::{FunctionRef, GlobalBinding, ScriptValue};

use crate::errors::{BridgeResult, CallbackError};
use std::fmt;
use std::sync::Arc;

/// Sentinel global set in a worklet context once frame processing is enabled
///
/// Observable from script code running inside that context.
pub const FRAME_PROCESSOR_FLAG: &str = "_FRAME_PROCESSOR";

/// The primary script runtime
///
/// Used only for installing/uninstalling processors, never for per-frame
/// work.
pub trait HostRuntime: Send + Sync {
    /// Expose a native-backed callable as a global with the given arity
    fn install_global(&self, name: &str, arity: usize, binding: GlobalBinding);

    /// Resolve a worklet execution context from a script handle value
    ///
    /// Fails with `BridgeError::ContextResolution` if the handle does not
    /// refer to a live worklet context.
    fn resolve_worklet_context(&self, handle: &ScriptValue)
    -> BridgeResult<Arc<dyn WorkletContext>>;

    /// Capture a script function as a thread-transferable callback
    ///
    /// Fails with `BridgeError::Argument` if the value is not a function.
    fn make_shareable(&self, function: &ScriptValue) -> BridgeResult<ShareableCallback>;
}

/// A worklet execution context: a script sub-runtime distinct from the
/// primary one, where frame processors and plugin calls run
pub trait WorkletContext: Send + Sync {
    /// Set a sentinel global flag observable from script code
    fn set_global_flag(&self, name: &str, value: bool);

    /// Expose a native-backed callable into this context's scope
    fn install_binding(&self, name: &str, arity: usize, binding: GlobalBinding);

    /// Reconstruct a transferred callback in this context and run it
    ///
    /// All failures are classified: a script-level throw comes back as
    /// `CallbackError::Script`, native failures as `CallbackError::Native`.
    /// Nothing escapes unclassified.
    fn run_guarded(
        &self,
        callback: &ShareableCallback,
        argument: ScriptValue,
    ) -> Result<ScriptValue, CallbackError>;
}

/// Transfer token for a script callback
///
/// A frame-processor callback is defined on the primary runtime's thread but
/// executed on the processing thread inside the worklet context. This token
/// is the transferable form: the execute operation is only ever bound at the
/// destination, via [`WorkletContext::run_guarded`].
#[derive(Clone)]
pub struct ShareableCallback {
    inner: Arc<dyn Fn(ScriptValue) -> Result<ScriptValue, CallbackError> + Send + Sync>,
}

impl ShareableCallback {
    /// Build a transfer token around a reconstructed invocable
    pub fn new(
        f: impl Fn(ScriptValue) -> Result<ScriptValue, CallbackError> + Send + Sync + 'static,
    ) -> Self {
        Self { inner: Arc::new(f) }
    }

    /// Invoke the callback with a single argument
    ///
    /// Called by worklet context implementations; core code goes through
    /// [`WorkletContext::run_guarded`] instead.
    pub fn execute(&self, argument: ScriptValue) -> Result<ScriptValue, CallbackError> {
        (self.inner)(argument)
    }
}

impl fmt::Debug for ShareableCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareableCallback")
    }
}
