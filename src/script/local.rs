// SPDX-License-Identifier: GPL-3.0-only

//! In-process script runtime
//!
//! A complete software implementation of [`HostRuntime`] and
//! [`WorkletContext`] where script functions are plain Rust closures. The
//! simulator runs against it, and it is the reference double for integration
//! tests; a real embedding replaces it with an adapter over the host
//! runtime's FFI.

use super::{
    GlobalBinding, HostRuntime, ScriptValue, ShareableCallback, WorkletContext,
};
use crate::errors::{BridgeError, BridgeResult, CallbackError, ScriptError};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// In-process primary script runtime
pub struct LocalScriptRuntime {
    globals: Mutex<HashMap<String, Global>>,
    contexts: Mutex<HashMap<String, Arc<LocalWorkletContext>>>,
}

struct Global {
    arity: usize,
    binding: GlobalBinding,
}

impl LocalScriptRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            globals: Mutex::new(HashMap::new()),
            contexts: Mutex::new(HashMap::new()),
        })
    }

    /// Create a named worklet context and return its script handle
    pub fn create_worklet_context(self: &Arc<Self>, name: &str) -> ScriptValue {
        let context = Arc::new(LocalWorkletContext {
            name: name.to_string(),
            flags: Mutex::new(HashMap::new()),
            bindings: Mutex::new(HashMap::new()),
        });
        self.contexts
            .lock()
            .unwrap()
            .insert(name.to_string(), context);
        info!(context = %name, "Created worklet context");
        ScriptValue::String(name.to_string())
    }

    /// Look up a worklet context by name
    pub fn worklet_context(&self, name: &str) -> Option<Arc<LocalWorkletContext>> {
        self.contexts.lock().unwrap().get(name).cloned()
    }

    /// Invoke an installed global from "script code"
    pub fn call_global(&self, name: &str, args: &[ScriptValue]) -> BridgeResult<ScriptValue> {
        let binding = {
            let globals = self.globals.lock().unwrap();
            let global = globals
                .get(name)
                .ok_or_else(|| BridgeError::Argument(format!("`{}` is not installed", name)))?;
            Arc::clone(&global.binding)
        };
        binding(args)
    }

    /// Declared arity of an installed global, if present
    pub fn global_arity(&self, name: &str) -> Option<usize> {
        self.globals.lock().unwrap().get(name).map(|g| g.arity)
    }
}

impl HostRuntime for LocalScriptRuntime {
    fn install_global(&self, name: &str, arity: usize, binding: GlobalBinding) {
        debug!(name = %name, arity, "Installing global binding");
        self.globals
            .lock()
            .unwrap()
            .insert(name.to_string(), Global { arity, binding });
    }

    fn resolve_worklet_context(
        &self,
        handle: &ScriptValue,
    ) -> BridgeResult<Arc<dyn WorkletContext>> {
        let name = match handle {
            ScriptValue::String(name) => name,
            other => {
                return Err(BridgeError::ContextResolution(format!(
                    "expected a worklet context handle, got {}",
                    other.type_name()
                )));
            }
        };
        self.worklet_context(name)
            .map(|ctx| ctx as Arc<dyn WorkletContext>)
            .ok_or_else(|| {
                BridgeError::ContextResolution(format!("no worklet context named `{}`", name))
            })
    }

    fn make_shareable(&self, function: &ScriptValue) -> BridgeResult<ShareableCallback> {
        match function {
            ScriptValue::Function(fref) => {
                let fref = fref.clone();
                Ok(ShareableCallback::new(move |argument| {
                    fref.call(&[argument])
                }))
            }
            other => Err(BridgeError::Argument(format!(
                "cannot share a {} across runtimes",
                other.type_name()
            ))),
        }
    }
}

/// In-process worklet execution context
pub struct LocalWorkletContext {
    name: String,
    flags: Mutex<HashMap<String, bool>>,
    bindings: Mutex<HashMap<String, Global>>,
}

impl LocalWorkletContext {
    /// Context name (diagnostics)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read back a sentinel flag
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.flags.lock().unwrap().get(name).copied()
    }

    /// Whether a binding is installed under `name`
    pub fn has_binding(&self, name: &str) -> bool {
        self.bindings.lock().unwrap().contains_key(name)
    }

    /// Invoke an installed binding from "script code" inside this context
    pub fn call_binding(&self, name: &str, args: &[ScriptValue]) -> BridgeResult<ScriptValue> {
        let binding = {
            let bindings = self.bindings.lock().unwrap();
            let global = bindings.get(name).ok_or_else(|| {
                BridgeError::Argument(format!("`{}` is not installed in context `{}`", name, self.name))
            })?;
            Arc::clone(&global.binding)
        };
        binding(args)
    }
}

impl WorkletContext for LocalWorkletContext {
    fn set_global_flag(&self, name: &str, value: bool) {
        debug!(context = %self.name, flag = %name, value, "Setting context flag");
        self.flags.lock().unwrap().insert(name.to_string(), value);
    }

    fn install_binding(&self, name: &str, arity: usize, binding: GlobalBinding) {
        debug!(context = %self.name, name = %name, arity, "Installing context binding");
        self.bindings
            .lock()
            .unwrap()
            .insert(name.to_string(), Global { arity, binding });
    }

    fn run_guarded(
        &self,
        callback: &ShareableCallback,
        argument: ScriptValue,
    ) -> Result<ScriptValue, CallbackError> {
        // A panic in the closure is the local stand-in for an uncaught
        // script exception; classify it instead of unwinding further.
        match catch_unwind(AssertUnwindSafe(|| callback.execute(argument))) {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "uncaught script exception".to_string());
                Err(CallbackError::Script(ScriptError::message_only(message)))
            }
        }
    }
}
