// SPDX-License-Identifier: GPL-3.0-only

//! Frame processor plugin registry
//!
//! Process-wide table mapping plugin names to native implementations. Every
//! registered plugin is exposed into the bound worklet context as a callable
//! `__<name>(frame, ...args)`; the fixed prefix keeps plugin names out of
//! the user-level identifier space.
//!
//! Invocation contract: the first argument is always the current frame.
//! Remaining arguments are marshalled to native representations one at a
//! time, in order, before the plugin body runs; the first marshalling
//! failure fails the whole call and the plugin is never invoked. The
//! plugin's return value is marshalled back to a script value.

use crate::errors::{BridgeError, BridgeResult};
use crate::frame::Frame;
use crate::script::{ArgumentCodec, JsonArgumentCodec, ScriptValue, WorkletContext};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Prefix under which plugins are exposed into script scope
pub const PLUGIN_NAME_PREFIX: &str = "__";

/// A native function invocable from script code with a frame and arguments
///
/// Plugins are stateless as far as the registry is concerned; any state
/// belongs to the implementation itself.
pub trait FrameProcessorPlugin: Send + Sync {
    /// Run the plugin against the current frame and marshalled arguments
    fn call(&self, frame: &Arc<Frame>, args: &[Value]) -> Result<Value, String>;
}

/// Registry of frame processor plugins
pub struct PluginRegistry {
    codec: Arc<dyn ArgumentCodec>,
    plugins: Mutex<HashMap<String, Arc<dyn FrameProcessorPlugin>>>,
    context: Mutex<Option<Arc<dyn WorkletContext>>>,
}

impl PluginRegistry {
    /// Create a registry with the default JSON argument codec
    pub fn new() -> Self {
        Self::with_codec(Arc::new(JsonArgumentCodec))
    }

    /// Create a registry with a platform-specific argument codec
    pub fn with_codec(codec: Arc<dyn ArgumentCodec>) -> Self {
        Self {
            codec,
            plugins: Mutex::new(HashMap::new()),
            context: Mutex::new(None),
        }
    }

    /// Bind the worklet context and install every known plugin into it
    ///
    /// Called when a frame processor establishes the execution context.
    /// Idempotent: re-binding the same context just re-installs the same
    /// bindings under the same names.
    pub fn bind_context(&self, context: Arc<dyn WorkletContext>) {
        let plugins = self.plugins.lock().unwrap();
        info!(count = plugins.len(), "Installing frame processor plugins");
        for (name, plugin) in plugins.iter() {
            self.install_into(&context, name, plugin);
        }
        *self.context.lock().unwrap() = Some(context);
    }

    /// Register a plugin and expose it into the bound context
    ///
    /// Fails with `ContextNotReady` if no frame processor has bound a worklet
    /// context yet, and rejects duplicate names.
    pub fn register(
        &self,
        name: &str,
        plugin: Arc<dyn FrameProcessorPlugin>,
    ) -> BridgeResult<()> {
        let context = self
            .context
            .lock()
            .unwrap()
            .clone()
            .ok_or(BridgeError::ContextNotReady)?;

        {
            let mut plugins = self.plugins.lock().unwrap();
            if plugins.contains_key(name) {
                return Err(BridgeError::Plugin(format!(
                    "plugin `{}` is already registered",
                    name
                )));
            }
            plugins.insert(name.to_string(), Arc::clone(&plugin));
        }

        self.install_into(&context, name, &plugin);
        Ok(())
    }

    /// Number of registered plugins
    pub fn len(&self) -> usize {
        self.plugins.lock().unwrap().len()
    }

    /// Whether no plugin is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn install_into(
        &self,
        context: &Arc<dyn WorkletContext>,
        name: &str,
        plugin: &Arc<dyn FrameProcessorPlugin>,
    ) {
        let exposed = format!("{}{}", PLUGIN_NAME_PREFIX, name);
        info!(name = %exposed, "Installing frame processor plugin");

        let codec = Arc::clone(&self.codec);
        let plugin = Arc::clone(plugin);
        let plugin_name = exposed.clone();
        context.install_binding(
            &exposed,
            1, // frame
            Arc::new(move |args: &[ScriptValue]| {
                let frame = match args.first() {
                    Some(ScriptValue::Frame(frame)) => Arc::clone(frame),
                    Some(other) => {
                        return Err(BridgeError::Argument(format!(
                            "{}: first argument must be the current frame, got {}",
                            plugin_name,
                            other.type_name()
                        )));
                    }
                    None => {
                        return Err(BridgeError::Argument(format!(
                            "{}: called without a frame",
                            plugin_name
                        )));
                    }
                };

                // Offset by one: the frame is the first parameter. Any
                // single failure aborts before the plugin body runs.
                let mut natives = Vec::with_capacity(args.len().saturating_sub(1));
                for (index, value) in args.iter().enumerate().skip(1) {
                    natives.push(codec.to_native(index, value)?);
                }

                let result = plugin.call(&frame, &natives).map_err(BridgeError::Plugin)?;
                Ok(codec.to_script(&result))
            }),
        );
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
