// SPDX-License-Identifier: GPL-3.0-only

//! Value currency across the native/script boundary

use crate::errors::{BridgeResult, CallbackError};
use crate::frame::Frame;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A value as seen from script code
///
/// This is the crate's interchange representation; the host runtime adapter
/// converts between this and its own value types at the boundary.
#[derive(Clone)]
pub enum ScriptValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ScriptValue>),
    Object(BTreeMap<String, ScriptValue>),
    /// An opaque reference to a script function
    Function(FunctionRef),
    /// The script-visible wrapper of a camera frame
    Frame(Arc<Frame>),
}

impl ScriptValue {
    /// Human-readable type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Undefined => "undefined",
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::Array(_) => "array",
            ScriptValue::Object(_) => "object",
            ScriptValue::Function(_) => "function",
            ScriptValue::Frame(_) => "frame",
        }
    }

    /// Numeric value if this is a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Integer view tag if this is a whole number in range
    pub fn as_view_tag(&self) -> Option<i64> {
        let n = self.as_number()?;
        if n.fract() == 0.0 && n.is_finite() && (i64::MIN as f64..=i64::MAX as f64).contains(&n) {
            Some(n as i64)
        } else {
            None
        }
    }
}

impl fmt::Debug for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Undefined => write!(f, "undefined"),
            ScriptValue::Null => write!(f, "null"),
            ScriptValue::Bool(b) => write!(f, "{}", b),
            ScriptValue::Number(n) => write!(f, "{}", n),
            ScriptValue::String(s) => write!(f, "{:?}", s),
            ScriptValue::Array(items) => f.debug_list().entries(items).finish(),
            ScriptValue::Object(map) => f.debug_map().entries(map).finish(),
            ScriptValue::Function(_) => write!(f, "[function]"),
            ScriptValue::Frame(frame) => write!(f, "[{}]", frame),
        }
    }
}

/// An opaque, thread-transferable reference to a script function
///
/// The per-call error channel is [`CallbackError`] so the invoker can tell a
/// script-level throw apart from a native failure.
#[derive(Clone)]
pub struct FunctionRef(
    Arc<dyn Fn(&[ScriptValue]) -> Result<ScriptValue, CallbackError> + Send + Sync>,
);

impl FunctionRef {
    /// Wrap a callable into a function reference
    pub fn new(
        f: impl Fn(&[ScriptValue]) -> Result<ScriptValue, CallbackError> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    /// Invoke the referenced function
    pub fn call(&self, args: &[ScriptValue]) -> Result<ScriptValue, CallbackError> {
        (self.0)(args)
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionRef")
    }
}

/// A native-backed callable exposed into a script scope
pub type GlobalBinding = Arc<dyn Fn(&[ScriptValue]) -> BridgeResult<ScriptValue> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_view_tag_accepts_whole_numbers() {
        assert_eq!(ScriptValue::Number(7.0).as_view_tag(), Some(7));
        assert_eq!(ScriptValue::Number(-3.0).as_view_tag(), Some(-3));
    }

    #[test]
    fn test_as_view_tag_rejects_fractions_and_non_numbers() {
        assert_eq!(ScriptValue::Number(7.5).as_view_tag(), None);
        assert_eq!(ScriptValue::Number(f64::NAN).as_view_tag(), None);
        assert_eq!(ScriptValue::Number(f64::INFINITY).as_view_tag(), None);
        assert_eq!(ScriptValue::String("7".into()).as_view_tag(), None);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(ScriptValue::Undefined.type_name(), "undefined");
        assert_eq!(
            ScriptValue::Function(FunctionRef::new(|_| Ok(ScriptValue::Undefined))).type_name(),
            "function"
        );
    }
}
