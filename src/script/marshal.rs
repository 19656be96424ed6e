// SPDX-License-Identifier: GPL-3.0-only

//! Plugin argument marshalling
//!
//! Script values handed to a plugin are converted to native representations
//! one at a time, in order, before the plugin body runs. The codec for a
//! specific platform is pluggable; the default codec uses JSON values as the
//! native representation, which covers every data-bearing script type.

use super::value::ScriptValue;
use crate::errors::MarshalError;
use serde_json::{Map, Number, Value};

/// Converts script values to native plugin arguments and back
pub trait ArgumentCodec: Send + Sync {
    /// Convert one script argument to its native representation
    ///
    /// `index` is the argument's position in the script call (the frame is
    /// position 0, so plugin arguments start at 1); it is only used for
    /// error reporting.
    fn to_native(&self, index: usize, value: &ScriptValue) -> Result<Value, MarshalError>;

    /// Convert a native plugin result back to a script value
    fn to_script(&self, value: &Value) -> ScriptValue;
}

/// Default codec mapping script values onto JSON values
///
/// Functions, frames and `undefined` carry no data representation and fail
/// to marshal; so do non-finite numbers.
pub struct JsonArgumentCodec;

impl JsonArgumentCodec {
    fn convert(&self, index: usize, value: &ScriptValue) -> Result<Value, MarshalError> {
        match value {
            ScriptValue::Null => Ok(Value::Null),
            ScriptValue::Bool(b) => Ok(Value::Bool(*b)),
            ScriptValue::Number(n) => Number::from_f64(*n).map(Value::Number).ok_or_else(|| {
                MarshalError {
                    argument: index,
                    reason: format!("number {} has no native representation", n),
                }
            }),
            ScriptValue::String(s) => Ok(Value::String(s.clone())),
            ScriptValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.convert(index, item)?);
                }
                Ok(Value::Array(out))
            }
            ScriptValue::Object(map) => {
                let mut out = Map::new();
                for (key, item) in map {
                    out.insert(key.clone(), self.convert(index, item)?);
                }
                Ok(Value::Object(out))
            }
            ScriptValue::Undefined | ScriptValue::Function(_) | ScriptValue::Frame(_) => {
                Err(MarshalError {
                    argument: index,
                    reason: format!("{} values cannot be marshalled", value.type_name()),
                })
            }
        }
    }
}

impl ArgumentCodec for JsonArgumentCodec {
    fn to_native(&self, index: usize, value: &ScriptValue) -> Result<Value, MarshalError> {
        self.convert(index, value)
    }

    fn to_script(&self, value: &Value) -> ScriptValue {
        match value {
            Value::Null => ScriptValue::Null,
            Value::Bool(b) => ScriptValue::Bool(*b),
            Value::Number(n) => ScriptValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => ScriptValue::String(s.clone()),
            Value::Array(items) => {
                ScriptValue::Array(items.iter().map(|v| self.to_script(v)).collect())
            }
            Value::Object(map) => ScriptValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.to_script(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::value::FunctionRef;
    use serde_json::json;

    #[test]
    fn test_data_values_round_trip() {
        let codec = JsonArgumentCodec;
        let value = ScriptValue::Array(vec![
            ScriptValue::Null,
            ScriptValue::Bool(true),
            ScriptValue::Number(4.25),
            ScriptValue::String("qr".to_string()),
        ]);

        let native = codec.to_native(1, &value).unwrap();
        assert_eq!(native, json!([null, true, 4.25, "qr"]));
    }

    #[test]
    fn test_function_fails_to_marshal() {
        let codec = JsonArgumentCodec;
        let f = ScriptValue::Function(FunctionRef::new(|_| Ok(ScriptValue::Undefined)));

        let err = codec.to_native(2, &f).unwrap_err();
        assert_eq!(err.argument, 2);
        assert!(err.reason.contains("function"));
    }

    #[test]
    fn test_nested_failure_reports_top_level_argument() {
        let codec = JsonArgumentCodec;
        let value = ScriptValue::Array(vec![ScriptValue::Undefined]);

        let err = codec.to_native(3, &value).unwrap_err();
        assert_eq!(err.argument, 3);
    }

    #[test]
    fn test_nan_fails_to_marshal() {
        let codec = JsonArgumentCodec;
        let err = codec.to_native(1, &ScriptValue::Number(f64::NAN)).unwrap_err();
        assert!(err.reason.contains("no native representation"));
    }

    #[test]
    fn test_to_script_reconstructs_objects() {
        let codec = JsonArgumentCodec;
        let value = codec.to_script(&json!({"count": 2, "names": ["a", "b"]}));

        match value {
            ScriptValue::Object(map) => {
                assert_eq!(map["count"].as_number(), Some(2.0));
                assert!(matches!(map["names"], ScriptValue::Array(ref v) if v.len() == 2));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }
}
