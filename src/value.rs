//! Helpers over `serde_json::Value` for track data points

use serde_json::{Map, Value};

use crate::error::{DreamlakeError, Result};

/// Reserved timestamp field on every persisted data point
pub const TS_FIELD: &str = "_ts";

/// A logical data point: user fields plus `_ts`
pub type FieldMap = Map<String, Value>;

/// Require a JSON object and hand back its fields
pub fn into_fields(value: Value) -> Result<FieldMap> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DreamlakeError::BadInput(format!(
            "data point must be a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

/// Read `_ts` from a point, if present, as a finite float
pub fn point_ts(point: &FieldMap) -> Result<Option<f64>> {
    match point.get(TS_FIELD) {
        None => Ok(None),
        Some(value) => {
            let ts = value.as_f64().ok_or_else(|| {
                DreamlakeError::BadInput("_ts must be a number (seconds since epoch)".to_string())
            })?;
            if !ts.is_finite() {
                return Err(DreamlakeError::BadInput(
                    "_ts must be a finite number".to_string(),
                ));
            }
            Ok(Some(ts))
        }
    }
}

/// Build a JSON number from an epoch-seconds float.
///
/// `_ts` is real-valued by contract; non-finite floats are rejected before
/// this point, so the conversion cannot fail.
#[must_use]
pub fn ts_value(ts: f64) -> Value {
    serde_json::Number::from_f64(ts).map_or(Value::Null, Value::Number)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
