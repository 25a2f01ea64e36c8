//! Plain values stored in primitive and counter elements.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The immutable value of a primitive element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveValue {
    Null,
    Bool(bool),
    Integer(i32),
    Long(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Date(i64),
}

impl PrimitiveValue {
    /// JSON view of the value. Bytes render as an array of numbers,
    /// dates as their millisecond timestamp.
    pub fn to_json(&self) -> Value {
        match self {
            PrimitiveValue::Null => Value::Null,
            PrimitiveValue::Bool(b) => Value::Bool(*b),
            PrimitiveValue::Integer(n) => Value::from(*n),
            PrimitiveValue::Long(n) => Value::from(*n),
            PrimitiveValue::Double(d) => {
                serde_json::Number::from_f64(*d).map_or(Value::Null, Value::Number)
            }
            PrimitiveValue::String(s) => Value::String(s.clone()),
            PrimitiveValue::Bytes(b) => {
                Value::Array(b.iter().map(|v| Value::from(*v)).collect())
            }
            PrimitiveValue::Date(ms) => Value::from(*ms),
        }
    }
}

/// The accumulator of a counter element. The variant fixes the
/// arithmetic width for the counter's whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterValue {
    Int(i32),
    Long(i64),
}

impl CounterValue {
    /// Adds `delta`, preserving the variant. Wrapping keeps replicas
    /// identical under overflow.
    pub fn increase(&self, delta: &PrimitiveValue) -> CounterValue {
        let d = match delta {
            PrimitiveValue::Integer(n) => i64::from(*n),
            PrimitiveValue::Long(n) => *n,
            PrimitiveValue::Double(d) => *d as i64,
            _ => 0,
        };
        match self {
            CounterValue::Int(v) => CounterValue::Int(v.wrapping_add(d as i32)),
            CounterValue::Long(v) => CounterValue::Long(v.wrapping_add(d)),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            CounterValue::Int(v) => Value::from(*v),
            CounterValue::Long(v) => Value::from(*v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn primitive_json_views() {
        assert_eq!(PrimitiveValue::Null.to_json(), json!(null));
        assert_eq!(PrimitiveValue::Integer(7).to_json(), json!(7));
        assert_eq!(
            PrimitiveValue::Bytes(vec![1, 2]).to_json(),
            json!([1, 2])
        );
        assert_eq!(PrimitiveValue::Date(1_000).to_json(), json!(1_000));
    }

    #[test]
    fn counter_increase_keeps_variant() {
        let c = CounterValue::Int(1).increase(&PrimitiveValue::Long(2));
        assert_eq!(c, CounterValue::Int(3));
        let c = CounterValue::Long(1).increase(&PrimitiveValue::Integer(2));
        assert_eq!(c, CounterValue::Long(3));
    }

    #[test]
    fn counter_increase_wraps() {
        let c = CounterValue::Int(i32::MAX).increase(&PrimitiveValue::Integer(1));
        assert_eq!(c, CounterValue::Int(i32::MIN));
    }
}
