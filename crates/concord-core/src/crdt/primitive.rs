//! Immutable primitive element.

use crate::time::TimeTicket;
use crate::value::PrimitiveValue;

use super::element::ElementMeta;

/// A leaf element wrapping a scalar value that never changes.
#[derive(Debug, Clone)]
pub struct CrdtPrimitive {
    pub meta: ElementMeta,
    pub value: PrimitiveValue,
}

impl CrdtPrimitive {
    pub fn new(value: PrimitiveValue, created_at: TimeTicket) -> Self {
        Self {
            meta: ElementMeta::new(created_at),
            value,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.value.to_json()
    }
}
