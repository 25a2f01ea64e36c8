//! Counter element.

use crate::time::TimeTicket;
use crate::value::{CounterValue, PrimitiveValue};

use super::element::ElementMeta;

/// A numeric accumulator. The i32/i64 width is fixed at creation.
#[derive(Debug, Clone)]
pub struct CrdtCounter {
    pub meta: ElementMeta,
    pub value: CounterValue,
}

impl CrdtCounter {
    pub fn new(value: CounterValue, created_at: TimeTicket) -> Self {
        Self {
            meta: ElementMeta::new(created_at),
            value,
        }
    }

    pub fn increase(&mut self, delta: &PrimitiveValue) {
        self.value = self.value.increase(delta);
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.value.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ActorId;

    #[test]
    fn increase_accumulates() {
        let t = TimeTicket::new(1, 0, ActorId([1; 12]));
        let mut c = CrdtCounter::new(CounterValue::Int(10), t);
        c.increase(&PrimitiveValue::Integer(5));
        c.increase(&PrimitiveValue::Long(-3));
        assert_eq!(c.value, CounterValue::Int(12));
    }
}
