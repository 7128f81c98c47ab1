use crate::error::MemDbResult;
use crate::function::aggregate::Accumulator;
use crate::utils::scalar::ScalarValue;

#[derive(Debug, Clone, Default)]
pub struct CountAccumulator {
    count: i64,
}

impl CountAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Accumulator for CountAccumulator {
    fn update_value(&mut self, value: &ScalarValue) -> MemDbResult<()> {
        if !value.is_null() {
            self.count += 1;
        }
        Ok(())
    }

    fn evaluate(&self) -> MemDbResult<ScalarValue> {
        Ok(self.count.into())
    }
}
