use crate::catalog::DataType;
use crate::error::{MemDbError, MemDbResult};
use crate::function::aggregate::Accumulator;
use crate::utils::scalar::ScalarValue;

#[derive(Debug, Clone, Default)]
pub struct AvgAccumulator {
    sum: Option<f64>,
    count: u64,
}

impl AvgAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Accumulator for AvgAccumulator {
    fn update_value(&mut self, value: &ScalarValue) -> MemDbResult<()> {
        if value.is_null() {
            return Ok(());
        }
        let ScalarValue::Float64(Some(value)) = value.cast_to(&DataType::Float64)? else {
            return Err(MemDbError::Execution(format!(
                "AVG expects numeric input, got {value}"
            )));
        };
        self.sum = Some(self.sum.unwrap_or(0.0) + value);
        self.count += 1;
        Ok(())
    }

    fn evaluate(&self) -> MemDbResult<ScalarValue> {
        Ok(ScalarValue::Float64(
            self.sum.map(|sum| sum / self.count as f64),
        ))
    }
}
