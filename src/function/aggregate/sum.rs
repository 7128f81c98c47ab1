use crate::catalog::DataType;
use crate::error::{MemDbError, MemDbResult};
use crate::function::aggregate::Accumulator;
use crate::utils::scalar::ScalarValue;

#[derive(Debug, Clone)]
pub struct SumAccumulator {
    data_type: DataType,
    sum: Option<ScalarValue>,
}

impl SumAccumulator {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            sum: None,
        }
    }
}

impl Accumulator for SumAccumulator {
    fn update_value(&mut self, value: &ScalarValue) -> MemDbResult<()> {
        if value.is_null() {
            return Ok(());
        }
        if value.as_f64().is_none() {
            return Err(MemDbError::Execution(format!(
                "SUM expects numeric input, got {value}"
            )));
        }
        self.sum = Some(match &self.sum {
            Some(sum) => sum.add(value)?,
            None => value.clone(),
        });
        Ok(())
    }

    fn evaluate(&self) -> MemDbResult<ScalarValue> {
        match &self.sum {
            Some(sum) => sum.cast_to(&self.data_type),
            None => Ok(ScalarValue::new_empty(self.data_type)),
        }
    }
}
