use std::cmp::Ordering;

use crate::catalog::DataType;
use crate::error::MemDbResult;
use crate::function::aggregate::Accumulator;
use crate::utils::scalar::ScalarValue;

#[derive(Debug, Clone)]
struct Extreme {
    data_type: DataType,
    keep: Ordering,
    current: Option<ScalarValue>,
}

impl Extreme {
    fn update(&mut self, value: &ScalarValue) {
        if value.is_null() {
            return;
        }
        let replace = match &self.current {
            Some(current) => value.total_cmp(current) == self.keep,
            None => true,
        };
        if replace {
            self.current = Some(value.clone());
        }
    }

    fn evaluate(&self) -> ScalarValue {
        self.current
            .clone()
            .unwrap_or_else(|| ScalarValue::new_empty(self.data_type))
    }
}

#[derive(Debug, Clone)]
pub struct MinAccumulator(Extreme);

impl MinAccumulator {
    pub fn new(data_type: DataType) -> Self {
        Self(Extreme {
            data_type,
            keep: Ordering::Less,
            current: None,
        })
    }
}

impl Accumulator for MinAccumulator {
    fn update_value(&mut self, value: &ScalarValue) -> MemDbResult<()> {
        self.0.update(value);
        Ok(())
    }

    fn evaluate(&self) -> MemDbResult<ScalarValue> {
        Ok(self.0.evaluate())
    }
}

#[derive(Debug, Clone)]
pub struct MaxAccumulator(Extreme);

impl MaxAccumulator {
    pub fn new(data_type: DataType) -> Self {
        Self(Extreme {
            data_type,
            keep: Ordering::Greater,
            current: None,
        })
    }
}

impl Accumulator for MaxAccumulator {
    fn update_value(&mut self, value: &ScalarValue) -> MemDbResult<()> {
        self.0.update(value);
        Ok(())
    }

    fn evaluate(&self) -> MemDbResult<ScalarValue> {
        Ok(self.0.evaluate())
    }
}
