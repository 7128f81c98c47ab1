mod avg;
mod count;
mod min_max;
mod sum;

pub use avg::AvgAccumulator;
pub use count::CountAccumulator;
pub use min_max::{MaxAccumulator, MinAccumulator};
pub use sum::SumAccumulator;

use std::fmt::Debug;

use crate::catalog::DataType;
use crate::error::MemDbResult;
use crate::expression::AggregateFunctionKind;
use crate::utils::scalar::ScalarValue;

/// Running state of one aggregate over one group.
pub trait Accumulator: Debug + Send {
    /// Fold one input value. NULLs are ignored by every built-in aggregate.
    fn update_value(&mut self, value: &ScalarValue) -> MemDbResult<()>;

    fn evaluate(&self) -> MemDbResult<ScalarValue>;
}

/// Fresh accumulator for `kind`; `data_type` types the result of an empty group.
pub fn create_accumulator(kind: AggregateFunctionKind, data_type: DataType) -> Box<dyn Accumulator> {
    match kind {
        AggregateFunctionKind::Count => Box::new(CountAccumulator::new()),
        AggregateFunctionKind::Sum => Box::new(SumAccumulator::new(data_type)),
        AggregateFunctionKind::Avg => Box::new(AvgAccumulator::new()),
        AggregateFunctionKind::Min => Box::new(MinAccumulator::new(data_type)),
        AggregateFunctionKind::Max => Box::new(MaxAccumulator::new(data_type)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(kind: AggregateFunctionKind, data_type: DataType, values: &[ScalarValue]) -> ScalarValue {
        let mut acc = create_accumulator(kind, data_type);
        for value in values {
            acc.update_value(value).unwrap();
        }
        acc.evaluate().unwrap()
    }

    #[test]
    fn aggregates_skip_nulls() {
        let values = vec![
            ScalarValue::Int64(Some(4)),
            ScalarValue::Int64(None),
            ScalarValue::Int64(Some(10)),
        ];
        assert_eq!(
            fold(AggregateFunctionKind::Count, DataType::Int64, &values),
            ScalarValue::Int64(Some(2))
        );
        assert_eq!(
            fold(AggregateFunctionKind::Sum, DataType::Int64, &values),
            ScalarValue::Int64(Some(14))
        );
        assert_eq!(
            fold(AggregateFunctionKind::Avg, DataType::Int64, &values),
            ScalarValue::Float64(Some(7.0))
        );
        assert_eq!(
            fold(AggregateFunctionKind::Min, DataType::Int64, &values),
            ScalarValue::Int64(Some(4))
        );
        assert_eq!(
            fold(AggregateFunctionKind::Max, DataType::Int64, &values),
            ScalarValue::Int64(Some(10))
        );
    }

    #[test]
    fn empty_group_yields_typed_nulls_and_zero_count() {
        assert_eq!(
            fold(AggregateFunctionKind::Count, DataType::Int64, &[]),
            ScalarValue::Int64(Some(0))
        );
        let sum = fold(AggregateFunctionKind::Sum, DataType::Float64, &[]);
        assert!(matches!(sum, ScalarValue::Float64(None)));
        let max = fold(AggregateFunctionKind::Max, DataType::Varchar(None), &[]);
        assert!(matches!(max, ScalarValue::Varchar(None)));
    }
}
