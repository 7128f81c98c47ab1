use crate::catalog::{Column, DataType, Schema};
use crate::error::{MemDbError, MemDbResult};
use crate::expression::{Expr, ExprTrait};
use crate::storage::tuple::Tuple;
use crate::utils::scalar::ScalarValue;
use std::fmt::Debug;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive, serialize_all = "UPPERCASE")]
pub enum AggregateFunctionKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// An aggregate call. `arg == None` is `COUNT(*)`.
#[derive(Clone, PartialEq, Debug)]
pub struct AggregateFunction {
    pub func_kind: AggregateFunctionKind,
    pub arg: Option<Box<Expr>>,
}

impl AggregateFunction {
    pub fn new(func_kind: AggregateFunctionKind, arg: Option<Expr>) -> MemDbResult<Self> {
        if arg.is_none() && func_kind != AggregateFunctionKind::Count {
            return Err(MemDbError::Plan(format!(
                "aggregate function {} requires an argument",
                func_kind
            )));
        }
        Ok(Self {
            func_kind,
            arg: arg.map(Box::new),
        })
    }
}

impl ExprTrait for AggregateFunction {
    fn data_type(&self, input_schema: &Schema) -> MemDbResult<DataType> {
        match self.func_kind {
            AggregateFunctionKind::Count => Ok(DataType::Int64),
            AggregateFunctionKind::Avg => Ok(DataType::Float64),
            AggregateFunctionKind::Sum | AggregateFunctionKind::Min | AggregateFunctionKind::Max => {
                match &self.arg {
                    Some(arg) => arg.data_type(input_schema),
                    None => Ok(DataType::Int64),
                }
            }
        }
    }

    fn nullable(&self, _input_schema: &Schema) -> MemDbResult<bool> {
        Ok(self.func_kind != AggregateFunctionKind::Count)
    }

    /// The per-row input fed to the accumulator. `COUNT(*)` counts every row.
    fn evaluate(&self, tuple: &Tuple) -> MemDbResult<ScalarValue> {
        match &self.arg {
            Some(arg) => arg.evaluate(tuple),
            None => Ok(ScalarValue::Boolean(Some(true))),
        }
    }

    fn to_column(&self, input_schema: &Schema) -> MemDbResult<Column> {
        Ok(Column::new(
            format!("{}", self),
            self.data_type(input_schema)?,
            self.nullable(input_schema)?,
        ))
    }
}

impl std::fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}({})", self.func_kind, arg),
            None => write!(f, "{}(*)", self.func_kind),
        }
    }
}
