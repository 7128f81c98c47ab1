use crate::catalog::{Column, DataType, Schema};
use crate::error::{MemDbError, MemDbResult};
use crate::expression::{Expr, ExprTrait};
use crate::storage::tuple::Tuple;
use crate::utils::scalar::ScalarValue;
use std::cmp::Ordering;

/// Binary expression
#[derive(Clone, PartialEq, Debug)]
pub struct BinaryExpr {
    /// Left-hand side of the expression
    pub left: Box<Expr>,
    /// The comparison operator
    pub op: BinaryOp,
    /// Right-hand side of the expression
    pub right: Box<Expr>,
}

impl ExprTrait for BinaryExpr {
    fn data_type(&self, _input_schema: &Schema) -> MemDbResult<DataType> {
        Ok(DataType::Boolean)
    }

    fn nullable(&self, input_schema: &Schema) -> MemDbResult<bool> {
        Ok(self.left.nullable(input_schema)? || self.right.nullable(input_schema)?)
    }

    fn evaluate(&self, tuple: &Tuple) -> MemDbResult<ScalarValue> {
        let l = self.left.evaluate(tuple)?;
        let r = self.right.evaluate(tuple)?;
        match self.op {
            BinaryOp::Gt => evaluate_comparison(&l, &r, &[Ordering::Greater]),
            BinaryOp::Lt => evaluate_comparison(&l, &r, &[Ordering::Less]),
            BinaryOp::GtEq => evaluate_comparison(&l, &r, &[Ordering::Greater, Ordering::Equal]),
            BinaryOp::LtEq => evaluate_comparison(&l, &r, &[Ordering::Less, Ordering::Equal]),
            BinaryOp::Eq => evaluate_comparison(&l, &r, &[Ordering::Equal]),
            BinaryOp::NotEq => evaluate_comparison(&l, &r, &[Ordering::Greater, Ordering::Less]),
            BinaryOp::And => {
                let (l, r) = (as_boolean(&l)?, as_boolean(&r)?);
                Ok(ScalarValue::Boolean(match (l, r) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }))
            }
            BinaryOp::Or => {
                let (l, r) = (as_boolean(&l)?, as_boolean(&r)?);
                Ok(ScalarValue::Boolean(match (l, r) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }))
            }
        }
    }

    fn to_column(&self, input_schema: &Schema) -> MemDbResult<Column> {
        Ok(Column::new(
            format!("{self}"),
            self.data_type(input_schema)?,
            self.nullable(input_schema)?,
        ))
    }
}

pub(crate) fn as_boolean(value: &ScalarValue) -> MemDbResult<Option<bool>> {
    match value {
        ScalarValue::Boolean(v) => Ok(*v),
        v if v.is_null() => Ok(None),
        other => Err(MemDbError::Execution(format!(
            "Expected a boolean, got {other}"
        ))),
    }
}

/// SQL comparison: NULL on either side yields NULL.
pub(crate) fn evaluate_comparison(
    left: &ScalarValue,
    right: &ScalarValue,
    accepted_orderings: &[Ordering],
) -> MemDbResult<ScalarValue> {
    if left.is_null() || right.is_null() {
        return Ok(ScalarValue::Boolean(None));
    }
    let order = left.sql_cmp(right).ok_or(MemDbError::Execution(format!(
        "Can not compare {:?} and {:?}",
        left, right
    )))?;
    Ok(ScalarValue::Boolean(Some(
        accepted_orderings.contains(&order),
    )))
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Hash)]
pub enum BinaryOp {
    Gt,
    Lt,
    GtEq,
    LtEq,
    Eq,
    NotEq,
    And,
    Or,
}

impl BinaryOp {
    /// The operator with its operands swapped: `a < b` is `b > a`.
    pub fn flip(self) -> BinaryOp {
        match self {
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::GtEq => BinaryOp::LtEq,
            BinaryOp::LtEq => BinaryOp::GtEq,
            other => other,
        }
    }
}

impl TryFrom<&sqlparser::ast::BinaryOperator> for BinaryOp {
    type Error = MemDbError;

    fn try_from(value: &sqlparser::ast::BinaryOperator) -> Result<Self, Self::Error> {
        match value {
            sqlparser::ast::BinaryOperator::Gt => Ok(BinaryOp::Gt),
            sqlparser::ast::BinaryOperator::Lt => Ok(BinaryOp::Lt),
            sqlparser::ast::BinaryOperator::GtEq => Ok(BinaryOp::GtEq),
            sqlparser::ast::BinaryOperator::LtEq => Ok(BinaryOp::LtEq),
            sqlparser::ast::BinaryOperator::Eq => Ok(BinaryOp::Eq),
            sqlparser::ast::BinaryOperator::NotEq => Ok(BinaryOp::NotEq),
            sqlparser::ast::BinaryOperator::And => Ok(BinaryOp::And),
            sqlparser::ast::BinaryOperator::Or => Ok(BinaryOp::Or),
            _ => Err(MemDbError::NotSupport(format!(
                "sqlparser binary operator {} not supported",
                value
            ))),
        }
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::GtEq => ">=",
            BinaryOp::LtEq => "<=",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        };
        write!(f, "{symbol}")
    }
}

impl std::fmt::Display for BinaryExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.left, self.op, self.right)
    }
}
