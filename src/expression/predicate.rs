use std::cmp::Ordering;

use regex::Regex;

use crate::catalog::{Column, DataType, Schema};
use crate::error::{MemDbError, MemDbResult};
use crate::expression::binary::{as_boolean, evaluate_comparison};
use crate::expression::{Expr, ExprTrait};
use crate::storage::tuple::Tuple;
use crate::utils::scalar::ScalarValue;

fn boolean_column(name: String, nullable: bool) -> Column {
    Column::new(name, DataType::Boolean, nullable)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotExpr {
    pub expr: Box<Expr>,
}

impl ExprTrait for NotExpr {
    fn data_type(&self, _input_schema: &Schema) -> MemDbResult<DataType> {
        Ok(DataType::Boolean)
    }

    fn nullable(&self, input_schema: &Schema) -> MemDbResult<bool> {
        self.expr.nullable(input_schema)
    }

    fn evaluate(&self, tuple: &Tuple) -> MemDbResult<ScalarValue> {
        let value = as_boolean(&self.expr.evaluate(tuple)?)?;
        Ok(ScalarValue::Boolean(value.map(|v| !v)))
    }

    fn to_column(&self, input_schema: &Schema) -> MemDbResult<Column> {
        Ok(boolean_column(format!("{self}"), self.nullable(input_schema)?))
    }
}

impl std::fmt::Display for NotExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NOT ({})", self.expr)
    }
}

/// `expr [NOT] BETWEEN low AND high`, both bounds inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct BetweenExpr {
    pub expr: Box<Expr>,
    pub negated: bool,
    pub low: Box<Expr>,
    pub high: Box<Expr>,
}

impl ExprTrait for BetweenExpr {
    fn data_type(&self, _input_schema: &Schema) -> MemDbResult<DataType> {
        Ok(DataType::Boolean)
    }

    fn nullable(&self, input_schema: &Schema) -> MemDbResult<bool> {
        Ok(self.expr.nullable(input_schema)?
            || self.low.nullable(input_schema)?
            || self.high.nullable(input_schema)?)
    }

    fn evaluate(&self, tuple: &Tuple) -> MemDbResult<ScalarValue> {
        let value = self.expr.evaluate(tuple)?;
        let low = evaluate_comparison(
            &value,
            &self.low.evaluate(tuple)?,
            &[Ordering::Greater, Ordering::Equal],
        )?;
        let high = evaluate_comparison(
            &value,
            &self.high.evaluate(tuple)?,
            &[Ordering::Less, Ordering::Equal],
        )?;
        let within = match (low.as_bool(), high.as_bool()) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        };
        Ok(ScalarValue::Boolean(within.map(|v| v != self.negated)))
    }

    fn to_column(&self, input_schema: &Schema) -> MemDbResult<Column> {
        Ok(boolean_column(format!("{self}"), self.nullable(input_schema)?))
    }
}

impl std::fmt::Display for BetweenExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let not = if self.negated { "NOT " } else { "" };
        write!(f, "{} {}BETWEEN {} AND {}", self.expr, not, self.low, self.high)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InListExpr {
    pub expr: Box<Expr>,
    pub list: Vec<Expr>,
    pub negated: bool,
}

impl ExprTrait for InListExpr {
    fn data_type(&self, _input_schema: &Schema) -> MemDbResult<DataType> {
        Ok(DataType::Boolean)
    }

    fn nullable(&self, input_schema: &Schema) -> MemDbResult<bool> {
        self.expr.nullable(input_schema)
    }

    fn evaluate(&self, tuple: &Tuple) -> MemDbResult<ScalarValue> {
        let value = self.expr.evaluate(tuple)?;
        if value.is_null() {
            return Ok(ScalarValue::Boolean(None));
        }
        let mut saw_null = false;
        for item in self.list.iter() {
            let candidate = item.evaluate(tuple)?;
            match evaluate_comparison(&value, &candidate, &[Ordering::Equal])?.as_bool() {
                Some(true) => return Ok(ScalarValue::Boolean(Some(!self.negated))),
                Some(false) => {}
                None => saw_null = true,
            }
        }
        if saw_null {
            Ok(ScalarValue::Boolean(None))
        } else {
            Ok(ScalarValue::Boolean(Some(self.negated)))
        }
    }

    fn to_column(&self, input_schema: &Schema) -> MemDbResult<Column> {
        Ok(boolean_column(format!("{self}"), self.nullable(input_schema)?))
    }
}

impl std::fmt::Display for InListExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let items = self
            .list
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let not = if self.negated { "NOT " } else { "" };
        write!(f, "{} {}IN ({})", self.expr, not, items)
    }
}

/// `expr [NOT] LIKE 'pattern'` with `%` and `_` wildcards, compiled once.
#[derive(Debug, Clone)]
pub struct LikeExpr {
    pub expr: Box<Expr>,
    pub pattern: String,
    pub negated: bool,
    matcher: Regex,
}

impl LikeExpr {
    pub fn try_new(expr: Expr, pattern: impl Into<String>, negated: bool) -> MemDbResult<Self> {
        let pattern = pattern.into();
        let mut source = String::from("^");
        for ch in pattern.chars() {
            match ch {
                '%' => source.push_str(".*"),
                '_' => source.push('.'),
                other => source.push_str(&regex::escape(&other.to_string())),
            }
        }
        source.push('$');
        let matcher = Regex::new(&source)
            .map_err(|e| MemDbError::Plan(format!("invalid LIKE pattern {pattern}: {e}")))?;
        Ok(Self {
            expr: Box::new(expr),
            pattern,
            negated,
            matcher,
        })
    }

    pub fn has_leading_wildcard(&self) -> bool {
        self.pattern.starts_with('%') || self.pattern.starts_with('_')
    }
}

impl PartialEq for LikeExpr {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr && self.pattern == other.pattern && self.negated == other.negated
    }
}

impl ExprTrait for LikeExpr {
    fn data_type(&self, _input_schema: &Schema) -> MemDbResult<DataType> {
        Ok(DataType::Boolean)
    }

    fn nullable(&self, input_schema: &Schema) -> MemDbResult<bool> {
        self.expr.nullable(input_schema)
    }

    fn evaluate(&self, tuple: &Tuple) -> MemDbResult<ScalarValue> {
        let value = self.expr.evaluate(tuple)?;
        if value.is_null() {
            return Ok(ScalarValue::Boolean(None));
        }
        let text = match value.as_str() {
            Some(s) => std::borrow::Cow::Borrowed(s),
            None => std::borrow::Cow::Owned(value.to_string()),
        };
        Ok(ScalarValue::Boolean(Some(
            self.matcher.is_match(&text) != self.negated,
        )))
    }

    fn to_column(&self, input_schema: &Schema) -> MemDbResult<Column> {
        Ok(boolean_column(format!("{self}"), self.nullable(input_schema)?))
    }
}

impl std::fmt::Display for LikeExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let not = if self.negated { "NOT " } else { "" };
        write!(f, "{} {}LIKE '{}'", self.expr, not, self.pattern)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IsNullExpr {
    pub expr: Box<Expr>,
    pub negated: bool,
}

impl ExprTrait for IsNullExpr {
    fn data_type(&self, _input_schema: &Schema) -> MemDbResult<DataType> {
        Ok(DataType::Boolean)
    }

    fn nullable(&self, _input_schema: &Schema) -> MemDbResult<bool> {
        Ok(false)
    }

    fn evaluate(&self, tuple: &Tuple) -> MemDbResult<ScalarValue> {
        let is_null = self.expr.evaluate(tuple)?.is_null();
        Ok(ScalarValue::Boolean(Some(is_null != self.negated)))
    }

    fn to_column(&self, _input_schema: &Schema) -> MemDbResult<Column> {
        Ok(boolean_column(format!("{self}"), false))
    }
}

impl std::fmt::Display for IsNullExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let not = if self.negated { "NOT " } else { "" };
        write!(f, "{} IS {}NULL", self.expr, not)
    }
}
