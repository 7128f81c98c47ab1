mod aggregate;
mod binary;
mod column;
mod literal;
mod predicate;

pub use aggregate::{AggregateFunction, AggregateFunctionKind};
pub use binary::{BinaryExpr, BinaryOp};
pub use column::ColumnExpr;
pub use literal::Literal;
pub use predicate::{BetweenExpr, InListExpr, IsNullExpr, LikeExpr, NotExpr};

use std::ops::Bound;

use crate::catalog::{Column, DataType, Schema};
use crate::error::MemDbResult;
use crate::storage::tuple::Tuple;
use crate::utils::scalar::ScalarValue;

pub trait ExprTrait {
    /// Get the data type of this expression, given the schema of the input
    fn data_type(&self, input_schema: &Schema) -> MemDbResult<DataType>;

    /// Determine whether this expression is nullable, given the schema of the input
    fn nullable(&self, input_schema: &Schema) -> MemDbResult<bool>;

    /// Evaluate an expression against a Tuple
    fn evaluate(&self, tuple: &Tuple) -> MemDbResult<ScalarValue>;

    /// convert to a column with respect to a schema
    fn to_column(&self, input_schema: &Schema) -> MemDbResult<Column>;
}

#[derive(Clone, PartialEq, Debug)]
pub enum Expr {
    /// A named reference to a qualified filed in a schema.
    Column(ColumnExpr),
    /// A constant value.
    Literal(Literal),
    /// A binary expression such as "age > 21"
    Binary(BinaryExpr),
    Not(NotExpr),
    Between(BetweenExpr),
    InList(InListExpr),
    Like(LikeExpr),
    IsNull(IsNullExpr),
    /// Aggregate function
    AggregateFunction(AggregateFunction),
}

impl ExprTrait for Expr {
    fn data_type(&self, input_schema: &Schema) -> MemDbResult<DataType> {
        match self {
            Expr::Column(column) => column.data_type(input_schema),
            Expr::Literal(literal) => literal.data_type(input_schema),
            Expr::Binary(binary) => binary.data_type(input_schema),
            Expr::Not(not) => not.data_type(input_schema),
            Expr::Between(between) => between.data_type(input_schema),
            Expr::InList(in_list) => in_list.data_type(input_schema),
            Expr::Like(like) => like.data_type(input_schema),
            Expr::IsNull(is_null) => is_null.data_type(input_schema),
            Expr::AggregateFunction(aggr) => aggr.data_type(input_schema),
        }
    }

    fn nullable(&self, input_schema: &Schema) -> MemDbResult<bool> {
        match self {
            Expr::Column(column) => column.nullable(input_schema),
            Expr::Literal(literal) => literal.nullable(input_schema),
            Expr::Binary(binary) => binary.nullable(input_schema),
            Expr::Not(not) => not.nullable(input_schema),
            Expr::Between(between) => between.nullable(input_schema),
            Expr::InList(in_list) => in_list.nullable(input_schema),
            Expr::Like(like) => like.nullable(input_schema),
            Expr::IsNull(is_null) => is_null.nullable(input_schema),
            Expr::AggregateFunction(aggr) => aggr.nullable(input_schema),
        }
    }

    fn evaluate(&self, tuple: &Tuple) -> MemDbResult<ScalarValue> {
        match self {
            Expr::Column(column) => column.evaluate(tuple),
            Expr::Literal(literal) => literal.evaluate(tuple),
            Expr::Binary(binary) => binary.evaluate(tuple),
            Expr::Not(not) => not.evaluate(tuple),
            Expr::Between(between) => between.evaluate(tuple),
            Expr::InList(in_list) => in_list.evaluate(tuple),
            Expr::Like(like) => like.evaluate(tuple),
            Expr::IsNull(is_null) => is_null.evaluate(tuple),
            Expr::AggregateFunction(aggr) => aggr.evaluate(tuple),
        }
    }

    fn to_column(&self, input_schema: &Schema) -> MemDbResult<Column> {
        match self {
            Expr::Column(column) => column.to_column(input_schema),
            Expr::Literal(literal) => literal.to_column(input_schema),
            Expr::Binary(binary) => binary.to_column(input_schema),
            Expr::Not(not) => not.to_column(input_schema),
            Expr::Between(between) => between.to_column(input_schema),
            Expr::InList(in_list) => in_list.to_column(input_schema),
            Expr::Like(like) => like.to_column(input_schema),
            Expr::IsNull(is_null) => is_null.to_column(input_schema),
            Expr::AggregateFunction(aggr) => aggr.to_column(input_schema),
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Column(e) => write!(f, "{e}"),
            Expr::Literal(e) => write!(f, "{e}"),
            Expr::Binary(e) => write!(f, "{e}"),
            Expr::Not(e) => write!(f, "{e}"),
            Expr::Between(e) => write!(f, "{e}"),
            Expr::InList(e) => write!(f, "{e}"),
            Expr::Like(e) => write!(f, "{e}"),
            Expr::IsNull(e) => write!(f, "{e}"),
            Expr::AggregateFunction(e) => write!(f, "{e}"),
        }
    }
}

pub fn col(name: &str) -> Expr {
    match name.split_once('.') {
        Some((relation, column)) => Expr::Column(ColumnExpr {
            relation: Some(relation.to_string()),
            name: column.to_string(),
        }),
        None => Expr::Column(ColumnExpr {
            relation: None,
            name: name.to_string(),
        }),
    }
}

pub fn lit(value: impl Into<ScalarValue>) -> Expr {
    Expr::Literal(Literal {
        value: value.into(),
    })
}

/// Always-true predicate, used for "every row".
pub fn all_rows() -> Expr {
    lit(true)
}

impl Expr {
    fn binary(self, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary(BinaryExpr {
            left: Box::new(self),
            op,
            right: Box::new(right),
        })
    }

    pub fn eq(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn not_eq(self, right: Expr) -> Expr {
        self.binary(BinaryOp::NotEq, right)
    }

    pub fn lt(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Lt, right)
    }

    pub fn lt_eq(self, right: Expr) -> Expr {
        self.binary(BinaryOp::LtEq, right)
    }

    pub fn gt(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Gt, right)
    }

    pub fn gt_eq(self, right: Expr) -> Expr {
        self.binary(BinaryOp::GtEq, right)
    }

    pub fn and(self, right: Expr) -> Expr {
        self.binary(BinaryOp::And, right)
    }

    pub fn or(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Or, right)
    }

    pub fn between(self, low: Expr, high: Expr) -> Expr {
        Expr::Between(BetweenExpr {
            expr: Box::new(self),
            negated: false,
            low: Box::new(low),
            high: Box::new(high),
        })
    }

    pub fn in_list(self, list: Vec<Expr>) -> Expr {
        Expr::InList(InListExpr {
            expr: Box::new(self),
            list,
            negated: false,
        })
    }

    pub fn like(self, pattern: &str) -> MemDbResult<Expr> {
        Ok(Expr::Like(LikeExpr::try_new(self, pattern, false)?))
    }

    /// Evaluate as a filter: NULL and false both reject the row.
    pub fn evaluate_predicate(&self, tuple: &Tuple) -> MemDbResult<bool> {
        let value = self.evaluate(tuple)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Top-level AND operands.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::Binary(BinaryExpr {
                left,
                op: BinaryOp::And,
                right,
            }) => {
                let mut out = left.conjuncts();
                out.extend(right.conjuncts());
                out
            }
            other => vec![other],
        }
    }

    /// Single-column predicates usable for index access and selectivity estimation.
    pub fn column_predicates(&self) -> Vec<ColumnPredicate> {
        self.conjuncts()
            .into_iter()
            .filter_map(|e| e.to_column_predicate())
            .collect()
    }

    pub fn to_column_predicate(&self) -> Option<ColumnPredicate> {
        match self {
            Expr::Binary(BinaryExpr { left, op, right }) => {
                let (column, op, value) = match (left.as_ref(), right.as_ref()) {
                    (Expr::Column(c), Expr::Literal(l)) => (c, *op, l.value.clone()),
                    (Expr::Literal(l), Expr::Column(c)) => (c, op.flip(), l.value.clone()),
                    _ => return None,
                };
                let op = match op {
                    BinaryOp::Eq => PredicateOp::Eq(value),
                    BinaryOp::NotEq => PredicateOp::NotEq(value),
                    BinaryOp::Lt => PredicateOp::Lt(value),
                    BinaryOp::LtEq => PredicateOp::LtEq(value),
                    BinaryOp::Gt => PredicateOp::Gt(value),
                    BinaryOp::GtEq => PredicateOp::GtEq(value),
                    BinaryOp::And | BinaryOp::Or => return None,
                };
                Some(ColumnPredicate::new(column.name.clone(), op))
            }
            Expr::Between(BetweenExpr {
                expr,
                negated: false,
                low,
                high,
            }) => match (expr.as_ref(), low.as_ref(), high.as_ref()) {
                (Expr::Column(c), Expr::Literal(lo), Expr::Literal(hi)) => Some(ColumnPredicate::new(
                    c.name.clone(),
                    PredicateOp::Between(lo.value.clone(), hi.value.clone()),
                )),
                _ => None,
            },
            Expr::InList(InListExpr {
                expr,
                list,
                negated: false,
            }) => {
                let Expr::Column(c) = expr.as_ref() else {
                    return None;
                };
                let values = list
                    .iter()
                    .map(|e| match e {
                        Expr::Literal(l) => Some(l.value.clone()),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()?;
                Some(ColumnPredicate::new(c.name.clone(), PredicateOp::In(values)))
            }
            Expr::Like(like) if !like.negated => match like.expr.as_ref() {
                Expr::Column(c) => Some(ColumnPredicate::new(
                    c.name.clone(),
                    PredicateOp::Like(like.pattern.clone()),
                )),
                _ => None,
            },
            _ => None,
        }
    }
}

/// `column OP constant`, the shape the optimizer reasons about.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPredicate {
    pub column: String,
    pub op: PredicateOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredicateOp {
    Eq(ScalarValue),
    NotEq(ScalarValue),
    Lt(ScalarValue),
    LtEq(ScalarValue),
    Gt(ScalarValue),
    GtEq(ScalarValue),
    Between(ScalarValue, ScalarValue),
    In(Vec<ScalarValue>),
    Like(String),
}

impl ColumnPredicate {
    pub fn new(column: impl Into<String>, op: PredicateOp) -> Self {
        Self {
            column: column.into(),
            op,
        }
    }

    /// Key bounds for an ordered index, `None` when the predicate is not a range.
    pub fn key_range(&self) -> Option<(Bound<&ScalarValue>, Bound<&ScalarValue>)> {
        match &self.op {
            PredicateOp::Eq(v) => Some((Bound::Included(v), Bound::Included(v))),
            PredicateOp::Lt(v) => Some((Bound::Unbounded, Bound::Excluded(v))),
            PredicateOp::LtEq(v) => Some((Bound::Unbounded, Bound::Included(v))),
            PredicateOp::Gt(v) => Some((Bound::Excluded(v), Bound::Unbounded)),
            PredicateOp::GtEq(v) => Some((Bound::Included(v), Bound::Unbounded)),
            PredicateOp::Between(lo, hi) => Some((Bound::Included(lo), Bound::Included(hi))),
            PredicateOp::NotEq(_) | PredicateOp::In(_) | PredicateOp::Like(_) => None,
        }
    }

    /// Exact keys for point lookups (`=` and `IN`).
    pub fn point_keys(&self) -> Option<Vec<&ScalarValue>> {
        match &self.op {
            PredicateOp::Eq(v) => Some(vec![v]),
            PredicateOp::In(values) => Some(values.iter().collect()),
            _ => None,
        }
    }
}

impl std::fmt::Display for ColumnPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.op {
            PredicateOp::Eq(v) => write!(f, "{} = {}", self.column, v),
            PredicateOp::NotEq(v) => write!(f, "{} != {}", self.column, v),
            PredicateOp::Lt(v) => write!(f, "{} < {}", self.column, v),
            PredicateOp::LtEq(v) => write!(f, "{} <= {}", self.column, v),
            PredicateOp::Gt(v) => write!(f, "{} > {}", self.column, v),
            PredicateOp::GtEq(v) => write!(f, "{} >= {}", self.column, v),
            PredicateOp::Between(lo, hi) => {
                write!(f, "{} BETWEEN {} AND {}", self.column, lo, hi)
            }
            PredicateOp::In(values) => {
                let items = values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{} IN ({})", self.column, items)
            }
            PredicateOp::Like(p) => write!(f, "{} LIKE '{}'", self.column, p),
        }
    }
}
