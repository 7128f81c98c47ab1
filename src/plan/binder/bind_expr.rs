use sqlparser::ast;

use crate::error::{MemDbError, MemDbResult};
use crate::expression::{
    AggregateFunction, AggregateFunctionKind, BetweenExpr, BinaryExpr, ColumnExpr, Expr,
    InListExpr, IsNullExpr, LikeExpr, Literal, NotExpr,
};
use crate::utils::scalar::ScalarValue;

use super::Binder;

impl Binder {
    pub fn bind_expr(&self, sql: &ast::Expr) -> MemDbResult<Expr> {
        match sql {
            ast::Expr::Identifier(ident) => Ok(Expr::Column(ColumnExpr {
                relation: None,
                name: ident.value.clone(),
            })),
            ast::Expr::CompoundIdentifier(idents) => match idents.as_slice() {
                [col] => Ok(Expr::Column(ColumnExpr {
                    relation: None,
                    name: col.value.clone(),
                })),
                [table, col] => Ok(Expr::Column(ColumnExpr {
                    relation: Some(table.value.to_lowercase()),
                    name: col.value.clone(),
                })),
                _ => Err(MemDbError::NotSupport(format!(
                    "column reference {} has too many parts",
                    sql
                ))),
            },
            ast::Expr::BinaryOp { left, op, right } => Ok(Expr::Binary(BinaryExpr {
                left: Box::new(self.bind_expr(left)?),
                op: op.try_into()?,
                right: Box::new(self.bind_expr(right)?),
            })),
            ast::Expr::Nested(inner) => self.bind_expr(inner),
            ast::Expr::UnaryOp { op, expr } => match op {
                ast::UnaryOperator::Not => Ok(Expr::Not(NotExpr {
                    expr: Box::new(self.bind_expr(expr)?),
                })),
                ast::UnaryOperator::Minus => match self.bind_expr(expr)? {
                    Expr::Literal(Literal {
                        value: ScalarValue::Int64(Some(v)),
                    }) => Ok(Expr::Literal(Literal {
                        value: ScalarValue::Int64(Some(-v)),
                    })),
                    Expr::Literal(Literal {
                        value: ScalarValue::Float64(Some(v)),
                    }) => Ok(Expr::Literal(Literal {
                        value: ScalarValue::Float64(Some(-v)),
                    })),
                    other => Err(MemDbError::NotSupport(format!(
                        "unary minus on {other} not supported"
                    ))),
                },
                ast::UnaryOperator::Plus => self.bind_expr(expr),
                _ => Err(MemDbError::NotSupport(format!(
                    "sqlparser unary operator {} not supported",
                    op
                ))),
            },
            ast::Expr::Between {
                expr,
                negated,
                low,
                high,
            } => Ok(Expr::Between(BetweenExpr {
                expr: Box::new(self.bind_expr(expr)?),
                negated: *negated,
                low: Box::new(self.bind_expr(low)?),
                high: Box::new(self.bind_expr(high)?),
            })),
            ast::Expr::InList {
                expr,
                list,
                negated,
            } => Ok(Expr::InList(InListExpr {
                expr: Box::new(self.bind_expr(expr)?),
                list: list
                    .iter()
                    .map(|e| self.bind_expr(e))
                    .collect::<MemDbResult<Vec<_>>>()?,
                negated: *negated,
            })),
            ast::Expr::Like {
                negated,
                expr,
                pattern,
                ..
            } => {
                let pattern = match self.bind_expr(pattern)? {
                    Expr::Literal(Literal {
                        value: ScalarValue::Varchar(Some(p)),
                    }) => p,
                    other => {
                        return Err(MemDbError::Plan(format!(
                            "LIKE pattern must be a string literal, got {other}"
                        )))
                    }
                };
                Ok(Expr::Like(LikeExpr::try_new(
                    self.bind_expr(expr)?,
                    pattern,
                    *negated,
                )?))
            }
            ast::Expr::IsNull(expr) => Ok(Expr::IsNull(IsNullExpr {
                expr: Box::new(self.bind_expr(expr)?),
                negated: false,
            })),
            ast::Expr::IsNotNull(expr) => Ok(Expr::IsNull(IsNullExpr {
                expr: Box::new(self.bind_expr(expr)?),
                negated: true,
            })),
            ast::Expr::Value(value) => self.bind_value(value),
            ast::Expr::Function(function) => self.bind_function(function),
            _ => Err(MemDbError::NotSupport(format!(
                "sqlparser expr {} not supported",
                sql
            ))),
        }
    }

    pub fn bind_value(&self, value: &ast::Value) -> MemDbResult<Expr> {
        let value = match value {
            ast::Value::Number(s, _) => {
                if let Ok(num) = s.parse::<i64>() {
                    ScalarValue::from(num)
                } else if let Ok(num) = s.parse::<f64>() {
                    ScalarValue::from(num)
                } else {
                    return Err(MemDbError::Plan(format!("invalid number literal {s}")));
                }
            }
            ast::Value::Boolean(b) => (*b).into(),
            ast::Value::Null => ScalarValue::Int64(None),
            ast::Value::SingleQuotedString(s) => s.clone().into(),
            _ => {
                return Err(MemDbError::NotSupport(format!(
                    "sqlparser value {} not supported",
                    value
                )))
            }
        };
        Ok(Expr::Literal(Literal { value }))
    }

    pub fn bind_function(&self, function: &ast::Function) -> MemDbResult<Expr> {
        let name = function.name.to_string();
        let func_kind: AggregateFunctionKind = name
            .parse()
            .map_err(|_| MemDbError::Plan(format!("The function {} is not supported", function)))?;
        if function.distinct {
            return Err(MemDbError::NotSupport(format!(
                "DISTINCT aggregates are not supported: {function}"
            )));
        }
        let arg = match function.args.as_slice() {
            [ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard)] => None,
            [ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(arg))] => {
                Some(self.bind_expr(arg)?)
            }
            _ => {
                return Err(MemDbError::Plan(format!(
                    "aggregate {function} takes exactly one argument"
                )))
            }
        };
        Ok(Expr::AggregateFunction(AggregateFunction::new(func_kind, arg)?))
    }
}
