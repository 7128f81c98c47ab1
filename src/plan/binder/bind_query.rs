use sqlparser::ast;

use crate::error::{MemDbError, MemDbResult};
use crate::execution::physical_plan::OrderByExpr;
use crate::expression::{Expr, Literal};
use crate::plan::{SelectItem, SelectStatement};
use crate::utils::scalar::ScalarValue;

use super::Binder;

impl Binder {
    pub fn bind_query(&self, query: &ast::Query) -> MemDbResult<SelectStatement> {
        if query.with.is_some() {
            return Err(MemDbError::NotSupport("WITH clauses are not supported".to_string()));
        }
        let ast::SetExpr::Select(select) = query.body.as_ref() else {
            return Err(MemDbError::NotSupport(format!(
                "only plain SELECT bodies are supported, got {}",
                query.body
            )));
        };
        let mut stmt = self.bind_select(select)?;
        stmt.order_by = query
            .order_by
            .iter()
            .map(|order| self.bind_order_by_expr(order))
            .collect::<MemDbResult<Vec<_>>>()?;
        stmt.limit = match &query.limit {
            Some(limit) => Some(self.bind_count(limit, "LIMIT")?),
            None => None,
        };
        stmt.offset = match &query.offset {
            Some(offset) => self.bind_count(&offset.value, "OFFSET")?,
            None => 0,
        };
        Ok(stmt)
    }

    fn bind_select(&self, select: &ast::Select) -> MemDbResult<SelectStatement> {
        let [from] = select.from.as_slice() else {
            return Err(MemDbError::NotSupport(
                "a query reads exactly one table".to_string(),
            ));
        };
        if !from.joins.is_empty() {
            return Err(MemDbError::NotSupport(
                "JOIN in SQL is not supported, use Database::join_query".to_string(),
            ));
        }
        let ast::TableFactor::Table { name, .. } = &from.relation else {
            return Err(MemDbError::NotSupport(format!(
                "unsupported table factor {}",
                from.relation
            )));
        };
        let table = name
            .0
            .last()
            .map(|ident| ident.value.clone())
            .ok_or_else(|| MemDbError::Plan("missing table name".to_string()))?;
        if select.having.is_some() {
            return Err(MemDbError::NotSupport("HAVING is not supported".to_string()));
        }

        let mut stmt = SelectStatement::new(table);
        stmt.items = select
            .projection
            .iter()
            .map(|item| self.bind_select_item(item))
            .collect::<MemDbResult<Vec<_>>>()?;
        stmt.predicate = select
            .selection
            .as_ref()
            .map(|expr| self.bind_expr(expr))
            .transpose()?;
        stmt.group_by = select
            .group_by
            .iter()
            .map(|expr| self.bind_expr(expr))
            .collect::<MemDbResult<Vec<_>>>()?;
        Ok(stmt)
    }

    fn bind_select_item(&self, item: &ast::SelectItem) -> MemDbResult<SelectItem> {
        match item {
            ast::SelectItem::Wildcard(_) => Ok(SelectItem::Wildcard),
            ast::SelectItem::UnnamedExpr(expr) => Ok(SelectItem::Expr {
                expr: self.bind_expr(expr)?,
                alias: None,
            }),
            ast::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectItem::Expr {
                expr: self.bind_expr(expr)?,
                alias: Some(alias.value.clone()),
            }),
            _ => Err(MemDbError::NotSupport(format!(
                "select item {item} not supported"
            ))),
        }
    }

    pub fn bind_order_by_expr(&self, order: &ast::OrderByExpr) -> MemDbResult<OrderByExpr> {
        let mut bound = OrderByExpr::new(self.bind_expr(&order.expr)?, order.asc.unwrap_or(true));
        if let Some(nulls_first) = order.nulls_first {
            bound.nulls_first = nulls_first;
        }
        Ok(bound)
    }

    fn bind_count(&self, expr: &ast::Expr, clause: &str) -> MemDbResult<usize> {
        match self.bind_expr(expr)? {
            Expr::Literal(Literal {
                value: ScalarValue::Int64(Some(v)),
            }) if v >= 0 => Ok(v as usize),
            other => Err(MemDbError::Plan(format!(
                "{clause} must be a non-negative integer literal, got {other}"
            ))),
        }
    }
}
