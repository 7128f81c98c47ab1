mod bind_expr;
mod bind_query;

use sqlparser::{ast::Statement, dialect::PostgreSqlDialect, parser::Parser};

use crate::error::{MemDbError, MemDbResult};
use crate::plan::SelectStatement;

pub fn parse_sql(sql: &str) -> MemDbResult<Vec<Statement>> {
    let normalized = sql.trim().trim_end_matches(';').trim();
    Ok(Parser::parse_sql(&PostgreSqlDialect {}, normalized)?)
}

/// Turns parsed SQL into the bound query shapes the planner accepts.
#[derive(Debug, Default)]
pub struct Binder;

impl Binder {
    pub fn new() -> Self {
        Self
    }

    /// Parse and bind exactly one SELECT statement.
    pub fn bind_sql(&self, sql: &str) -> MemDbResult<SelectStatement> {
        let statements = parse_sql(sql)?;
        match statements.as_slice() {
            [statement] => self.bind_statement(statement),
            [] => Err(MemDbError::Plan("empty statement".to_string())),
            _ => Err(MemDbError::NotSupport(
                "only one statement per query is supported".to_string(),
            )),
        }
    }

    pub fn bind_statement(&self, statement: &Statement) -> MemDbResult<SelectStatement> {
        match statement {
            Statement::Query(query) => self.bind_query(query),
            _ => Err(MemDbError::NotSupport(format!(
                "only SELECT is supported, got {statement}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Binder;
    use crate::expression::{col, lit, AggregateFunction, AggregateFunctionKind, Expr};
    use crate::plan::SelectItem;

    #[test]
    fn binds_projection_filter_order_and_limit() {
        let stmt = Binder::new()
            .bind_sql("SELECT name, density FROM Materials WHERE density > 7.5 ORDER BY density DESC LIMIT 3;")
            .unwrap();
        assert_eq!(stmt.table, "materials");
        assert_eq!(
            stmt.items,
            vec![
                SelectItem::Expr { expr: col("name"), alias: None },
                SelectItem::Expr { expr: col("density"), alias: None },
            ]
        );
        assert_eq!(stmt.predicate, Some(col("density").gt(lit(7.5))));
        assert_eq!(stmt.order_by.len(), 1);
        assert!(!stmt.order_by[0].asc);
        assert_eq!(stmt.limit, Some(3));
        assert!(!stmt.is_aggregate());
    }

    #[test]
    fn binds_aggregates_and_negative_literals() {
        let stmt = Binder::new()
            .bind_sql("select category, count(*), avg(cost) from materials where cost >= -1 group by category")
            .unwrap();
        assert!(stmt.is_aggregate());
        assert_eq!(stmt.group_by, vec![col("category")]);
        assert_eq!(
            stmt.items[1],
            SelectItem::Expr {
                expr: Expr::AggregateFunction(
                    AggregateFunction::new(AggregateFunctionKind::Count, None).unwrap()
                ),
                alias: None,
            }
        );
        assert_eq!(stmt.predicate, Some(col("cost").gt_eq(lit(-1))));
    }

    #[test]
    fn rejects_unsupported_shapes() {
        let binder = Binder::new();
        assert!(binder.bind_sql("select * from a, b").is_err());
        assert!(binder.bind_sql("select * from a join b on a.id = b.id").is_err());
        assert!(binder.bind_sql("insert into a values (1)").is_err());
        assert!(binder.bind_sql("select 1; select 2").is_err());
        assert!(binder.bind_sql("select * from (select * from a) t").is_err());
    }
}
