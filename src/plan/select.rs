use crate::execution::physical_plan::OrderByExpr;
use crate::expression::Expr;

/// One entry of the SELECT list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Wildcard,
    Expr { expr: Expr, alias: Option<String> },
}

/// A bound single-table query:
/// `SELECT items FROM table [WHERE ..] [GROUP BY ..] [ORDER BY ..] [LIMIT n [OFFSET m]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub table: String,
    pub items: Vec<SelectItem>,
    pub predicate: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl SelectStatement {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into().to_lowercase(),
            items: vec![SelectItem::Wildcard],
            predicate: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        !self.group_by.is_empty()
            || self.items.iter().any(|item| {
                matches!(
                    item,
                    SelectItem::Expr {
                        expr: Expr::AggregateFunction(_),
                        ..
                    }
                )
            })
    }
}
