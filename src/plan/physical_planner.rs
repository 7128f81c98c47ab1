use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::catalog::{Column, Schema, SchemaRef};
use crate::config::OptimizerConfig;
use crate::cost::JoinAlgorithm;
use crate::error::{MemDbError, MemDbResult};
use crate::execution::physical_plan::{
    PhysicalAggregate, PhysicalBlockNestedLoopJoin, PhysicalFilter, PhysicalGraceHashJoin,
    PhysicalHashJoin, PhysicalIndexNestedLoopJoin, PhysicalIndexRangeScan, PhysicalIndexScan,
    OrderByExpr, PhysicalLimit, PhysicalNestedLoopJoin, PhysicalPlan, PhysicalProject, PhysicalSeqScan,
    PhysicalSort, PhysicalSortMergeJoin,
};
use crate::execution::VolcanoExecutor;
use crate::expression::{col, AggregateFunction, ColumnExpr, Expr, ExprTrait};
use crate::optimizer::{AccessPath, AccessPlan, JoinCondition, JoinTree};
use crate::plan::{SelectItem, SelectStatement};
use crate::storage::Table;

/// Builds executable operator trees from bound queries and optimizer output.
pub struct PhysicalPlanner<'a> {
    tables: &'a HashMap<String, Table>,
    config: OptimizerConfig,
}

impl<'a> PhysicalPlanner<'a> {
    pub fn new(tables: &'a HashMap<String, Table>, config: OptimizerConfig) -> Self {
        Self { tables, config }
    }

    fn table(&self, name: &str) -> MemDbResult<&'a Table> {
        self.tables
            .get(&name.to_lowercase())
            .ok_or_else(|| MemDbError::NotFound(format!("table {name}")))
    }

    /// Scan of `table` along `access`, with `predicate` re-checked on every row.
    pub fn plan_access(
        &self,
        table: &str,
        access: &AccessPlan,
        predicate: Option<&Expr>,
    ) -> MemDbResult<PhysicalPlan> {
        let table = self.table(table)?;
        let schema = table.schema();
        let predicate = predicate.cloned();
        Ok(match &access.path {
            AccessPath::SeqScan => {
                PhysicalPlan::SeqScan(PhysicalSeqScan::new(table.name.clone(), schema, predicate))
            }
            AccessPath::IndexScan { index, predicate: key } => PhysicalPlan::IndexScan(
                PhysicalIndexScan::new(table.name.clone(), index.clone(), schema, key.clone(), predicate),
            ),
            AccessPath::IndexRangeScan { index, predicate: key } => {
                PhysicalPlan::IndexRangeScan(PhysicalIndexRangeScan::new(
                    table.name.clone(),
                    index.clone(),
                    schema,
                    key.clone(),
                    predicate,
                ))
            }
        })
    }

    /// Scan, then aggregate or sort, project and limit.
    pub fn plan_select(&self, stmt: &SelectStatement, access: &AccessPlan) -> MemDbResult<PhysicalPlan> {
        let scan = self.plan_access(&stmt.table, access, stmt.predicate.as_ref())?;
        let plan = if stmt.is_aggregate() {
            let plan = self.plan_aggregate(stmt, scan)?;
            self.plan_sort(plan, aggregate_order_by(stmt))
        } else {
            // sort below the projection so ORDER BY may name unprojected columns
            let plan = self.plan_sort(scan, stmt.order_by.clone());
            self.plan_projection(plan, &stmt.items)?
        };
        let plan = if stmt.limit.is_some() || stmt.offset > 0 {
            PhysicalPlan::Limit(PhysicalLimit::new(stmt.limit, stmt.offset, Arc::new(plan)))
        } else {
            plan
        };
        debug!("planned select on {}: {}", stmt.table, plan);
        Ok(plan)
    }

    fn plan_sort(&self, input: PhysicalPlan, order_by: Vec<OrderByExpr>) -> PhysicalPlan {
        if order_by.is_empty() {
            return input;
        }
        PhysicalPlan::Sort(PhysicalSort::new(order_by, Arc::new(input)))
    }

    fn plan_projection(&self, input: PhysicalPlan, items: &[SelectItem]) -> MemDbResult<PhysicalPlan> {
        if items.iter().all(|item| matches!(item, SelectItem::Wildcard)) {
            return Ok(input);
        }
        let input_schema = input.output_schema();
        let mut exprs = Vec::new();
        let mut columns = Vec::new();
        for item in items {
            match item {
                SelectItem::Wildcard => {
                    for column in input_schema.columns.iter() {
                        exprs.push(Expr::Column(ColumnExpr {
                            relation: column.relation.clone(),
                            name: column.name.clone(),
                        }));
                        columns.push(column.as_ref().clone());
                    }
                }
                SelectItem::Expr { expr, alias } => {
                    let column = expr.to_column(&input_schema)?;
                    let column = match alias {
                        Some(alias) => Column::new(alias.clone(), column.data_type, column.nullable),
                        None => column,
                    };
                    exprs.push(expr.clone());
                    columns.push(column);
                }
            }
        }
        let schema = Arc::new(Schema::try_merge(vec![Schema::new(columns)])?);
        Ok(PhysicalPlan::Project(PhysicalProject::new(
            exprs,
            schema,
            Arc::new(input),
        )))
    }

    /// Aggregate over the group keys, then project into SELECT-list order.
    fn plan_aggregate(&self, stmt: &SelectStatement, input: PhysicalPlan) -> MemDbResult<PhysicalPlan> {
        let input_schema = input.output_schema();
        let mut aggr_exprs: Vec<AggregateFunction> = Vec::new();
        for item in &stmt.items {
            match item {
                SelectItem::Wildcard => {
                    return Err(MemDbError::Plan(
                        "SELECT * cannot be combined with aggregates".to_string(),
                    ))
                }
                SelectItem::Expr {
                    expr: Expr::AggregateFunction(aggr),
                    ..
                } => {
                    if !aggr_exprs.contains(aggr) {
                        aggr_exprs.push(aggr.clone());
                    }
                }
                SelectItem::Expr { expr, .. } => {
                    if !stmt.group_by.contains(expr) {
                        return Err(MemDbError::Plan(format!(
                            "{expr} must appear in GROUP BY or be used in an aggregate"
                        )));
                    }
                }
            }
        }

        let mut columns = Vec::new();
        for expr in &stmt.group_by {
            columns.push(expr.to_column(&input_schema)?);
        }
        for aggr in &aggr_exprs {
            columns.push(aggr.to_column(&input_schema)?);
        }
        let aggregate_schema: SchemaRef = Arc::new(Schema::new(columns));
        let aggregate = PhysicalPlan::Aggregate(PhysicalAggregate::new(
            stmt.group_by.clone(),
            aggr_exprs,
            aggregate_schema.clone(),
            Arc::new(input),
        ));

        // re-address SELECT items by the aggregate's output columns
        let mut exprs = Vec::new();
        let mut columns = Vec::new();
        for item in &stmt.items {
            let SelectItem::Expr { expr, alias } = item else {
                continue;
            };
            let position = match expr {
                Expr::AggregateFunction(_) => aggregate_schema
                    .columns
                    .iter()
                    .skip(stmt.group_by.len())
                    .position(|c| c.name == expr.to_string())
                    .map(|p| p + stmt.group_by.len()),
                _ => stmt.group_by.iter().position(|g| g == expr),
            }
            .ok_or_else(|| MemDbError::Internal(format!("lost aggregate output for {expr}")))?;
            let source = aggregate_schema.column_with_index(position)?;
            exprs.push(Expr::Column(ColumnExpr {
                relation: source.relation.clone(),
                name: source.name.clone(),
            }));
            let name = alias.clone().unwrap_or_else(|| source.name.clone());
            columns.push(Column::new(name, source.data_type, source.nullable));
        }
        Ok(PhysicalPlan::Project(PhysicalProject::new(
            exprs,
            Arc::new(Schema::new(columns)),
            Arc::new(aggregate),
        )))
    }

    /// Operator tree for an optimized join order. `filter` runs above the joins.
    pub fn plan_join_tree(&self, tree: &JoinTree, filter: Option<&Expr>) -> MemDbResult<PhysicalPlan> {
        let plan = self.plan_join_node(tree)?;
        Ok(match filter {
            Some(filter) => PhysicalPlan::Filter(PhysicalFilter::new(filter.clone(), Arc::new(plan))),
            None => plan,
        })
    }

    fn plan_join_node(&self, tree: &JoinTree) -> MemDbResult<PhysicalPlan> {
        let (left, right, algorithm, conditions) = match tree {
            JoinTree::Table { name, .. } => {
                let table = self.table(name)?;
                return Ok(PhysicalPlan::SeqScan(PhysicalSeqScan::new(
                    table.name.clone(),
                    table.schema(),
                    None,
                )));
            }
            JoinTree::Join {
                left,
                right,
                algorithm,
                conditions,
                ..
            } => (left, right, *algorithm, conditions),
        };

        let left_plan = Arc::new(self.plan_join_node(left)?);
        let right_plan = Arc::new(self.plan_join_node(right)?);
        let schema = Arc::new(Schema::try_merge(vec![
            left_plan.output_schema().as_ref().clone(),
            right_plan.output_schema().as_ref().clone(),
        ])?);

        let key = conditions.first();
        let residual = conjunction(conditions.iter().skip(1).map(condition_expr));
        let all_conditions = conjunction(conditions.iter().map(condition_expr));
        let keys = key.map(|k| {
            (
                col(&format!("{}.{}", k.left_table, k.left_column)),
                col(&format!("{}.{}", k.right_table, k.right_column)),
            )
        });
        if algorithm.requires_equi_key() && keys.is_none() {
            return Err(MemDbError::Plan(format!(
                "{algorithm} join needs an equi-join condition"
            )));
        }

        let plan = match (algorithm, key, keys) {
            (JoinAlgorithm::IndexNestedLoop, Some(key), Some((left_key, _))) => {
                let JoinTree::Table { name, .. } = right.as_ref() else {
                    return Err(MemDbError::Plan(
                        "index nested loop join needs a base table on the inner side".to_string(),
                    ));
                };
                let table = self.table(name)?;
                let index = table.index_on(&key.right_column, false).ok_or_else(|| {
                    MemDbError::Plan(format!(
                        "no index on {}.{} for index nested loop join",
                        name, key.right_column
                    ))
                })?;
                PhysicalPlan::IndexNestedLoopJoin(PhysicalIndexNestedLoopJoin::new(
                    left_key,
                    table.name.clone(),
                    index.name.clone(),
                    key.right_column.clone(),
                    table.schema(),
                    residual,
                    left_plan,
                    schema,
                ))
            }
            (JoinAlgorithm::Hash, _, Some((left_key, right_key))) => {
                PhysicalPlan::HashJoin(PhysicalHashJoin::new(
                    left_key, right_key, residual, left_plan, right_plan, schema,
                ))
            }
            (JoinAlgorithm::GraceHash, _, Some((left_key, right_key))) => {
                PhysicalPlan::GraceHashJoin(PhysicalGraceHashJoin::new(
                    left_key,
                    right_key,
                    residual,
                    self.config.grace_partitions.max(1),
                    left_plan,
                    right_plan,
                    schema,
                ))
            }
            (JoinAlgorithm::SortMerge, _, Some((left_key, right_key))) => {
                PhysicalPlan::SortMergeJoin(PhysicalSortMergeJoin::new(
                    left_key, right_key, residual, left_plan, right_plan, schema,
                ))
            }
            (JoinAlgorithm::BlockNestedLoop, _, _) => {
                PhysicalPlan::BlockNestedLoopJoin(PhysicalBlockNestedLoopJoin::new(
                    all_conditions,
                    self.config.block_size.max(1),
                    left_plan,
                    right_plan,
                    schema,
                ))
            }
            _ => PhysicalPlan::NestedLoopJoin(PhysicalNestedLoopJoin::new(
                all_conditions,
                left_plan,
                right_plan,
                schema,
            )),
        };
        Ok(plan)
    }
}

/// ORDER BY over aggregate output: aggregate calls become references to their
/// output column.
fn aggregate_order_by(stmt: &SelectStatement) -> Vec<OrderByExpr> {
    stmt.order_by
        .iter()
        .map(|order| {
            let mut order = order.clone();
            if let Expr::AggregateFunction(_) = &order.expr {
                let name = stmt
                    .items
                    .iter()
                    .find_map(|item| match item {
                        SelectItem::Expr { expr, alias } if *expr == order.expr => {
                            Some(alias.clone().unwrap_or_else(|| expr.to_string()))
                        }
                        _ => None,
                    })
                    .unwrap_or_else(|| order.expr.to_string());
                order.expr = Expr::Column(ColumnExpr {
                    relation: None,
                    name,
                });
            }
            order
        })
        .collect()
}

fn condition_expr(condition: &JoinCondition) -> Expr {
    col(&format!("{}.{}", condition.left_table, condition.left_column)).eq(col(&format!(
        "{}.{}",
        condition.right_table, condition.right_column
    )))
}

fn conjunction(exprs: impl Iterator<Item = Expr>) -> Option<Expr> {
    exprs.reduce(|acc, e| acc.and(e))
}
