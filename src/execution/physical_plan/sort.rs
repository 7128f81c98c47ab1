//! Full in-memory sort operator.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::catalog::SchemaRef;
use crate::expression::Expr;
use crate::utils::scalar::ScalarValue;
use crate::{
    error::MemDbResult,
    execution::{ExecutionContext, VolcanoExecutor},
    storage::tuple::Tuple,
};

use super::PhysicalPlan;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub asc: bool,
    pub nulls_first: bool,
}

impl OrderByExpr {
    /// NULLs sort low: first when ascending, last when descending.
    pub fn new(expr: Expr, asc: bool) -> Self {
        Self {
            expr,
            asc,
            nulls_first: asc,
        }
    }

    fn compare(&self, left: &ScalarValue, right: &ScalarValue) -> CmpOrdering {
        match (left.is_null(), right.is_null()) {
            (true, true) => CmpOrdering::Equal,
            (true, false) if self.nulls_first => CmpOrdering::Less,
            (true, false) => CmpOrdering::Greater,
            (false, true) if self.nulls_first => CmpOrdering::Greater,
            (false, true) => CmpOrdering::Less,
            (false, false) if self.asc => left.total_cmp(right),
            (false, false) => right.total_cmp(left),
        }
    }
}

impl std::fmt::Display for OrderByExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}",
            self.expr,
            if self.asc { "ASC" } else { "DESC" }
        )
    }
}

#[derive(Debug)]
pub struct PhysicalSort {
    pub order_bys: Vec<OrderByExpr>,
    pub input: Arc<PhysicalPlan>,

    all_tuples: Mutex<Option<Vec<Tuple>>>,
    cursor: AtomicUsize,
}

impl PhysicalSort {
    pub fn new(order_bys: Vec<OrderByExpr>, input: Arc<PhysicalPlan>) -> Self {
        PhysicalSort {
            order_bys,
            input,
            all_tuples: Mutex::new(None),
            cursor: AtomicUsize::new(0),
        }
    }

    fn compare_keys(&self, left: &[ScalarValue], right: &[ScalarValue]) -> CmpOrdering {
        self.order_bys
            .iter()
            .zip(left.iter().zip(right.iter()))
            .map(|(order, (l, r))| order.compare(l, r))
            .find(|ordering| *ordering != CmpOrdering::Equal)
            .unwrap_or(CmpOrdering::Equal)
    }
}

impl VolcanoExecutor for PhysicalSort {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        self.input.init(context)?;
        *self.all_tuples.lock() = None;
        self.cursor.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>> {
        let mut all_tuples = self.all_tuples.lock();
        if all_tuples.is_none() {
            let mut keyed_rows: Vec<(Tuple, Vec<ScalarValue>)> = Vec::new();
            while let Some(tuple) = self.input.next(context)? {
                let mut keys = Vec::with_capacity(self.order_bys.len());
                for order in &self.order_bys {
                    keys.push(context.eval_expr(&order.expr, &tuple)?);
                }
                keyed_rows.push((tuple, keys));
            }
            // stable, so equal keys keep their input order
            keyed_rows.sort_by(|(_, left_keys), (_, right_keys)| {
                self.compare_keys(left_keys, right_keys)
            });
            *all_tuples = Some(keyed_rows.into_iter().map(|(tuple, _)| tuple).collect());
        }

        let cursor = self.cursor.fetch_add(1, Ordering::SeqCst);
        let tuple = all_tuples
            .as_ref()
            .and_then(|tuples| tuples.get(cursor).cloned());
        if tuple.is_some() {
            context.record_row();
        }
        Ok(tuple)
    }

    fn output_schema(&self) -> SchemaRef {
        self.input.output_schema()
    }
}

impl std::fmt::Display for PhysicalSort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sort: {}",
            self.order_bys
                .iter()
                .map(|e| format!("{e}"))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}
