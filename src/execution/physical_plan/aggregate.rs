use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::catalog::SchemaRef;
use crate::expression::{AggregateFunction, Expr, ExprTrait};
use crate::function::aggregate::{create_accumulator, Accumulator};
use crate::utils::scalar::ScalarValue;
use crate::{
    error::MemDbResult,
    execution::{ExecutionContext, VolcanoExecutor},
    storage::tuple::Tuple,
};

use super::PhysicalPlan;

/// Hash aggregation. Output columns are the group-by values followed by one
/// column per aggregate; groups come out in first-seen order.
#[derive(Debug)]
pub struct PhysicalAggregate {
    pub group_exprs: Vec<Expr>,
    pub aggr_exprs: Vec<AggregateFunction>,
    pub schema: SchemaRef,
    pub input: Arc<PhysicalPlan>,

    output_rows: Mutex<Option<Vec<Tuple>>>,
    cursor: AtomicUsize,
}

impl PhysicalAggregate {
    pub fn new(
        group_exprs: Vec<Expr>,
        aggr_exprs: Vec<AggregateFunction>,
        schema: SchemaRef,
        input: Arc<PhysicalPlan>,
    ) -> Self {
        Self {
            group_exprs,
            aggr_exprs,
            schema,
            input,
            output_rows: Mutex::new(None),
            cursor: AtomicUsize::new(0),
        }
    }

    fn new_accumulators(&self) -> MemDbResult<Vec<Box<dyn Accumulator>>> {
        let input_schema = self.input.output_schema();
        self.aggr_exprs
            .iter()
            .map(|aggr| {
                Ok(create_accumulator(
                    aggr.func_kind,
                    aggr.data_type(&input_schema)?,
                ))
            })
            .collect()
    }

    fn aggregate(&self, context: &mut ExecutionContext) -> MemDbResult<Vec<Tuple>> {
        let mut groups: Vec<(Vec<ScalarValue>, Vec<Box<dyn Accumulator>>)> = Vec::new();
        let mut slots: HashMap<Vec<ScalarValue>, usize> = HashMap::new();

        while let Some(tuple) = self.input.next(context)? {
            let mut group_key = Vec::with_capacity(self.group_exprs.len());
            for expr in &self.group_exprs {
                group_key.push(context.eval_expr(expr, &tuple)?);
            }
            let slot = match slots.get(&group_key) {
                Some(slot) => *slot,
                None => {
                    groups.push((group_key.clone(), self.new_accumulators()?));
                    slots.insert(group_key, groups.len() - 1);
                    groups.len() - 1
                }
            };
            let (_, accumulators) = &mut groups[slot];
            for (aggr, acc) in self.aggr_exprs.iter().zip(accumulators.iter_mut()) {
                acc.update_value(&aggr.evaluate(&tuple)?)?;
            }
        }

        // a global aggregate over no rows still yields one row
        if groups.is_empty() && self.group_exprs.is_empty() {
            groups.push((Vec::new(), self.new_accumulators()?));
        }
        debug!("aggregate produced {} groups", groups.len());

        groups
            .into_iter()
            .map(|(mut values, accumulators)| {
                for acc in &accumulators {
                    values.push(acc.evaluate()?);
                }
                Ok(Tuple::new(self.schema.clone(), values))
            })
            .collect()
    }
}

impl VolcanoExecutor for PhysicalAggregate {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        self.input.init(context)?;
        *self.output_rows.lock() = None;
        self.cursor.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>> {
        let mut output_rows = self.output_rows.lock();
        if output_rows.is_none() {
            *output_rows = Some(self.aggregate(context)?);
        }
        let cursor = self.cursor.fetch_add(1, Ordering::SeqCst);
        let tuple = output_rows
            .as_ref()
            .and_then(|rows| rows.get(cursor).cloned());
        if tuple.is_some() {
            context.record_row();
        }
        Ok(tuple)
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl std::fmt::Display for PhysicalAggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let aggrs = self
            .aggr_exprs
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        if self.group_exprs.is_empty() {
            write!(f, "Aggregate: {aggrs}")
        } else {
            let groups = self
                .group_exprs
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "Aggregate: {aggrs} group by {groups}")
        }
    }
}
