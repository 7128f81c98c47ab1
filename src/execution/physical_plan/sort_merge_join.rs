use std::cmp::Ordering;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::catalog::SchemaRef;
use crate::expression::Expr;
use crate::utils::scalar::ScalarValue;
use crate::{
    error::{MemDbError, MemDbResult},
    execution::{ExecutionContext, VolcanoExecutor},
    storage::tuple::Tuple,
};

use super::join::{fmt_keys, join_key, join_pair};
use super::PhysicalPlan;

type KeyedRows = Vec<(ScalarValue, Tuple)>;

/// Cross product of one run of equal keys on each side.
#[derive(Debug)]
struct EqualGroup {
    left_end: usize,
    right_start: usize,
    right_end: usize,
    li: usize,
    rj: usize,
}

#[derive(Debug, Default)]
struct MergeState {
    left: KeyedRows,
    right: KeyedRows,
    i: usize,
    j: usize,
    group: Option<EqualGroup>,
}

/// Sorts both inputs on the key and merges them. Runs of duplicate keys are
/// expanded into their full cross product.
#[derive(Debug)]
pub struct PhysicalSortMergeJoin {
    pub left_key: Expr,
    pub right_key: Expr,
    pub residual: Option<Expr>,
    pub left_input: Arc<PhysicalPlan>,
    pub right_input: Arc<PhysicalPlan>,
    pub schema: SchemaRef,

    state: Mutex<Option<MergeState>>,
}

impl PhysicalSortMergeJoin {
    pub fn new(
        left_key: Expr,
        right_key: Expr,
        residual: Option<Expr>,
        left_input: Arc<PhysicalPlan>,
        right_input: Arc<PhysicalPlan>,
        schema: SchemaRef,
    ) -> Self {
        Self {
            left_key,
            right_key,
            residual,
            left_input,
            right_input,
            schema,
            state: Mutex::new(None),
        }
    }

    fn sorted_input(
        context: &mut ExecutionContext,
        input: &PhysicalPlan,
        key_expr: &Expr,
    ) -> MemDbResult<KeyedRows> {
        let mut rows = Vec::new();
        while let Some(tuple) = input.next(context)? {
            if let Some(key) = join_key(context, key_expr, &tuple)? {
                rows.push((key, tuple));
            }
        }
        rows.sort_by(|(a, _), (b, _)| a.total_cmp(b));
        Ok(rows)
    }
}

fn run_end(rows: &KeyedRows, start: usize) -> usize {
    let key = &rows[start].0;
    start
        + rows[start..]
            .iter()
            .take_while(|(k, _)| k.total_cmp(key) == Ordering::Equal)
            .count()
}

impl VolcanoExecutor for PhysicalSortMergeJoin {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        self.left_input.init(context)?;
        self.right_input.init(context)?;
        let left = Self::sorted_input(context, &self.left_input, &self.left_key)?;
        let right = Self::sorted_input(context, &self.right_input, &self.right_key)?;
        debug!(
            "sort merge join sorted {} left / {} right rows",
            left.len(),
            right.len()
        );
        *self.state.lock() = Some(MergeState {
            left,
            right,
            ..Default::default()
        });
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or_else(|| {
            MemDbError::Execution("sort merge join stream not initialized".to_string())
        })?;
        loop {
            if let Some(group) = state.group.as_mut() {
                while group.li < group.left_end {
                    if group.rj < group.right_end {
                        let left = &state.left[group.li].1;
                        let right = &state.right[group.rj].1;
                        group.rj += 1;
                        if let Some(joined) =
                            join_pair(context, &self.schema, self.residual.as_ref(), left, right)?
                        {
                            return Ok(Some(joined));
                        }
                    } else {
                        group.li += 1;
                        group.rj = group.right_start;
                    }
                }
                state.group = None;
            }

            if state.i >= state.left.len() || state.j >= state.right.len() {
                return Ok(None);
            }
            match state.left[state.i].0.total_cmp(&state.right[state.j].0) {
                Ordering::Less => state.i += 1,
                Ordering::Greater => state.j += 1,
                Ordering::Equal => {
                    let left_end = run_end(&state.left, state.i);
                    let right_end = run_end(&state.right, state.j);
                    state.group = Some(EqualGroup {
                        left_end,
                        right_start: state.j,
                        right_end,
                        li: state.i,
                        rj: state.j,
                    });
                    state.i = left_end;
                    state.j = right_end;
                }
            }
        }
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl std::fmt::Display for PhysicalSortMergeJoin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_keys(
            f,
            "SortMergeJoin",
            &self.left_key,
            &self.right_key,
            self.residual.as_ref(),
        )
    }
}
