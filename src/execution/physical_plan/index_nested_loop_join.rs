use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::catalog::SchemaRef;
use crate::expression::{ColumnPredicate, Expr, PredicateOp};
use crate::storage::tuple::RowId;
use crate::storage::Table;
use crate::utils::scalar::ScalarValue;
use crate::{
    error::{MemDbError, MemDbResult},
    execution::{ExecutionContext, VolcanoExecutor},
    storage::tuple::Tuple,
};

use super::join::{join_key, join_pair};
use super::PhysicalPlan;

#[derive(Debug, Default)]
struct ProbeState {
    left: Option<Tuple>,
    row_ids: VecDeque<RowId>,
}

/// For each left tuple, probe an index on the right base table with the left key.
#[derive(Debug)]
pub struct PhysicalIndexNestedLoopJoin {
    pub left_key: Expr,
    pub right_table: String,
    pub right_index: String,
    pub right_column: String,
    pub right_schema: SchemaRef,
    pub residual: Option<Expr>,
    pub left_input: Arc<PhysicalPlan>,
    pub schema: SchemaRef,

    state: Mutex<ProbeState>,
}

impl PhysicalIndexNestedLoopJoin {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        left_key: Expr,
        right_table: impl Into<String>,
        right_index: impl Into<String>,
        right_column: impl Into<String>,
        right_schema: SchemaRef,
        residual: Option<Expr>,
        left_input: Arc<PhysicalPlan>,
        schema: SchemaRef,
    ) -> Self {
        Self {
            left_key,
            right_table: right_table.into(),
            right_index: right_index.into(),
            right_column: right_column.into(),
            right_schema,
            residual,
            left_input,
            schema,
            state: Mutex::new(ProbeState::default()),
        }
    }
}

impl PhysicalIndexNestedLoopJoin {
    fn probe(&self, table: &Table, key: ScalarValue) -> MemDbResult<Vec<RowId>> {
        let column_type = self
            .right_schema
            .column_with_name(None, &self.right_column)?
            .data_type;
        let key_type = key.data_type();
        let comparable = key_type.same_kind(&column_type)
            || (key_type.is_numeric() && column_type.is_numeric());
        if !comparable {
            return Ok(Vec::new());
        }
        let predicate = ColumnPredicate::new(self.right_column.clone(), PredicateOp::Eq(key));
        match table.probe_index(&self.right_index, &predicate) {
            Ok(ids) => Ok(ids),
            // a fractional key cannot equal any integer column value
            Err(MemDbError::NotSupport(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

impl VolcanoExecutor for PhysicalIndexNestedLoopJoin {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        let table = context.table(&self.right_table)?;
        if table.index(&self.right_index).is_none() {
            return Err(MemDbError::NotFound(format!(
                "index {} on {}",
                self.right_index, self.right_table
            )));
        }
        debug!(
            "init index nested loop join probing {}.{}",
            self.right_table, self.right_index
        );
        self.left_input.init(context)?;
        *self.state.lock() = ProbeState::default();
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>> {
        let table = context.table(&self.right_table)?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        loop {
            if let Some(left) = &state.left {
                while let Some(row_id) = state.row_ids.pop_front() {
                    let Some(row) = table.get(row_id) else {
                        continue;
                    };
                    context.touch_page(table, row_id)?;
                    let right = Tuple::new(self.right_schema.clone(), row.clone());
                    if let Some(joined) =
                        join_pair(context, &self.schema, self.residual.as_ref(), left, &right)?
                    {
                        return Ok(Some(joined));
                    }
                }
                state.left = None;
            }
            let Some(left) = self.left_input.next(context)? else {
                return Ok(None);
            };
            if let Some(key) = join_key(context, &self.left_key, &left)? {
                state.row_ids = self.probe(table, key)?.into();
            }
            state.left = Some(left);
        }
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl std::fmt::Display for PhysicalIndexNestedLoopJoin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IndexNestedLoopJoin: {} = {}.{} using {}",
            self.left_key, self.right_table, self.right_column, self.right_index
        )?;
        if let Some(residual) = &self.residual {
            write!(f, " and {residual}")?;
        }
        Ok(())
    }
}
