use std::collections::HashMap;
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

/// In-memory build side: key -> positions in `rows`.
#[derive(Debug, Default)]
pub(crate) struct HashTable {
    rows: Vec<Tuple>,
    slots: HashMap<ScalarValue, Vec<usize>>,
}

impl HashTable {
    pub(crate) fn insert(&mut self, key: ScalarValue, tuple: Tuple) {
        self.rows.push(tuple);
        self.slots.entry(key).or_default().push(self.rows.len() - 1);
    }

    pub(crate) fn matches(&self, key: &ScalarValue) -> Vec<usize> {
        self.slots.get(key).cloned().unwrap_or_default()
    }

    pub(crate) fn row(&self, pos: usize) -> &Tuple {
        &self.rows[pos]
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    table: HashTable,
    left: Option<Tuple>,
    matches: Vec<usize>,
    pos: usize,
}

/// Classic hash join: build on the right input, stream the left input as probes.
#[derive(Debug)]
pub struct PhysicalHashJoin {
    pub left_key: Expr,
    pub right_key: Expr,
    pub residual: Option<Expr>,
    pub left_input: Arc<PhysicalPlan>,
    pub right_input: Arc<PhysicalPlan>,
    pub schema: SchemaRef,

    state: Mutex<Option<ProbeState>>,
}

impl PhysicalHashJoin {
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
}

impl VolcanoExecutor for PhysicalHashJoin {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        self.left_input.init(context)?;
        self.right_input.init(context)?;
        let mut table = HashTable::default();
        while let Some(tuple) = self.right_input.next(context)? {
            if let Some(key) = join_key(context, &self.right_key, &tuple)? {
                table.insert(key, tuple);
            }
        }
        debug!("hash join built {} rows on {}", table.len(), self.right_key);
        *self.state.lock() = Some(ProbeState {
            table,
            ..Default::default()
        });
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>> {
        let mut guard = self.state.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| MemDbError::Execution("hash join stream not initialized".to_string()))?;
        loop {
            if let Some(left) = &state.left {
                while state.pos < state.matches.len() {
                    let right = state.table.row(state.matches[state.pos]);
                    state.pos += 1;
                    if let Some(joined) =
                        join_pair(context, &self.schema, self.residual.as_ref(), left, right)?
                    {
                        return Ok(Some(joined));
                    }
                }
                state.left = None;
            }
            let Some(left) = self.left_input.next(context)? else {
                return Ok(None);
            };
            state.matches = match join_key(context, &self.left_key, &left)? {
                Some(key) => state.table.matches(&key),
                None => Vec::new(),
            };
            state.pos = 0;
            state.left = Some(left);
        }
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl std::fmt::Display for PhysicalHashJoin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_keys(
            f,
            "HashJoin",
            &self.left_key,
            &self.right_key,
            self.residual.as_ref(),
        )
    }
}
