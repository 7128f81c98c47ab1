use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
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

use super::hash_join::HashTable;
use super::join::{fmt_keys, join_key, join_pair};
use super::PhysicalPlan;

type Partition = Vec<(ScalarValue, Tuple)>;

#[derive(Debug, Default)]
struct GraceState {
    left_parts: Vec<Partition>,
    right_parts: Vec<Partition>,
    partition: usize,
    table: Option<HashTable>,
    left_pos: usize,
    left: Option<Tuple>,
    matches: Vec<usize>,
    match_pos: usize,
}

/// Partitions both inputs on the key hash, then hash-joins each partition pair.
/// Only one partition's build table is resident at a time.
#[derive(Debug)]
pub struct PhysicalGraceHashJoin {
    pub left_key: Expr,
    pub right_key: Expr,
    pub residual: Option<Expr>,
    pub partitions: usize,
    pub left_input: Arc<PhysicalPlan>,
    pub right_input: Arc<PhysicalPlan>,
    pub schema: SchemaRef,

    state: Mutex<Option<GraceState>>,
}

impl PhysicalGraceHashJoin {
    pub fn new(
        left_key: Expr,
        right_key: Expr,
        residual: Option<Expr>,
        partitions: usize,
        left_input: Arc<PhysicalPlan>,
        right_input: Arc<PhysicalPlan>,
        schema: SchemaRef,
    ) -> Self {
        Self {
            left_key,
            right_key,
            residual,
            partitions,
            left_input,
            right_input,
            schema,
            state: Mutex::new(None),
        }
    }

    fn partition_of(&self, key: &ScalarValue) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as usize
    }

    fn partition_input(
        &self,
        context: &mut ExecutionContext,
        input: &PhysicalPlan,
        key_expr: &Expr,
    ) -> MemDbResult<Vec<Partition>> {
        let mut parts: Vec<Partition> = (0..self.partitions).map(|_| Vec::new()).collect();
        while let Some(tuple) = input.next(context)? {
            if let Some(key) = join_key(context, key_expr, &tuple)? {
                let idx = self.partition_of(&key);
                parts[idx].push((key, tuple));
            }
        }
        Ok(parts)
    }
}

impl VolcanoExecutor for PhysicalGraceHashJoin {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        if self.partitions == 0 {
            return Err(MemDbError::Plan(
                "grace hash join needs at least one partition".to_string(),
            ));
        }
        self.left_input.init(context)?;
        self.right_input.init(context)?;
        let left_parts = self.partition_input(context, &self.left_input, &self.left_key)?;
        let right_parts = self.partition_input(context, &self.right_input, &self.right_key)?;
        debug!(
            "grace hash join partitioned {} left / {} right rows into {} partitions",
            left_parts.iter().map(Vec::len).sum::<usize>(),
            right_parts.iter().map(Vec::len).sum::<usize>(),
            self.partitions
        );
        *self.state.lock() = Some(GraceState {
            left_parts,
            right_parts,
            ..Default::default()
        });
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or_else(|| {
            MemDbError::Execution("grace hash join stream not initialized".to_string())
        })?;
        loop {
            if state.partition >= self.partitions {
                return Ok(None);
            }
            if state.table.is_none() {
                let mut table = HashTable::default();
                for (key, tuple) in std::mem::take(&mut state.right_parts[state.partition]) {
                    table.insert(key, tuple);
                }
                state.table = Some(table);
                state.left_pos = 0;
                state.left = None;
            }
            let Some(table) = state.table.as_ref() else {
                continue;
            };

            if let Some(left) = &state.left {
                while state.match_pos < state.matches.len() {
                    let right = table.row(state.matches[state.match_pos]);
                    state.match_pos += 1;
                    if let Some(joined) =
                        join_pair(context, &self.schema, self.residual.as_ref(), left, right)?
                    {
                        return Ok(Some(joined));
                    }
                }
                state.left = None;
            }

            let probes = &state.left_parts[state.partition];
            if state.left_pos < probes.len() {
                let (key, tuple) = &probes[state.left_pos];
                state.left_pos += 1;
                state.matches = table.matches(key);
                state.match_pos = 0;
                state.left = Some(tuple.clone());
                continue;
            }

            // partition drained; release its build table
            state.partition += 1;
            state.table = None;
        }
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl std::fmt::Display for PhysicalGraceHashJoin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_keys(
            f,
            "GraceHashJoin",
            &self.left_key,
            &self.right_key,
            self.residual.as_ref(),
        )?;
        write!(f, " partitions={}", self.partitions)
    }
}
