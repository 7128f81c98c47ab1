use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::catalog::SchemaRef;
use crate::expression::Expr;
use crate::{
    error::{MemDbError, MemDbResult},
    execution::{ExecutionContext, VolcanoExecutor},
    storage::tuple::Tuple,
};

use super::join::join_pair;
use super::PhysicalPlan;

#[derive(Debug, Default)]
struct BlockState {
    block: Vec<Tuple>,
    right: Option<Tuple>,
    pos: usize,
    left_done: bool,
}

/// Nested loop that buffers `block_size` left tuples and scans the right input
/// once per block instead of once per tuple.
#[derive(Debug)]
pub struct PhysicalBlockNestedLoopJoin {
    pub condition: Option<Expr>,
    pub block_size: usize,
    pub left_input: Arc<PhysicalPlan>,
    pub right_input: Arc<PhysicalPlan>,
    pub schema: SchemaRef,

    state: Mutex<BlockState>,
}

impl PhysicalBlockNestedLoopJoin {
    pub fn new(
        condition: Option<Expr>,
        block_size: usize,
        left_input: Arc<PhysicalPlan>,
        right_input: Arc<PhysicalPlan>,
        schema: SchemaRef,
    ) -> Self {
        Self {
            condition,
            block_size,
            left_input,
            right_input,
            schema,
            state: Mutex::new(BlockState::default()),
        }
    }

    fn fill_block(&self, context: &mut ExecutionContext, state: &mut BlockState) -> MemDbResult<()> {
        while state.block.len() < self.block_size {
            match self.left_input.next(context)? {
                Some(tuple) => state.block.push(tuple),
                None => {
                    state.left_done = true;
                    break;
                }
            }
        }
        Ok(())
    }
}

impl VolcanoExecutor for PhysicalBlockNestedLoopJoin {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        if self.block_size == 0 {
            return Err(MemDbError::Plan(
                "block nested loop join needs a block size of at least 1".to_string(),
            ));
        }
        debug!("init block nested loop join, block size {}", self.block_size);
        self.left_input.init(context)?;
        *self.state.lock() = BlockState::default();
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        loop {
            if let Some(right) = &state.right {
                while state.pos < state.block.len() {
                    let left = &state.block[state.pos];
                    state.pos += 1;
                    if let Some(joined) =
                        join_pair(context, &self.schema, self.condition.as_ref(), left, right)?
                    {
                        return Ok(Some(joined));
                    }
                }
                state.right = None;
            }

            if state.block.is_empty() {
                if state.left_done {
                    return Ok(None);
                }
                self.fill_block(context, state)?;
                if state.block.is_empty() {
                    return Ok(None);
                }
                // one full right pass per block
                self.right_input.init(context)?;
            }

            match self.right_input.next(context)? {
                Some(right) => {
                    state.right = Some(right);
                    state.pos = 0;
                }
                None => state.block.clear(),
            }
        }
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl std::fmt::Display for PhysicalBlockNestedLoopJoin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockNestedLoopJoin: block={}", self.block_size)?;
        if let Some(condition) = &self.condition {
            write!(f, " {condition}")?;
        }
        Ok(())
    }
}
