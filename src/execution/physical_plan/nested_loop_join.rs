use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::catalog::SchemaRef;
use crate::expression::Expr;
use crate::{
    error::MemDbResult,
    execution::{ExecutionContext, VolcanoExecutor},
    storage::tuple::Tuple,
};

use super::join::join_pair;
use super::PhysicalPlan;

/// Tuple-at-a-time nested loop: the right input is restarted for every left tuple.
#[derive(Debug)]
pub struct PhysicalNestedLoopJoin {
    pub condition: Option<Expr>,
    pub left_input: Arc<PhysicalPlan>,
    pub right_input: Arc<PhysicalPlan>,
    pub schema: SchemaRef,

    left_tuple: Mutex<Option<Tuple>>,
}

impl PhysicalNestedLoopJoin {
    pub fn new(
        condition: Option<Expr>,
        left_input: Arc<PhysicalPlan>,
        right_input: Arc<PhysicalPlan>,
        schema: SchemaRef,
    ) -> Self {
        PhysicalNestedLoopJoin {
            condition,
            left_input,
            right_input,
            schema,
            left_tuple: Mutex::new(None),
        }
    }
}

impl VolcanoExecutor for PhysicalNestedLoopJoin {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        debug!("init nested loop join executor");
        self.left_input.init(context)?;
        self.right_input.init(context)?;
        *self.left_tuple.lock() = None;
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>> {
        let mut left_tuple = self.left_tuple.lock();
        loop {
            if left_tuple.is_none() {
                match self.left_input.next(context)? {
                    Some(tuple) => *left_tuple = Some(tuple),
                    None => return Ok(None),
                }
            }
            let Some(left) = left_tuple.as_ref() else {
                return Ok(None);
            };
            while let Some(right) = self.right_input.next(context)? {
                if let Some(joined) =
                    join_pair(context, &self.schema, self.condition.as_ref(), left, &right)?
                {
                    return Ok(Some(joined));
                }
            }
            // right side exhausted for this left tuple
            *left_tuple = None;
            self.right_input.init(context)?;
        }
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl std::fmt::Display for PhysicalNestedLoopJoin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.condition {
            Some(condition) => write!(f, "NestedLoopJoin: {condition}"),
            None => write!(f, "NestedLoopJoin"),
        }
    }
}
