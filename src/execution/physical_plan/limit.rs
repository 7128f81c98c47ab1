use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::catalog::SchemaRef;
use crate::{
    error::MemDbResult,
    execution::{ExecutionContext, VolcanoExecutor},
    storage::tuple::Tuple,
};

use super::PhysicalPlan;

/// Skip `offset` rows, then pass at most `limit` through. Stops pulling the
/// input once the limit is reached.
#[derive(Debug)]
pub struct PhysicalLimit {
    pub limit: Option<usize>,
    pub offset: usize,
    pub input: Arc<PhysicalPlan>,

    cursor: AtomicUsize,
}

impl PhysicalLimit {
    pub fn new(limit: Option<usize>, offset: usize, input: Arc<PhysicalPlan>) -> Self {
        PhysicalLimit {
            limit,
            offset,
            input,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl VolcanoExecutor for PhysicalLimit {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        self.input.init(context)?;
        self.cursor.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>> {
        loop {
            let cursor = self.cursor.load(Ordering::SeqCst);
            if let Some(limit) = self.limit {
                if cursor >= self.offset + limit {
                    return Ok(None);
                }
            }
            let Some(tuple) = self.input.next(context)? else {
                return Ok(None);
            };
            self.cursor.fetch_add(1, Ordering::SeqCst);
            if cursor >= self.offset {
                context.record_row();
                return Ok(Some(tuple));
            }
        }
    }

    fn output_schema(&self) -> SchemaRef {
        self.input.output_schema()
    }
}

impl std::fmt::Display for PhysicalLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.limit {
            Some(limit) => write!(f, "Limit: {limit}, offset: {}", self.offset),
            None => write!(f, "Limit: None, offset: {}", self.offset),
        }
    }
}
