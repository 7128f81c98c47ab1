pub mod physical_plan;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::{BufferPool, PageId};
use crate::catalog::SchemaRef;
use crate::error::{MemDbError, MemDbResult};
use crate::execution::physical_plan::PhysicalPlan;
use crate::expression::{Expr, ExprTrait};
use crate::storage::tuple::{RowId, Tuple};
use crate::storage::Table;
use crate::utils::scalar::ScalarValue;

/// Pull-based operator. `init` (re)starts the stream; `next` yields tuples
/// until `None`.
pub trait VolcanoExecutor {
    fn init(&self, _context: &mut ExecutionContext) -> MemDbResult<()> {
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>>;

    fn output_schema(&self) -> SchemaRef;
}

pub struct ExecutionContext<'a> {
    tables: &'a HashMap<String, Table>,
    buffer_pool: Option<&'a BufferPool>,
    rows_processed: Arc<AtomicU64>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(tables: &'a HashMap<String, Table>, rows_processed: Arc<AtomicU64>) -> Self {
        Self {
            tables,
            buffer_pool: None,
            rows_processed,
        }
    }

    /// Route heap page reads of scans through `pool`.
    pub fn with_buffer_pool(mut self, pool: &'a BufferPool) -> Self {
        self.buffer_pool = Some(pool);
        self
    }

    pub fn table(&self, name: &str) -> MemDbResult<&'a Table> {
        self.tables
            .get(&name.to_lowercase())
            .ok_or_else(|| MemDbError::NotFound(format!("table {name}")))
    }

    pub fn eval_expr(&self, expr: &Expr, tuple: &Tuple) -> MemDbResult<ScalarValue> {
        expr.evaluate(tuple)
    }

    pub fn eval_predicate(&self, predicate: &Expr, tuple: &Tuple) -> MemDbResult<bool> {
        predicate.evaluate_predicate(tuple)
    }

    /// Count one row flowing out of an operator.
    pub fn record_row(&self) {
        self.rows_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rows_processed(&self) -> u64 {
        self.rows_processed.load(Ordering::Relaxed)
    }

    /// Pin and release the heap page holding `row_id`, loading it on a miss.
    pub fn touch_page(&self, table: &Table, row_id: RowId) -> MemDbResult<PageId> {
        let page_id = table.page_of(row_id);
        if let Some(pool) = self.buffer_pool {
            let _guard = pool.fetch_page_guarded(page_id, |page_id| table.encode_page(page_id))?;
        }
        Ok(page_id)
    }
}

pub struct ExecutionEngine<'a> {
    pub context: ExecutionContext<'a>,
}

impl<'a> ExecutionEngine<'a> {
    pub fn new(context: ExecutionContext<'a>) -> Self {
        Self { context }
    }

    pub fn execute(&mut self, plan: Arc<PhysicalPlan>) -> MemDbResult<Vec<Tuple>> {
        plan.init(&mut self.context)?;
        let mut result = Vec::new();
        while let Some(tuple) = plan.next(&mut self.context)? {
            result.push(tuple);
        }
        Ok(result)
    }
}
