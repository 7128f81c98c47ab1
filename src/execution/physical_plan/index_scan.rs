use std::collections::VecDeque;

use log::debug;
use parking_lot::Mutex;

use crate::catalog::SchemaRef;
use crate::expression::{ColumnPredicate, Expr};
use crate::storage::tuple::RowId;
use crate::{
    error::{MemDbError, MemDbResult},
    execution::{ExecutionContext, VolcanoExecutor},
    storage::tuple::Tuple,
};

/// Row ids produced by one index probe, drained one heap fetch at a time.
#[derive(Debug)]
struct IndexProbe {
    table: String,
    index_name: String,
    predicate: ColumnPredicate,
    filter: Option<Expr>,
    schema: SchemaRef,
    pending: Mutex<Option<VecDeque<RowId>>>,
}

impl IndexProbe {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        let table = context.table(&self.table)?;
        let ids = table.probe_index(&self.index_name, &self.predicate)?;
        debug!(
            "index probe {} on {} matched {} rows",
            self.index_name,
            self.table,
            ids.len()
        );
        *self.pending.lock() = Some(ids.into());
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext, op: &str) -> MemDbResult<Option<Tuple>> {
        let table = context.table(&self.table)?;
        let mut pending = self.pending.lock();
        let ids = pending
            .as_mut()
            .ok_or_else(|| MemDbError::Execution(format!("{op} stream not initialized")))?;
        while let Some(row_id) = ids.pop_front() {
            let Some(row) = table.get(row_id) else {
                continue;
            };
            context.touch_page(table, row_id)?;
            let tuple = Tuple::new(self.schema.clone(), row.clone());
            let keep = match &self.filter {
                Some(filter) => context.eval_predicate(filter, &tuple)?,
                None => true,
            };
            if keep {
                context.record_row();
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }
}

/// Point lookups (`=` / `IN`) through a B+Tree or hash index.
#[derive(Debug)]
pub struct PhysicalIndexScan {
    probe: IndexProbe,
}

impl PhysicalIndexScan {
    pub fn new(
        table: impl Into<String>,
        index_name: impl Into<String>,
        table_schema: SchemaRef,
        predicate: ColumnPredicate,
        filter: Option<Expr>,
    ) -> Self {
        Self {
            probe: IndexProbe {
                table: table.into(),
                index_name: index_name.into(),
                predicate,
                filter,
                schema: table_schema,
                pending: Mutex::new(None),
            },
        }
    }
}

impl VolcanoExecutor for PhysicalIndexScan {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        if self.probe.predicate.point_keys().is_none() {
            return Err(MemDbError::Plan(format!(
                "index scan needs a point predicate, got {}",
                self.probe.predicate
            )));
        }
        self.probe.init(context)
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>> {
        self.probe.next(context, "index scan")
    }

    fn output_schema(&self) -> SchemaRef {
        self.probe.schema.clone()
    }
}

impl std::fmt::Display for PhysicalIndexScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IndexScan: {} using {} ({})",
            self.probe.table, self.probe.index_name, self.probe.predicate
        )
    }
}

/// Ordered key range through a B+Tree; rows come out in key order.
#[derive(Debug)]
pub struct PhysicalIndexRangeScan {
    probe: IndexProbe,
}

impl PhysicalIndexRangeScan {
    pub fn new(
        table: impl Into<String>,
        index_name: impl Into<String>,
        table_schema: SchemaRef,
        predicate: ColumnPredicate,
        filter: Option<Expr>,
    ) -> Self {
        Self {
            probe: IndexProbe {
                table: table.into(),
                index_name: index_name.into(),
                predicate,
                filter,
                schema: table_schema,
                pending: Mutex::new(None),
            },
        }
    }
}

impl VolcanoExecutor for PhysicalIndexRangeScan {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        if self.probe.predicate.key_range().is_none() {
            return Err(MemDbError::Plan(format!(
                "index range scan needs a range predicate, got {}",
                self.probe.predicate
            )));
        }
        self.probe.init(context)
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>> {
        self.probe.next(context, "index range scan")
    }

    fn output_schema(&self) -> SchemaRef {
        self.probe.schema.clone()
    }
}

impl std::fmt::Display for PhysicalIndexRangeScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IndexRangeScan: {} using {} ({})",
            self.probe.table, self.probe.index_name, self.probe.predicate
        )
    }
}
