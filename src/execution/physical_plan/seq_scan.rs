use log::debug;
use parking_lot::Mutex;

use crate::buffer::PageId;
use crate::catalog::SchemaRef;
use crate::expression::Expr;
use crate::storage::tuple::RowId;
use crate::{
    error::MemDbResult,
    execution::{ExecutionContext, VolcanoExecutor},
    storage::tuple::Tuple,
};

#[derive(Debug, Default)]
struct ScanCursor {
    last_row: Option<RowId>,
    last_page: Option<PageId>,
    done: bool,
}

/// Full heap scan in row id order with an optional pushed-down filter.
#[derive(Debug)]
pub struct PhysicalSeqScan {
    pub table: String,
    pub table_schema: SchemaRef,
    pub predicate: Option<Expr>,

    cursor: Mutex<ScanCursor>,
}

impl PhysicalSeqScan {
    pub fn new(table: impl Into<String>, table_schema: SchemaRef, predicate: Option<Expr>) -> Self {
        PhysicalSeqScan {
            table: table.into(),
            table_schema,
            predicate,
            cursor: Mutex::new(ScanCursor::default()),
        }
    }
}

impl VolcanoExecutor for PhysicalSeqScan {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        debug!("init seq scan on {}", self.table);
        context.table(&self.table)?.record_seq_scan();
        *self.cursor.lock() = ScanCursor::default();
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>> {
        let table = context.table(&self.table)?;
        let mut cursor = self.cursor.lock();
        if cursor.done {
            return Ok(None);
        }
        while let Some((row_id, row)) = table.row_after(cursor.last_row) {
            cursor.last_row = Some(row_id);
            let page_id = table.page_of(row_id);
            if cursor.last_page != Some(page_id) {
                context.touch_page(table, row_id)?;
                cursor.last_page = Some(page_id);
            }
            let tuple = Tuple::new(self.table_schema.clone(), row.clone());
            let keep = match &self.predicate {
                Some(predicate) => context.eval_predicate(predicate, &tuple)?,
                None => true,
            };
            if keep {
                context.record_row();
                return Ok(Some(tuple));
            }
        }
        cursor.done = true;
        Ok(None)
    }

    fn output_schema(&self) -> SchemaRef {
        self.table_schema.clone()
    }
}

impl std::fmt::Display for PhysicalSeqScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.predicate {
            Some(predicate) => write!(f, "SeqScan: {} filter={}", self.table, predicate),
            None => write!(f, "SeqScan: {}", self.table),
        }
    }
}
