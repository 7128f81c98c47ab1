use std::sync::Arc;

use crate::catalog::SchemaRef;
use crate::expression::Expr;
use crate::{
    error::MemDbResult,
    execution::{ExecutionContext, VolcanoExecutor},
    storage::tuple::Tuple,
};

use super::PhysicalPlan;

#[derive(derive_new::new, Debug)]
pub struct PhysicalProject {
    pub exprs: Vec<Expr>,
    pub schema: SchemaRef,
    pub input: Arc<PhysicalPlan>,
}

impl VolcanoExecutor for PhysicalProject {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        self.input.init(context)
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>> {
        let Some(tuple) = self.input.next(context)? else {
            return Ok(None);
        };
        let mut new_values = Vec::with_capacity(self.exprs.len());
        for expr in &self.exprs {
            new_values.push(context.eval_expr(expr, &tuple)?);
        }
        context.record_row();
        Ok(Some(Tuple::new(self.output_schema(), new_values)))
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl std::fmt::Display for PhysicalProject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Project: {}",
            self.exprs
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}
