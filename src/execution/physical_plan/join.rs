//! Helpers shared by the join operators.

use crate::catalog::SchemaRef;
use crate::error::MemDbResult;
use crate::execution::ExecutionContext;
use crate::expression::Expr;
use crate::storage::tuple::Tuple;
use crate::utils::scalar::ScalarValue;

/// Evaluate an equi-join key. NULL keys never join, so they come back as `None`.
pub(crate) fn join_key(
    context: &ExecutionContext,
    key: &Expr,
    tuple: &Tuple,
) -> MemDbResult<Option<ScalarValue>> {
    let value = context.eval_expr(key, tuple)?;
    Ok((!value.is_null()).then_some(value))
}

/// Concatenate a candidate pair and keep it if `condition` holds on the result.
pub(crate) fn join_pair(
    context: &ExecutionContext,
    schema: &SchemaRef,
    condition: Option<&Expr>,
    left: &Tuple,
    right: &Tuple,
) -> MemDbResult<Option<Tuple>> {
    let joined = Tuple::concat(schema.clone(), left, right);
    if let Some(condition) = condition {
        if !context.eval_predicate(condition, &joined)? {
            return Ok(None);
        }
    }
    context.record_row();
    Ok(Some(joined))
}

pub(crate) fn fmt_keys(
    f: &mut std::fmt::Formatter<'_>,
    name: &str,
    left_key: &Expr,
    right_key: &Expr,
    residual: Option<&Expr>,
) -> std::fmt::Result {
    write!(f, "{name}: {left_key} = {right_key}")?;
    if let Some(residual) = residual {
        write!(f, " and {residual}")?;
    }
    Ok(())
}
