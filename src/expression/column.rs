use crate::catalog::{Column, DataType, Schema};
use crate::error::MemDbResult;
use crate::expression::ExprTrait;
use crate::storage::tuple::Tuple;
use crate::utils::scalar::ScalarValue;

/// A named reference to a possibly qualified column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnExpr {
    pub relation: Option<String>,
    pub name: String,
}

impl ExprTrait for ColumnExpr {
    fn data_type(&self, input_schema: &Schema) -> MemDbResult<DataType> {
        let column = input_schema.column_with_name(self.relation.as_deref(), &self.name)?;
        Ok(column.data_type)
    }

    fn nullable(&self, input_schema: &Schema) -> MemDbResult<bool> {
        let column = input_schema.column_with_name(self.relation.as_deref(), &self.name)?;
        Ok(column.nullable)
    }

    fn evaluate(&self, tuple: &Tuple) -> MemDbResult<ScalarValue> {
        tuple
            .value_by_name(self.relation.as_deref(), &self.name)
            .cloned()
    }

    fn to_column(&self, input_schema: &Schema) -> MemDbResult<Column> {
        let column = input_schema.column_with_name(self.relation.as_deref(), &self.name)?;
        Ok(Column::new(
            column.name.clone(),
            column.data_type,
            column.nullable,
        )
        .with_relation(self.relation.clone().or(column.relation.clone())))
    }
}

impl std::fmt::Display for ColumnExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(relation) = self.relation.as_ref() {
            write!(f, "{}.", relation)?;
        }
        write!(f, "{}", self.name)
    }
}
