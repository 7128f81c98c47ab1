use crate::catalog::{SchemaRef, EMPTY_SCHEMA_REF};
use crate::error::MemDbError;
use crate::{catalog::Schema, error::MemDbResult, utils::scalar::ScalarValue};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, LazyLock};

/// Heap row id, unique within a table and never reused.
pub type RowId = u64;

/// Raw row payload as stored in the heap, MVCC chains and the WAL.
pub type Row = Vec<ScalarValue>;

pub static EMPTY_TUPLE: LazyLock<Tuple> = LazyLock::new(|| Tuple::empty(EMPTY_SCHEMA_REF.clone()));

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Tuple {
    pub schema: SchemaRef,
    pub data: Vec<ScalarValue>,
}

impl Tuple {
    pub fn new(schema: SchemaRef, data: Vec<ScalarValue>) -> Self {
        debug_assert_eq!(schema.columns.len(), data.len());
        Self { schema, data }
    }

    pub fn project_with_schema(&self, projected_schema: SchemaRef) -> MemDbResult<Self> {
        let indices = projected_schema
            .columns
            .iter()
            .map(|col| {
                self.schema
                    .index_of(col.relation.as_deref(), col.name.as_str())
            })
            .collect::<MemDbResult<Vec<usize>>>()?;
        let projected_data = indices
            .iter()
            .map(|idx| self.data[*idx].clone())
            .collect::<Vec<ScalarValue>>();
        Ok(Self::new(projected_schema, projected_data))
    }

    pub fn empty(schema: SchemaRef) -> Self {
        let mut data = vec![];
        for col in schema.columns.iter() {
            data.push(ScalarValue::new_empty(col.data_type));
        }
        Self::new(schema, data)
    }

    pub fn try_merge(tuples: impl IntoIterator<Item = Self>) -> MemDbResult<Self> {
        let mut data = vec![];
        let mut merged_schema = Schema::empty();
        for tuple in tuples {
            data.extend(tuple.data);
            merged_schema = Schema::try_merge(vec![merged_schema, tuple.schema.as_ref().clone()])?;
        }
        Ok(Self::new(Arc::new(merged_schema), data))
    }

    /// Join two tuples under a precomputed output schema.
    pub fn concat(schema: SchemaRef, left: &Tuple, right: &Tuple) -> Self {
        let mut data = Vec::with_capacity(left.data.len() + right.data.len());
        data.extend(left.data.iter().cloned());
        data.extend(right.data.iter().cloned());
        Self::new(schema, data)
    }

    pub fn is_null(&self) -> bool {
        self.data.iter().all(|x| x.is_null())
    }

    pub fn value(&self, index: usize) -> MemDbResult<&ScalarValue> {
        self.data.get(index).ok_or(MemDbError::Internal(format!(
            "Not found column data at {} in tuple: {:?}",
            index, self
        )))
    }

    pub fn value_by_name(&self, relation: Option<&str>, name: &str) -> MemDbResult<&ScalarValue> {
        let idx = self.schema.index_of(relation, name)?;
        self.value(idx)
    }

    pub fn into_row(self) -> Row {
        self.data
    }
}

impl Ord for Tuple {
    fn cmp(&self, other: &Self) -> Ordering {
        self.data.cmp(&other.data)
    }
}

impl PartialOrd for Tuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Tuple {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let values = self
            .data
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "({})", values)
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::{Column, DataType, Schema};
    use std::cmp::Ordering;
    use std::sync::Arc;

    #[test]
    pub fn tuple_compare() {
        let schema = Arc::new(Schema::new(vec![
            Column::new("a", DataType::Int64, false),
            Column::new("b", DataType::Int64, false),
        ]));
        let tuple1 = super::Tuple::new(schema.clone(), vec![1.into(), 2.into()]);
        let tuple2 = super::Tuple::new(schema.clone(), vec![1.into(), 2.into()]);
        let tuple3 = super::Tuple::new(schema.clone(), vec![1.into(), 3.into()]);
        let tuple4 = super::Tuple::new(schema.clone(), vec![2.into(), 2.into()]);
        let tuple5 = super::Tuple::new(schema.clone(), vec![1.into(), 1.into()]);

        assert_eq!(tuple1.cmp(&tuple2), Ordering::Equal);
        assert_eq!(tuple1.cmp(&tuple3), Ordering::Less);
        assert_eq!(tuple1.cmp(&tuple4), Ordering::Less);
        assert_eq!(tuple1.cmp(&tuple5), Ordering::Greater);
    }

    #[test]
    pub fn tuple_project_by_name() {
        let schema = Arc::new(
            Schema::new(vec![
                Column::new("a", DataType::Int64, false),
                Column::new("b", DataType::Varchar(None), false),
            ])
            .qualified("t"),
        );
        let tuple = super::Tuple::new(schema.clone(), vec![1.into(), "x".into()]);
        let projected = Arc::new(schema.project(&[1]).unwrap());
        let out = tuple.project_with_schema(projected).unwrap();
        assert_eq!(out.data, vec!["x".into()]);
    }
}
