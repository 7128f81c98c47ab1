use super::column::{Column, ColumnRef};
use crate::error::{MemDbError, MemDbResult};
use std::sync::{Arc, LazyLock};

pub type SchemaRef = Arc<Schema>;

pub static EMPTY_SCHEMA_REF: LazyLock<SchemaRef> = LazyLock::new(|| Arc::new(Schema::empty()));

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Schema {
    pub columns: Vec<ColumnRef>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns: columns.into_iter().map(Arc::new).collect(),
        }
    }

    fn new_with_check(columns: Vec<ColumnRef>) -> MemDbResult<Self> {
        for (idx1, col1) in columns.iter().enumerate() {
            for col2 in columns.iter().skip(idx1 + 1) {
                let clash = match (&col1.relation, &col2.relation) {
                    (Some(rel1), Some(rel2)) => rel1 == rel2 && col1.name == col2.name,
                    (None, None) => col1.name == col2.name,
                    (Some(_), None) | (None, Some(_)) => false,
                };
                if clash {
                    return Err(MemDbError::Plan(format!(
                        "Duplicate column \"{}\" in schema",
                        col1.qualified_name()
                    )));
                }
            }
        }
        Ok(Self { columns })
    }

    pub fn empty() -> Self {
        Self { columns: vec![] }
    }

    pub fn try_merge(schemas: impl IntoIterator<Item = Self>) -> MemDbResult<Self> {
        let mut columns = Vec::new();
        for schema in schemas {
            columns.extend(schema.columns);
        }
        Self::new_with_check(columns)
    }

    /// Copy of this schema with every column attributed to `relation`.
    pub fn qualified(&self, relation: &str) -> Schema {
        let columns = self
            .columns
            .iter()
            .map(|col| {
                Arc::new(
                    col.as_ref()
                        .clone()
                        .with_relation(Some(relation.to_string())),
                )
            })
            .collect();
        Schema { columns }
    }

    pub fn project(&self, indices: &[usize]) -> MemDbResult<Schema> {
        let new_columns = indices
            .iter()
            .map(|i| self.column_with_index(*i))
            .collect::<MemDbResult<Vec<ColumnRef>>>()?;
        Self::new_with_check(new_columns)
    }

    pub fn column_with_name(&self, relation: Option<&str>, name: &str) -> MemDbResult<ColumnRef> {
        let index = self.index_of(relation, name)?;
        Ok(self.columns[index].clone())
    }

    pub fn column_with_index(&self, index: usize) -> MemDbResult<ColumnRef> {
        self.columns
            .get(index)
            .cloned()
            .ok_or_else(|| MemDbError::Plan(format!("Unable to get column with index {index}")))
    }

    /// Find the index of the column with the given name.
    pub fn index_of(&self, relation: Option<&str>, name: &str) -> MemDbResult<usize> {
        let (idx, _) = self
            .columns
            .iter()
            .enumerate()
            .find(|(_, col)| {
                let name_matches = col.name.eq_ignore_ascii_case(name);
                match (relation, &col.relation) {
                    (Some(rel), Some(col_rel)) => name_matches && rel.eq_ignore_ascii_case(col_rel),
                    (Some(_), None) => false,
                    (None, Some(_)) | (None, None) => name_matches,
                }
            })
            .ok_or_else(|| MemDbError::Plan(format!("Unable to get column named \"{name}\"")))?;
        Ok(idx)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataType;

    #[test]
    fn merge_qualified_schemas_with_shared_names() {
        let base = Schema::new(vec![
            Column::new("id", DataType::Int64, false),
            Column::new("name", DataType::Varchar(None), true),
        ]);
        let merged =
            Schema::try_merge(vec![base.qualified("a"), base.qualified("b")]).unwrap();
        assert_eq!(merged.column_count(), 4);
        assert_eq!(merged.index_of(Some("b"), "id").unwrap(), 2);
        assert_eq!(merged.index_of(None, "name").unwrap(), 1);
    }

    #[test]
    fn merge_rejects_unqualified_duplicates() {
        let base = Schema::new(vec![Column::new("id", DataType::Int64, false)]);
        assert!(Schema::try_merge(vec![base.clone(), base]).is_err());
    }
}
