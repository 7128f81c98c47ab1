use crate::catalog::DataType;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type ColumnRef = Arc<Column>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Owning table, set when a schema is qualified for joins.
    pub relation: Option<String>,
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            relation: None,
            name: name.into(),
            data_type,
            nullable,
        }
    }

    pub fn with_relation(mut self, relation: Option<String>) -> Self {
        self.relation = relation;
        self
    }

    pub fn qualified_name(&self) -> String {
        match &self.relation {
            Some(rel) => format!("{rel}.{}", self.name),
            None => self.name.clone(),
        }
    }
}
