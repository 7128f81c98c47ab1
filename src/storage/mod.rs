pub mod index;
pub mod table;
pub mod tuple;

pub use table::{IndexDefinition, IndexReport, Table, TableDefinition, TableReport};
