pub mod buffer;
pub mod catalog;
pub mod config;
pub mod cost;
pub mod database;
pub mod error;
pub mod execution;
pub mod expression;
pub mod function;
pub mod optimizer;
pub mod plan;
pub mod recovery;
pub mod storage;
pub mod transaction;
pub mod utils;

pub use database::{Database, DatabaseReport};
pub use error::{MemDbError, MemDbResult};

#[cfg(test)]
mod tests {
    mod buffer_tests;
    mod join_tests;
    mod recovery_tests;
    mod transaction_tests;
}
