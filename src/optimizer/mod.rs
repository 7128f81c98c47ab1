mod access_path;
mod join_order;

pub use access_path::{AccessPath, AccessPlan, CandidatePath};
pub use join_order::{
    JoinCondition, JoinInput, JoinOrderOptimizer, JoinPlan, JoinTree, MAX_JOIN_TABLES,
};

use std::collections::HashMap;

use log::debug;
use parking_lot::RwLock;

use crate::catalog::TableStatistics;
use crate::config::OptimizerConfig;
use crate::cost::{CostEstimator, JoinAlgorithm};
use crate::error::{MemDbError, MemDbResult};
use crate::expression::{ColumnPredicate, Expr};
use crate::storage::Table;

/// Cost-based optimizer. Statistics are gathered on demand and cached per
/// table until invalidated.
#[derive(Debug)]
pub struct QueryOptimizer {
    estimator: CostEstimator,
    statistics: RwLock<HashMap<String, TableStatistics>>,
}

impl QueryOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            estimator: CostEstimator::new(config),
            statistics: RwLock::new(HashMap::new()),
        }
    }

    pub fn estimator(&self) -> &CostEstimator {
        &self.estimator
    }

    /// Scan `table` and cache its statistics. An empty `columns` covers every column.
    pub fn collect_statistics(&self, table: &Table, columns: &[String]) -> MemDbResult<TableStatistics> {
        let stats = table.collect_statistics(columns, self.estimator.config().histogram_buckets)?;
        debug!(
            "collected statistics for {}: {} rows, {} pages",
            table.name, stats.row_count, stats.page_count
        );
        self.statistics
            .write()
            .insert(table.name.to_lowercase(), stats.clone());
        Ok(stats)
    }

    pub fn statistics(&self, table: &str) -> Option<TableStatistics> {
        self.statistics.read().get(&table.to_lowercase()).cloned()
    }

    pub fn invalidate(&self, table: &str) {
        self.statistics.write().remove(&table.to_lowercase());
    }

    /// Selectivity of `predicate` on `table` from cached statistics; the
    /// configured default when none were collected.
    pub fn estimate_selectivity(&self, table: &str, predicate: &ColumnPredicate) -> f64 {
        let stats = self.statistics.read();
        self.estimator
            .estimate_selectivity(stats.get(&table.to_lowercase()), predicate)
    }

    pub fn estimate_seq_scan_cost(&self, row_count: f64, page_count: f64) -> f64 {
        self.estimator.estimate_seq_scan_cost(row_count, page_count)
    }

    pub fn estimate_index_scan_cost(&self, row_count: f64, selectivity: f64, index_height: usize) -> f64 {
        self.estimator
            .estimate_index_scan_cost(row_count, selectivity, index_height)
    }

    pub fn estimate_join_cost(&self, left_rows: f64, right_rows: f64, algorithm: JoinAlgorithm) -> f64 {
        self.estimator
            .estimate_join_cost(left_rows, right_rows, algorithm)
    }

    /// Cheapest way to read `table` under `predicate`.
    pub fn select_access_path(&self, table: &Table, predicate: Option<&Expr>) -> AccessPlan {
        let stats = self.statistics.read();
        access_path::choose_access_path(
            &self.estimator,
            table,
            stats.get(&table.name.to_lowercase()),
            predicate,
        )
    }

    /// Join order over `tables`, using their cached statistics.
    pub fn optimize_join_order(
        &self,
        tables: &[&Table],
        conditions: &[JoinCondition],
    ) -> MemDbResult<JoinPlan> {
        let stats = self.statistics.read();
        let inputs = tables
            .iter()
            .map(|table| {
                let rows = stats
                    .get(&table.name.to_lowercase())
                    .map(|s| s.row_count as f64)
                    .ok_or_else(|| {
                        MemDbError::Plan(format!("no statistics collected for table {}", table.name))
                    })?;
                let indexed = table
                    .indexes()
                    .iter()
                    .map(|index| index.column.clone())
                    .collect();
                Ok(JoinInput::new(table.name.clone(), rows).with_indexed_columns(indexed))
            })
            .collect::<MemDbResult<Vec<_>>>()?;
        drop(stats);
        JoinOrderOptimizer::new(&self.estimator).optimize(&inputs, conditions)
    }
}

impl Default for QueryOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType, Schema};
    use crate::config::DatabaseOptions;
    use crate::expression::{col, lit, PredicateOp};
    use crate::storage::index::IndexKind;

    fn materials(rows: i64) -> Table {
        let schema = Schema::new(vec![
            Column::new("id", DataType::Int64, false),
            Column::new("density", DataType::Int64, false),
            Column::new("name", DataType::Varchar(None), false),
        ]);
        let mut table = Table::new("materials", schema, DatabaseOptions::default());
        for i in 0..rows {
            table
                .insert(vec![i.into(), (i % 100).into(), format!("m{i}").into()])
                .unwrap();
        }
        table
    }

    #[test]
    fn selectivity_is_monotone_in_range_bound() {
        let table = materials(1000);
        let optimizer = QueryOptimizer::default();
        optimizer.collect_statistics(&table, &[]).unwrap();
        let mut previous = 0.0;
        for bound in [0i64, 10, 25, 50, 75, 99, 150] {
            let sel = optimizer.estimate_selectivity(
                "materials",
                &ColumnPredicate::new("density", PredicateOp::Lt(bound.into())),
            );
            assert!((0.0..=1.0).contains(&sel));
            assert!(sel >= previous, "selectivity dropped at {bound}");
            previous = sel;
        }
        let eq = optimizer.estimate_selectivity(
            "materials",
            &ColumnPredicate::new("density", PredicateOp::Eq(5.into())),
        );
        assert!((eq - 0.01).abs() < 1e-9);
        let unknown = optimizer.estimate_selectivity(
            "materials",
            &ColumnPredicate::new("missing", PredicateOp::Eq(5.into())),
        );
        assert_eq!(unknown, OptimizerConfig::default().default_selectivity);
    }

    #[test]
    fn access_path_prefers_index_for_selective_predicates() {
        let mut table = materials(5000);
        table.create_index("idx_id", "id", IndexKind::BTree).unwrap();
        table.create_index("idx_name", "name", IndexKind::Hash).unwrap();
        let optimizer = QueryOptimizer::default();
        optimizer.collect_statistics(&table, &[]).unwrap();

        let point = optimizer.select_access_path(&table, Some(&col("id").eq(lit(42))));
        assert_eq!(point.path.index_name(), Some("idx_id"));
        assert!(matches!(point.path, AccessPath::IndexScan { .. }));
        assert_eq!(point.candidates.len(), 2);

        let hashed = optimizer.select_access_path(&table, Some(&col("name").eq(lit("m7"))));
        assert_eq!(hashed.path.index_name(), Some("idx_name"));

        let range = optimizer.select_access_path(&table, Some(&col("id").lt(lit(20))));
        assert!(matches!(range.path, AccessPath::IndexRangeScan { .. }));

        // a hash index cannot serve ranges and a wide range is cheaper to scan
        let wide = optimizer.select_access_path(&table, Some(&col("id").gt_eq(lit(10))));
        assert_eq!(wide.path, AccessPath::SeqScan);
        let no_pred = optimizer.select_access_path(&table, None);
        assert_eq!(no_pred.path, AccessPath::SeqScan);
        assert_eq!(no_pred.estimated_rows, 5000.0);
    }

    #[test]
    fn join_order_requires_statistics() {
        let a = materials(10);
        let optimizer = QueryOptimizer::default();
        assert!(optimizer.optimize_join_order(&[&a], &[]).is_err());
        optimizer.collect_statistics(&a, &[]).unwrap();
        let plan = optimizer.optimize_join_order(&[&a], &[]).unwrap();
        assert_eq!(plan.output_rows, 10.0);
        optimizer.invalidate("MATERIALS");
        assert!(optimizer.statistics("materials").is_none());
    }
}
