use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::catalog::{ColumnStatistics, TableStatistics};
use crate::config::OptimizerConfig;
use crate::expression::{ColumnPredicate, PredicateOp};
use crate::utils::scalar::ScalarValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
pub enum JoinAlgorithm {
    NestedLoop,
    BlockNestedLoop,
    Hash,
    GraceHash,
    SortMerge,
    IndexNestedLoop,
}

impl JoinAlgorithm {
    /// Algorithms that need an equi-join key.
    pub fn requires_equi_key(&self) -> bool {
        !matches!(self, JoinAlgorithm::NestedLoop | JoinAlgorithm::BlockNestedLoop)
    }
}

/// System-R style linear cost model shared by the optimizer components.
#[derive(Debug, Clone, Copy)]
pub struct CostEstimator {
    config: OptimizerConfig,
}

impl CostEstimator {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Fraction of rows expected to satisfy `predicate`, in `[0, 1]`.
    pub fn estimate_selectivity(
        &self,
        stats: Option<&TableStatistics>,
        predicate: &ColumnPredicate,
    ) -> f64 {
        let Some(column) = stats.and_then(|s| s.column(&predicate.column)) else {
            return self.config.default_selectivity;
        };
        let selectivity = match &predicate.op {
            PredicateOp::Eq(_) => self.equality_selectivity(column),
            PredicateOp::NotEq(_) => 1.0 - self.equality_selectivity(column),
            PredicateOp::Lt(v) => self.fraction_below(column, v, false),
            PredicateOp::LtEq(v) => self.fraction_below(column, v, true),
            PredicateOp::Gt(v) => 1.0 - self.fraction_below(column, v, true),
            PredicateOp::GtEq(v) => 1.0 - self.fraction_below(column, v, false),
            PredicateOp::Between(lo, hi) => {
                self.fraction_below(column, hi, true) - self.fraction_below(column, lo, false)
            }
            PredicateOp::In(values) => {
                if column.distinct_count == 0 {
                    self.config.default_selectivity
                } else {
                    (values.len() as f64 / column.distinct_count as f64).min(1.0)
                }
            }
            PredicateOp::Like(pattern) => {
                if pattern.starts_with('%') {
                    0.25
                } else {
                    0.1
                }
            }
        };
        selectivity.clamp(0.0, 1.0)
    }

    fn equality_selectivity(&self, column: &ColumnStatistics) -> f64 {
        if column.distinct_count == 0 {
            self.config.default_selectivity
        } else {
            1.0 / column.distinct_count as f64
        }
    }

    /// Fraction of values `< value` (`<=` when inclusive). Values outside
    /// `[min, max]` are exact; inside, numeric columns interpolate linearly
    /// and others use the histogram.
    fn fraction_below(&self, column: &ColumnStatistics, value: &ScalarValue, inclusive: bool) -> f64 {
        // outside [min, max] the answer is exact for every type
        if let (Some(min), Some(max)) = (column.min.as_ref(), column.max.as_ref()) {
            match value.total_cmp(min) {
                Ordering::Less => return 0.0,
                Ordering::Equal if !inclusive => return 0.0,
                _ => {}
            }
            if value.total_cmp(max) != Ordering::Less {
                return 1.0;
            }
        }
        let bounds = (
            column.min.as_ref().and_then(ScalarValue::as_f64),
            column.max.as_ref().and_then(ScalarValue::as_f64),
            value.as_f64(),
        );
        match bounds {
            (Some(min), Some(max), Some(x)) => {
                let span = max - min;
                let linear = if span > 0.0 { (x - min) / span } else { 0.0 };
                let equal = if inclusive {
                    self.equality_selectivity(column)
                } else {
                    0.0
                };
                (linear + equal).clamp(0.0, 1.0)
            }
            _ if column.histogram.total > 0 => column.histogram.fraction_below(value, inclusive),
            _ => self.config.default_selectivity,
        }
    }

    pub fn estimate_seq_scan_cost(&self, row_count: f64, page_count: f64) -> f64 {
        page_count * self.config.seq_page_cost + row_count * self.config.cpu_tuple_cost
    }

    /// Descend the index, then one random heap fetch per matching row.
    pub fn estimate_index_scan_cost(&self, row_count: f64, selectivity: f64, index_height: usize) -> f64 {
        let matched = (row_count * selectivity).max(1.0);
        index_height as f64 * self.config.random_page_cost
            + matched
                * (self.config.cpu_index_tuple_cost
                    + self.config.random_page_cost
                    + self.config.cpu_tuple_cost)
    }

    pub fn estimate_join_cost(&self, left_rows: f64, right_rows: f64, algorithm: JoinAlgorithm) -> f64 {
        let n = left_rows.max(1.0);
        let m = right_rows.max(1.0);
        let cpu = self.config.cpu_tuple_cost;
        match algorithm {
            JoinAlgorithm::NestedLoop => n * m * cpu,
            JoinAlgorithm::BlockNestedLoop => {
                let blocks = (n / self.config.block_size.max(1) as f64).ceil();
                n * m * cpu + blocks * m * cpu * 0.1
            }
            JoinAlgorithm::Hash => (n + m) * cpu * self.config.hash_join_weight,
            // partitioning pass over both inputs before the per-partition hash join
            JoinAlgorithm::GraceHash => (n + m) * cpu * (self.config.hash_join_weight + 1.0),
            JoinAlgorithm::SortMerge => (n * n.log2().max(1.0) + m * m.log2().max(1.0)) * cpu,
            JoinAlgorithm::IndexNestedLoop => n * m.log2().max(1.0) * cpu,
        }
    }
}
