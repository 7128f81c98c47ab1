//! Join ordering by dynamic programming over table subsets.
//!
//! Subsets are bitmasks over the input tables. Every subset of size >= 2 is
//! split into two disjoint non-empty halves that both already have a plan;
//! each split is costed with every applicable join algorithm and the
//! cheapest cumulative cost is kept.

use std::fmt::{Display, Formatter};

use log::debug;
use strum::IntoEnumIterator;

use crate::cost::{CostEstimator, JoinAlgorithm};
use crate::error::{MemDbError, MemDbResult};

/// Upper bound on the tables one DP run accepts (3^n split enumeration).
pub const MAX_JOIN_TABLES: usize = 12;

/// Equi-join predicate `left_table.left_column = right_table.right_column`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinCondition {
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
}

impl JoinCondition {
    pub fn new(
        left_table: impl Into<String>,
        left_column: impl Into<String>,
        right_table: impl Into<String>,
        right_column: impl Into<String>,
    ) -> Self {
        Self {
            left_table: left_table.into().to_lowercase(),
            left_column: left_column.into(),
            right_table: right_table.into().to_lowercase(),
            right_column: right_column.into(),
        }
    }

    /// Parse `a.x = b.y`.
    pub fn parse(text: &str) -> MemDbResult<Self> {
        let (lhs, rhs) = text
            .split_once('=')
            .ok_or_else(|| MemDbError::Plan(format!("join condition \"{text}\" has no '='")))?;
        let split = |side: &str| {
            side.trim()
                .split_once('.')
                .map(|(t, c)| (t.trim().to_string(), c.trim().to_string()))
                .ok_or_else(|| {
                    MemDbError::Plan(format!("join operand \"{}\" is not table.column", side.trim()))
                })
        };
        let (lt, lc) = split(lhs)?;
        let (rt, rc) = split(rhs)?;
        Ok(Self::new(lt, lc, rt, rc))
    }

    /// Same predicate with the sides swapped.
    pub fn flipped(&self) -> Self {
        Self {
            left_table: self.right_table.clone(),
            left_column: self.right_column.clone(),
            right_table: self.left_table.clone(),
            right_column: self.left_column.clone(),
        }
    }
}

impl Display for JoinCondition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} = {}.{}",
            self.left_table, self.left_column, self.right_table, self.right_column
        )
    }
}

/// One base relation offered to the join optimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinInput {
    pub table: String,
    pub rows: f64,
    /// Columns carrying an index, enabling index nested loop probes.
    pub indexed_columns: Vec<String>,
}

impl JoinInput {
    pub fn new(table: impl Into<String>, rows: f64) -> Self {
        Self {
            table: table.into().to_lowercase(),
            rows,
            indexed_columns: Vec::new(),
        }
    }

    pub fn with_indexed_columns(mut self, columns: Vec<String>) -> Self {
        self.indexed_columns = columns;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinTree {
    Table {
        name: String,
        rows: f64,
    },
    Join {
        left: Box<JoinTree>,
        right: Box<JoinTree>,
        algorithm: JoinAlgorithm,
        /// Conditions linking the two sides, oriented left-to-right. The first
        /// is the join key; the rest are checked on every output row.
        conditions: Vec<JoinCondition>,
        rows: f64,
        cost: f64,
    },
}

impl JoinTree {
    pub fn rows(&self) -> f64 {
        match self {
            JoinTree::Table { rows, .. } | JoinTree::Join { rows, .. } => *rows,
        }
    }

    /// Base tables in left-deep reading order.
    pub fn tables(&self) -> Vec<&str> {
        match self {
            JoinTree::Table { name, .. } => vec![name.as_str()],
            JoinTree::Join { left, right, .. } => {
                let mut out = left.tables();
                out.extend(right.tables());
                out
            }
        }
    }
}

impl Display for JoinTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinTree::Table { name, .. } => write!(f, "{name}"),
            JoinTree::Join {
                left,
                right,
                algorithm,
                ..
            } => write!(f, "({left} {algorithm} {right})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlan {
    pub tree: JoinTree,
    pub total_cost: f64,
    pub output_rows: f64,
}

#[derive(Debug, Clone)]
struct DpEntry {
    cost: f64,
    rows: f64,
    left_mask: usize,
    right_mask: usize,
    algorithm: Option<JoinAlgorithm>,
}

pub struct JoinOrderOptimizer<'a> {
    estimator: &'a CostEstimator,
}

impl<'a> JoinOrderOptimizer<'a> {
    pub fn new(estimator: &'a CostEstimator) -> Self {
        Self { estimator }
    }

    pub fn optimize(
        &self,
        inputs: &[JoinInput],
        conditions: &[JoinCondition],
    ) -> MemDbResult<JoinPlan> {
        let n = inputs.len();
        if n == 0 {
            return Err(MemDbError::Plan("join needs at least one table".to_string()));
        }
        if n > MAX_JOIN_TABLES {
            return Err(MemDbError::NotSupport(format!(
                "join of {n} tables exceeds the limit of {MAX_JOIN_TABLES}"
            )));
        }
        for (i, input) in inputs.iter().enumerate() {
            if inputs[..i].iter().any(|other| other.table == input.table) {
                return Err(MemDbError::Plan(format!(
                    "table {} appears twice in the join",
                    input.table
                )));
            }
        }
        for condition in conditions {
            for table in [&condition.left_table, &condition.right_table] {
                if !inputs.iter().any(|input| &input.table == table) {
                    return Err(MemDbError::Plan(format!(
                        "join condition {condition} references unknown table {table}"
                    )));
                }
            }
        }

        let full_mask = (1usize << n) - 1;
        let mut dp: Vec<Option<DpEntry>> = vec![None; full_mask + 1];
        for (i, input) in inputs.iter().enumerate() {
            dp[1 << i] = Some(DpEntry {
                cost: 0.0,
                rows: input.rows.max(0.0),
                left_mask: 0,
                right_mask: 0,
                algorithm: None,
            });
        }

        for size in 2..=n {
            for mask in 1..=full_mask {
                if mask.count_ones() as usize != size {
                    continue;
                }
                let mut best: Option<DpEntry> = None;
                let mut left = mask;
                while left > 0 {
                    left = (left - 1) & mask;
                    if left == 0 {
                        break;
                    }
                    let right = mask ^ left;
                    let (Some(left_entry), Some(right_entry)) = (&dp[left], &dp[right]) else {
                        continue;
                    };
                    let linking = self.linking_conditions(inputs, conditions, left, right);
                    let Some((algorithm, join_cost)) =
                        self.cheapest_algorithm(inputs, left_entry, right_entry, right, &linking)
                    else {
                        continue;
                    };
                    // one selectivity factor per linking predicate keeps the
                    // estimate independent of the order subsets were built in
                    let rows = left_entry.rows
                        * right_entry.rows
                        * self
                            .estimator
                            .config()
                            .join_selectivity
                            .powi(linking.len() as i32);
                    let total = left_entry.cost + right_entry.cost + join_cost;
                    if best.as_ref().map_or(true, |b| total < b.cost) {
                        best = Some(DpEntry {
                            cost: total,
                            rows,
                            left_mask: left,
                            right_mask: right,
                            algorithm: Some(algorithm),
                        });
                    }
                }
                dp[mask] = best;
            }
        }

        let tree = self.rebuild(full_mask, &dp, inputs, conditions)?;
        let total_cost = dp[full_mask].as_ref().map(|e| e.cost).unwrap_or(0.0);
        debug!("join order {tree} with cost {total_cost:.2}");
        Ok(JoinPlan {
            output_rows: tree.rows(),
            tree,
            total_cost,
        })
    }

    /// Conditions with one side in `left` and the other in `right`, oriented
    /// so `left_table` lies in `left`.
    fn linking_conditions(
        &self,
        inputs: &[JoinInput],
        conditions: &[JoinCondition],
        left: usize,
        right: usize,
    ) -> Vec<JoinCondition> {
        let member = |mask: usize, table: &str| {
            inputs
                .iter()
                .enumerate()
                .any(|(i, input)| mask & (1 << i) != 0 && input.table == table)
        };
        conditions
            .iter()
            .filter_map(|c| {
                if member(left, &c.left_table) && member(right, &c.right_table) {
                    Some(c.clone())
                } else if member(left, &c.right_table) && member(right, &c.left_table) {
                    Some(c.flipped())
                } else {
                    None
                }
            })
            .collect()
    }

    fn cheapest_algorithm(
        &self,
        inputs: &[JoinInput],
        left: &DpEntry,
        right: &DpEntry,
        right_mask: usize,
        linking: &[JoinCondition],
    ) -> Option<(JoinAlgorithm, f64)> {
        JoinAlgorithm::iter()
            .filter(|algorithm| !algorithm.requires_equi_key() || !linking.is_empty())
            .filter(|algorithm| {
                *algorithm != JoinAlgorithm::IndexNestedLoop
                    || Self::probe_index_available(inputs, right_mask, linking)
            })
            .map(|algorithm| {
                (
                    algorithm,
                    self.estimator
                        .estimate_join_cost(left.rows, right.rows, algorithm),
                )
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Index nested loop needs the inner side to be a base table with an
    /// index on its join key.
    fn probe_index_available(
        inputs: &[JoinInput],
        right_mask: usize,
        linking: &[JoinCondition],
    ) -> bool {
        if right_mask.count_ones() != 1 {
            return false;
        }
        let inner = &inputs[right_mask.trailing_zeros() as usize];
        linking.first().is_some_and(|c| {
            inner
                .indexed_columns
                .iter()
                .any(|column| column.eq_ignore_ascii_case(&c.right_column))
        })
    }

    fn rebuild(
        &self,
        mask: usize,
        dp: &[Option<DpEntry>],
        inputs: &[JoinInput],
        conditions: &[JoinCondition],
    ) -> MemDbResult<JoinTree> {
        let entry = dp[mask]
            .as_ref()
            .ok_or_else(|| MemDbError::Internal(format!("no join plan for subset {mask:#b}")))?;
        match entry.algorithm {
            None => {
                let input = &inputs[mask.trailing_zeros() as usize];
                Ok(JoinTree::Table {
                    name: input.table.clone(),
                    rows: entry.rows,
                })
            }
            Some(algorithm) => Ok(JoinTree::Join {
                left: Box::new(self.rebuild(entry.left_mask, dp, inputs, conditions)?),
                right: Box::new(self.rebuild(entry.right_mask, dp, inputs, conditions)?),
                algorithm,
                conditions: self.linking_conditions(
                    inputs,
                    conditions,
                    entry.left_mask,
                    entry.right_mask,
                ),
                rows: entry.rows,
                cost: entry.cost,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerConfig;

    fn estimator() -> CostEstimator {
        CostEstimator::new(OptimizerConfig::default())
    }

    /// Cost of the cheapest plan over every left-deep order, by brute force.
    fn brute_force_left_deep(
        estimator: &CostEstimator,
        inputs: &[JoinInput],
        conditions: &[JoinCondition],
    ) -> f64 {
        fn permute(items: &mut Vec<usize>, k: usize, out: &mut Vec<Vec<usize>>) {
            if k == items.len() {
                out.push(items.clone());
                return;
            }
            for i in k..items.len() {
                items.swap(k, i);
                permute(items, k + 1, out);
                items.swap(k, i);
            }
        }
        let mut orders = Vec::new();
        permute(&mut (0..inputs.len()).collect(), 0, &mut orders);
        let mut best = f64::INFINITY;
        for order in orders {
            let mut joined = vec![order[0]];
            let mut rows = inputs[order[0]].rows;
            let mut cost = 0.0;
            for &next in &order[1..] {
                let in_joined = |t: &str| joined.iter().any(|&j| inputs[j].table == t);
                let links = conditions
                    .iter()
                    .filter(|c| {
                        (in_joined(&c.left_table) && c.right_table == inputs[next].table)
                            || (in_joined(&c.right_table) && c.left_table == inputs[next].table)
                    })
                    .count();
                let linked = links > 0;
                let step = JoinAlgorithm::iter()
                    .filter(|a| !a.requires_equi_key() || linked)
                    .filter(|a| *a != JoinAlgorithm::IndexNestedLoop)
                    .map(|a| estimator.estimate_join_cost(rows, inputs[next].rows, a))
                    .fold(f64::INFINITY, f64::min);
                cost += step;
                rows *= inputs[next].rows * estimator.config().join_selectivity.powi(links as i32);
                joined.push(next);
            }
            best = best.min(cost);
        }
        best
    }

    #[test]
    fn single_table_is_a_leaf() {
        let estimator = estimator();
        let plan = JoinOrderOptimizer::new(&estimator)
            .optimize(&[JoinInput::new("a", 10.0)], &[])
            .unwrap();
        assert_eq!(
            plan.tree,
            JoinTree::Table {
                name: "a".to_string(),
                rows: 10.0
            }
        );
        assert_eq!(plan.total_cost, 0.0);
    }

    #[test]
    fn linked_pair_prefers_equi_join_and_orients_condition() {
        let estimator = estimator();
        let inputs = [JoinInput::new("orders", 5000.0), JoinInput::new("users", 100.0)];
        let conditions = [JoinCondition::parse("users.id = orders.user_id").unwrap()];
        let plan = JoinOrderOptimizer::new(&estimator)
            .optimize(&inputs, &conditions)
            .unwrap();
        let JoinTree::Join {
            left,
            right,
            algorithm,
            conditions,
            rows,
            ..
        } = &plan.tree
        else {
            panic!("expected a join, got {}", plan.tree);
        };
        assert!(algorithm.requires_equi_key());
        assert_eq!(conditions.len(), 1);
        let left_tables = left.tables();
        assert_eq!(conditions[0].left_table, left_tables[0]);
        assert_eq!(conditions[0].right_table, right.tables()[0]);
        assert!((rows - 5000.0 * 100.0 * 0.1).abs() < 1e-6);
    }

    #[test]
    fn dp_never_loses_to_left_deep_orders() {
        let estimator = estimator();
        let inputs = [
            JoinInput::new("a", 1000.0),
            JoinInput::new("b", 50.0),
            JoinInput::new("c", 20000.0),
            JoinInput::new("d", 7.0),
        ];
        let conditions = [
            JoinCondition::parse("a.id = b.a_id").unwrap(),
            JoinCondition::parse("b.id = c.b_id").unwrap(),
            JoinCondition::parse("c.id = d.c_id").unwrap(),
        ];
        let plan = JoinOrderOptimizer::new(&estimator)
            .optimize(&inputs, &conditions)
            .unwrap();
        let mut tables = plan.tree.tables();
        tables.sort();
        assert_eq!(tables, vec!["a", "b", "c", "d"]);
        let reference = brute_force_left_deep(&estimator, &inputs, &conditions);
        assert!(plan.total_cost <= reference * (1.0 + 1e-9));
    }

    #[test]
    fn cross_product_uses_nested_loops_and_index_needs_inner_index() {
        let estimator = estimator();
        let plan = JoinOrderOptimizer::new(&estimator)
            .optimize(&[JoinInput::new("a", 10.0), JoinInput::new("b", 10.0)], &[])
            .unwrap();
        match plan.tree {
            JoinTree::Join { algorithm, rows, .. } => {
                assert!(!algorithm.requires_equi_key());
                assert_eq!(rows, 100.0);
            }
            other => panic!("expected a join, got {other}"),
        }

        let inputs = [
            JoinInput::new("outer_t", 2.0),
            JoinInput::new("inner_t", 1_000_000.0).with_indexed_columns(vec!["k".to_string()]),
        ];
        let conditions = [JoinCondition::parse("outer_t.k = inner_t.k").unwrap()];
        let plan = JoinOrderOptimizer::new(&estimator)
            .optimize(&inputs, &conditions)
            .unwrap();
        match plan.tree {
            JoinTree::Join { algorithm, right, .. } => {
                assert_eq!(algorithm, JoinAlgorithm::IndexNestedLoop);
                assert_eq!(right.tables(), vec!["inner_t"]);
            }
            other => panic!("expected a join, got {other}"),
        }
    }

    #[test]
    fn rejects_bad_inputs() {
        let estimator = estimator();
        let optimizer = JoinOrderOptimizer::new(&estimator);
        assert!(optimizer.optimize(&[], &[]).is_err());
        assert!(optimizer
            .optimize(&[JoinInput::new("a", 1.0), JoinInput::new("A", 1.0)], &[])
            .is_err());
        assert!(optimizer
            .optimize(
                &[JoinInput::new("a", 1.0)],
                &[JoinCondition::parse("a.x = zz.y").unwrap()]
            )
            .is_err());
        assert!(JoinCondition::parse("a.x < b.y").is_err());
        let many: Vec<JoinInput> = (0..=MAX_JOIN_TABLES)
            .map(|i| JoinInput::new(format!("t{i}"), 1.0))
            .collect();
        assert!(matches!(
            optimizer.optimize(&many, &[]),
            Err(MemDbError::NotSupport(_))
        ));
    }
}
