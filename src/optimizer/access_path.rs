use std::fmt::{Display, Formatter};

use log::debug;

use crate::catalog::TableStatistics;
use crate::cost::CostEstimator;
use crate::expression::{ColumnPredicate, Expr};
use crate::storage::index::IndexKind;
use crate::storage::Table;

/// How a single table is read.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessPath {
    SeqScan,
    /// Point lookups (`=`, `IN`) through any index on the column.
    IndexScan {
        index: String,
        predicate: ColumnPredicate,
    },
    /// Ordered key range through a B+Tree.
    IndexRangeScan {
        index: String,
        predicate: ColumnPredicate,
    },
}

impl AccessPath {
    pub fn index_name(&self) -> Option<&str> {
        match self {
            AccessPath::SeqScan => None,
            AccessPath::IndexScan { index, .. } | AccessPath::IndexRangeScan { index, .. } => {
                Some(index)
            }
        }
    }
}

impl Display for AccessPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessPath::SeqScan => write!(f, "SeqScan"),
            AccessPath::IndexScan { index, predicate } => {
                write!(f, "IndexScan({index}: {predicate})")
            }
            AccessPath::IndexRangeScan { index, predicate } => {
                write!(f, "IndexRangeScan({index}: {predicate})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePath {
    pub path: AccessPath,
    pub cost: f64,
}

/// The chosen path plus every alternative that was costed.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPlan {
    pub path: AccessPath,
    pub cost: f64,
    /// Rows expected after the whole predicate is applied.
    pub estimated_rows: f64,
    pub candidates: Vec<CandidatePath>,
}

/// Cost a sequential scan and every index access that can answer a
/// conjunct of `predicate`; the cheapest wins, ties go to the scan.
pub(crate) fn choose_access_path(
    estimator: &CostEstimator,
    table: &Table,
    stats: Option<&TableStatistics>,
    predicate: Option<&Expr>,
) -> AccessPlan {
    let row_count = stats
        .map(|s| s.row_count as f64)
        .unwrap_or(table.len() as f64);
    let page_count = stats
        .map(|s| s.page_count as f64)
        .unwrap_or(table.page_count() as f64);

    let column_predicates = predicate
        .map(|p| p.column_predicates())
        .unwrap_or_default();
    let combined_selectivity: f64 = column_predicates
        .iter()
        .map(|p| estimator.estimate_selectivity(stats, p))
        .product();

    let mut candidates = vec![CandidatePath {
        path: AccessPath::SeqScan,
        cost: estimator.estimate_seq_scan_cost(row_count, page_count),
    }];
    for column_predicate in column_predicates.iter() {
        let selectivity = estimator.estimate_selectivity(stats, column_predicate);
        for index in table.indexes() {
            if !index.column.eq_ignore_ascii_case(&column_predicate.column) {
                continue;
            }
            let path = if column_predicate.point_keys().is_some() {
                AccessPath::IndexScan {
                    index: index.name.clone(),
                    predicate: column_predicate.clone(),
                }
            } else if column_predicate.key_range().is_some() && index.kind() == IndexKind::BTree {
                AccessPath::IndexRangeScan {
                    index: index.name.clone(),
                    predicate: column_predicate.clone(),
                }
            } else {
                continue;
            };
            let probes = column_predicate
                .point_keys()
                .map(|keys| keys.len().max(1))
                .unwrap_or(1);
            let height = index.stats().height.max(1) * probes;
            candidates.push(CandidatePath {
                path,
                cost: estimator.estimate_index_scan_cost(row_count, selectivity, height),
            });
        }
    }

    let best = candidates
        .iter()
        .enumerate()
        .min_by(|(ia, a), (ib, b)| a.cost.total_cmp(&b.cost).then(ia.cmp(ib)))
        .map(|(_, c)| c.clone())
        .unwrap_or(CandidatePath {
            path: AccessPath::SeqScan,
            cost: 0.0,
        });
    debug!(
        "access path for {}: {} (cost {:.2}, {} candidates)",
        table.name,
        best.path,
        best.cost,
        candidates.len()
    );
    AccessPlan {
        path: best.path,
        cost: best.cost,
        estimated_rows: row_count * combined_selectivity,
        candidates,
    }
}
