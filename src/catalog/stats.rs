use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::catalog::Schema;
use crate::error::MemDbResult;
use crate::storage::tuple::Row;
use crate::utils::scalar::ScalarValue;

/// Per-table statistics derived from a full scan.
#[derive(Debug, Clone, Default)]
pub struct TableStatistics {
    pub table: String,
    pub row_count: u64,
    pub page_count: u64,
    /// Per-column stats keyed by lower-cased column name.
    pub column_stats: HashMap<String, ColumnStatistics>,
}

impl TableStatistics {
    /// Scan `rows` and summarize `columns` (every column when empty).
    pub fn collect<'a>(
        table: &str,
        schema: &Schema,
        rows: impl IntoIterator<Item = &'a Row>,
        columns: &[String],
        rows_per_page: u64,
        histogram_buckets: usize,
    ) -> MemDbResult<Self> {
        let targets: Vec<(String, usize)> = if columns.is_empty() {
            schema
                .columns
                .iter()
                .enumerate()
                .map(|(idx, col)| (col.name.to_lowercase(), idx))
                .collect()
        } else {
            columns
                .iter()
                .map(|name| Ok((name.to_lowercase(), schema.index_of(None, name)?)))
                .collect::<MemDbResult<Vec<_>>>()?
        };

        let mut samples: Vec<Vec<&ScalarValue>> = vec![Vec::new(); targets.len()];
        let mut null_counts = vec![0u64; targets.len()];
        let mut row_count = 0u64;
        for row in rows {
            row_count += 1;
            for (slot, (_, idx)) in targets.iter().enumerate() {
                match row.get(*idx) {
                    Some(value) if !value.is_null() => samples[slot].push(value),
                    _ => null_counts[slot] += 1,
                }
            }
        }

        let column_stats = targets
            .into_iter()
            .zip(samples)
            .zip(null_counts)
            .map(|(((name, _), values), nulls)| {
                (
                    name,
                    ColumnStatistics::from_values(values, nulls, histogram_buckets),
                )
            })
            .collect();

        Ok(Self {
            table: table.to_string(),
            row_count,
            page_count: row_count.div_ceil(rows_per_page.max(1)),
            column_stats,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnStatistics> {
        self.column_stats.get(&name.to_lowercase())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ColumnStatistics {
    pub null_count: u64,
    pub non_null_count: u64,
    pub distinct_count: u64,
    pub min: Option<ScalarValue>,
    pub max: Option<ScalarValue>,
    pub histogram: Histogram,
}

impl ColumnStatistics {
    fn from_values(mut values: Vec<&ScalarValue>, null_count: u64, buckets: usize) -> Self {
        values.sort();
        let distinct_count = values.iter().collect::<HashSet<_>>().len() as u64;
        let owned: Vec<ScalarValue> = values.into_iter().cloned().collect();
        Self {
            null_count,
            non_null_count: owned.len() as u64,
            distinct_count,
            min: owned.first().cloned(),
            max: owned.last().cloned(),
            histogram: Histogram::equi_depth(&owned, buckets),
        }
    }

    pub fn total_count(&self) -> u64 {
        self.null_count + self.non_null_count
    }
}

/// Equi-depth histogram: every bucket holds roughly the same number of values.
/// `bounds[i]` is the largest value in bucket `i`.
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    pub bounds: Vec<ScalarValue>,
    pub counts: Vec<u64>,
    pub total: u64,
}

impl Histogram {
    pub fn equi_depth(sorted: &[ScalarValue], buckets: usize) -> Self {
        let n = sorted.len();
        if n == 0 || buckets == 0 {
            return Self::default();
        }
        let buckets = buckets.min(n);
        let mut bounds = Vec::with_capacity(buckets);
        let mut counts = Vec::with_capacity(buckets);
        for i in 0..buckets {
            let start = i * n / buckets;
            let end = (i + 1) * n / buckets;
            bounds.push(sorted[end - 1].clone());
            counts.push((end - start) as u64);
        }
        Self {
            bounds,
            counts,
            total: n as u64,
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.bounds.len()
    }

    /// Estimated fraction of values below `value` (`<=` when `inclusive`).
    /// The bucket that straddles `value` contributes half its count.
    pub fn fraction_below(&self, value: &ScalarValue, inclusive: bool) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let mut below = 0.0;
        for (bound, count) in self.bounds.iter().zip(self.counts.iter()) {
            match bound.total_cmp(value) {
                Ordering::Less => below += *count as f64,
                Ordering::Equal if inclusive => below += *count as f64,
                _ => {
                    below += *count as f64 / 2.0;
                    break;
                }
            }
        }
        (below / self.total as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};

    #[test]
    fn collect_column_statistics() {
        let schema = Schema::new(vec![
            Column::new("id", DataType::Int64, false),
            Column::new("grade", DataType::Varchar(None), true),
        ]);
        let rows: Vec<Row> = (0..100)
            .map(|i| {
                let grade = if i % 10 == 0 {
                    ScalarValue::Varchar(None)
                } else {
                    ScalarValue::from(format!("g{}", i % 4))
                };
                vec![ScalarValue::from(i), grade]
            })
            .collect();
        let stats = TableStatistics::collect("t", &schema, rows.iter(), &[], 8, 10).unwrap();
        assert_eq!(stats.row_count, 100);
        assert_eq!(stats.page_count, 13);
        let id = stats.column("ID").unwrap();
        assert_eq!(id.distinct_count, 100);
        assert_eq!(id.min, Some(ScalarValue::from(0)));
        assert_eq!(id.max, Some(ScalarValue::from(99)));
        assert_eq!(id.histogram.bucket_count(), 10);
        assert!(id.histogram.counts.iter().all(|c| *c == 10));
        let grade = stats.column("grade").unwrap();
        assert_eq!(grade.null_count, 10);
        assert_eq!(grade.distinct_count, 4);
        assert_eq!(grade.total_count(), 100);
    }

    #[test]
    fn histogram_fraction_below() {
        let values: Vec<ScalarValue> = (0..1000).map(ScalarValue::from).collect();
        let histogram = Histogram::equi_depth(&values, 10);
        let half = histogram.fraction_below(&ScalarValue::from(500), false);
        assert!((0.4..=0.6).contains(&half), "{half}");
        assert_eq!(histogram.fraction_below(&ScalarValue::from(-1), false), 0.05);
        assert_eq!(histogram.fraction_below(&ScalarValue::from(5000), true), 1.0);
    }

    #[test]
    fn unknown_column_is_rejected() {
        let schema = Schema::new(vec![Column::new("id", DataType::Int64, false)]);
        let rows: Vec<Row> = Vec::new();
        assert!(TableStatistics::collect("t", &schema, rows.iter(), &["nope".to_string()], 8, 10).is_err());
    }
}
