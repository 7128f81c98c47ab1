use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::buffer::{heap_page_id, page_number, PageId};
use crate::catalog::{Column, DataType, Schema, SchemaRef, TableStatistics};
use crate::config::DatabaseOptions;
use crate::error::{MemDbError, MemDbResult};
use crate::expression::{ColumnPredicate, Expr};
use crate::storage::index::{IndexKind, IndexStats, TableIndex};
use crate::storage::tuple::{Row, RowId, Tuple};
use crate::utils::scalar::ScalarValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub column: String,
    pub kind: IndexKind,
    pub unique: bool,
}

/// Everything needed to re-create an empty table, e.g. before WAL replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, name: &str, column: &str, kind: IndexKind, unique: bool) -> Self {
        self.indexes.push(IndexDefinition {
            name: name.to_string(),
            column: column.to_string(),
            kind,
            unique,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexReport {
    pub name: String,
    pub column: String,
    pub kind: IndexKind,
    pub unique: bool,
    pub stats: IndexStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableReport {
    pub name: String,
    pub row_count: usize,
    pub page_count: u64,
    pub seq_scans: u64,
    pub index_scans: u64,
    pub indexes: Vec<IndexReport>,
}

/// Index mutation already applied while changing one row.
enum IndexChange {
    Inserted { index: usize, key: ScalarValue },
    Removed { index: usize, key: ScalarValue },
}

/// Row heap plus the secondary indexes bound to its columns. Every mutation
/// updates all indexes before returning, or none of them.
#[derive(Debug)]
pub struct Table {
    pub name: String,
    schema: SchemaRef,
    rows: BTreeMap<RowId, Row>,
    next_row_id: RowId,
    indexes: Vec<TableIndex>,
    options: DatabaseOptions,
    seq_scans: AtomicU64,
    index_scans: AtomicU64,
}

impl Table {
    pub fn new(name: &str, schema: Schema, options: DatabaseOptions) -> Self {
        Self {
            name: name.to_string(),
            schema: Arc::new(schema.qualified(name)),
            rows: BTreeMap::new(),
            next_row_id: 0,
            indexes: Vec::new(),
            options,
            seq_scans: AtomicU64::new(0),
            index_scans: AtomicU64::new(0),
        }
    }

    pub fn from_definition(definition: &TableDefinition, options: DatabaseOptions) -> MemDbResult<Self> {
        let mut table = Table::new(
            &definition.name,
            Schema::new(definition.columns.clone()),
            options,
        );
        for index in definition.indexes.iter() {
            table.add_index(&index.name, &index.column, index.kind, index.unique)?;
        }
        Ok(table)
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    pub fn create_index(&mut self, name: &str, column: &str, kind: IndexKind) -> MemDbResult<()> {
        self.add_index(name, column, kind, false)
    }

    pub fn create_unique_index(&mut self, name: &str, column: &str, kind: IndexKind) -> MemDbResult<()> {
        self.add_index(name, column, kind, true)
    }

    fn add_index(&mut self, name: &str, column: &str, kind: IndexKind, unique: bool) -> MemDbResult<()> {
        if self.indexes.iter().any(|idx| idx.name.eq_ignore_ascii_case(name)) {
            return Err(MemDbError::IntegrityViolation(format!(
                "index {name} already exists on table {}",
                self.name
            )));
        }
        let column_idx = self.schema.index_of(None, column)?;
        let index = TableIndex::build(
            name,
            &self.schema.columns[column_idx].name,
            column_idx,
            kind,
            unique,
            &self.options,
            self.rows.iter().map(|(id, row)| (*id, row)),
        )?;
        self.indexes.push(index);
        Ok(())
    }

    pub fn drop_index(&mut self, name: &str) -> MemDbResult<()> {
        let pos = self
            .indexes
            .iter()
            .position(|idx| idx.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| MemDbError::NotFound(format!("index {name} on table {}", self.name)))?;
        self.indexes.remove(pos);
        Ok(())
    }

    pub fn indexes(&self) -> &[TableIndex] {
        &self.indexes
    }

    /// First index bound to `column`, preferring one that supports ranges when asked.
    pub fn index_on(&self, column: &str, need_range: bool) -> Option<&TableIndex> {
        let mut candidates = self
            .indexes
            .iter()
            .filter(|idx| idx.column.eq_ignore_ascii_case(column));
        if need_range {
            candidates.find(|idx| idx.supports_range())
        } else {
            candidates.next()
        }
    }

    pub fn index(&self, name: &str) -> Option<&TableIndex> {
        self.indexes.iter().find(|idx| idx.name.eq_ignore_ascii_case(name))
    }

    /// Cast values to the column types and check arity, nullability and
    /// varchar length.
    pub fn normalize(&self, row: Row) -> MemDbResult<Row> {
        if row.len() != self.schema.column_count() {
            return Err(MemDbError::IntegrityViolation(format!(
                "table {} expects {} values, got {}",
                self.name,
                self.schema.column_count(),
                row.len()
            )));
        }
        row.into_iter()
            .zip(self.schema.columns.iter())
            .map(|(value, column)| {
                let value = value.cast_to(&column.data_type)?;
                if value.is_null() && !column.nullable {
                    return Err(MemDbError::IntegrityViolation(format!(
                        "column {} of table {} is not nullable",
                        column.name, self.name
                    )));
                }
                if let (DataType::Varchar(Some(max)), Some(s)) = (column.data_type, value.as_str()) {
                    if s.chars().count() > max {
                        return Err(MemDbError::IntegrityViolation(format!(
                            "value for {} exceeds varchar({max})",
                            column.name
                        )));
                    }
                }
                Ok(value)
            })
            .collect()
    }

    pub fn insert(&mut self, row: Row) -> MemDbResult<RowId> {
        let row_id = self.next_row_id;
        self.insert_with_id(row_id, row)?;
        Ok(row_id)
    }

    /// Insert under a caller-chosen id. Used by transactions and recovery.
    pub fn insert_with_id(&mut self, row_id: RowId, row: Row) -> MemDbResult<()> {
        if self.rows.contains_key(&row_id) {
            return Err(MemDbError::IntegrityViolation(format!(
                "row {row_id} already exists in table {}",
                self.name
            )));
        }
        let row = self.normalize(row)?;
        self.check_unique(row_id, &row)?;
        self.apply_index_changes(row_id, None, Some(&row))?;
        self.rows.insert(row_id, row);
        self.next_row_id = self.next_row_id.max(row_id + 1);
        Ok(())
    }

    /// Normalized `row`, provided it could be stored under `row_id` without
    /// breaking a unique index. Nothing is modified.
    pub fn check_row(&self, row_id: RowId, row: Row) -> MemDbResult<Row> {
        let row = self.normalize(row)?;
        self.check_unique(row_id, &row)?;
        Ok(row)
    }

    /// Id the next `insert` will use.
    pub fn next_row_id(&self) -> RowId {
        self.next_row_id
    }

    /// Hand out a row id without inserting, so a transaction can stage the row.
    pub fn reserve_row_id(&mut self) -> RowId {
        let row_id = self.next_row_id;
        self.next_row_id += 1;
        row_id
    }

    pub fn get(&self, row_id: RowId) -> Option<&Row> {
        self.rows.get(&row_id)
    }

    pub fn scan(&self) -> impl Iterator<Item = (RowId, &Row)> + '_ {
        self.rows.iter().map(|(id, row)| (*id, row))
    }

    /// First row with an id greater than `after` (the first row when `None`).
    /// Scans resume from here so they never hold a borrow between pulls.
    pub fn row_after(&self, after: Option<RowId>) -> Option<(RowId, &Row)> {
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        self.rows
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(id, row)| (*id, row))
    }

    pub(crate) fn record_seq_scan(&self) {
        self.seq_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tuple(&self, row: Row) -> Tuple {
        Tuple::new(self.schema.clone(), row)
    }

    /// Rows satisfying `predicate`. With `use_index`, the first conjunct that
    /// an index can answer narrows the candidates before the full predicate runs.
    pub fn select(&self, predicate: &Expr, use_index: bool) -> MemDbResult<Vec<Row>> {
        Ok(self
            .select_ids(predicate, use_index)?
            .into_iter()
            .filter_map(|id| self.rows.get(&id).cloned())
            .collect())
    }

    pub fn select_ids(&self, predicate: &Expr, use_index: bool) -> MemDbResult<Vec<RowId>> {
        let candidates = if use_index {
            predicate
                .column_predicates()
                .iter()
                .find_map(|p| self.index_candidates(p).transpose())
                .transpose()?
        } else {
            None
        };
        let candidates: Vec<RowId> = match candidates {
            Some(ids) => ids,
            None => {
                self.seq_scans.fetch_add(1, Ordering::Relaxed);
                self.rows.keys().copied().collect()
            }
        };
        let mut out = Vec::new();
        for row_id in candidates {
            let Some(row) = self.rows.get(&row_id) else {
                continue;
            };
            let tuple = Tuple::new(self.schema.clone(), row.clone());
            if predicate.evaluate_predicate(&tuple)? {
                out.push(row_id);
            }
        }
        Ok(out)
    }

    /// Row ids an index can produce for `predicate`, or `None` when no index applies.
    pub fn index_candidates(&self, predicate: &ColumnPredicate) -> MemDbResult<Option<Vec<RowId>>> {
        let need_range = predicate.point_keys().is_none();
        if need_range && predicate.key_range().is_none() {
            return Ok(None);
        }
        let Some(index) = self.index_on(&predicate.column, need_range) else {
            return Ok(None);
        };
        let mut ids = self.probe(index, predicate)?;
        ids.sort_unstable();
        ids.dedup();
        Ok(Some(ids))
    }

    /// Probe the named index. Point predicates return ids key by key in the
    /// order given; range predicates return them in ascending key order.
    pub fn probe_index(&self, index_name: &str, predicate: &ColumnPredicate) -> MemDbResult<Vec<RowId>> {
        let index = self.index(index_name).ok_or_else(|| {
            MemDbError::NotFound(format!("index {index_name} on table {}", self.name))
        })?;
        if !index.column.eq_ignore_ascii_case(&predicate.column) {
            return Err(MemDbError::Plan(format!(
                "index {index_name} covers {}, not {}",
                index.column, predicate.column
            )));
        }
        self.probe(index, predicate)
    }

    fn probe(&self, index: &TableIndex, predicate: &ColumnPredicate) -> MemDbResult<Vec<RowId>> {
        self.index_scans.fetch_add(1, Ordering::Relaxed);
        if let Some(keys) = predicate.point_keys() {
            let mut ids = Vec::new();
            for key in keys {
                let key = self.coerce_key(index.column_idx, key)?;
                ids.extend(index.lookup(&key)?);
            }
            return Ok(ids);
        }
        let (lo, hi) = predicate.key_range().ok_or_else(|| {
            MemDbError::Plan(format!("predicate {predicate} cannot use index {}", index.name))
        })?;
        if !index.supports_range() {
            return Err(MemDbError::NotSupport(format!(
                "{} index {} cannot answer range predicates",
                index.kind(),
                index.name
            )));
        }
        let lo = self.coerce_bound(index.column_idx, lo)?;
        let hi = self.coerce_bound(index.column_idx, hi)?;
        index.range(bound_ref(&lo), bound_ref(&hi))
    }

    fn coerce_key(&self, column_idx: usize, key: &ScalarValue) -> MemDbResult<ScalarValue> {
        key.cast_to(&self.schema.columns[column_idx].data_type)
    }

    fn coerce_bound(&self, column_idx: usize, bound: Bound<&ScalarValue>) -> MemDbResult<Bound<ScalarValue>> {
        // a float bound on an integer column keeps its own value; ordering is cross-numeric
        let cast = |v: &ScalarValue| {
            self.coerce_key(column_idx, v).or_else(|_| Ok::<_, MemDbError>(v.clone()))
        };
        Ok(match bound {
            Bound::Included(v) => Bound::Included(cast(v)?),
            Bound::Excluded(v) => Bound::Excluded(cast(v)?),
            Bound::Unbounded => Bound::Unbounded,
        })
    }

    /// Rows whose `column` lies in `[lo, hi]`, in key order when a B+Tree covers the column.
    pub fn select_range(&self, column: &str, lo: ScalarValue, hi: ScalarValue) -> MemDbResult<Vec<Row>> {
        let column_idx = self.schema.index_of(None, column)?;
        if let Some(index) = self.index_on(column, true) {
            self.index_scans.fetch_add(1, Ordering::Relaxed);
            let ids = index.range(Bound::Included(&lo), Bound::Included(&hi))?;
            return Ok(ids
                .into_iter()
                .filter_map(|id| self.rows.get(&id).cloned())
                .collect());
        }
        self.seq_scans.fetch_add(1, Ordering::Relaxed);
        let mut rows: Vec<Row> = self
            .rows
            .values()
            .filter(|row| {
                let v = &row[column_idx];
                !v.is_null() && *v >= lo && *v <= hi
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a[column_idx].cmp(&b[column_idx]));
        Ok(rows)
    }

    /// Apply `changes` to every row matching `predicate`. All-or-nothing.
    pub fn update(&mut self, predicate: &Expr, changes: &[(&str, ScalarValue)]) -> MemDbResult<usize> {
        let assignments = changes
            .iter()
            .map(|(name, value)| Ok((self.schema.index_of(None, name)?, value.clone())))
            .collect::<MemDbResult<Vec<_>>>()?;
        let ids = self.select_ids(predicate, true)?;
        let mut applied: Vec<(RowId, Row)> = Vec::with_capacity(ids.len());
        for row_id in ids {
            let Some(current) = self.rows.get(&row_id) else {
                continue;
            };
            let mut new_row = current.clone();
            for (idx, value) in assignments.iter() {
                new_row[*idx] = value.clone();
            }
            match self.update_row(row_id, new_row) {
                Ok(old) => applied.push((row_id, old)),
                Err(e) => {
                    for (row_id, old) in applied.into_iter().rev() {
                        if let Err(undo) = self.update_row(row_id, old) {
                            warn!("failed to restore row {row_id} of {}: {undo}", self.name);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(applied.len())
    }

    /// Replace one row, returning the previous version.
    pub fn update_row(&mut self, row_id: RowId, new_row: Row) -> MemDbResult<Row> {
        let new_row = self.normalize(new_row)?;
        let old = self
            .rows
            .get(&row_id)
            .cloned()
            .ok_or_else(|| MemDbError::NotFound(format!("row {row_id} in table {}", self.name)))?;
        self.check_unique(row_id, &new_row)?;
        self.apply_index_changes(row_id, Some(&old), Some(&new_row))?;
        self.rows.insert(row_id, new_row);
        Ok(old)
    }

    /// Delete every row matching `predicate`. All-or-nothing.
    pub fn delete(&mut self, predicate: &Expr) -> MemDbResult<usize> {
        let ids = self.select_ids(predicate, true)?;
        let mut removed: Vec<(RowId, Row)> = Vec::with_capacity(ids.len());
        for row_id in ids {
            match self.delete_row(row_id) {
                Ok(old) => removed.push((row_id, old)),
                Err(e) => {
                    for (row_id, old) in removed.into_iter().rev() {
                        if let Err(undo) = self.insert_with_id(row_id, old) {
                            warn!("failed to restore row {row_id} of {}: {undo}", self.name);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(removed.len())
    }

    pub fn delete_row(&mut self, row_id: RowId) -> MemDbResult<Row> {
        let old = self
            .rows
            .get(&row_id)
            .cloned()
            .ok_or_else(|| MemDbError::NotFound(format!("row {row_id} in table {}", self.name)))?;
        self.apply_index_changes(row_id, Some(&old), None)?;
        self.rows.remove(&row_id);
        Ok(old)
    }

    fn check_unique(&self, row_id: RowId, row: &Row) -> MemDbResult<()> {
        for index in self.indexes.iter().filter(|idx| idx.unique) {
            let key = index.key_of(row)?;
            if index.conflicts(key, row_id)? {
                return Err(MemDbError::IntegrityViolation(format!(
                    "duplicate key {key} for unique index {} on {}",
                    index.name, self.name
                )));
            }
        }
        Ok(())
    }

    /// Move `row_id` from its `old` keys to its `new` keys in every index.
    /// On failure the changes already made are reverted.
    fn apply_index_changes(&mut self, row_id: RowId, old: Option<&Row>, new: Option<&Row>) -> MemDbResult<()> {
        let mut journal: Vec<IndexChange> = Vec::new();
        let result = self.apply_index_changes_journaled(row_id, old, new, &mut journal);
        if let Err(e) = result {
            debug!(
                "rolling back {} index changes on {} after: {e}",
                journal.len(),
                self.name
            );
            for change in journal.into_iter().rev() {
                let undone = match change {
                    IndexChange::Inserted { index, key } => {
                        self.indexes[index].remove_entry(&key, row_id)
                    }
                    IndexChange::Removed { index, key } => {
                        self.indexes[index].insert_entry(&key, row_id)
                    }
                };
                if let Err(undo) = undone {
                    warn!("index rollback on {} failed: {undo}", self.name);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn apply_index_changes_journaled(
        &mut self,
        row_id: RowId,
        old: Option<&Row>,
        new: Option<&Row>,
        journal: &mut Vec<IndexChange>,
    ) -> MemDbResult<()> {
        for (i, index) in self.indexes.iter_mut().enumerate() {
            let old_key = old.map(|row| index.key_of(row)).transpose()?;
            let new_key = new.map(|row| index.key_of(row)).transpose()?;
            if old_key == new_key {
                continue;
            }
            if let Some(key) = old_key {
                if index.remove_entry(key, row_id)? {
                    journal.push(IndexChange::Removed {
                        index: i,
                        key: key.clone(),
                    });
                }
            }
            if let Some(key) = new_key {
                if index.insert_entry(key, row_id)? {
                    journal.push(IndexChange::Inserted {
                        index: i,
                        key: key.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn collect_statistics(&self, columns: &[String], histogram_buckets: usize) -> MemDbResult<TableStatistics> {
        TableStatistics::collect(
            &self.name,
            &self.schema,
            self.rows.values(),
            columns,
            self.options.buffer_pool.rows_per_page,
            histogram_buckets,
        )
    }

    pub fn rows_per_page(&self) -> u64 {
        self.options.buffer_pool.rows_per_page.max(1)
    }

    pub fn page_count(&self) -> u64 {
        match self.rows.keys().next_back() {
            Some(last) => last / self.rows_per_page() + 1,
            None => 0,
        }
    }

    pub fn page_of(&self, row_id: RowId) -> PageId {
        heap_page_id(&self.name, row_id, self.rows_per_page())
    }

    /// Serialized image of the rows living on `page_id`.
    pub fn encode_page(&self, page_id: PageId) -> MemDbResult<Bytes> {
        let per_page = self.rows_per_page();
        let first = page_number(page_id) * per_page;
        let rows: Vec<(RowId, &Row)> = self
            .rows
            .range(first..first + per_page)
            .map(|(id, row)| (*id, row))
            .collect();
        Ok(Bytes::from(bincode::serialize(&rows)?))
    }

    pub fn decode_page(data: &[u8]) -> MemDbResult<Vec<(RowId, Row)>> {
        Ok(bincode::deserialize(data)?)
    }

    pub fn definition(&self) -> TableDefinition {
        TableDefinition {
            name: self.name.clone(),
            columns: self
                .schema
                .columns
                .iter()
                .map(|c| c.as_ref().clone().with_relation(None))
                .collect(),
            indexes: self
                .indexes
                .iter()
                .map(|idx| IndexDefinition {
                    name: idx.name.clone(),
                    column: idx.column.clone(),
                    kind: idx.kind(),
                    unique: idx.unique,
                })
                .collect(),
        }
    }

    pub fn statistics(&self) -> TableReport {
        TableReport {
            name: self.name.clone(),
            row_count: self.rows.len(),
            page_count: self.page_count(),
            seq_scans: self.seq_scans.load(Ordering::Relaxed),
            index_scans: self.index_scans.load(Ordering::Relaxed),
            indexes: self
                .indexes
                .iter()
                .map(|idx| IndexReport {
                    name: idx.name.clone(),
                    column: idx.column.clone(),
                    kind: idx.kind(),
                    unique: idx.unique,
                    stats: idx.stats(),
                })
                .collect(),
        }
    }
}

fn bound_ref(bound: &Bound<ScalarValue>) -> Bound<&ScalarValue> {
    match bound {
        Bound::Included(v) => Bound::Included(v),
        Bound::Excluded(v) => Bound::Excluded(v),
        Bound::Unbounded => Bound::Unbounded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{col, lit};

    fn materials() -> Table {
        let schema = Schema::new(vec![
            Column::new("id", DataType::Int64, false),
            Column::new("name", DataType::Varchar(Some(16)), false),
            Column::new("density", DataType::Float64, true),
        ]);
        let mut table = Table::new("materials", schema, DatabaseOptions::default());
        for i in 0..100i64 {
            table
                .insert(vec![
                    i.into(),
                    format!("m{}", i % 7).into(),
                    (i as f64 * 0.5).into(),
                ])
                .unwrap();
        }
        table
    }

    #[test]
    fn indexed_and_full_scan_select_agree() {
        let mut table = materials();
        table.create_unique_index("pk", "id", IndexKind::BTree).unwrap();
        table.create_index("by_name", "name", IndexKind::Hash).unwrap();
        let predicates = vec![
            col("id").eq(lit(42)),
            col("id").lt(lit(10)),
            col("id").between(lit(20), lit(30)),
            col("name").eq(lit("m3")).and(col("density").gt(lit(20.0))),
            col("id").in_list(vec![lit(1), lit(99), lit(500)]),
        ];
        for predicate in predicates {
            let with_index = table.select(&predicate, true).unwrap();
            let without = table.select(&predicate, false).unwrap();
            assert_eq!(with_index, without, "{predicate}");
        }
        let report = table.statistics();
        assert_eq!(report.index_scans, 5);
        assert_eq!(report.seq_scans, 5);
        assert_eq!(report.page_count, 2);
    }

    #[test]
    fn update_and_delete_keep_indexes_consistent() {
        let mut table = materials();
        table.create_index("by_name", "name", IndexKind::BTree).unwrap();
        let updated = table
            .update(&col("name").eq(lit("m0")), &[("name", "zz".into())])
            .unwrap();
        assert_eq!(updated, 15);
        assert!(table.select(&col("name").eq(lit("m0")), true).unwrap().is_empty());
        assert_eq!(table.select(&col("name").eq(lit("zz")), true).unwrap().len(), 15);

        let deleted = table.delete(&col("id").gt_eq(lit(50))).unwrap();
        assert_eq!(deleted, 50);
        assert_eq!(table.len(), 50);
        let index = table.index("by_name").unwrap();
        let indexed: usize = ["m1", "m2", "m3", "m4", "m5", "m6", "zz"]
            .iter()
            .map(|k| index.lookup(&ScalarValue::from(*k)).unwrap().len())
            .sum();
        assert_eq!(indexed, 50);
    }

    #[test]
    fn failed_update_rolls_back_every_row() {
        let mut table = materials();
        table.create_unique_index("pk", "id", IndexKind::Hash).unwrap();
        table.create_index("by_name", "name", IndexKind::BTree).unwrap();
        // second matching row collides with the first one's new id
        let err = table
            .update(&col("id").lt(lit(3)), &[("id", 1000.into()), ("name", "x".into())])
            .unwrap_err();
        assert!(matches!(err, MemDbError::IntegrityViolation(_)));
        assert!(table.select(&col("name").eq(lit("x")), true).unwrap().is_empty());
        assert_eq!(table.select(&col("id").eq(lit(0)), true).unwrap().len(), 1);
        assert!(table.select(&col("id").eq(lit(1000)), true).unwrap().is_empty());
    }

    #[test]
    fn failed_delete_restores_every_row() {
        let mut table = materials();
        table.create_index("by_density", "density", IndexKind::BTree).unwrap();
        // a row missing its indexed column makes the index update fail
        table.rows.get_mut(&30).unwrap().truncate(2);
        let err = table.delete(&col("id").lt(lit(60))).unwrap_err();
        assert!(matches!(err, MemDbError::Internal(_)));
        assert_eq!(table.len(), 100);
        assert_eq!(table.select(&col("id").lt(lit(30)), false).unwrap().len(), 30);
        let index = table.index("by_density").unwrap();
        assert_eq!(index.lookup(&ScalarValue::from(5.0)).unwrap(), vec![10]);
    }

    #[test]
    fn normalize_rejects_bad_rows() {
        let mut table = materials();
        assert!(table.insert(vec![1.into()]).is_err());
        assert!(table
            .insert(vec![1.into(), ScalarValue::Varchar(None), 1.0.into()])
            .is_err());
        assert!(table
            .insert(vec![1.into(), "a-very-long-material-name".into(), 1.0.into()])
            .is_err());
        // int is widened to float
        let id = table.insert(vec![500.into(), "ok".into(), 3.into()]).unwrap();
        assert!(matches!(table.get(id).unwrap()[2], ScalarValue::Float64(Some(v)) if v == 3.0));
    }

    #[test]
    fn select_range_sorted_with_and_without_index() {
        let mut table = materials();
        let scanned = table
            .select_range("density", 10.0.into(), 12.0.into())
            .unwrap();
        table.create_index("by_density", "density", IndexKind::BTree).unwrap();
        let indexed = table
            .select_range("density", 10.0.into(), 12.0.into())
            .unwrap();
        assert_eq!(scanned, indexed);
        assert_eq!(indexed.len(), 5);
    }

    #[test]
    fn page_image_round_trip_and_definition() {
        let mut table = materials();
        table.create_index("by_name", "name", IndexKind::Hash).unwrap();
        let page = table.page_of(70);
        let rows = Table::decode_page(&table.encode_page(page).unwrap()).unwrap();
        assert_eq!(rows.len(), 36);
        assert_eq!(rows[0].0, 64);
        let copy = Table::from_definition(&table.definition(), DatabaseOptions::default()).unwrap();
        assert!(copy.is_empty());
        assert_eq!(copy.indexes().len(), 1);
    }
}
