use std::collections::BTreeMap;
use std::ops::Bound;

use log::debug;

use super::{BPlusTree, ExtendibleHashIndex, IndexKind, IndexStats, IndexStructure};
use crate::config::DatabaseOptions;
use crate::error::{MemDbError, MemDbResult};
use crate::storage::tuple::{Row, RowId};
use crate::utils::scalar::ScalarValue;

type Postings = Vec<RowId>;

/// A named secondary index bound to one table column. Keys map to the ids of
/// every row carrying that key; NULL keys are not indexed.
#[derive(Debug)]
pub struct TableIndex {
    pub name: String,
    pub column: String,
    pub column_idx: usize,
    pub unique: bool,
    structure: Box<dyn IndexStructure<ScalarValue, Postings>>,
}

impl TableIndex {
    /// Build the index over existing `rows`. B+Tree indexes are bulk loaded.
    pub fn build<'a>(
        name: &str,
        column: &str,
        column_idx: usize,
        kind: IndexKind,
        unique: bool,
        options: &DatabaseOptions,
        rows: impl IntoIterator<Item = (RowId, &'a Row)>,
    ) -> MemDbResult<Self> {
        let mut grouped: BTreeMap<ScalarValue, Postings> = BTreeMap::new();
        for (row_id, row) in rows {
            let key = row.get(column_idx).ok_or_else(|| {
                MemDbError::Internal(format!("row {row_id} has no column {column_idx}"))
            })?;
            if key.is_null() {
                continue;
            }
            let postings = grouped.entry(key.clone()).or_default();
            if unique && !postings.is_empty() {
                return Err(MemDbError::IntegrityViolation(format!(
                    "duplicate key {key} for unique index {name}"
                )));
            }
            postings.push(row_id);
        }

        let structure: Box<dyn IndexStructure<ScalarValue, Postings>> = match kind {
            IndexKind::BTree => {
                let mut tree = BPlusTree::new_with_config(options.btree)?;
                tree.bulk_load(grouped.into_iter().collect())?;
                Box::new(tree)
            }
            IndexKind::Hash => {
                let mut hash = ExtendibleHashIndex::new(options.hash_index)?;
                for (key, postings) in grouped {
                    hash.insert(key, postings);
                }
                Box::new(hash)
            }
        };
        debug!(
            "built {kind} index {name} on {column} with {} keys",
            structure.len()
        );
        Ok(Self {
            name: name.to_string(),
            column: column.to_string(),
            column_idx,
            unique,
            structure,
        })
    }

    pub fn kind(&self) -> IndexKind {
        self.structure.kind()
    }

    pub fn supports_range(&self) -> bool {
        self.kind() == IndexKind::BTree
    }

    pub fn key_of<'r>(&self, row: &'r Row) -> MemDbResult<&'r ScalarValue> {
        row.get(self.column_idx).ok_or_else(|| {
            MemDbError::Internal(format!(
                "index {} expects column {} in row",
                self.name, self.column_idx
            ))
        })
    }

    pub fn lookup(&self, key: &ScalarValue) -> MemDbResult<Vec<RowId>> {
        if key.is_null() {
            return Ok(Vec::new());
        }
        Ok(self.structure.search(key)?.cloned().unwrap_or_default())
    }

    /// True when inserting `key` for a row other than `row_id` would break uniqueness.
    pub fn conflicts(&self, key: &ScalarValue, row_id: RowId) -> MemDbResult<bool> {
        if !self.unique || key.is_null() {
            return Ok(false);
        }
        let existing = self.structure.search(key)?;
        Ok(existing.is_some_and(|ids| ids.iter().any(|id| *id != row_id)))
    }

    /// Add `row_id` under `key`. Returns whether the index changed.
    pub fn insert_entry(&mut self, key: &ScalarValue, row_id: RowId) -> MemDbResult<bool> {
        if key.is_null() {
            return Ok(false);
        }
        if self.conflicts(key, row_id)? {
            return Err(MemDbError::IntegrityViolation(format!(
                "duplicate key {key} for unique index {}",
                self.name
            )));
        }
        let mut postings = self.structure.search(key)?.cloned().unwrap_or_default();
        if postings.contains(&row_id) {
            return Ok(false);
        }
        postings.push(row_id);
        self.structure.insert(key.clone(), postings)?;
        Ok(true)
    }

    /// Drop `row_id` from `key`. Returns whether the index changed.
    pub fn remove_entry(&mut self, key: &ScalarValue, row_id: RowId) -> MemDbResult<bool> {
        if key.is_null() {
            return Ok(false);
        }
        let Some(mut postings) = self.structure.search(key)?.cloned() else {
            return Ok(false);
        };
        let before = postings.len();
        postings.retain(|id| *id != row_id);
        if postings.len() == before {
            return Ok(false);
        }
        if postings.is_empty() {
            self.structure.delete(key)?;
        } else {
            self.structure.insert(key.clone(), postings)?;
        }
        Ok(true)
    }

    /// Row ids whose key lies inside the bounds, in key order.
    pub fn range(&self, lo: Bound<&ScalarValue>, hi: Bound<&ScalarValue>) -> MemDbResult<Vec<RowId>> {
        Ok(self
            .structure
            .range(lo, hi)?
            .into_iter()
            .flat_map(|(_, ids)| ids)
            .collect())
    }

    pub fn distinct_keys(&self) -> usize {
        self.structure.len()
    }

    pub fn stats(&self) -> IndexStats {
        self.structure.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<(RowId, Row)> {
        (0..50u64)
            .map(|i| (i, vec![ScalarValue::from(i as i64 % 10), ScalarValue::from(i as i64)]))
            .collect()
    }

    #[test]
    fn build_and_lookup_both_kinds() {
        let data = rows();
        for kind in [IndexKind::BTree, IndexKind::Hash] {
            let index = TableIndex::build(
                "idx",
                "a",
                0,
                kind,
                false,
                &DatabaseOptions::default(),
                data.iter().map(|(id, row)| (*id, row)),
            )
            .unwrap();
            assert_eq!(index.distinct_keys(), 10);
            let mut ids = index.lookup(&ScalarValue::from(3)).unwrap();
            ids.sort();
            assert_eq!(ids, vec![3, 13, 23, 33, 43]);
            assert!(index.lookup(&ScalarValue::Int64(None)).unwrap().is_empty());
        }
    }

    #[test]
    fn unique_index_rejects_duplicates() {
        let data = rows();
        let err = TableIndex::build(
            "idx",
            "a",
            0,
            IndexKind::BTree,
            true,
            &DatabaseOptions::default(),
            data.iter().map(|(id, row)| (*id, row)),
        )
        .unwrap_err();
        assert!(matches!(err, MemDbError::IntegrityViolation(_)));

        let mut index = TableIndex::build(
            "pk",
            "b",
            1,
            IndexKind::Hash,
            true,
            &DatabaseOptions::default(),
            data.iter().map(|(id, row)| (*id, row)),
        )
        .unwrap();
        assert!(index.insert_entry(&ScalarValue::from(7), 99).is_err());
        assert!(!index.insert_entry(&ScalarValue::from(7), 7).unwrap());
        assert!(index.remove_entry(&ScalarValue::from(7), 7).unwrap());
        assert!(index.insert_entry(&ScalarValue::from(7), 99).unwrap());
        assert_eq!(index.lookup(&ScalarValue::from(7)).unwrap(), vec![99]);
    }

    #[test]
    fn btree_range_returns_key_order() {
        let data = rows();
        let index = TableIndex::build(
            "idx",
            "b",
            1,
            IndexKind::BTree,
            false,
            &DatabaseOptions::default(),
            data.iter().map(|(id, row)| (*id, row)),
        )
        .unwrap();
        let lo = ScalarValue::from(10);
        let hi = ScalarValue::from(14);
        let ids = index
            .range(Bound::Included(&lo), Bound::Excluded(&hi))
            .unwrap();
        assert_eq!(ids, vec![10, 11, 12, 13]);
    }
}
