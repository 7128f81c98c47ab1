use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::buffer::{heap_page_id, BufferPool, BufferPoolStats};
use crate::catalog::Schema;
use crate::config::{DatabaseOptions, LockConfig};
use crate::error::{MemDbError, MemDbResult};
use crate::execution::physical_plan::PhysicalPlan;
use crate::execution::{ExecutionContext, ExecutionEngine};
use crate::expression::Expr;
use crate::optimizer::{AccessPlan, JoinCondition, JoinPlan, QueryOptimizer};
use crate::plan::{Binder, PhysicalPlanner};
use crate::recovery::{Lsn, RecoveredState, RecoveryManager, RecoverySummary, WalManager, WalStats};
use crate::storage::tuple::{Row, RowId, Tuple};
use crate::storage::{Table, TableDefinition, TableReport};
use crate::transaction::{
    ReadOutcome, ResourceId, Transaction, TransactionManager, TransactionStats,
};
use crate::utils::util::pretty_format_physical_plan;

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseReport {
    pub buffer_pool: BufferPoolStats,
    pub wal: WalStats,
    pub transactions: TransactionStats,
    pub tables: Vec<TableReport>,
    pub rows_processed: u64,
}

/// Owns the tables and every shared engine component. Reads through `query`
/// see the latest applied state; isolated reads go through a transaction.
pub struct Database {
    tables: HashMap<String, Table>,
    optimizer: QueryOptimizer,
    txn_manager: TransactionManager,
    buffer_pool: BufferPool,
    options: DatabaseOptions,
    rows_processed: Arc<AtomicU64>,
}

impl Database {
    pub fn new(options: DatabaseOptions) -> Self {
        Self::with_wal(options, Arc::new(WalManager::new(options.wal)))
    }

    fn with_wal(options: DatabaseOptions, wal: Arc<WalManager>) -> Self {
        Self {
            tables: HashMap::new(),
            optimizer: QueryOptimizer::new(options.optimizer),
            txn_manager: TransactionManager::new(options, wal),
            buffer_pool: BufferPool::new_with_config(options.buffer_pool),
            options,
            rows_processed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    pub fn create_table(&mut self, name: &str, schema: Schema) -> MemDbResult<&mut Table> {
        let columns = schema
            .columns
            .iter()
            .map(|c| c.as_ref().clone().with_relation(None))
            .collect();
        self.create_table_from(&TableDefinition::new(name, columns))
    }

    /// Register an empty table, indexes included.
    pub fn create_table_from(&mut self, definition: &TableDefinition) -> MemDbResult<&mut Table> {
        let key = definition.name.to_lowercase();
        if self.tables.contains_key(&key) {
            return Err(MemDbError::IntegrityViolation(format!(
                "table {} already exists",
                definition.name
            )));
        }
        let mut definition = definition.clone();
        definition.name = key.clone();
        let table = Table::from_definition(&definition, self.options)?;
        debug!("created table {key} with {} indexes", table.indexes().len());
        Ok(self.tables.entry(key).or_insert(table))
    }

    pub fn table(&self, name: &str) -> MemDbResult<&Table> {
        self.tables
            .get(&name.to_lowercase())
            .ok_or_else(|| MemDbError::NotFound(format!("table {name}")))
    }

    /// Direct, non-logged access to a table. Refused while transactions are
    /// running, since their snapshots would no longer match the table.
    pub fn table_mut(&mut self, name: &str) -> MemDbResult<&mut Table> {
        let key = name.to_lowercase();
        if !self.tables.contains_key(&key) {
            return Err(MemDbError::NotFound(format!("table {name}")));
        }
        let active = self.txn_manager.active_transactions();
        if !active.is_empty() {
            return Err(MemDbError::Conflict(format!(
                "table {name} cannot be modified directly while transactions {active:?} are active"
            )));
        }
        self.forget_table_state(&key)?;
        self.tables
            .get_mut(&key)
            .ok_or_else(|| MemDbError::NotFound(format!("table {name}")))
    }

    pub fn drop_table(&mut self, name: &str) -> MemDbResult<()> {
        let key = name.to_lowercase();
        if !self.tables.contains_key(&key) {
            return Err(MemDbError::NotFound(format!("table {name}")));
        }
        if !self.txn_manager.active_transactions().is_empty() {
            return Err(MemDbError::Conflict(format!(
                "table {name} cannot be dropped while transactions are active"
            )));
        }
        self.forget_table_state(&key)?;
        self.tables.remove(&key);
        info!("dropped table {key}");
        Ok(())
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop cached statistics, version chains and resident pages of `table`.
    fn forget_table_state(&self, table: &str) -> MemDbResult<()> {
        self.optimizer.invalidate(table);
        let chains = self.txn_manager.mvcc().drop_table(table);
        let relation = heap_page_id(table, 0, 1) >> 32;
        let pages = self
            .buffer_pool
            .discard_where(|page_id| page_id >> 32 == relation)?;
        if chains > 0 || pages > 0 {
            debug!("reset {table}: {chains} version chains, {pages} resident pages");
        }
        Ok(())
    }

    /// Parse, collect statistics, pick an access path and run a SELECT.
    pub fn query(&self, sql: &str) -> MemDbResult<Vec<Tuple>> {
        let plan = self.plan_query(sql)?.0;
        self.execute(Arc::new(plan))
    }

    /// Rendered operator tree followed by the costed access paths.
    pub fn explain(&self, sql: &str) -> MemDbResult<String> {
        let (plan, access) = self.plan_query(sql)?;
        let mut out = pretty_format_physical_plan(&plan);
        for candidate in access.candidates.iter() {
            out.push_str(&format!("\n-- {} cost={:.2}", candidate.path, candidate.cost));
        }
        out.push_str(&format!(
            "\n-- chosen {} est_rows={:.1}",
            access.path, access.estimated_rows
        ));
        Ok(out)
    }

    fn plan_query(&self, sql: &str) -> MemDbResult<(PhysicalPlan, AccessPlan)> {
        let stmt = Binder::new().bind_sql(sql)?;
        let table = self.table(&stmt.table)?;
        self.optimizer.collect_statistics(table, &[])?;
        let access = self
            .optimizer
            .select_access_path(table, stmt.predicate.as_ref());
        debug!("query on {} uses {}", stmt.table, access.path);
        let plan = PhysicalPlanner::new(&self.tables, self.options.optimizer)
            .plan_select(&stmt, &access)?;
        Ok((plan, access))
    }

    /// Optimize the join order of `tables` under `conditions`, then run it.
    /// `filter` is applied to the joined rows.
    pub fn join_query(
        &self,
        tables: &[&str],
        conditions: &[JoinCondition],
        filter: Option<&Expr>,
    ) -> MemDbResult<Vec<Tuple>> {
        let (_, plan) = self.plan_join(tables, conditions, filter)?;
        self.execute(Arc::new(plan))
    }

    pub fn plan_join(
        &self,
        tables: &[&str],
        conditions: &[JoinCondition],
        filter: Option<&Expr>,
    ) -> MemDbResult<(JoinPlan, PhysicalPlan)> {
        let inputs = tables
            .iter()
            .map(|name| self.table(name))
            .collect::<MemDbResult<Vec<_>>>()?;
        for table in inputs.iter() {
            self.optimizer.collect_statistics(table, &[])?;
        }
        let join_plan = self.optimizer.optimize_join_order(&inputs, conditions)?;
        info!(
            "join order for {tables:?}: cost {:.2}, {:.1} rows",
            join_plan.total_cost, join_plan.output_rows
        );
        let plan = PhysicalPlanner::new(&self.tables, self.options.optimizer)
            .plan_join_tree(&join_plan.tree, filter)?;
        Ok((join_plan, plan))
    }

    pub fn execute(&self, plan: Arc<PhysicalPlan>) -> MemDbResult<Vec<Tuple>> {
        let context = ExecutionContext::new(&self.tables, self.rows_processed.clone())
            .with_buffer_pool(&self.buffer_pool);
        ExecutionEngine::new(context).execute(plan)
    }

    pub fn begin_transaction(&self) -> MemDbResult<Transaction> {
        self.txn_manager.begin()
    }

    pub fn commit(&self, txn: &mut Transaction) -> MemDbResult<()> {
        self.txn_manager.commit(txn)?;
        Ok(())
    }

    /// Undo every change of `txn` in the tables and end it.
    pub fn rollback(&mut self, txn: &mut Transaction) -> MemDbResult<()> {
        let tables = &mut self.tables;
        let pool = &self.buffer_pool;
        self.txn_manager
            .abort(txn, &mut |resource: &ResourceId, before: Option<&Row>| {
                restore_image(tables, pool, resource, before)
            })
    }

    /// Snapshot read of one row.
    pub fn read(&self, txn: &mut Transaction, table: &str, row_id: RowId) -> MemDbResult<Option<Row>> {
        let table = self.table(table)?;
        let key = ResourceId::new(&table.name, row_id);
        Ok(match self.txn_manager.read(txn, &key)? {
            ReadOutcome::Visible(row) => Some(row),
            ReadOutcome::Absent => None,
            ReadOutcome::Unversioned => table.get(row_id).cloned(),
        })
    }

    /// Snapshot read that also holds a shared lock on the row until `txn` ends.
    pub fn read_for_share(
        &self,
        txn: &mut Transaction,
        table: &str,
        row_id: RowId,
    ) -> MemDbResult<Option<Row>> {
        let key = ResourceId::new(table, row_id);
        self.txn_manager.lock_shared(txn, &key)?;
        self.read(txn, table, row_id)
    }

    /// Exclusive-locked read of the newest committed row, for read-modify-write.
    pub fn read_for_update(
        &self,
        txn: &mut Transaction,
        table: &str,
        row_id: RowId,
    ) -> MemDbResult<Option<Row>> {
        let table = self.table(table)?;
        let key = ResourceId::new(&table.name, row_id);
        Ok(match self.txn_manager.read_for_update(txn, &key)? {
            ReadOutcome::Visible(row) => Some(row),
            ReadOutcome::Absent => None,
            ReadOutcome::Unversioned => table.get(row_id).cloned(),
        })
    }

    pub fn insert(&mut self, txn: &mut Transaction, table: &str, row: Row) -> MemDbResult<RowId> {
        let target = self.table_entry(table)?;
        let row_id = target.reserve_row_id();
        let row = target.check_row(row_id, row)?;
        let key = ResourceId::new(&target.name, row_id);
        self.txn_manager.write(txn, &key, None, Some(row.clone()))?;
        restore_image(&mut self.tables, &self.buffer_pool, &key, Some(&row))?;
        Ok(row_id)
    }

    pub fn update(
        &mut self,
        txn: &mut Transaction,
        table: &str,
        row_id: RowId,
        row: Row,
    ) -> MemDbResult<Row> {
        let target = self.table_entry(table)?;
        let old = target
            .get(row_id)
            .cloned()
            .ok_or_else(|| MemDbError::NotFound(format!("row {row_id} in table {table}")))?;
        let row = target.check_row(row_id, row)?;
        let key = ResourceId::new(&target.name, row_id);
        self.txn_manager
            .write(txn, &key, Some(old.clone()), Some(row.clone()))?;
        restore_image(&mut self.tables, &self.buffer_pool, &key, Some(&row))?;
        Ok(old)
    }

    pub fn delete(&mut self, txn: &mut Transaction, table: &str, row_id: RowId) -> MemDbResult<Row> {
        let target = self.table_entry(table)?;
        let old = target
            .get(row_id)
            .cloned()
            .ok_or_else(|| MemDbError::NotFound(format!("row {row_id} in table {table}")))?;
        let key = ResourceId::new(&target.name, row_id);
        self.txn_manager.write(txn, &key, Some(old.clone()), None)?;
        restore_image(&mut self.tables, &self.buffer_pool, &key, None)?;
        Ok(old)
    }

    /// Insert `row` in a transaction of its own.
    pub fn insert_autocommit(&mut self, table: &str, row: Row) -> MemDbResult<RowId> {
        let mut txn = self.begin_transaction()?;
        match self.insert(&mut txn, table, row) {
            Ok(row_id) => {
                self.commit(&mut txn)?;
                Ok(row_id)
            }
            Err(e) => {
                self.rollback(&mut txn)?;
                Err(e)
            }
        }
    }

    fn table_entry(&mut self, name: &str) -> MemDbResult<&mut Table> {
        self.tables
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| MemDbError::NotFound(format!("table {name}")))
    }

    pub fn checkpoint(&self) -> MemDbResult<Lsn> {
        self.txn_manager.checkpoint()
    }

    /// Durable log contents, as they would survive a crash.
    pub fn wal_image(&self) -> bytes::Bytes {
        self.txn_manager.wal().durable_image()
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.txn_manager
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffer_pool
    }

    pub fn optimizer(&self) -> &QueryOptimizer {
        &self.optimizer
    }

    /// Rebuild a database from a WAL image. `definitions` re-create the empty
    /// tables; rows come from replaying the log, with losers rolled back.
    pub fn recover(
        wal_image: &[u8],
        definitions: &[TableDefinition],
        options: DatabaseOptions,
    ) -> MemDbResult<(Self, RecoverySummary)> {
        let wal = Arc::new(WalManager::open(options.wal, wal_image)?);
        let mut state = RecoveredState::new();
        let summary = RecoveryManager::new(wal.clone()).replay(&mut state)?;
        let max_txn_id = wal
            .durable_records()?
            .iter()
            .map(|record| record.txn_id)
            .max()
            .unwrap_or(0);

        let mut db = Self::with_wal(options, wal);
        for definition in definitions {
            db.create_table_from(definition)?;
        }
        for (resource, row) in state.live_rows() {
            let table = db.tables.get_mut(&resource.table).ok_or_else(|| {
                MemDbError::RecoveryFailure(format!(
                    "log references table {} with no definition",
                    resource.table
                ))
            })?;
            table
                .insert_with_id(resource.row_id, row.clone())
                .map_err(|e| {
                    MemDbError::RecoveryFailure(format!("cannot restore {resource}: {e}"))
                })?;
        }
        db.txn_manager.mvcc().reset(
            state
                .live_rows()
                .map(|(resource, row)| (resource.clone(), row.clone())),
        );
        db.txn_manager.resume_after(max_txn_id);
        info!(
            "recovered {} rows into {} tables, {} losers rolled back",
            state.len(),
            db.tables.len(),
            summary.loser_transactions.len()
        );
        Ok((db, summary))
    }

    pub fn statistics(&self) -> DatabaseReport {
        let mut tables: Vec<TableReport> = self.tables.values().map(|t| t.statistics()).collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        DatabaseReport {
            buffer_pool: self.buffer_pool.stats(),
            wal: self.txn_manager.wal().stats(),
            transactions: self.txn_manager.stats(),
            tables,
            rows_processed: self.rows_processed.load(Ordering::Relaxed),
        }
    }
}

/// Lock conflicts fail at once: every mutation borrows the database
/// mutably, so a holder can never release while another caller waits.
impl Default for Database {
    fn default() -> Self {
        Self::new(DatabaseOptions::default().with_lock(LockConfig::no_wait()))
    }
}

/// Make the row named by `resource` match `image` (`None` = absent). Applying
/// the same image twice is a no-op. Resident copies of its page are dropped.
fn restore_image(
    tables: &mut HashMap<String, Table>,
    pool: &BufferPool,
    resource: &ResourceId,
    image: Option<&Row>,
) -> MemDbResult<()> {
    let table = tables
        .get_mut(&resource.table)
        .ok_or_else(|| MemDbError::NotFound(format!("table {}", resource.table)))?;
    let row_id = resource.row_id;
    match (table.get(row_id).cloned(), image) {
        (Some(current), Some(row)) if current != *row => {
            table.update_row(row_id, row.clone())?;
        }
        (Some(_), Some(_)) | (None, None) => {}
        (None, Some(row)) => table.insert_with_id(row_id, row.clone())?,
        (Some(_), None) => {
            table.delete_row(row_id)?;
        }
    }
    let page_id = table.page_of(row_id);
    if let Err(e) = pool.discard_page(page_id) {
        warn!("page {page_id} of {} stays resident: {e}", table.name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};
    use crate::storage::index::IndexKind;

    fn accounts_db() -> Database {
        let mut db = Database::default();
        let definition = TableDefinition::new(
            "accounts",
            vec![
                Column::new("id", DataType::Int64, false),
                Column::new("balance", DataType::Int64, false),
            ],
        )
        .with_index("pk_accounts", "id", IndexKind::BTree, true);
        db.create_table_from(&definition).unwrap();
        db
    }

    #[test]
    fn transactional_writes_reach_table_and_log() {
        let mut db = accounts_db();
        let mut txn = db.begin_transaction().unwrap();
        let row_id = db.insert(&mut txn, "accounts", vec![1.into(), 100.into()]).unwrap();
        db.commit(&mut txn).unwrap();

        assert_eq!(db.table("accounts").unwrap().len(), 1);
        let rows = db.query("SELECT balance FROM accounts WHERE id = 1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data[0], 100.into());
        assert!(db.statistics().wal.durable_records >= 3);

        let mut reader = db.begin_transaction().unwrap();
        assert_eq!(
            db.read(&mut reader, "accounts", row_id).unwrap(),
            Some(vec![1.into(), 100.into()])
        );
        db.commit(&mut reader).unwrap();
    }

    #[test]
    fn rollback_restores_every_touched_row() {
        let mut db = accounts_db();
        db.insert_autocommit("accounts", vec![1.into(), 100.into()]).unwrap();

        let mut txn = db.begin_transaction().unwrap();
        db.update(&mut txn, "accounts", 0, vec![1.into(), 5.into()]).unwrap();
        db.insert(&mut txn, "accounts", vec![2.into(), 7.into()]).unwrap();
        db.rollback(&mut txn).unwrap();

        let table = db.table("accounts").unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0), Some(&vec![1.into(), 100.into()]));
        assert_eq!(db.statistics().transactions.aborts, 1);
    }

    #[test]
    fn failed_validation_logs_nothing() {
        let mut db = accounts_db();
        db.insert_autocommit("accounts", vec![1.into(), 100.into()]).unwrap();
        let before = db.statistics().wal.next_lsn;

        let mut txn = db.begin_transaction().unwrap();
        let dup = db.insert(&mut txn, "accounts", vec![1.into(), 1.into()]);
        assert!(matches!(dup, Err(MemDbError::IntegrityViolation(_))));
        // only the BEGIN record was appended
        assert_eq!(db.statistics().wal.next_lsn, before + 1);
        db.rollback(&mut txn).unwrap();
    }

    #[test]
    fn conflicting_writer_fails_without_waiting() {
        let mut db = accounts_db();
        let row_id = db.insert_autocommit("accounts", vec![1.into(), 100.into()]).unwrap();
        let mut holder = db.begin_transaction().unwrap();
        db.update(&mut holder, "accounts", row_id, vec![1.into(), 50.into()])
            .unwrap();

        let mut other = db.begin_transaction().unwrap();
        let started = std::time::Instant::now();
        let err = db
            .update(&mut other, "accounts", row_id, vec![1.into(), 10.into()])
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(started.elapsed() < std::time::Duration::from_millis(100));

        db.rollback(&mut other).unwrap();
        db.commit(&mut holder).unwrap();
        assert_eq!(
            db.table("accounts").unwrap().get(row_id),
            Some(&vec![1.into(), 50.into()])
        );
    }

    #[test]
    fn table_mut_requires_quiescence() {
        let mut db = accounts_db();
        let mut txn = db.begin_transaction().unwrap();
        assert!(matches!(db.table_mut("accounts"), Err(MemDbError::Conflict(_))));
        assert!(matches!(db.drop_table("accounts"), Err(MemDbError::Conflict(_))));
        db.commit(&mut txn).unwrap();
        db.table_mut("accounts")
            .unwrap()
            .insert(vec![9.into(), 9.into()])
            .unwrap();
        db.drop_table("ACCOUNTS").unwrap();
        assert!(matches!(db.table("accounts"), Err(MemDbError::NotFound(_))));
    }
}
