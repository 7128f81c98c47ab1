use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use strum::Display;

use crate::config::LockConfig;
use crate::error::{MemDbError, MemDbResult};
use crate::transaction::{ResourceId, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    /// Whether holding `self` already satisfies a request for `requested`.
    pub fn covers(self, requested: LockMode) -> bool {
        self == LockMode::Exclusive || requested == LockMode::Shared
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    pub locked_resources: usize,
    pub waiting_transactions: usize,
    pub waits: u64,
    pub deadlocks: u64,
    pub timeouts: u64,
}

/// Row-level lock table used by the transaction manager.
pub trait LockManager: Debug + Send + Sync {
    /// Block until `mode` is granted on `resource`, or fail with `Deadlock`
    /// (waiting would close a cycle) or `Conflict` (wait timed out).
    fn lock(&self, txn_id: TransactionId, resource: &ResourceId, mode: LockMode) -> MemDbResult<()>;

    /// Release everything `txn_id` holds. Returns the number of locks released.
    fn unlock_all(&self, txn_id: TransactionId) -> usize;

    fn held_mode(&self, txn_id: TransactionId, resource: &ResourceId) -> Option<LockMode>;

    fn stats(&self) -> LockStats;
}

#[derive(Debug)]
struct LockEntry {
    mode: LockMode,
    holders: BTreeSet<TransactionId>,
    waiters: VecDeque<(TransactionId, LockMode)>,
}

impl LockEntry {
    fn new(mode: LockMode) -> Self {
        Self {
            mode,
            holders: BTreeSet::new(),
            waiters: VecDeque::new(),
        }
    }

    fn grantable(&self, txn_id: TransactionId, mode: LockMode) -> bool {
        if self.holders.is_empty() {
            return true;
        }
        match mode {
            LockMode::Shared => self.mode == LockMode::Shared,
            // upgrade only when the requester is the sole holder
            LockMode::Exclusive => self.holders.len() == 1 && self.holders.contains(&txn_id),
        }
    }
}

#[derive(Debug, Default)]
struct LockTable {
    entries: HashMap<ResourceId, LockEntry>,
    wait_for: HashMap<TransactionId, HashSet<TransactionId>>,
    held: HashMap<TransactionId, HashSet<ResourceId>>,
}

impl LockTable {
    fn remove_waiter(&mut self, txn_id: TransactionId, resource: &ResourceId) {
        self.wait_for.remove(&txn_id);
        let drop_entry = match self.entries.get_mut(resource) {
            Some(entry) => {
                entry.waiters.retain(|(waiter, _)| *waiter != txn_id);
                entry.holders.is_empty() && entry.waiters.is_empty()
            }
            None => false,
        };
        if drop_entry {
            self.entries.remove(resource);
        }
    }

    /// DFS over the wait-for graph. Returns the cycle through `start`, if any.
    fn find_cycle(&self, start: TransactionId) -> Option<Vec<TransactionId>> {
        fn visit(
            graph: &HashMap<TransactionId, HashSet<TransactionId>>,
            node: TransactionId,
            start: TransactionId,
            visited: &mut HashSet<TransactionId>,
            path: &mut Vec<TransactionId>,
        ) -> bool {
            path.push(node);
            if let Some(edges) = graph.get(&node) {
                for next in edges.iter().copied() {
                    if next == start {
                        return true;
                    }
                    if visited.insert(next) && visit(graph, next, start, visited, path) {
                        return true;
                    }
                }
            }
            path.pop();
            false
        }

        let mut visited = HashSet::from([start]);
        let mut path = Vec::new();
        visit(&self.wait_for, start, start, &mut visited, &mut path).then_some(path)
    }
}

/// Strict two-phase locking with shared/exclusive modes. Waits block on a
/// condvar, bounded by `LockConfig::wait_timeout`; every wait is preceded by
/// a wait-for graph cycle check.
#[derive(Debug)]
pub struct TwoPhaseLockManager {
    config: LockConfig,
    table: Mutex<LockTable>,
    released: Condvar,
    waits: AtomicU64,
    deadlocks: AtomicU64,
    timeouts: AtomicU64,
}

impl TwoPhaseLockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            waits: AtomicU64::new(0),
            deadlocks: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// Holders of `resource`, for diagnostics.
    pub fn holders(&self, resource: &ResourceId) -> Vec<TransactionId> {
        self.table
            .lock()
            .entries
            .get(resource)
            .map(|entry| entry.holders.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for TwoPhaseLockManager {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

impl LockManager for TwoPhaseLockManager {
    fn lock(&self, txn_id: TransactionId, resource: &ResourceId, mode: LockMode) -> MemDbResult<()> {
        let deadline = Instant::now() + self.config.wait_timeout;
        let mut table = self.table.lock();
        let mut waiting = false;
        loop {
            let entry = table
                .entries
                .entry(resource.clone())
                .or_insert_with(|| LockEntry::new(mode));
            if entry.holders.contains(&txn_id) && entry.mode.covers(mode) {
                return Ok(());
            }
            if entry.grantable(txn_id, mode) {
                if entry.holders.is_empty() || mode == LockMode::Exclusive {
                    entry.mode = mode;
                }
                entry.holders.insert(txn_id);
                if waiting {
                    table.remove_waiter(txn_id, resource);
                }
                table
                    .held
                    .entry(txn_id)
                    .or_default()
                    .insert(resource.clone());
                return Ok(());
            }

            let blockers: HashSet<TransactionId> = entry
                .holders
                .iter()
                .copied()
                .filter(|holder| *holder != txn_id)
                .collect();
            if !waiting {
                entry.waiters.push_back((txn_id, mode));
            }
            table.wait_for.insert(txn_id, blockers);
            if let Some(cycle) = table.find_cycle(txn_id) {
                table.remove_waiter(txn_id, resource);
                self.deadlocks.fetch_add(1, Ordering::Relaxed);
                warn!("deadlock: txn {txn_id} waiting for {mode} on {resource} closes cycle {cycle:?}");
                return Err(MemDbError::Deadlock(format!(
                    "txn {txn_id} requesting {mode} lock on {resource} would close cycle {cycle:?}"
                )));
            }
            if self.config.wait_timeout.is_zero() {
                table.remove_waiter(txn_id, resource);
                return Err(MemDbError::Conflict(format!(
                    "{mode} lock on {resource} is held by another transaction"
                )));
            }
            if !waiting {
                waiting = true;
                self.waits.fetch_add(1, Ordering::Relaxed);
                debug!("txn {txn_id} waits for {mode} lock on {resource}");
            }
            if self.released.wait_until(&mut table, deadline).timed_out() {
                // one last try: the release may have raced the timeout
                let granted = table
                    .entries
                    .get(resource)
                    .is_some_and(|entry| entry.grantable(txn_id, mode));
                if !granted {
                    table.remove_waiter(txn_id, resource);
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!("txn {txn_id} timed out waiting for {mode} lock on {resource}");
                    return Err(MemDbError::Conflict(format!(
                        "timed out after {:?} waiting for {mode} lock on {resource}",
                        self.config.wait_timeout
                    )));
                }
            }
        }
    }

    fn unlock_all(&self, txn_id: TransactionId) -> usize {
        let mut table = self.table.lock();
        let resources = table.held.remove(&txn_id).unwrap_or_default();
        for resource in resources.iter() {
            let drop_entry = match table.entries.get_mut(resource) {
                Some(entry) => {
                    entry.holders.remove(&txn_id);
                    entry.holders.is_empty() && entry.waiters.is_empty()
                }
                None => false,
            };
            if drop_entry {
                table.entries.remove(resource);
            }
        }
        table.wait_for.remove(&txn_id);
        for edges in table.wait_for.values_mut() {
            edges.remove(&txn_id);
        }
        drop(table);
        self.released.notify_all();
        resources.len()
    }

    fn held_mode(&self, txn_id: TransactionId, resource: &ResourceId) -> Option<LockMode> {
        let table = self.table.lock();
        table
            .entries
            .get(resource)
            .filter(|entry| entry.holders.contains(&txn_id))
            .map(|entry| entry.mode)
    }

    fn stats(&self) -> LockStats {
        let table = self.table.lock();
        LockStats {
            locked_resources: table
                .entries
                .values()
                .filter(|entry| !entry.holders.is_empty())
                .count(),
            waiting_transactions: table.wait_for.len(),
            waits: self.waits.load(Ordering::Relaxed),
            deadlocks: self.deadlocks.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn row(id: u64) -> ResourceId {
        ResourceId::new("t", id)
    }

    #[test]
    fn shared_locks_are_compatible_and_upgrade_needs_sole_holder() {
        let manager = TwoPhaseLockManager::new(LockConfig::no_wait());
        manager.lock(1, &row(1), LockMode::Shared).unwrap();
        manager.lock(2, &row(1), LockMode::Shared).unwrap();
        assert!(matches!(
            manager.lock(1, &row(1), LockMode::Exclusive),
            Err(MemDbError::Conflict(_))
        ));
        assert_eq!(manager.unlock_all(2), 1);
        manager.lock(1, &row(1), LockMode::Exclusive).unwrap();
        assert_eq!(manager.held_mode(1, &row(1)), Some(LockMode::Exclusive));
        // exclusive covers a later shared request
        manager.lock(1, &row(1), LockMode::Shared).unwrap();
        assert!(manager.lock(3, &row(1), LockMode::Shared).is_err());
        assert_eq!(manager.unlock_all(1), 1);
        assert_eq!(manager.stats().locked_resources, 0);
    }

    #[test]
    fn exclusive_waits_for_release() {
        let manager = Arc::new(TwoPhaseLockManager::new(LockConfig {
            wait_timeout: Duration::from_secs(5),
        }));
        manager.lock(10, &row(7), LockMode::Shared).unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let handle = {
            let manager = manager.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                manager.lock(20, &row(7), LockMode::Exclusive).unwrap();
                acquired.store(true, Ordering::SeqCst);
                manager.unlock_all(20);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        assert_eq!(manager.stats().waiting_transactions, 1);
        manager.unlock_all(10);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(manager.stats().waits, 1);
    }

    #[test]
    fn wait_times_out_as_conflict() {
        let manager = TwoPhaseLockManager::new(LockConfig {
            wait_timeout: Duration::from_millis(30),
        });
        manager.lock(1, &row(1), LockMode::Exclusive).unwrap();
        let err = manager.lock(2, &row(1), LockMode::Shared).unwrap_err();
        assert!(matches!(err, MemDbError::Conflict(_)));
        assert_eq!(manager.stats().timeouts, 1);
        assert_eq!(manager.stats().waiting_transactions, 0);
    }

    #[test]
    fn crossing_waits_report_deadlock() {
        let manager = Arc::new(TwoPhaseLockManager::new(LockConfig {
            wait_timeout: Duration::from_secs(5),
        }));
        manager.lock(1, &row(1), LockMode::Exclusive).unwrap();
        manager.lock(2, &row(2), LockMode::Exclusive).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handle = {
            let manager = manager.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                // blocks behind txn 2 until txn 2 gives up and releases
                let result = manager.lock(1, &row(2), LockMode::Exclusive);
                manager.unlock_all(1);
                result
            })
        };
        barrier.wait();
        // let txn 1 start waiting first so txn 2 closes the cycle
        while manager.stats().waiting_transactions == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        let err = manager.lock(2, &row(1), LockMode::Exclusive).unwrap_err();
        assert!(matches!(err, MemDbError::Deadlock(_)));
        assert!(err.is_retryable());
        manager.unlock_all(2);
        assert!(handle.join().unwrap().is_ok());
        assert_eq!(manager.stats().deadlocks, 1);
    }
}
