use std::time::Duration;

use derive_with::With;

#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    pub buffer_pool_size: usize,
    /// Number of heap rows that share one logical page.
    pub rows_per_page: u64,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            buffer_pool_size: 256,
            rows_per_page: 64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BTreeConfig {
    /// A node splits once it reaches `order` keys.
    pub order: usize,
    /// Width of one bucket in the inserted-key histogram.
    pub histogram_bucket_width: f64,
}

impl Default for BTreeConfig {
    fn default() -> Self {
        BTreeConfig {
            order: 32,
            histogram_bucket_width: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HashIndexConfig {
    pub bucket_capacity: usize,
}

impl Default for HashIndexConfig {
    fn default() -> Self {
        HashIndexConfig { bucket_capacity: 8 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfig {
    pub histogram_buckets: usize,
    pub seq_page_cost: f64,
    pub random_page_cost: f64,
    pub cpu_tuple_cost: f64,
    pub cpu_index_tuple_cost: f64,
    /// Multiplier applied to the linear hash join cost (build + probe).
    pub hash_join_weight: f64,
    pub default_selectivity: f64,
    /// Join selectivity assumed when a predicate links both sides.
    pub join_selectivity: f64,
    pub block_size: usize,
    pub grace_partitions: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            histogram_buckets: 10,
            seq_page_cost: 1.0,
            random_page_cost: 4.0,
            cpu_tuple_cost: 0.01,
            cpu_index_tuple_cost: 0.005,
            hash_join_weight: 1.5,
            default_selectivity: 0.1,
            join_selectivity: 0.1,
            block_size: 64,
            grace_partitions: 8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
    /// Upper bound on a lock wait. `Duration::ZERO` fails immediately on conflict.
    pub wait_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            wait_timeout: Duration::from_millis(500),
        }
    }
}

impl LockConfig {
    pub fn no_wait() -> Self {
        LockConfig {
            wait_timeout: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MvccConfig {
    /// Versions older than `oldest_active_snapshot - retention` become garbage.
    pub retention: u64,
}

impl Default for MvccConfig {
    fn default() -> Self {
        MvccConfig { retention: 64 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WalConfig {
    /// Take a checkpoint automatically after this many appended records (None disables).
    pub checkpoint_interval_records: Option<u64>,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            checkpoint_interval_records: Some(4096),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, With)]
pub struct DatabaseOptions {
    pub buffer_pool: BufferPoolConfig,
    pub btree: BTreeConfig,
    pub hash_index: HashIndexConfig,
    pub optimizer: OptimizerConfig,
    pub lock: LockConfig,
    pub mvcc: MvccConfig,
    pub wal: WalConfig,
}
