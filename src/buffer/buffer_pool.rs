//! Fixed-capacity page cache with pin counts and LRU eviction.

use bytes::Bytes;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffer::page::{PageGuard, PageId, INVALID_PAGE_ID};
use crate::config::BufferPoolConfig;
use crate::error::{MemDbError, MemDbResult};
use crate::utils::cache::{LruReplacer, Replacer};

pub type FrameId = usize;

#[derive(Debug, Clone)]
pub struct FrameMeta {
    pub page_id: PageId,
    pub pin_count: u32,
    pub is_dirty: bool,
    /// Pool-wide access tick of the latest fetch.
    pub last_used: u64,
}

impl Default for FrameMeta {
    fn default() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
            last_used: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    pub capacity: usize,
    pub resident: usize,
    pub pinned: usize,
    pub dirty: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub dirty_evictions: u64,
}

/// Frame bookkeeping. Page table, free list, replacer and per-frame metadata
/// change together under one latch so a frame is never both pinned and chosen
/// as a victim.
#[derive(Debug)]
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
    meta: Vec<FrameMeta>,
    tick: u64,
}

#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    state: Mutex<PoolState>,
    frames: Vec<RwLock<Bytes>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    dirty_evictions: AtomicU64,
}

impl BufferPool {
    pub fn new(num_pages: usize) -> Self {
        Self::new_with_config(BufferPoolConfig {
            buffer_pool_size: num_pages,
            ..Default::default()
        })
    }

    pub fn new_with_config(config: BufferPoolConfig) -> Self {
        let capacity = config.buffer_pool_size;
        Self {
            capacity,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(capacity),
                free_list: (0..capacity).collect(),
                replacer: LruReplacer::new(capacity),
                meta: vec![FrameMeta::default(); capacity],
                tick: 0,
            }),
            frames: (0..capacity).map(|_| RwLock::new(Bytes::new())).collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            dirty_evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pin `page_id`, loading it through `loader` on a miss. The loader runs
    /// with the pool latch held and must not call back into the pool.
    pub fn fetch_page<F>(&self, page_id: PageId, loader: F) -> MemDbResult<Bytes>
    where
        F: FnOnce(PageId) -> MemDbResult<Bytes>,
    {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let meta = &mut state.meta[frame_id];
            meta.pin_count += 1;
            meta.last_used = tick;
            state.replacer.record_access(frame_id)?;
            state.replacer.set_evictable(frame_id, false)?;
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(self.frames[frame_id].read().clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let frame_id = match state.free_list.pop_front() {
            Some(frame_id) => frame_id,
            None => self.evict_victim(&mut state)?,
        };

        let data = match loader(page_id) {
            Ok(data) => data,
            Err(e) => {
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        };
        *self.frames[frame_id].write() = data.clone();
        state.meta[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
            last_used: tick,
        };
        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id)?;
        state.replacer.set_evictable(frame_id, false)?;
        Ok(data)
    }

    /// Like `fetch_page`, returning a guard that unpins on drop.
    pub fn fetch_page_guarded<F>(&self, page_id: PageId, loader: F) -> MemDbResult<PageGuard<'_>>
    where
        F: FnOnce(PageId) -> MemDbResult<Bytes>,
    {
        let data = self.fetch_page(page_id, loader)?;
        Ok(PageGuard::new(self, page_id, data))
    }

    fn evict_victim(&self, state: &mut PoolState) -> MemDbResult<FrameId> {
        let frame_id = state.replacer.evict().ok_or_else(|| {
            MemDbError::CapacityExhausted(format!(
                "all {} buffer frames are pinned",
                self.capacity
            ))
        })?;
        let victim = std::mem::take(&mut state.meta[frame_id]);
        if victim.pin_count > 0 {
            return Err(MemDbError::Internal(format!(
                "replacer chose pinned frame {frame_id} (page {})",
                victim.page_id
            )));
        }
        state.page_table.remove(&victim.page_id);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        if victim.is_dirty {
            self.dirty_evictions.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            "evicted page {} from frame {} (dirty: {})",
            victim.page_id, frame_id, victim.is_dirty
        );
        Ok(frame_id)
    }

    /// Drop one pin. Returns false when the page is not resident or not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let meta = &mut state.meta[frame_id];
        if meta.pin_count == 0 {
            return false;
        }
        meta.pin_count -= 1;
        meta.is_dirty |= is_dirty;
        if meta.pin_count == 0 {
            // frame was accessed when pinned, so the replacer knows it
            if state.replacer.set_evictable(frame_id, true).is_err() {
                return false;
            }
        }
        true
    }

    pub fn mark_dirty(&self, page_id: PageId) -> MemDbResult<()> {
        let mut state = self.state.lock();
        let frame_id = Self::resident_frame(&state, page_id)?;
        state.meta[frame_id].is_dirty = true;
        Ok(())
    }

    /// Replace the payload of a pinned page and mark it dirty.
    pub fn write_page(&self, page_id: PageId, data: Bytes) -> MemDbResult<()> {
        let mut state = self.state.lock();
        let frame_id = Self::resident_frame(&state, page_id)?;
        if state.meta[frame_id].pin_count == 0 {
            return Err(MemDbError::Internal(format!(
                "page {page_id} must be pinned to be written"
            )));
        }
        *self.frames[frame_id].write() = data;
        state.meta[frame_id].is_dirty = true;
        Ok(())
    }

    fn resident_frame(state: &PoolState, page_id: PageId) -> MemDbResult<FrameId> {
        state
            .page_table
            .get(&page_id)
            .copied()
            .ok_or_else(|| MemDbError::NotFound(format!("page {page_id} is not resident")))
    }

    /// Hand every dirty page to `writer` and clear its dirty flag. Returns the
    /// number of pages written.
    pub fn flush_all<W>(&self, mut writer: W) -> MemDbResult<usize>
    where
        W: FnMut(PageId, &Bytes) -> MemDbResult<()>,
    {
        let mut state = self.state.lock();
        let mut flushed = 0;
        for frame_id in 0..self.capacity {
            let meta = &state.meta[frame_id];
            if meta.page_id == INVALID_PAGE_ID || !meta.is_dirty {
                continue;
            }
            writer(meta.page_id, &self.frames[frame_id].read())?;
            state.meta[frame_id].is_dirty = false;
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Remove an unpinned page from the pool. Returns false when it was not resident.
    pub fn discard_page(&self, page_id: PageId) -> MemDbResult<bool> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        if state.meta[frame_id].pin_count > 0 {
            return Err(MemDbError::Conflict(format!(
                "page {page_id} is pinned and cannot be discarded"
            )));
        }
        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        state.meta[frame_id] = FrameMeta::default();
        state.free_list.push_back(frame_id);
        *self.frames[frame_id].write() = Bytes::new();
        Ok(true)
    }

    /// Discard every unpinned page matching `predicate`.
    pub fn discard_where<P>(&self, predicate: P) -> MemDbResult<usize>
    where
        P: Fn(PageId) -> bool,
    {
        let pages: Vec<PageId> = {
            let state = self.state.lock();
            state
                .page_table
                .keys()
                .copied()
                .filter(|p| predicate(*p))
                .collect()
        };
        let mut discarded = 0;
        for page_id in pages {
            if self.discard_page(page_id)? {
                discarded += 1;
            }
        }
        Ok(discarded)
    }

    pub fn resident_pages(&self) -> usize {
        self.state.lock().page_table.len()
    }

    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|frame_id| state.meta[*frame_id].pin_count)
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    pub fn frame_meta(&self, page_id: PageId) -> Option<FrameMeta> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|frame_id| state.meta[*frame_id].clone())
    }

    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock();
        let live = state
            .meta
            .iter()
            .filter(|m| m.page_id != INVALID_PAGE_ID);
        let (pinned, dirty) = live.fold((0, 0), |(p, d), m| {
            (p + usize::from(m.pin_count > 0), d + usize::from(m.is_dirty))
        });
        BufferPoolStats {
            capacity: self.capacity,
            resident: state.page_table.len(),
            pinned,
            dirty,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            dirty_evictions: self.dirty_evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap as StdHashMap;

    fn loader(page_id: PageId) -> MemDbResult<Bytes> {
        Ok(Bytes::from(page_id.to_le_bytes().to_vec()))
    }

    #[test]
    fn hit_miss_and_lru_eviction() {
        let pool = BufferPool::new(2);
        pool.fetch_page(1, loader).unwrap();
        pool.fetch_page(2, loader).unwrap();
        pool.fetch_page(1, loader).unwrap();
        assert!(pool.unpin_page(1, false));
        assert!(pool.unpin_page(1, false));
        assert!(pool.unpin_page(2, true));
        assert!(!pool.unpin_page(2, false));
        // 1 was used more recently than 2
        pool.fetch_page(1, loader).unwrap();
        assert!(pool.unpin_page(1, false));
        pool.fetch_page(3, loader).unwrap();
        assert!(!pool.is_resident(2));
        assert!(pool.is_resident(1));
        let stats = pool.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.dirty_evictions, 1);
    }

    #[test]
    fn pinned_frames_are_never_evicted() {
        let pool = BufferPool::new(2);
        pool.fetch_page(1, loader).unwrap();
        pool.fetch_page(2, loader).unwrap();
        let err = pool.fetch_page(3, loader).unwrap_err();
        assert!(matches!(err, MemDbError::CapacityExhausted(_)));
        assert_eq!(pool.resident_pages(), 2);
        assert_eq!(pool.pin_count(1), Some(1));
        pool.unpin_page(2, false);
        pool.fetch_page(3, loader).unwrap();
        assert!(pool.is_resident(1));
        assert!(!pool.is_resident(2));
    }

    #[test]
    fn random_workload_respects_capacity_and_pins() {
        let mut rng = StdRng::seed_from_u64(17);
        let pool = BufferPool::new(8);
        let mut pins: StdHashMap<PageId, u32> = StdHashMap::new();
        for _ in 0..5000 {
            let page_id = rng.random_range(0..32u64);
            if rng.random_bool(0.5) {
                match pool.fetch_page(page_id, loader) {
                    Ok(data) => {
                        assert_eq!(data, loader(page_id).unwrap());
                        *pins.entry(page_id).or_insert(0) += 1;
                    }
                    Err(MemDbError::CapacityExhausted(_)) => {
                        assert_eq!(pins.values().filter(|c| **c > 0).count(), 8);
                    }
                    Err(e) => panic!("unexpected error {e}"),
                }
            } else if let Some(count) = pins.get_mut(&page_id).filter(|c| **c > 0) {
                *count -= 1;
                assert!(pool.unpin_page(page_id, rng.random_bool(0.3)));
            }
            assert!(pool.resident_pages() <= 8);
            for (page, count) in pins.iter() {
                if *count > 0 {
                    assert_eq!(pool.pin_count(*page), Some(*count));
                }
            }
        }
    }

    #[test]
    fn flush_and_guard() {
        let pool = BufferPool::new(4);
        {
            let mut guard = pool.fetch_page_guarded(9, loader).unwrap();
            guard.overwrite(Bytes::from_static(b"new")).unwrap();
            assert_eq!(pool.pin_count(9), Some(1));
        }
        assert_eq!(pool.pin_count(9), Some(0));
        let mut written = Vec::new();
        let count = pool
            .flush_all(|page_id, data| {
                written.push((page_id, data.clone()));
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(written, vec![(9, Bytes::from_static(b"new"))]);
        assert_eq!(pool.flush_all(|_, _| Ok(())).unwrap(), 0);
        assert!(pool.discard_page(9).unwrap());
        assert_eq!(pool.resident_pages(), 0);
    }
}
