use std::collections::{BTreeMap, HashMap};

use crate::buffer::FrameId;
use crate::error::{MemDbError, MemDbResult};
use crate::utils::cache::Replacer;

#[derive(Debug, Clone, Copy)]
struct FrameEntry {
    last_access: u64,
    evictable: bool,
}

/// Classic LRU over a logical clock. Evictable frames are kept ordered by
/// their last access so eviction is O(log n).
#[derive(Debug)]
pub struct LruReplacer {
    capacity: usize,
    clock: u64,
    frames: HashMap<FrameId, FrameEntry>,
    evictable: BTreeMap<u64, FrameId>,
}

impl LruReplacer {
    pub fn last_access(&self, frame_id: FrameId) -> Option<u64> {
        self.frames.get(&frame_id).map(|e| e.last_access)
    }
}

impl Replacer for LruReplacer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            clock: 0,
            frames: HashMap::with_capacity(capacity),
            evictable: BTreeMap::new(),
        }
    }

    fn record_access(&mut self, frame_id: FrameId) -> MemDbResult<()> {
        if frame_id >= self.capacity {
            return Err(MemDbError::Internal(format!(
                "frame {frame_id} out of range for replacer of {} frames",
                self.capacity
            )));
        }
        self.clock += 1;
        let now = self.clock;
        let entry = self.frames.entry(frame_id).or_insert(FrameEntry {
            last_access: now,
            evictable: false,
        });
        if entry.evictable {
            self.evictable.remove(&entry.last_access);
            self.evictable.insert(now, frame_id);
        }
        entry.last_access = now;
        Ok(())
    }

    fn evict(&mut self) -> Option<FrameId> {
        let (_, frame_id) = self.evictable.pop_first()?;
        self.frames.remove(&frame_id);
        Some(frame_id)
    }

    fn set_evictable(&mut self, frame_id: FrameId, set_evictable: bool) -> MemDbResult<()> {
        let entry = self.frames.get_mut(&frame_id).ok_or_else(|| {
            MemDbError::Internal(format!("frame {frame_id} was never accessed"))
        })?;
        if entry.evictable == set_evictable {
            return Ok(());
        }
        entry.evictable = set_evictable;
        if set_evictable {
            self.evictable.insert(entry.last_access, frame_id);
        } else {
            self.evictable.remove(&entry.last_access);
        }
        Ok(())
    }

    fn remove(&mut self, frame_id: FrameId) {
        if let Some(entry) = self.frames.remove(&frame_id) {
            if entry.evictable {
                self.evictable.remove(&entry.last_access);
            }
        }
    }

    fn size(&self) -> usize {
        self.evictable.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used_evictable() {
        let mut replacer = LruReplacer::new(4);
        for frame in 0..4 {
            replacer.record_access(frame).unwrap();
        }
        replacer.record_access(0).unwrap();
        for frame in 0..4 {
            replacer.set_evictable(frame, true).unwrap();
        }
        replacer.set_evictable(1, false).unwrap();
        assert_eq!(replacer.size(), 3);
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), None);
        assert!(replacer.record_access(9).is_err());
        assert!(replacer.set_evictable(2, true).is_err());
    }
}
