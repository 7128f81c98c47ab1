use crate::buffer::FrameId;
use crate::error::MemDbResult;

pub mod lru;

pub use lru::LruReplacer;

/// Victim selection policy for buffer frames. Only frames marked evictable
/// may be returned by `evict`.
pub trait Replacer {
    fn new(capacity: usize) -> Self
    where
        Self: Sized;

    fn record_access(&mut self, frame_id: FrameId) -> MemDbResult<()>;

    fn evict(&mut self) -> Option<FrameId>;

    fn set_evictable(&mut self, frame_id: FrameId, set_evictable: bool) -> MemDbResult<()>;

    fn remove(&mut self, frame_id: FrameId);

    /// Number of evictable frames.
    fn size(&self) -> usize;
}
