pub mod buffer_pool;
pub mod page;

pub use buffer_pool::{BufferPool, BufferPoolStats, FrameId, FrameMeta};
pub use page::{heap_page_id, page_number, PageGuard, PageId, INVALID_PAGE_ID};
