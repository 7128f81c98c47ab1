use bytes::Bytes;

use crate::buffer::buffer_pool::BufferPool;
use crate::storage::tuple::RowId;

pub type PageId = u64;

pub const INVALID_PAGE_ID: PageId = u64::MAX;

/// Logical heap page holding `row_id`: the relation name hash in the high
/// 32 bits, the page number in the low 32 bits.
pub fn heap_page_id(relation: &str, row_id: RowId, rows_per_page: u64) -> PageId {
    let relation_bits = crc32fast::hash(relation.to_ascii_lowercase().as_bytes()) as u64;
    let page_no = (row_id / rows_per_page.max(1)) & 0xFFFF_FFFF;
    (relation_bits << 32) | page_no
}

/// Page number within its relation.
pub fn page_number(page_id: PageId) -> u64 {
    page_id & 0xFFFF_FFFF
}

/// A pinned page. Unpins on drop, reporting dirty if the page was written.
#[derive(Debug)]
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    data: Bytes,
    is_dirty: bool,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(pool: &'a BufferPool, page_id: PageId, data: Bytes) -> Self {
        Self {
            pool,
            page_id,
            data,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn overwrite(&mut self, data: Bytes) -> crate::error::MemDbResult<()> {
        self.pool.write_page(self.page_id, data.clone())?;
        self.data = data;
        self.is_dirty = true;
        Ok(())
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if !self.pool.unpin_page(self.page_id, self.is_dirty) {
            log::warn!("page {} was not pinned when its guard dropped", self.page_id);
        }
    }
}
