use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{INVALID_PAGE_ID, PageId, RecordId, Result};

use super::generic_key::GenericKey;
use super::leaf_page::LeafPageRef;

/// Forward cursor over the leaf chain, positioned as `(leaf page, slot)`.
///
/// The iterator holds no latch between steps; each `next` pins the current
/// leaf only long enough to copy one pair out, then follows the sibling
/// link when the leaf is exhausted. Concurrent structural changes may make
/// a scan skip or repeat entries; point reads of each pair are consistent.
pub struct IndexIterator<const N: usize> {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    index: u32,
}

impl<const N: usize> IndexIterator<N> {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, index: u32) -> Self {
        Self {
            bpm,
            page_id,
            index,
        }
    }

    /// True once the cursor has run off the rightmost leaf.
    pub fn is_end(&self) -> bool {
        self.page_id == INVALID_PAGE_ID
    }

    /// Returns the pair under the cursor and advances, or None at the end
    /// of the leaf chain.
    pub fn next_entry(&mut self) -> Result<Option<(GenericKey<N>, RecordId)>> {
        while self.page_id != INVALID_PAGE_ID {
            let guard = self.bpm.fetch_page_read(self.page_id)?;
            let leaf = LeafPageRef::<N>::new(guard.data());

            if self.index < leaf.size() {
                let slot = self.index as usize;
                let entry = (leaf.key_at(slot), leaf.value_at(slot));
                self.index += 1;
                return Ok(Some(entry));
            }

            self.page_id = leaf.next_page_id();
            self.index = 0;
        }
        Ok(None)
    }
}

impl<const N: usize> Iterator for IndexIterator<N> {
    type Item = Result<(GenericKey<N>, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
