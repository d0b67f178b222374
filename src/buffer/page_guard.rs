use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::common::PageId;

use super::frame::{Frame, FrameReadGuard, FrameWriteGuard};
use super::BufferPoolManager;

/// RAII guard for shared access to a page.
///
/// While the guard lives, the page is pinned in its frame and its page
/// latch is held in shared mode. Dropping the guard releases the latch and
/// returns the borrow to the buffer pool.
pub struct ReadPageGuard {
    page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    data_guard: Option<FrameReadGuard>,
}

impl ReadPageGuard {
    pub(crate) fn new(page_id: PageId, frame: &Frame, bpm: Arc<BufferPoolManager>) -> Self {
        let data_guard = frame.latch_read();
        Self {
            page_id,
            bpm,
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Release the latch before returning the pin.
        self.data_guard.take();
        self.bpm.unpin_page(self.page_id, false);
    }
}

/// RAII guard for exclusive access to a page.
///
/// Holds the pin and the exclusive page latch. The first call to
/// `data_mut` marks the page dirty; the dirty bit is handed to the buffer
/// pool when the guard drops.
pub struct WritePageGuard {
    page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    data_guard: Option<FrameWriteGuard>,
    is_dirty: bool,
}

impl WritePageGuard {
    pub(crate) fn new(page_id: PageId, frame: &Frame, bpm: Arc<BufferPoolManager>) -> Self {
        let data_guard = frame.latch_write();
        Self {
            page_id,
            bpm,
            data_guard: Some(data_guard),
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        &mut self.data_guard.as_mut().unwrap()[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data_guard.take();
        self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::DiskManager;

    fn make_bpm() -> (Arc<BufferPoolManager>, tempfile::NamedTempFile) {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        (Arc::new(BufferPoolManager::new(4, 2, dm)), temp_file)
    }

    #[test]
    fn test_write_guard_marks_dirty_and_unpins() {
        let (bpm, _temp) = make_bpm();

        let page_id = {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[0] = 42;
            guard.page_id()
        };

        // Guard dropped: pin returned, data still resident.
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
        let guard = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn test_read_guards_are_shared() {
        let (bpm, _temp) = make_bpm();

        let page_id = bpm.new_page().unwrap().page_id();

        let g1 = bpm.fetch_page_read(page_id).unwrap();
        let g2 = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(bpm.get_pin_count(page_id), Some(2));
        drop(g1);
        drop(g2);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }
}
