use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;
use parking_lot::Mutex;

use crate::common::{
    DEFAULT_BUCKET_SIZE, FrameId, INVALID_PAGE_ID, KeelError, PAGE_SIZE, PageId, Result,
};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::frame::Frame;
use super::lru_k_replacer::LruKReplacer;
use super::page_guard::{ReadPageGuard, WritePageGuard};
use super::page_table::ExtendibleHashTable;

/// BufferPoolManager caches fixed-size disk pages in a fixed set of frames.
///
/// Residency bookkeeping (page table, free list, replacer state, pin
/// transitions) is serialized by one internal mutex, held for the duration
/// of a single operation including the mandatory write-on-evict and
/// read-on-fetch. Page latches are never acquired while that mutex is held:
/// callers receive a pinned frame first and latch it afterwards through a
/// page guard.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<Arc<Frame>>,
    /// Maps resident page ids to their frames
    page_table: ExtendibleHashTable<PageId, FrameId>,
    free_list: Mutex<VecDeque<FrameId>>,
    replacer: LruKReplacer,
    /// Next page id to hand out; advances past any id seen via fetch so the
    /// header page (fetched, never allocated) cannot collide
    next_page_id: AtomicU32,
    latch: Mutex<()>,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let next_page_id = disk_manager.num_pages();

        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(DEFAULT_BUCKET_SIZE),
            free_list: Mutex::new(free_list),
            replacer: LruKReplacer::new(replacer_k, pool_size),
            next_page_id: AtomicU32::new(next_page_id),
            latch: Mutex::new(()),
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a fresh page and returns it pinned behind an exclusive
    /// guard, zero-filled. Fails with `BufferPoolFull` when every frame is
    /// pinned.
    pub fn new_page(self: &Arc<Self>) -> Result<WritePageGuard> {
        let frame_id = {
            let _latch = self.latch.lock();

            let frame_id = self.acquire_frame()?;
            let frame = &self.frames[frame_id.as_usize()];

            let page_id = PageId::new(self.next_page_id.fetch_add(1, Ordering::SeqCst));
            frame.set_page_id(page_id);
            frame.pin();

            self.page_table.insert(page_id, frame_id);
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            frame_id
        };

        let frame = &self.frames[frame_id.as_usize()];
        Ok(WritePageGuard::new(
            frame.page_id(),
            frame,
            Arc::clone(self),
        ))
    }

    /// Fetches a page and latches it in shared mode.
    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> Result<ReadPageGuard> {
        let frame_id = self.fetch_frame(page_id)?;
        let frame = &self.frames[frame_id.as_usize()];
        Ok(ReadPageGuard::new(page_id, frame, Arc::clone(self)))
    }

    /// Fetches a page and latches it exclusively.
    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> Result<WritePageGuard> {
        let frame_id = self.fetch_frame(page_id)?;
        let frame = &self.frames[frame_id.as_usize()];
        Ok(WritePageGuard::new(page_id, frame, Arc::clone(self)))
    }

    /// Returns one borrow of the page. The dirty flag is ORed into the
    /// frame's dirty bit, never cleared here. Returns false when the page is
    /// not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _latch = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];

        if is_dirty {
            frame.set_dirty(true);
        }
        match frame.unpin() {
            None => false,
            Some(0) => {
                self.replacer.set_evictable(frame_id, true);
                true
            }
            Some(_) => true,
        }
    }

    /// Writes a resident page to disk regardless of its pin count and
    /// clears its dirty bit. Returns false when the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(KeelError::InvalidPageId(page_id));
        }

        let _latch = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.disk_scheduler.schedule_write_sync(page_id, &data)?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Flushes every resident page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let _latch = self.latch.lock();

        for frame in &self.frames {
            let page_id = frame.page_id();
            if page_id == INVALID_PAGE_ID || !frame.is_dirty() {
                continue;
            }
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.schedule_write_sync(page_id, &data)?;
            frame.set_dirty(false);
        }
        Ok(())
    }

    /// Drops a page from the pool, returning its frame to the free list.
    /// A page that is not resident needs no work; a pinned page cannot be
    /// deleted. The page id is not reused.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let _latch = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(true);
        };
        let frame = &self.frames[frame_id.as_usize()];

        if frame.pin_count() > 0 {
            return Err(KeelError::PageStillPinned(page_id));
        }

        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        frame.reset();
        self.free_list.lock().push_back(frame_id);
        Ok(true)
    }

    /// Pin count of a resident page, None when not resident.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let _latch = self.latch.lock();
        self.page_table
            .find(&page_id)
            .map(|frame_id| self.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Number of frames the replacer currently considers evictable.
    pub fn evictable_count(&self) -> usize {
        self.replacer.size()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    /// Pins the frame holding `page_id`, reading the page from disk into a
    /// victim frame if it is not resident.
    fn fetch_frame(&self, page_id: PageId) -> Result<FrameId> {
        if page_id == INVALID_PAGE_ID {
            return Err(KeelError::InvalidPageId(page_id));
        }

        let _latch = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.as_usize()];
            frame.pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(frame_id);
        }

        let frame_id = self.acquire_frame()?;
        let frame = &self.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        self.disk_scheduler.schedule_read_sync(page_id, &mut data)?;
        frame.copy_from(&data);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();

        // Never hand this id out again through the allocator.
        self.next_page_id
            .fetch_max(page_id.as_u32() + 1, Ordering::SeqCst);

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok(frame_id)
    }

    /// Takes a frame off the free list, or evicts one. The caller must hold
    /// the pool latch. A dirty victim is written back before the frame is
    /// reused; at most one write happens per eviction.
    fn acquire_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.evict() else {
            return Err(KeelError::BufferPoolFull);
        };
        let frame = &self.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            debug!("evicting dirty page {old_page_id} from frame {frame_id}");
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.schedule_write_sync(old_page_id, &data)?;
        }

        self.page_table.remove(&old_page_id);
        frame.reset();
        Ok(frame_id)
    }
}
