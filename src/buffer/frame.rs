use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::common::{FrameId, INVALID_PAGE_ID, PAGE_SIZE, PageId};

/// Guard types over a frame's page buffer. Holding one of these is holding
/// the page latch.
pub type FrameReadGuard = ArcRwLockReadGuard<RawRwLock, Box<[u8; PAGE_SIZE]>>;
pub type FrameWriteGuard = ArcRwLockWriteGuard<RawRwLock, Box<[u8; PAGE_SIZE]>>;

/// One slot of the buffer pool. A frame lives for the lifetime of the pool;
/// the page resident in it changes as the pool fetches and evicts.
///
/// The page buffer sits behind its own reader/writer lock - the page latch.
/// This is a different lock from the buffer pool's mutex: the pool's mutex
/// covers residency bookkeeping, the latch covers the bytes.
pub struct Frame {
    /// Index of this frame in the buffer pool
    frame_id: FrameId,
    /// The page currently resident in this frame (INVALID_PAGE_ID if none)
    page_id: AtomicU32,
    /// Number of outstanding borrows of the resident page
    pin_count: AtomicU32,
    /// Whether the resident page has been modified since it was read
    is_dirty: AtomicBool,
    /// The page buffer, guarded by the page latch
    data: Arc<RwLock<Box<[u8; PAGE_SIZE]>>>,
}

impl Frame {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU32::new(INVALID_PAGE_ID.as_u32()),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_u32(), Ordering::Release);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value, or None if the
    /// count was already zero.
    pub fn unpin(&self) -> Option<u32> {
        loop {
            let current = self.pin_count.load(Ordering::Acquire);
            if current == 0 {
                return None;
            }
            if self
                .pin_count
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(current - 1);
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Acquires the page latch in shared mode. The guard owns its handle on
    /// the buffer, so it may outlive the `&self` borrow.
    pub fn latch_read(&self) -> FrameReadGuard {
        RwLock::read_arc(&self.data)
    }

    /// Acquires the page latch in exclusive mode.
    pub fn latch_write(&self) -> FrameWriteGuard {
        RwLock::write_arc(&self.data)
    }

    /// Copies a full page into the frame.
    pub fn copy_from(&self, data: &[u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        let mut guard = self.data.write();
        guard.copy_from_slice(data);
    }

    /// Copies the frame's page out into the given buffer.
    pub fn copy_to(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        let guard = self.data.read();
        data.copy_from_slice(&**guard);
    }

    /// Clears all metadata and zeroes the buffer, making the frame free.
    pub fn reset(&self) {
        self.page_id
            .store(INVALID_PAGE_ID.as_u32(), Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}
