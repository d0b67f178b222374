//! Integration tests for the buffer pool manager

use std::sync::Arc;
use std::thread;

use keel::buffer::BufferPoolManager;
use keel::common::{KeelError, PAGE_SIZE, PageId};
use keel::storage::disk::DiskManager;
use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    (Arc::new(BufferPoolManager::new(pool_size, 2, dm)), temp_file)
}

#[test]
fn test_single_frame_pool() {
    let (bpm, _temp) = create_bpm(1);

    let guard = bpm.new_page().unwrap();
    assert_eq!(guard.page_id(), PageId::new(0));

    // The only frame is pinned: no second page can be created.
    assert!(matches!(bpm.new_page(), Err(KeelError::BufferPoolFull)));

    drop(guard);
    assert!(bpm.new_page().is_ok());
}

#[test]
fn test_clean_pages_evict_without_write() {
    let (bpm, _temp) = create_bpm(2);

    let p = bpm.new_page().unwrap().page_id();
    let q = bpm.new_page().unwrap().page_id();
    assert_ne!(p, q);

    // Neither page was written, so whatever got evicted (if anything) must
    // not have touched the disk.
    let guard = bpm.fetch_page_read(p).unwrap();
    assert!(guard.data().iter().all(|&b| b == 0));
    assert_eq!(bpm.disk_manager().num_writes(), 0);
}

#[test]
fn test_overcommitted_pool_round_trips_through_disk() {
    let (bpm, _temp) = create_bpm(3);

    // One more page than frames, all dirty and unpinned.
    let page_ids: Vec<PageId> = (0..4u8)
        .map(|i| {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[0] = i;
            guard.data_mut()[PAGE_SIZE - 1] = i;
            guard.page_id()
        })
        .collect();

    // The fourth allocation had to evict a dirty page.
    assert!(bpm.disk_manager().num_writes() >= 1);

    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = bpm.fetch_page_read(pid).unwrap();
        assert_eq!(guard.data()[0], i as u8);
        assert_eq!(guard.data()[PAGE_SIZE - 1], i as u8);
    }
}

#[test]
fn test_flush_then_reopen() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();
    let test_data = b"write-on-flush round trip";

    let page_id = {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(10, 2, dm));
        let page_id = {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[..test_data.len()].copy_from_slice(test_data);
            guard.page_id()
        };
        assert!(bpm.flush_page(page_id).unwrap());
        page_id
    };

    let dm = Arc::new(DiskManager::new(&path).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(10, 2, dm));
    let guard = bpm.fetch_page_read(page_id).unwrap();
    assert_eq!(&guard.data()[..test_data.len()], test_data);
}

#[test]
fn test_flush_all_then_reopen() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let page_ids: Vec<PageId> = {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(10, 2, dm));
        let ids = (0..5u8)
            .map(|i| {
                let mut guard = bpm.new_page().unwrap();
                guard.data_mut()[0] = i;
                guard.page_id()
            })
            .collect();
        bpm.flush_all_pages().unwrap();
        ids
    };

    let dm = Arc::new(DiskManager::new(&path).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(10, 2, dm));
    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = bpm.fetch_page_read(pid).unwrap();
        assert_eq!(guard.data()[0], i as u8);
    }
}

#[test]
fn test_allocator_skips_fetched_page_ids() {
    let (bpm, _temp) = create_bpm(4);

    // Fetching a page that was never allocated (the header page pattern)
    // must push the allocator past it.
    {
        let guard = bpm.fetch_page_read(PageId::new(0)).unwrap();
        assert!(guard.data().iter().all(|&b| b == 0));
    }
    let next = bpm.new_page().unwrap().page_id();
    assert_eq!(next, PageId::new(1));
}

#[test]
fn test_pin_counts_track_guards() {
    let (bpm, _temp) = create_bpm(4);

    let page_id = bpm.new_page().unwrap().page_id();
    assert_eq!(bpm.get_pin_count(page_id), Some(0));
    assert_eq!(bpm.evictable_count(), 1);

    {
        let _g1 = bpm.fetch_page_read(page_id).unwrap();
        let _g2 = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(bpm.get_pin_count(page_id), Some(2));
        assert_eq!(bpm.evictable_count(), 0);
    }
    assert_eq!(bpm.get_pin_count(page_id), Some(0));
    assert_eq!(bpm.evictable_count(), 1);
}

#[test]
fn test_delete_page_semantics() {
    let (bpm, _temp) = create_bpm(4);

    let page_id = bpm.new_page().unwrap().page_id();

    {
        let _guard = bpm.fetch_page_read(page_id).unwrap();
        assert!(matches!(
            bpm.delete_page(page_id),
            Err(KeelError::PageStillPinned(_))
        ));
    }

    assert!(bpm.delete_page(page_id).unwrap());
    assert_eq!(bpm.get_pin_count(page_id), None);
    // Absent pages delete trivially.
    assert!(bpm.delete_page(page_id).unwrap());
}

#[test]
fn test_concurrent_readers() {
    let (bpm, _temp) = create_bpm(10);

    let page_id = {
        let mut guard = bpm.new_page().unwrap();
        guard.data_mut()[0] = 99;
        guard.page_id()
    };

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let bpm = Arc::clone(&bpm);
            thread::spawn(move || {
                for _ in 0..100 {
                    let guard = bpm.fetch_page_read(page_id).unwrap();
                    assert_eq!(guard.data()[0], 99);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(bpm.get_pin_count(page_id), Some(0));
}

#[test]
fn test_concurrent_writers_small_pool() {
    let (bpm, _temp) = create_bpm(5);

    let page_ids: Vec<PageId> = (0..20).map(|_| bpm.new_page().unwrap().page_id()).collect();

    let handles: Vec<_> = (0..4usize)
        .map(|t| {
            let bpm = Arc::clone(&bpm);
            let page_ids = page_ids.clone();
            thread::spawn(move || {
                for (i, &pid) in page_ids.iter().enumerate() {
                    if i % 4 != t {
                        continue;
                    }
                    let mut guard = bpm.fetch_page_write(pid).unwrap();
                    let bytes = pid.as_u32().to_le_bytes();
                    guard.data_mut()[..4].copy_from_slice(&bytes);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for &pid in &page_ids {
        let guard = bpm.fetch_page_read(pid).unwrap();
        let stored: [u8; 4] = guard.data()[..4].try_into().unwrap();
        assert_eq!(u32::from_le_bytes(stored), pid.as_u32());
    }
}
