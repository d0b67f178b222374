//! Keel - the storage engine of a teaching relational database
//!
//! The crate provides two tightly coupled subsystems: a page-granular
//! buffer pool and a concurrent B+tree index whose nodes are buffer pool
//! pages.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): page-granular disk access
//!   - `DiskManager`: reads and writes 4 KiB pages by page id
//!   - `DiskScheduler`: funnels I/O through a background worker thread
//!   - `HeaderPage`: the page-0 catalog mapping index names to root pages
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: pins pages into frames, evicts with LRU-K
//!   - `LruKReplacer`: backward-k-distance replacement policy
//!   - `ExtendibleHashTable`: the page table (`page_id -> frame_id`)
//!   - `ReadPageGuard`/`WritePageGuard`: RAII pin + page latch handles
//!
//! - **Index** (`index`): the on-disk B+tree
//!   - `BPlusTree`: search/insert/remove under latch-coupling (crabbing)
//!   - `IndexIterator`: forward cursor over the leaf chain
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keel::buffer::BufferPoolManager;
//! use keel::index::{BPlusTree, GenericKey, IntegerComparator};
//! use keel::storage::disk::DiskManager;
//! use keel::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let tree = BPlusTree::<8>::new(
//!     "orders_pk",
//!     Arc::clone(&bpm),
//!     Arc::new(IntegerComparator),
//!     64,
//!     64,
//! )
//! .unwrap();
//!
//! let key = GenericKey::from_u64(42);
//! let rid = RecordId::new(PageId::new(7), SlotId::new(0));
//! tree.insert(&key, rid).unwrap();
//! assert_eq!(tree.get_value(&key).unwrap(), Some(rid));
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{FrameId, KeelError, PageId, RecordId, Result, SlotId};
