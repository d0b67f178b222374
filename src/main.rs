use std::sync::Arc;

use keel::buffer::BufferPoolManager;
use keel::index::{BPlusTree, GenericKey, IntegerComparator};
use keel::storage::disk::DiskManager;
use keel::{PageId, RecordId, SlotId};

fn main() {
    env_logger::init();

    println!("Keel - a disk-oriented storage engine in Rust");
    println!("=============================================\n");

    let db_path = "demo.db";
    let disk_manager = Arc::new(DiskManager::new(db_path).expect("failed to create disk manager"));
    println!("Created disk manager for: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));
    println!("Created buffer pool manager with 16 frames\n");

    // Small node sizes so a handful of keys already builds a multi-level tree.
    let tree = BPlusTree::<8>::new("demo_pk", Arc::clone(&bpm), Arc::new(IntegerComparator), 4, 4)
        .expect("failed to create index");

    for n in 1u64..=12 {
        let key = GenericKey::from_u64(n);
        let rid = RecordId::new(PageId::new(100 + n as u32), SlotId::new(0));
        tree.insert(&key, rid).expect("insert failed");
    }
    println!("Inserted keys 1..=12, root page is {}", tree.root_page_id());

    let probe = GenericKey::from_u64(7);
    match tree.get_value(&probe).expect("lookup failed") {
        Some(rid) => println!("Key 7 -> ({}, slot {})", rid.page_id, rid.slot_id.as_u16()),
        None => println!("Key 7 not found"),
    }

    print!("Forward scan:");
    let mut iter = tree.begin().expect("scan failed");
    while let Some((key, _rid)) = iter.next_entry().expect("scan step failed") {
        print!(" {}", key.to_u64());
    }
    println!();

    for n in [3u64, 4, 5] {
        tree.remove(&GenericKey::from_u64(n)).expect("remove failed");
    }
    print!("After removing 3..=5:");
    let mut iter = tree.begin().expect("scan failed");
    while let Some((key, _rid)) = iter.next_entry().expect("scan step failed") {
        print!(" {}", key.to_u64());
    }
    println!();

    bpm.flush_all_pages().expect("flush failed");
    println!("\nFlushed all pages to disk");

    std::fs::remove_file(db_path).ok();
    println!("Demo completed successfully!");
}
