use crate::common::{PAGE_SIZE, PageId};

/// The header page (page 0) is a small catalog mapping index names to root
/// page ids. Layout, little-endian:
///
/// - offset 0: `num_records: u32`
/// - offset 4 + i * 36: record i = 32-byte zero-padded name + `root_page_id: u32`
///
/// A zero-filled page is a valid empty catalog, so the header page needs no
/// explicit initialization on a fresh database file.
pub const HEADER_NAME_SIZE: usize = 32;
pub const HEADER_RECORD_SIZE: usize = HEADER_NAME_SIZE + 4;
pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - 4) / HEADER_RECORD_SIZE;

fn record_offset(index: usize) -> usize {
    4 + index * HEADER_RECORD_SIZE
}

fn padded_name(name: &str) -> Option<[u8; HEADER_NAME_SIZE]> {
    if name.len() > HEADER_NAME_SIZE {
        return None;
    }
    let mut out = [0u8; HEADER_NAME_SIZE];
    out[..name.len()].copy_from_slice(name.as_bytes());
    Some(out)
}

fn num_records_of(data: &[u8]) -> usize {
    u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize
}

fn find_record(data: &[u8], name: &str) -> Option<usize> {
    let padded = padded_name(name)?;
    (0..num_records_of(data)).find(|&i| {
        let offset = record_offset(i);
        data[offset..offset + HEADER_NAME_SIZE] == padded
    })
}

/// Mutable view of the header page.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn num_records(&self) -> usize {
        num_records_of(self.data)
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        find_record(self.data, name).map(|i| self.root_at(i))
    }

    /// Adds a record. Returns false when the name is taken, too long, or
    /// the catalog is full.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        let Some(padded) = padded_name(name) else {
            return false;
        };
        if find_record(self.data, name).is_some() {
            return false;
        }
        let count = self.num_records();
        if count >= MAX_HEADER_RECORDS {
            return false;
        }

        let offset = record_offset(count);
        self.data[offset..offset + HEADER_NAME_SIZE].copy_from_slice(&padded);
        self.set_root_at(count, root_page_id);
        self.data[0..4].copy_from_slice(&(count as u32 + 1).to_le_bytes());
        true
    }

    /// Rewrites an existing record's root page id. Returns false when the
    /// name is unknown.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        match find_record(self.data, name) {
            Some(i) => {
                self.set_root_at(i, root_page_id);
                true
            }
            None => false,
        }
    }

    /// Drops a record, compacting the tail over it.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(i) = find_record(self.data, name) else {
            return false;
        };
        let count = self.num_records();
        self.data
            .copy_within(record_offset(i + 1)..record_offset(count), record_offset(i));
        self.data[0..4].copy_from_slice(&(count as u32 - 1).to_le_bytes());
        true
    }

    fn root_at(&self, index: usize) -> PageId {
        let offset = record_offset(index) + HEADER_NAME_SIZE;
        PageId::new(u32::from_le_bytes(
            self.data[offset..offset + 4].try_into().unwrap(),
        ))
    }

    fn set_root_at(&mut self, index: usize, root: PageId) {
        let offset = record_offset(index) + HEADER_NAME_SIZE;
        self.data[offset..offset + 4].copy_from_slice(&root.as_u32().to_le_bytes());
    }
}

/// Read-only view of the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn num_records(&self) -> usize {
        num_records_of(self.data)
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        find_record(self.data, name).map(|i| {
            let offset = record_offset(i) + HEADER_NAME_SIZE;
            PageId::new(u32::from_le_bytes(
                self.data[offset..offset + 4].try_into().unwrap(),
            ))
        })
    }
}
