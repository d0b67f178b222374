use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{HEADER_PAGE_ID, INVALID_PAGE_ID, KeelError, PageId, RecordId, Result};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_page::{BTreePageMut, BTreePageRef};
use super::generic_key::GenericKey;
use super::internal_page::{InternalPage, InternalPageRef};
use super::key_comparator::KeyComparator;
use super::leaf_page::{LeafPage, LeafPageRef};

use super::btree_iterator::IndexIterator;

/// On-disk B+tree index over `GenericKey<N>` keys and `RecordId` values.
/// Every node is a buffer pool page; operations descend with latch-coupling
/// and release ancestor latches as soon as a node is safe for the pending
/// operation.
///
/// The root page id lives in its own reader/writer cell, taken at the start
/// of every operation so no thread can observe a stale root while another
/// thread installs a new one. Root changes are also persisted to the header
/// page catalog under the index name.
pub struct BPlusTree<const N: usize> {
    index_name: String,
    root_page_id: RwLock<PageId>,
    bpm: Arc<BufferPoolManager>,
    comparator: Arc<dyn KeyComparator>,
    leaf_max_size: u32,
    internal_max_size: u32,
}

impl<const N: usize> BPlusTree<N> {
    /// Opens the index named `name`, creating its catalog record when it
    /// does not exist yet.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        let index_name = name.into();
        assert!(leaf_max_size >= 2, "leaf max size must be at least 2");
        assert!(internal_max_size >= 3, "internal max size must be at least 3");

        let root_page_id = {
            let mut guard = bpm.fetch_page_write(HEADER_PAGE_ID)?;
            let existing = HeaderPageRef::new(guard.data()).get_root_id(&index_name);
            match existing {
                Some(root) => root,
                None => {
                    let mut header = HeaderPage::new(guard.data_mut());
                    if !header.insert_record(&index_name, INVALID_PAGE_ID) {
                        if index_name.len() > crate::storage::page::HEADER_NAME_SIZE {
                            return Err(KeelError::IndexNameTooLong(index_name));
                        }
                        return Err(KeelError::HeaderPageFull);
                    }
                    INVALID_PAGE_ID
                }
            }
        };

        Ok(Self {
            index_name,
            root_page_id: RwLock::new(root_page_id),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup. Descends with shared latches, releasing each parent as
    /// soon as its child is latched.
    pub fn get_value(&self, key: &GenericKey<N>) -> Result<Option<RecordId>> {
        let cmp = self.comparator.as_ref();

        let root_cell = self.root_page_id.read();
        let root = *root_cell;
        if root == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.bpm.fetch_page_read(root)?;
        drop(root_cell);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                let leaf = LeafPageRef::<N>::new(guard.data());
                return Ok(leaf.lookup(key, cmp));
            }
            let child = InternalPageRef::<N>::new(guard.data()).lookup(key, cmp);
            let child_guard = self.bpm.fetch_page_read(child)?;
            guard = child_guard;
        }
    }

    /// Inserts a key/value pair. Returns false (and changes nothing) when
    /// the key already exists.
    pub fn insert(&self, key: &GenericKey<N>, value: RecordId) -> Result<bool> {
        let cmp = self.comparator.as_ref();
        let mut root_cell = Some(self.root_page_id.write());

        if **root_cell.as_ref().unwrap() == INVALID_PAGE_ID {
            let mut guard = self.bpm.new_page()?;
            let page_id = guard.page_id();
            let mut leaf = LeafPage::<N>::new(guard.data_mut());
            leaf.init(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, value, cmp);
            drop(guard);

            **root_cell.as_mut().unwrap() = page_id;
            self.persist_root(page_id)?;
            debug!("index {}: new root leaf {page_id}", self.index_name);
            return Ok(true);
        }

        let (ancestors, mut leaf_guard) = self.find_leaf_write(key, &mut root_cell, |page| {
            if page.is_leaf() {
                page.size() + 1 < page.max_size()
            } else {
                page.size() < page.max_size()
            }
        })?;

        let leaf_page_id = leaf_guard.page_id();
        {
            let mut leaf = LeafPage::<N>::new(leaf_guard.data_mut());
            if !leaf.insert(key, value, cmp) {
                return Ok(false);
            }
            if leaf.size() < leaf.max_size() {
                return Ok(true);
            }
        }

        // The leaf reached max_size: split, linking the new right page into
        // the sibling chain, then push the split key upward.
        let mut right_guard = self.bpm.new_page()?;
        let right_page_id = right_guard.page_id();
        let push_key = {
            let mut leaf = LeafPage::<N>::new(leaf_guard.data_mut());
            let mut right = LeafPage::<N>::new(right_guard.data_mut());
            right.init(right_page_id, leaf.parent_page_id(), self.leaf_max_size);
            leaf.split_to(&mut right);
            right.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(right_page_id);
            right.key_at(0)
        };
        debug!("index {}: split leaf {leaf_page_id} -> {right_page_id}", self.index_name);

        self.propagate_split(ancestors, root_cell, leaf_guard, right_guard, push_key)?;
        Ok(true)
    }

    /// Removes a key if present. Underflowing nodes redistribute from or
    /// merge with a sibling, cascading up to the root.
    pub fn remove(&self, key: &GenericKey<N>) -> Result<()> {
        let cmp = self.comparator.as_ref();
        let mut root_cell = Some(self.root_page_id.write());

        if **root_cell.as_ref().unwrap() == INVALID_PAGE_ID {
            return Ok(());
        }

        let (mut ancestors, mut leaf_guard) =
            self.find_leaf_write(key, &mut root_cell, |page| page.size() > page.min_size())?;

        let leaf_page_id = leaf_guard.page_id();
        let (removed, size, min_size, is_root) = {
            let mut leaf = LeafPage::<N>::new(leaf_guard.data_mut());
            let removed = leaf.remove(key, cmp);
            (
                removed,
                leaf.size(),
                leaf.min_size(),
                leaf.parent_page_id() == INVALID_PAGE_ID,
            )
        };
        if !removed {
            return Ok(());
        }

        if is_root {
            if size == 0 {
                **root_cell
                    .as_mut()
                    .expect("an unsafe root keeps the root-id cell") = INVALID_PAGE_ID;
                drop(leaf_guard);
                self.persist_root(INVALID_PAGE_ID)?;
                let _ = self.bpm.delete_page(leaf_page_id);
                debug!("index {}: tree emptied", self.index_name);
            }
            return Ok(());
        }
        if size >= min_size {
            return Ok(());
        }

        let deleted_pages = self.resolve_underflow(&mut ancestors, &mut root_cell, leaf_guard)?;

        ancestors.clear();
        for page_id in deleted_pages {
            // A concurrent leaf scan may still pin an emptied page; it is
            // unlinked from the tree either way.
            let _ = self.bpm.delete_page(page_id);
        }
        Ok(())
    }

    /// Forward cursor positioned at the first key of the leftmost leaf.
    pub fn begin(&self) -> Result<IndexIterator<N>> {
        let root_cell = self.root_page_id.read();
        let root = *root_cell;
        if root == INVALID_PAGE_ID {
            return Ok(IndexIterator::new(Arc::clone(&self.bpm), INVALID_PAGE_ID, 0));
        }
        let mut guard = self.bpm.fetch_page_read(root)?;
        drop(root_cell);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                return Ok(IndexIterator::new(Arc::clone(&self.bpm), guard.page_id(), 0));
            }
            let child = InternalPageRef::<N>::new(guard.data()).child_at(0);
            let child_guard = self.bpm.fetch_page_read(child)?;
            guard = child_guard;
        }
    }

    /// Forward cursor positioned at the first key >= `key`.
    pub fn begin_from(&self, key: &GenericKey<N>) -> Result<IndexIterator<N>> {
        let cmp = self.comparator.as_ref();

        let root_cell = self.root_page_id.read();
        let root = *root_cell;
        if root == INVALID_PAGE_ID {
            return Ok(IndexIterator::new(Arc::clone(&self.bpm), INVALID_PAGE_ID, 0));
        }
        let mut guard = self.bpm.fetch_page_read(root)?;
        drop(root_cell);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                let leaf = LeafPageRef::<N>::new(guard.data());
                let index = leaf.key_index(key, cmp) as u32;
                return Ok(IndexIterator::new(
                    Arc::clone(&self.bpm),
                    guard.page_id(),
                    index,
                ));
            }
            let child = InternalPageRef::<N>::new(guard.data()).lookup(key, cmp);
            let child_guard = self.bpm.fetch_page_read(child)?;
            guard = child_guard;
        }
    }

    /// Exclusive-latch descent to the leaf covering `key`. Every latched
    /// node goes onto the ancestor stack; when a node satisfies `is_safe`,
    /// all ancestors above it (including the root-id cell) are released.
    /// Returns the retained ancestors and the latched leaf.
    fn find_leaf_write<'a>(
        &'a self,
        key: &GenericKey<N>,
        root_cell: &mut Option<parking_lot::RwLockWriteGuard<'a, PageId>>,
        is_safe: impl Fn(&BTreePageRef<'_>) -> bool,
    ) -> Result<(Vec<WritePageGuard>, WritePageGuard)> {
        let cmp = self.comparator.as_ref();
        let mut ancestors: Vec<WritePageGuard> = Vec::new();
        let mut page_id = **root_cell.as_ref().expect("cell held at descent start");

        loop {
            let guard = self.bpm.fetch_page_write(page_id)?;
            let (is_leaf, safe) = {
                let page = BTreePageRef::new(guard.data());
                (page.is_leaf(), is_safe(&page))
            };
            if safe {
                ancestors.clear();
                *root_cell = None;
            }
            if is_leaf {
                return Ok((ancestors, guard));
            }
            page_id = InternalPageRef::<N>::new(guard.data()).lookup(key, cmp);
            ancestors.push(guard);
        }
    }

    /// Carries `(push_key, new right page)` upward after a split, splitting
    /// overflowing parents in turn and growing a new root when the split
    /// reaches the top.
    fn propagate_split(
        &self,
        mut ancestors: Vec<WritePageGuard>,
        mut root_cell: Option<parking_lot::RwLockWriteGuard<'_, PageId>>,
        mut left_guard: WritePageGuard,
        right: WritePageGuard,
        mut push_key: GenericKey<N>,
    ) -> Result<()> {
        let mut push_child = right.page_id();
        let mut right_guard = Some(right);

        loop {
            let parent_page_id = BTreePageRef::new(left_guard.data()).parent_page_id();

            if parent_page_id == INVALID_PAGE_ID {
                // The root itself split: grow a new root over both halves.
                let mut root_guard = self.bpm.new_page()?;
                let new_root_id = root_guard.page_id();
                {
                    let mut root = InternalPage::<N>::new(root_guard.data_mut());
                    root.init(new_root_id, INVALID_PAGE_ID, self.internal_max_size);
                    root.insert_at(0, &GenericKey::zeroed(), left_guard.page_id());
                    root.insert_at(1, &push_key, push_child);
                }
                BTreePageMut::new(left_guard.data_mut()).set_parent_page_id(new_root_id);
                if let Some(right_guard) = right_guard.as_mut() {
                    BTreePageMut::new(right_guard.data_mut()).set_parent_page_id(new_root_id);
                }

                **root_cell
                    .as_mut()
                    .expect("a splitting root keeps the root-id cell") = new_root_id;
                drop(left_guard);
                drop(right_guard);
                drop(root_guard);
                self.persist_root(new_root_id)?;
                debug!("index {}: new root {new_root_id}", self.index_name);
                return Ok(());
            }

            let mut parent_guard = ancestors
                .pop()
                .expect("an unsafe child keeps its parent latched");
            debug_assert_eq!(parent_guard.page_id(), parent_page_id);

            {
                let mut parent = InternalPage::<N>::new(parent_guard.data_mut());
                let index = parent
                    .child_index(left_guard.page_id())
                    .expect("split page missing from its parent");
                parent.insert_at(index + 1, &push_key, push_child);
            }
            drop(left_guard);
            right_guard.take();

            let (size, max_size) = {
                let parent = BTreePageRef::new(parent_guard.data());
                (parent.size(), parent.max_size())
            };
            if size <= max_size {
                return Ok(());
            }

            // Parent overflowed as well.
            let mut new_internal_guard = self.bpm.new_page()?;
            let new_internal_id = new_internal_guard.page_id();
            {
                let mut parent = InternalPage::<N>::new(parent_guard.data_mut());
                let mut new_internal = InternalPage::<N>::new(new_internal_guard.data_mut());
                new_internal.init(
                    new_internal_id,
                    parent.parent_page_id(),
                    self.internal_max_size,
                );
                push_key = parent.split_to(&mut new_internal);
            }
            self.adopt_children(&new_internal_guard)?;
            debug!(
                "index {}: split internal {parent_page_id} -> {new_internal_id}",
                self.index_name
            );

            push_child = new_internal_id;
            left_guard = parent_guard;
            right_guard = Some(new_internal_guard);
        }
    }

    /// Fixes an underflowing non-root node by stealing from or merging with
    /// an adjacent sibling, walking up while merges keep underflowing the
    /// parents. Returns the pages queued for deletion; latches are released
    /// before the caller deletes them.
    fn resolve_underflow(
        &self,
        ancestors: &mut Vec<WritePageGuard>,
        root_cell: &mut Option<parking_lot::RwLockWriteGuard<'_, PageId>>,
        leaf_guard: WritePageGuard,
    ) -> Result<Vec<PageId>> {
        let mut deleted_pages = Vec::new();
        let mut node_guard = leaf_guard;

        loop {
            let node_page_id = node_guard.page_id();
            let node_is_leaf = BTreePageRef::new(node_guard.data()).is_leaf();
            let mut parent_guard = ancestors
                .pop()
                .expect("an underflowing node keeps its parent latched");

            // Prefer the left sibling; the leftmost child takes its right
            // neighbor instead. The separator between the pair sits at the
            // right page's slot in the parent.
            let (is_left_sibling, separator_index, sibling_page_id) = {
                let parent = InternalPageRef::<N>::new(parent_guard.data());
                let node_index = parent
                    .child_index(node_page_id)
                    .expect("underflowing page missing from its parent");
                if node_index > 0 {
                    (true, node_index, parent.child_at(node_index - 1))
                } else {
                    (false, 1, parent.child_at(1))
                }
            };
            let mut sibling_guard = self.bpm.fetch_page_write(sibling_page_id)?;

            let can_redistribute = {
                let sibling = BTreePageRef::new(sibling_guard.data());
                sibling.size() > sibling.min_size()
            };

            if can_redistribute {
                if node_is_leaf {
                    let new_separator = {
                        let mut node = LeafPage::<N>::new(node_guard.data_mut());
                        let mut sibling = LeafPage::<N>::new(sibling_guard.data_mut());
                        node.steal_from(&mut sibling, !is_left_sibling)
                    };
                    let mut parent = InternalPage::<N>::new(parent_guard.data_mut());
                    parent.set_key_at(separator_index, &new_separator);
                } else {
                    let separator = {
                        let parent = InternalPageRef::<N>::new(parent_guard.data());
                        parent.key_at(separator_index)
                    };
                    let new_separator = {
                        let mut node = InternalPage::<N>::new(node_guard.data_mut());
                        let mut sibling = InternalPage::<N>::new(sibling_guard.data_mut());
                        node.steal_from(&mut sibling, !is_left_sibling, &separator)
                    };
                    {
                        let mut parent = InternalPage::<N>::new(parent_guard.data_mut());
                        parent.set_key_at(separator_index, &new_separator);
                    }
                    self.adopt_children(&node_guard)?;
                }
                return Ok(deleted_pages);
            }

            // Merge the pair into its left page and drop the separator.
            if node_is_leaf {
                let mut node = LeafPage::<N>::new(node_guard.data_mut());
                let mut sibling = LeafPage::<N>::new(sibling_guard.data_mut());
                if is_left_sibling {
                    sibling.merge_with(&mut node);
                    deleted_pages.push(node_page_id);
                } else {
                    node.merge_with(&mut sibling);
                    deleted_pages.push(sibling_page_id);
                }
            } else {
                let separator = {
                    let parent = InternalPageRef::<N>::new(parent_guard.data());
                    parent.key_at(separator_index)
                };
                let mut node = InternalPage::<N>::new(node_guard.data_mut());
                let mut sibling = InternalPage::<N>::new(sibling_guard.data_mut());
                if is_left_sibling {
                    sibling.merge_with(&mut node, &separator);
                    deleted_pages.push(node_page_id);
                } else {
                    node.merge_with(&mut sibling, &separator);
                    deleted_pages.push(sibling_page_id);
                }
            }
            {
                let mut parent = InternalPage::<N>::new(parent_guard.data_mut());
                parent.remove_at(separator_index);
            }
            if !node_is_leaf {
                let survivor = if is_left_sibling {
                    &sibling_guard
                } else {
                    &node_guard
                };
                self.adopt_children(survivor)?;
            }
            debug!(
                "index {}: merged {} of pair ({node_page_id}, {sibling_page_id})",
                self.index_name,
                if is_left_sibling { "node into left sibling" } else { "right sibling into node" }
            );
            drop(node_guard);
            drop(sibling_guard);

            let (size, min_size, is_root) = {
                let parent = BTreePageRef::new(parent_guard.data());
                (parent.size(), parent.min_size(), parent.is_root())
            };

            if is_root {
                if size == 1 {
                    // The root is an internal page with a single child
                    // left: promote that child.
                    let new_root_id = {
                        let parent = InternalPageRef::<N>::new(parent_guard.data());
                        parent.child_at(0)
                    };
                    let old_root_id = parent_guard.page_id();
                    drop(parent_guard);
                    {
                        let mut guard = self.bpm.fetch_page_write(new_root_id)?;
                        BTreePageMut::new(guard.data_mut()).set_parent_page_id(INVALID_PAGE_ID);
                    }
                    **root_cell
                        .as_mut()
                        .expect("an unsafe root keeps the root-id cell") = new_root_id;
                    self.persist_root(new_root_id)?;
                    deleted_pages.push(old_root_id);
                    debug!(
                        "index {}: root collapsed, {new_root_id} promoted",
                        self.index_name
                    );
                }
                return Ok(deleted_pages);
            }
            if size >= min_size {
                return Ok(deleted_pages);
            }
            node_guard = parent_guard;
        }
    }

    /// Parent-pointer refresh pass: points every child of the page at it.
    /// Centralized here so every structural move that rehomes children goes
    /// through the same code.
    fn adopt_children(&self, parent: &WritePageGuard) -> Result<()> {
        let view = InternalPageRef::<N>::new(parent.data());
        let parent_id = view.page_id();
        let children: Vec<PageId> = (0..view.size() as usize).map(|i| view.child_at(i)).collect();

        for child in children {
            let mut guard = self.bpm.fetch_page_write(child)?;
            if BTreePageRef::new(guard.data()).parent_page_id() != parent_id {
                BTreePageMut::new(guard.data_mut()).set_parent_page_id(parent_id);
            }
        }
        Ok(())
    }

    /// Upserts this index's root page id in the header page catalog.
    fn persist_root(&self, root: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.index_name, root)
            && !header.insert_record(&self.index_name, root)
        {
            return Err(KeelError::HeaderPageFull);
        }
        Ok(())
    }
}
