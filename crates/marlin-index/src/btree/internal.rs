//! Internal node operations.

use crate::btree::node::{hdr, Node, NodeHeader, NodePage, NODE_HEADER_SIZE};
use crate::key::KeyComparator;
use marlin_buffer::BufferPool;
use marlin_common::page::{PageId, PageType, PAGE_SIZE};
use marlin_common::{MarlinError, Result};
use std::cmp::Ordering;

/// Encoded size of a child pointer.
const CHILD_SIZE: usize = 8;

/// B+ tree internal node.
///
/// Slot `i` holds `(key, child page id)` at a fixed stride of
/// `key_size + 8` bytes after the header. Slot 0 carries only the child
/// pointer; its key bytes are never read. For `i >= 1`, every key in the
/// subtree under slot i's child is >= key i and < key i+1.
pub struct InternalNode {
    data: Box<[u8; PAGE_SIZE]>,
    key_size: usize,
}

impl InternalNode {
    fn stride(&self) -> usize {
        self.key_size + CHILD_SIZE
    }

    fn slot_offset(&self, index: usize) -> usize {
        NODE_HEADER_SIZE + index * self.stride()
    }

    /// Largest entry count an internal node of the given key size can be
    /// configured with, reserving one slot of slack for the transient
    /// `max_size + 1` state between insert and split.
    pub fn capacity(key_size: usize) -> usize {
        (PAGE_SIZE - NODE_HEADER_SIZE) / (key_size + CHILD_SIZE) - 1
    }

    /// Formats a zeroed page as an empty internal node.
    pub fn init(page_id: PageId, parent: PageId, key_size: u16, max_size: u16) -> Self {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        let header = NodeHeader::new(PageType::BTreeInternal, page_id, parent, key_size, max_size);
        data[..NodeHeader::SIZE].copy_from_slice(&header.to_bytes());
        Self {
            data,
            key_size: key_size as usize,
        }
    }

    /// Returns the key at slot `index`. Slot 0's key is physically
    /// present but semantically unused.
    pub fn key_at(&self, index: usize) -> &[u8] {
        debug_assert!(index < self.size());
        let off = self.slot_offset(index);
        &self.data[off..off + self.key_size]
    }

    /// Overwrites the separator at slot `index`.
    pub fn set_key_at(&mut self, index: usize, key: &[u8]) {
        debug_assert!(index >= 1 && index < self.size());
        let off = self.slot_offset(index);
        let key_size = self.key_size;
        self.data[off..off + key_size].copy_from_slice(key);
    }

    /// Returns the child pointer at slot `index`.
    pub fn value_at(&self, index: usize) -> PageId {
        debug_assert!(index < self.size());
        let off = self.slot_offset(index) + self.key_size;
        super::node::read_page_id(self.data.as_slice(), off)
    }

    fn write_key(&mut self, index: usize, key: &[u8]) {
        let off = self.slot_offset(index);
        let key_size = self.key_size;
        self.data[off..off + key_size].copy_from_slice(key);
    }

    fn write_child(&mut self, index: usize, child: PageId) {
        let off = self.slot_offset(index) + self.key_size;
        super::node::write_page_id(self.data.as_mut_slice(), off, child);
    }

    fn set_size(&mut self, size: usize) {
        hdr::set_size(self.data.as_mut_slice(), size as u16);
    }

    /// Returns the slot holding the given child pointer, scanning
    /// linearly; used while bubbling restructures up the tree.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    /// Returns the child to descend into for `key`: the child of the
    /// greatest separator <= key, or slot 0's child if key sorts before
    /// every separator.
    pub fn lookup(&self, key: &[u8], cmp: &KeyComparator) -> PageId {
        let mut low = 1;
        let mut high = self.size();
        while low < high {
            let mid = low + (high - low) / 2;
            if cmp.compare(self.key_at(mid), key) == Ordering::Greater {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        self.value_at(low - 1)
    }

    /// Initializes a freshly allocated root: slot 0 points at `left`,
    /// slot 1 holds `(separator, right)`.
    pub fn populate_new_root(&mut self, left: PageId, separator: &[u8], right: PageId) {
        self.write_child(0, left);
        self.write_key(1, separator);
        self.write_child(1, right);
        self.set_size(2);
    }

    /// Inserts `(key, new_child)` immediately after the slot holding
    /// `old_child`. The caller guarantees `key` is the correct separator
    /// for `new_child`, so no reordering is needed. Returns the new size.
    pub fn insert_node_after(
        &mut self,
        old_child: PageId,
        key: &[u8],
        new_child: PageId,
    ) -> Result<usize> {
        let index = self.value_index(old_child).ok_or_else(|| {
            MarlinError::TreeCorrupted(format!(
                "child {} not found in internal node {}",
                old_child,
                self.page_id()
            ))
        })?;
        let size = self.size();
        let stride = self.stride();

        let start = self.slot_offset(index + 1);
        let end = self.slot_offset(size);
        self.data.copy_within(start..end, start + stride);
        self.write_key(index + 1, key);
        self.write_child(index + 1, new_child);
        self.set_size(size + 1);
        Ok(size + 1)
    }

    /// Removes slot `index`, shifting higher slots left.
    ///
    /// Callers never pass 0: when the slot-0 child goes away they remove
    /// slot 1 instead, so slot 0 keeps its key-unused invariant.
    pub fn remove(&mut self, index: usize) {
        debug_assert!(index >= 1);
        let size = self.size();
        let start = self.slot_offset(index + 1);
        let end = self.slot_offset(size);
        let dst = self.slot_offset(index);
        self.data.copy_within(start..end, dst);
        self.set_size(size - 1);
    }

    /// Moves the upper half of the slots into the fresh sibling `dst`,
    /// reparenting the moved children. The first moved key (left in
    /// `dst`'s slot 0, where it is no longer consulted) is the separator
    /// the caller pushes to the parent.
    pub fn move_half_to(&mut self, dst: &mut InternalNode, pool: &BufferPool) -> Result<()> {
        let size = self.size();
        let start_index = size / 2;
        let moved = size - start_index;

        let src_start = self.slot_offset(start_index);
        let src_end = self.slot_offset(size);
        dst.data[NODE_HEADER_SIZE..NODE_HEADER_SIZE + (src_end - src_start)]
            .copy_from_slice(&self.data[src_start..src_end]);
        dst.set_size(moved);
        self.set_size(start_index);

        for i in 0..moved {
            adopt_child(pool, dst.value_at(i), dst.page_id())?;
        }
        Ok(())
    }
}

/// Rewrites a child page's parent pointer through the pool.
pub(crate) fn adopt_child(pool: &BufferPool, child: PageId, parent: PageId) -> Result<()> {
    let frame = pool.fetch_page(child)?;
    hdr::set_parent_page_id(frame.write_data().as_mut_slice(), parent);
    pool.unpin_page(child, true);
    Ok(())
}

impl NodePage for InternalNode {
    fn from_page(data: Box<[u8; PAGE_SIZE]>) -> Result<Self> {
        let header = NodeHeader::from_bytes(data.as_slice())?;
        if header.page_type != PageType::BTreeInternal {
            return Err(MarlinError::InvalidNodeType(header.page_id));
        }
        Ok(Self {
            key_size: header.key_size as usize,
            data,
        })
    }

    fn page_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    fn page_id(&self) -> PageId {
        hdr::page_id(self.data.as_slice())
    }

    fn parent_page_id(&self) -> PageId {
        hdr::parent_page_id(self.data.as_slice())
    }

    fn set_parent_page_id(&mut self, parent: PageId) {
        hdr::set_parent_page_id(self.data.as_mut_slice(), parent);
    }

    fn size(&self) -> usize {
        hdr::size(self.data.as_slice()) as usize
    }

    fn max_size(&self) -> usize {
        hdr::max_size(self.data.as_slice()) as usize
    }

    fn min_size(&self) -> usize {
        (self.max_size() + 1) / 2
    }

    fn into_node(self) -> Node {
        Node::Internal(self)
    }

    /// Appends every entry to `dst`, pulling the parent separator down as
    /// the key of the slot-0 child (which has none of its own).
    fn move_all_to(&mut self, dst: &mut Self, middle_key: &[u8], pool: &BufferPool) -> Result<()> {
        let size = self.size();
        let dst_size = dst.size();

        dst.write_key(dst_size, middle_key);
        dst.write_child(dst_size, self.value_at(0));
        if size > 1 {
            let src_start = self.slot_offset(1);
            let src_end = self.slot_offset(size);
            let dst_start = dst.slot_offset(dst_size + 1);
            dst.data[dst_start..dst_start + (src_end - src_start)]
                .copy_from_slice(&self.data[src_start..src_end]);
        }
        dst.set_size(dst_size + size);
        self.set_size(0);

        for i in dst_size..dst_size + size {
            adopt_child(pool, dst.value_at(i), dst.page_id())?;
        }
        Ok(())
    }

    /// Moves the slot-0 child to the end of the left neighbor `dst`: the
    /// parent separator comes down as its key, and the key that used to
    /// sit at slot 1 goes up as the new separator.
    fn move_first_to_end_of(
        &mut self,
        dst: &mut Self,
        middle_key: &[u8],
        pool: &BufferPool,
    ) -> Result<Vec<u8>> {
        let size = self.size();
        let moved_child = self.value_at(0);
        let up_key = self.key_at(1).to_vec();

        let dst_size = dst.size();
        dst.write_key(dst_size, middle_key);
        dst.write_child(dst_size, moved_child);
        dst.set_size(dst_size + 1);
        adopt_child(pool, moved_child, dst.page_id())?;

        let start = self.slot_offset(1);
        let end = self.slot_offset(size);
        self.data.copy_within(start..end, NODE_HEADER_SIZE);
        self.set_size(size - 1);
        Ok(up_key)
    }

    /// Moves the last entry to the front of the right neighbor `dst`: the
    /// parent separator comes down onto `dst`'s old slot-0 child, the
    /// moved child becomes the new slot 0, and the moved key goes up as
    /// the new separator.
    fn move_last_to_front_of(
        &mut self,
        dst: &mut Self,
        middle_key: &[u8],
        pool: &BufferPool,
    ) -> Result<Vec<u8>> {
        let size = self.size();
        let moved_key = self.key_at(size - 1).to_vec();
        let moved_child = self.value_at(size - 1);

        let dst_size = dst.size();
        let stride = dst.stride();
        let start = dst.slot_offset(0);
        let end = dst.slot_offset(dst_size);
        dst.data.copy_within(start..end, start + stride);
        dst.write_key(0, &vec![0u8; dst.key_size]);
        dst.write_child(0, moved_child);
        dst.write_key(1, middle_key);
        dst.set_size(dst_size + 1);
        adopt_child(pool, moved_child, dst.page_id())?;

        self.set_size(size - 1);
        Ok(moved_key)
    }
}
