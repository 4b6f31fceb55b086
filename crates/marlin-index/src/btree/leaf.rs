//! Leaf node operations.

use crate::btree::node::{hdr, Node, NodeHeader, NodePage, NODE_HEADER_SIZE};
use crate::key::KeyComparator;
use marlin_buffer::BufferPool;
use marlin_common::page::{PageId, PageType, PAGE_SIZE};
use marlin_common::row::RowId;
use marlin_common::{MarlinError, Result};
use std::cmp::Ordering;

/// B+ tree leaf node.
///
/// Owns a copy of the page image; slot `i` holds `(key, row id)` at a
/// fixed stride of `key_size + 10` bytes after the header. Entries are
/// strictly ascending by key. `next_page_id` links to the in-order
/// successor leaf.
pub struct LeafNode {
    data: Box<[u8; PAGE_SIZE]>,
    key_size: usize,
}

impl LeafNode {
    /// Slot stride: key bytes followed by the encoded RowId.
    fn stride(&self) -> usize {
        self.key_size + RowId::ENCODED_SIZE
    }

    fn slot_offset(&self, index: usize) -> usize {
        NODE_HEADER_SIZE + index * self.stride()
    }

    /// Largest entry count a leaf of the given key size can be configured
    /// with. One slot of slack is reserved so a node can hold
    /// `max_size + 1` entries between insert and split.
    pub fn capacity(key_size: usize) -> usize {
        (PAGE_SIZE - NODE_HEADER_SIZE) / (key_size + RowId::ENCODED_SIZE) - 1
    }

    /// Formats a zeroed page as an empty leaf.
    pub fn init(page_id: PageId, parent: PageId, key_size: u16, max_size: u16) -> Self {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        let header = NodeHeader::new(PageType::BTreeLeaf, page_id, parent, key_size, max_size);
        data[..NodeHeader::SIZE].copy_from_slice(&header.to_bytes());
        Self {
            data,
            key_size: key_size as usize,
        }
    }

    /// Returns the key at slot `index`.
    pub fn key_at(&self, index: usize) -> &[u8] {
        debug_assert!(index < self.size());
        let off = self.slot_offset(index);
        &self.data[off..off + self.key_size]
    }

    /// Returns the row id at slot `index`.
    pub fn row_at(&self, index: usize) -> RowId {
        debug_assert!(index < self.size());
        let off = self.slot_offset(index) + self.key_size;
        RowId::from_bytes(&self.data[off..off + RowId::ENCODED_SIZE])
    }

    fn write_slot(&mut self, index: usize, key: &[u8], row: RowId) {
        let off = self.slot_offset(index);
        let key_size = self.key_size;
        self.data[off..off + key_size].copy_from_slice(key);
        self.data[off + key_size..off + key_size + RowId::ENCODED_SIZE]
            .copy_from_slice(&row.to_bytes());
    }

    fn set_size(&mut self, size: usize) {
        hdr::set_size(self.data.as_mut_slice(), size as u16);
    }

    /// Returns the forward sibling link.
    pub fn next_page_id(&self) -> PageId {
        hdr::next_page_id(self.data.as_slice())
    }

    /// Sets the forward sibling link.
    pub fn set_next_page_id(&mut self, next: PageId) {
        hdr::set_next_page_id(self.data.as_mut_slice(), next);
    }

    /// Smallest index whose key is >= `key`; `size` if all keys are
    /// smaller. Seeds range scans.
    pub fn key_index(&self, key: &[u8], cmp: &KeyComparator) -> usize {
        let mut low = 0;
        let mut high = self.size();
        while low < high {
            let mid = low + (high - low) / 2;
            if cmp.compare(self.key_at(mid), key) == Ordering::Less {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    /// Point lookup.
    pub fn lookup(&self, key: &[u8], cmp: &KeyComparator) -> Option<RowId> {
        let index = self.key_index(key, cmp);
        if index < self.size() && cmp.compare(self.key_at(index), key) == Ordering::Equal {
            Some(self.row_at(index))
        } else {
            None
        }
    }

    /// Inserts `(key, row)` keeping the slot array sorted. Returns false
    /// if the key already exists.
    pub fn insert(&mut self, key: &[u8], row: RowId, cmp: &KeyComparator) -> bool {
        let index = self.key_index(key, cmp);
        let size = self.size();
        if index < size && cmp.compare(self.key_at(index), key) == Ordering::Equal {
            return false;
        }

        let stride = self.stride();
        let start = self.slot_offset(index);
        let end = self.slot_offset(size);
        self.data.copy_within(start..end, start + stride);
        self.write_slot(index, key, row);
        self.set_size(size + 1);
        true
    }

    /// Removes the entry for `key`. Returns the slot index it occupied,
    /// or None if the key is absent.
    pub fn remove(&mut self, key: &[u8], cmp: &KeyComparator) -> Option<usize> {
        let index = self.key_index(key, cmp);
        let size = self.size();
        if index >= size || cmp.compare(self.key_at(index), key) != Ordering::Equal {
            return None;
        }

        let stride = self.stride();
        let start = self.slot_offset(index + 1);
        let end = self.slot_offset(size);
        self.data.copy_within(start..end, start - stride);
        self.set_size(size - 1);
        Some(index)
    }

    /// Moves the upper half of the entries into the fresh sibling `dst`
    /// and splices it into the leaf chain after this node.
    ///
    /// The lower `size / 2` entries stay; `dst` receives the rest, so its
    /// first key is the separator the caller pushes to the parent.
    pub fn move_half_to(&mut self, dst: &mut LeafNode) {
        let size = self.size();
        let start_index = size / 2;
        let moved = size - start_index;

        let src_start = self.slot_offset(start_index);
        let src_end = self.slot_offset(size);
        dst.data[NODE_HEADER_SIZE..NODE_HEADER_SIZE + (src_end - src_start)]
            .copy_from_slice(&self.data[src_start..src_end]);
        dst.set_size(moved);
        self.set_size(start_index);

        dst.set_next_page_id(self.next_page_id());
        self.set_next_page_id(dst.page_id());
    }
}

impl NodePage for LeafNode {
    fn from_page(data: Box<[u8; PAGE_SIZE]>) -> Result<Self> {
        let header = NodeHeader::from_bytes(data.as_slice())?;
        if header.page_type != PageType::BTreeLeaf {
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
        self.max_size() / 2
    }

    fn into_node(self) -> Node {
        Node::Leaf(self)
    }

    /// Appends every entry to `dst` and unlinks this leaf from the chain.
    fn move_all_to(&mut self, dst: &mut Self, _middle_key: &[u8], _pool: &BufferPool) -> Result<()> {
        let size = self.size();
        let dst_size = dst.size();
        let bytes = size * self.stride();

        let dst_start = dst.slot_offset(dst_size);
        dst.data[dst_start..dst_start + bytes]
            .copy_from_slice(&self.data[NODE_HEADER_SIZE..NODE_HEADER_SIZE + bytes]);
        dst.set_size(dst_size + size);
        dst.set_next_page_id(self.next_page_id());
        self.set_size(0);
        Ok(())
    }

    /// Moves the first entry to the end of the left neighbor `dst`.
    /// The new separator is this leaf's new first key.
    fn move_first_to_end_of(
        &mut self,
        dst: &mut Self,
        _middle_key: &[u8],
        _pool: &BufferPool,
    ) -> Result<Vec<u8>> {
        let size = self.size();
        let dst_size = dst.size();
        let stride = self.stride();

        let dst_start = dst.slot_offset(dst_size);
        dst.data[dst_start..dst_start + stride]
            .copy_from_slice(&self.data[NODE_HEADER_SIZE..NODE_HEADER_SIZE + stride]);
        dst.set_size(dst_size + 1);

        let end = self.slot_offset(size);
        self.data
            .copy_within(NODE_HEADER_SIZE + stride..end, NODE_HEADER_SIZE);
        self.set_size(size - 1);
        Ok(self.key_at(0).to_vec())
    }

    /// Moves the last entry to the front of the right neighbor `dst`.
    /// The new separator is the moved key (dst's new first key).
    fn move_last_to_front_of(
        &mut self,
        dst: &mut Self,
        _middle_key: &[u8],
        _pool: &BufferPool,
    ) -> Result<Vec<u8>> {
        let size = self.size();
        let dst_size = dst.size();
        let stride = self.stride();

        let dst_start = dst.slot_offset(0);
        let dst_end = dst.slot_offset(dst_size);
        dst.data.copy_within(dst_start..dst_end, dst_start + stride);

        let src = self.slot_offset(size - 1);
        let moved: Vec<u8> = self.data[src..src + stride].to_vec();
        dst.data[dst_start..dst_start + stride].copy_from_slice(&moved);
        dst.set_size(dst_size + 1);
        self.set_size(size - 1);
        Ok(dst.key_at(0).to_vec())
    }
}
