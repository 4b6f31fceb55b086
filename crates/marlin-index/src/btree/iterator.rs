//! Forward range iterator over linked leaves.

use crate::btree::leaf::LeafNode;
use crate::btree::node::NodePage;
use bytes::Bytes;
use marlin_buffer::BufferPool;
use marlin_common::page::PageId;
use marlin_common::row::RowId;
use marlin_common::Result;
use std::sync::Arc;

/// Iterator over `(key, row id)` entries in key order.
///
/// The iterator holds a pin on the leaf it is positioned on and releases
/// it when it advances past the leaf, reaches the end, or is dropped. The
/// end sentinel is `(PageId::INVALID, 0)`.
pub struct IndexIterator {
    pool: Arc<BufferPool>,
    page_id: PageId,
    index: usize,
    leaf: Option<LeafNode>,
}

impl IndexIterator {
    /// Builds an iterator positioned at `index` in an already-pinned
    /// leaf, skipping forward past exhausted leaves.
    pub(crate) fn from_leaf(pool: Arc<BufferPool>, leaf: LeafNode, index: usize) -> Result<Self> {
        let mut iter = Self {
            pool,
            page_id: leaf.page_id(),
            index,
            leaf: Some(leaf),
        };
        iter.skip_exhausted()?;
        Ok(iter)
    }

    /// The end sentinel; holds no pin.
    pub fn end(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            page_id: PageId::INVALID,
            index: 0,
            leaf: None,
        }
    }

    /// Returns true once the iterator has passed the last entry.
    pub fn is_end(&self) -> bool {
        !self.page_id.is_valid()
    }

    /// Releases the current leaf and becomes the end sentinel.
    fn release(&mut self) {
        if self.page_id.is_valid() {
            self.pool.unpin_page(self.page_id, false);
        }
        self.page_id = PageId::INVALID;
        self.index = 0;
        self.leaf = None;
    }

    /// Moves to the next leaf while the current position is past the end
    /// of its leaf.
    fn skip_exhausted(&mut self) -> Result<()> {
        loop {
            let Some(leaf) = &self.leaf else {
                return Ok(());
            };
            if self.index < leaf.size() {
                return Ok(());
            }
            let next = leaf.next_page_id();
            self.pool.unpin_page(self.page_id, false);
            self.leaf = None;
            self.page_id = PageId::INVALID;
            self.index = 0;
            if !next.is_valid() {
                return Ok(());
            }
            let frame = self.pool.fetch_page(next)?;
            let data = Box::new(**frame.read_data());
            match LeafNode::from_page(data) {
                Ok(leaf) => {
                    self.page_id = next;
                    self.leaf = Some(leaf);
                }
                Err(e) => {
                    self.pool.unpin_page(next, false);
                    return Err(e);
                }
            }
        }
    }
}

impl Iterator for IndexIterator {
    type Item = (Bytes, RowId);

    fn next(&mut self) -> Option<Self::Item> {
        let leaf = self.leaf.as_ref()?;
        let entry = (
            Bytes::copy_from_slice(leaf.key_at(self.index)),
            leaf.row_at(self.index),
        );
        self.index += 1;
        if self.skip_exhausted().is_err() {
            // A leaf vanished mid-scan; stop rather than loop on it.
            self.release();
        }
        Some(entry)
    }
}

impl PartialEq for IndexIterator {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id && self.index == other.index
    }
}

impl Drop for IndexIterator {
    fn drop(&mut self) {
        if self.page_id.is_valid() {
            self.pool.unpin_page(self.page_id, false);
        }
    }
}
