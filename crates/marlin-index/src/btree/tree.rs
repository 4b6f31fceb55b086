//! B+ tree coordinator.
//!
//! Drives every index operation: descends from the root through internal
//! lookups, mutates the target leaf, and resolves overflow by splitting
//! and underflow by redistribution or coalescing, bubbling restructures up
//! the parent chain. The designated root is persisted in the root
//! registry on every change.
//!
//! Pin discipline: every fetched page is unpinned exactly once per
//! operation; mutated pages are written back through the pool and
//! unpinned dirty. `coalesce_or_redistribute` and `adjust_root` own their
//! argument node's page: they store and unpin it, or delete it.

use crate::btree::internal::{adopt_child, InternalNode};
use crate::btree::iterator::IndexIterator;
use crate::btree::leaf::LeafNode;
use crate::btree::node::{Node, NodePage};
use crate::btree::registry;
use crate::key::KeyComparator;
use marlin_buffer::BufferPool;
use marlin_common::page::PageId;
use marlin_common::row::RowId;
use marlin_common::{MarlinError, Result};
use std::sync::Arc;

/// A single-writer B+ tree index over the shared buffer pool.
///
/// Keys are unique, fixed-width blobs ordered by the comparator; values
/// are row ids. The tree is created lazily: the first insert allocates a
/// leaf root and registers it.
pub struct BPlusTree {
    index_id: u32,
    /// Data file holding this index's node pages.
    file_id: u32,
    root_page_id: PageId,
    pool: Arc<BufferPool>,
    comparator: KeyComparator,
    leaf_max_size: u16,
    internal_max_size: u16,
    /// Whether the root registry already has an entry for this index.
    registered: bool,
}

impl BPlusTree {
    /// Opens the index, restoring its root from the registry if it was
    /// ever created. Pass 0 for either max size to derive it from the
    /// page capacity.
    pub fn new(
        index_id: u32,
        file_id: u32,
        pool: Arc<BufferPool>,
        comparator: KeyComparator,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Result<Self> {
        if file_id == registry::ROOT_REGISTRY_PAGE.file_id {
            return Err(MarlinError::InvalidParameter {
                name: "file_id".to_string(),
                value: format!("{file_id} is reserved for catalog pages"),
            });
        }

        let key_size = comparator.key_size();
        let leaf_cap = LeafNode::capacity(key_size).min(u16::MAX as usize) as u16;
        let internal_cap = InternalNode::capacity(key_size).min(u16::MAX as usize) as u16;
        let leaf_max_size = if leaf_max_size == 0 { leaf_cap } else { leaf_max_size };
        let internal_max_size = if internal_max_size == 0 {
            internal_cap
        } else {
            internal_max_size
        };
        if leaf_max_size < 2 || leaf_max_size > leaf_cap {
            return Err(MarlinError::InvalidParameter {
                name: "leaf_max_size".to_string(),
                value: leaf_max_size.to_string(),
            });
        }
        if internal_max_size < 3 || internal_max_size > internal_cap {
            return Err(MarlinError::InvalidParameter {
                name: "internal_max_size".to_string(),
                value: internal_max_size.to_string(),
            });
        }

        let registered_root = registry::get_root(&pool, index_id)?;
        Ok(Self {
            index_id,
            file_id,
            root_page_id: registered_root.unwrap_or(PageId::INVALID),
            pool,
            comparator,
            leaf_max_size,
            internal_max_size,
            registered: registered_root.is_some(),
        })
    }

    /// Returns true if the tree has no root.
    pub fn is_empty(&self) -> bool {
        !self.root_page_id.is_valid()
    }

    /// Returns the current root page id (INVALID when empty).
    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    /// Returns the index id.
    pub fn index_id(&self) -> u32 {
        self.index_id
    }

    /// Debug hook: true if the buffer pool holds no pinned pages.
    pub fn check(&self) -> bool {
        self.pool.check_all_unpinned()
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Point lookup: returns the row id stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<RowId>> {
        self.check_key(key)?;
        if self.is_empty() {
            return Ok(None);
        }
        let leaf = self.find_leaf(Some(key))?;
        let result = leaf.lookup(key, &self.comparator);
        self.unpin(leaf.page_id(), false);
        Ok(result)
    }

    /// Descends to the leaf responsible for `key` (or the leftmost leaf
    /// when `key` is None). Internal pages are unpinned before moving
    /// down; the returned leaf is pinned and the caller must unpin it.
    fn find_leaf(&self, key: Option<&[u8]>) -> Result<LeafNode> {
        let mut page_id = self.root_page_id;
        loop {
            let node = self.load_any(page_id)?;
            match node {
                Node::Leaf(leaf) => return Ok(leaf),
                Node::Internal(internal) => {
                    let child = match key {
                        Some(k) => internal.lookup(k, &self.comparator),
                        None => internal.value_at(0),
                    };
                    self.unpin(page_id, false);
                    if !child.is_valid() {
                        return Err(MarlinError::TreeCorrupted(format!(
                            "internal node {page_id} holds an invalid child pointer"
                        )));
                    }
                    page_id = child;
                }
            }
        }
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Inserts `(key, row)`. Returns false if the key already exists.
    pub fn insert(&mut self, key: &[u8], row: RowId) -> Result<bool> {
        self.check_key(key)?;
        if self.is_empty() {
            self.start_new_tree(key, row)?;
            return Ok(true);
        }
        self.insert_into_leaf(key, row)
    }

    /// First insert: allocate a leaf root and register it.
    fn start_new_tree(&mut self, key: &[u8], row: RowId) -> Result<()> {
        let (page_id, _) = self.pool.new_page(self.file_id)?;
        let mut leaf = LeafNode::init(
            page_id,
            PageId::INVALID,
            self.comparator.key_size() as u16,
            self.leaf_max_size,
        );
        leaf.insert(key, row, &self.comparator);

        self.root_page_id = page_id;
        let registered = self.sync_registry();
        let stored = self.store(&leaf);
        self.unpin(page_id, true);
        registered.and(stored)
    }

    fn insert_into_leaf(&mut self, key: &[u8], row: RowId) -> Result<bool> {
        let mut leaf = self.find_leaf(Some(key))?;
        let leaf_id = leaf.page_id();

        if !leaf.insert(key, row, &self.comparator) {
            self.unpin(leaf_id, false);
            return Ok(false);
        }

        if leaf.size() <= leaf.max_size() {
            self.store(&leaf)?;
            self.unpin(leaf_id, true);
            return Ok(true);
        }

        // Overflow: split and push the sibling's first key to the parent.
        let sibling = match self.split_leaf(&mut leaf) {
            Ok(sibling) => sibling,
            Err(e) => {
                // Allocation failed; the mutated copy was never written
                // back, so the tree keeps its pre-insert state.
                self.unpin(leaf_id, false);
                return Err(e);
            }
        };
        let sibling_id = sibling.page_id();
        let separator = sibling.key_at(0).to_vec();

        // Both halves go to their frames before the parent is touched:
        // restructuring above may rewrite their parent pointers in place.
        let stored = self.store(&leaf).and(self.store(&sibling));
        let result = stored.and_then(|_| {
            self.insert_into_parent(leaf_id, leaf.parent_page_id(), &separator, sibling_id)
        });
        self.unpin(sibling_id, true);
        self.unpin(leaf_id, true);
        result.map(|_| true)
    }

    /// Allocates a sibling leaf and moves the upper half of `node` into
    /// it, splicing the leaf chain. The sibling is returned pinned.
    fn split_leaf(&mut self, node: &mut LeafNode) -> Result<LeafNode> {
        let (page_id, _) = self.pool.new_page(self.file_id)?;
        let mut sibling = LeafNode::init(
            page_id,
            node.parent_page_id(),
            self.comparator.key_size() as u16,
            self.leaf_max_size,
        );
        node.move_half_to(&mut sibling);
        Ok(sibling)
    }

    /// Allocates a sibling internal node and moves the upper half of
    /// `node` into it, reparenting the moved children. Returned pinned.
    fn split_internal(&mut self, node: &mut InternalNode) -> Result<InternalNode> {
        let (page_id, _) = self.pool.new_page(self.file_id)?;
        let mut sibling = InternalNode::init(
            page_id,
            node.parent_page_id(),
            self.comparator.key_size() as u16,
            self.internal_max_size,
        );
        if let Err(e) = node.move_half_to(&mut sibling, &self.pool) {
            self.unpin(page_id, false);
            return Err(e);
        }
        Ok(sibling)
    }

    /// Hooks a freshly split-off sibling into the tree: `separator`
    /// becomes the parent entry for `right_id` directly after `left_id`.
    /// Splits recursively when the parent overflows; a splitting root
    /// grows the tree by one level.
    ///
    /// Callers must have written both children's page images back before
    /// calling: this path rewrites parent pointers directly in the pool.
    fn insert_into_parent(
        &mut self,
        left_id: PageId,
        left_parent: PageId,
        separator: &[u8],
        right_id: PageId,
    ) -> Result<()> {
        if !left_parent.is_valid() {
            // The root split: grow the tree by one level.
            let (root_id, _) = self.pool.new_page(self.file_id)?;
            let mut root = InternalNode::init(
                root_id,
                PageId::INVALID,
                self.comparator.key_size() as u16,
                self.internal_max_size,
            );
            root.populate_new_root(left_id, separator, right_id);
            let result = self
                .store(&root)
                .and_then(|_| adopt_child(&self.pool, left_id, root_id))
                .and_then(|_| adopt_child(&self.pool, right_id, root_id));
            self.unpin(root_id, true);
            result?;
            self.root_page_id = root_id;
            return self.sync_registry();
        }

        let mut parent: InternalNode = self.load(left_parent)?;
        if let Err(e) = parent.insert_node_after(left_id, separator, right_id) {
            self.unpin(left_parent, false);
            return Err(e);
        }

        if parent.size() <= parent.max_size() {
            self.store(&parent)?;
            self.unpin(left_parent, true);
            return Ok(());
        }

        let sibling = match self.split_internal(&mut parent) {
            Ok(sibling) => sibling,
            Err(e) => {
                self.unpin(left_parent, false);
                return Err(e);
            }
        };
        let sibling_id = sibling.page_id();
        // The first moved key, parked unused in the sibling's slot 0,
        // goes up as the separator.
        let up_key = sibling.key_at(0).to_vec();

        let stored = self.store(&parent).and(self.store(&sibling));
        let result = stored.and_then(|_| {
            self.insert_into_parent(left_parent, parent.parent_page_id(), &up_key, sibling_id)
        });
        self.unpin(sibling_id, true);
        self.unpin(left_parent, true);
        result
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Removes `key` if present. Absent keys are a silent no-op.
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;
        if self.is_empty() {
            return Ok(());
        }
        let mut leaf = self.find_leaf(Some(key))?;
        let leaf_id = leaf.page_id();

        let Some(removed_index) = leaf.remove(key, &self.comparator) else {
            self.unpin(leaf_id, false);
            return Ok(());
        };

        // The leaf's first key can appear as a separator at an ancestor;
        // removing it requires the separator to track the new minimum.
        if removed_index == 0 && !leaf.is_root() && leaf.size() > 0 {
            let new_first = leaf.key_at(0).to_vec();
            if let Err(e) =
                self.refresh_ancestor_separator(leaf_id, leaf.parent_page_id(), &new_first)
            {
                let _ = self.store(&leaf);
                self.unpin(leaf_id, true);
                return Err(e);
            }
        }

        if leaf.size() < leaf.min_size() {
            self.coalesce_or_redistribute(leaf)?;
        } else {
            self.store(&leaf)?;
            self.unpin(leaf_id, true);
        }
        Ok(())
    }

    /// Walks up from `node_id` to the first ancestor where the node is
    /// not the leftmost child and rewrites that separator to `new_first`.
    /// Stops at the root if the spine is leftmost all the way up.
    fn refresh_ancestor_separator(
        &mut self,
        node_id: PageId,
        parent_id: PageId,
        new_first: &[u8],
    ) -> Result<()> {
        let mut now = node_id;
        let mut parent_id = parent_id;
        loop {
            let mut parent: InternalNode = self.load(parent_id)?;
            let index = match parent.value_index(now) {
                Some(index) => index,
                None => {
                    self.unpin(parent_id, false);
                    return Err(MarlinError::TreeCorrupted(format!(
                        "node {now} not found in parent {parent_id}"
                    )));
                }
            };
            if index > 0 {
                parent.set_key_at(index, new_first);
                self.store(&parent)?;
                self.unpin(parent_id, true);
                return Ok(());
            }
            if parent.is_root() {
                self.unpin(parent_id, false);
                return Ok(());
            }
            now = parent.page_id();
            let next = parent.parent_page_id();
            self.unpin(parent_id, false);
            parent_id = next;
        }
    }

    /// Resolves underflow in `node` by borrowing from or merging with an
    /// adjacent sibling. Owns the node's page: on return it has been
    /// stored and unpinned, or deleted. Returns true if the node's page
    /// was removed from the tree.
    fn coalesce_or_redistribute<N: NodePage>(&mut self, node: N) -> Result<bool> {
        if node.is_root() {
            return self.adjust_root(node.into_node());
        }

        let mut node = node;
        let node_id = node.page_id();
        let parent_id = node.parent_page_id();
        let mut parent: InternalNode = match self.load(parent_id) {
            Ok(parent) => parent,
            Err(e) => {
                self.unpin(node_id, false);
                return Err(e);
            }
        };
        let index = match parent.value_index(node_id) {
            Some(index) => index,
            None => {
                self.unpin(parent_id, false);
                self.unpin(node_id, false);
                return Err(MarlinError::TreeCorrupted(format!(
                    "node {node_id} not found in parent {parent_id}"
                )));
            }
        };
        // The left neighbor, except for the leftmost child which pairs
        // with its right neighbor.
        let sibling_index = if index == 0 { 1 } else { index - 1 };
        let sibling_id = parent.value_at(sibling_index);
        let mut sibling: N = match self.load(sibling_id) {
            Ok(sibling) => sibling,
            Err(e) => {
                self.unpin(parent_id, false);
                self.unpin(node_id, false);
                return Err(e);
            }
        };

        if sibling.size() + node.size() > node.max_size() {
            // Too full to merge: move one entry across the boundary and
            // rewrite the separator between the two.
            let (sep_index, new_separator) = if index == 0 {
                let middle = parent.key_at(1).to_vec();
                let sep = sibling.move_first_to_end_of(&mut node, &middle, &self.pool)?;
                (1, sep)
            } else {
                let middle = parent.key_at(index).to_vec();
                let sep = sibling.move_last_to_front_of(&mut node, &middle, &self.pool)?;
                (index, sep)
            };
            parent.set_key_at(sep_index, &new_separator);

            self.store(&node)?;
            self.store(&sibling)?;
            self.store(&parent)?;
            self.unpin(node_id, true);
            self.unpin(sibling_id, true);
            self.unpin(parent_id, true);
            return Ok(false);
        }

        // Merge the right-hand node of the pair into the left-hand one
        // and drop the separator between them from the parent.
        if index == 0 {
            let middle = parent.key_at(1).to_vec();
            sibling.move_all_to(&mut node, &middle, &self.pool)?;
            parent.remove(1);
            self.store(&node)?;
            self.unpin(node_id, true);
            self.unpin(sibling_id, false);
            self.pool.delete_page(sibling_id)?;
        } else {
            let middle = parent.key_at(index).to_vec();
            node.move_all_to(&mut sibling, &middle, &self.pool)?;
            parent.remove(index);
            self.store(&sibling)?;
            self.unpin(sibling_id, true);
            self.unpin(node_id, false);
            self.pool.delete_page(node_id)?;
        }

        // The parent lost an entry and may underflow in turn.
        if parent.size() < parent.min_size() {
            self.coalesce_or_redistribute(parent)?;
        } else {
            self.store(&parent)?;
            self.unpin(parent_id, true);
        }
        Ok(true)
    }

    /// Root underflow: a leaf root may drain to empty (the tree becomes
    /// empty), an internal root may shrink to a single child (which is
    /// promoted, shrinking the tree by one level). Owns the node's page.
    fn adjust_root(&mut self, root: Node) -> Result<bool> {
        let root_id = root.page_id();
        match root {
            Node::Leaf(leaf) => {
                if leaf.size() > 0 {
                    self.store(&leaf)?;
                    self.unpin(root_id, true);
                    return Ok(false);
                }
                self.unpin(root_id, false);
                self.pool.delete_page(root_id)?;
                self.root_page_id = PageId::INVALID;
                self.sync_registry()?;
                Ok(true)
            }
            Node::Internal(internal) => {
                if internal.size() > 1 {
                    self.store(&internal)?;
                    self.unpin(root_id, true);
                    return Ok(false);
                }
                let child = internal.value_at(0);
                self.unpin(root_id, false);
                self.pool.delete_page(root_id)?;
                adopt_child(&self.pool, child, PageId::INVALID)?;
                self.root_page_id = child;
                self.sync_registry()?;
                Ok(true)
            }
        }
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Iterator positioned at the leftmost entry.
    pub fn iter(&self) -> Result<IndexIterator> {
        if self.is_empty() {
            return Ok(IndexIterator::end(self.pool.clone()));
        }
        let leaf = self.find_leaf(None)?;
        IndexIterator::from_leaf(self.pool.clone(), leaf, 0)
    }

    /// Iterator positioned at the first entry >= `key`.
    pub fn iter_from(&self, key: &[u8]) -> Result<IndexIterator> {
        self.check_key(key)?;
        if self.is_empty() {
            return Ok(IndexIterator::end(self.pool.clone()));
        }
        let leaf = self.find_leaf(Some(key))?;
        let index = leaf.key_index(key, &self.comparator);
        IndexIterator::from_leaf(self.pool.clone(), leaf, index)
    }

    /// The end sentinel iterator.
    pub fn end(&self) -> IndexIterator {
        IndexIterator::end(self.pool.clone())
    }

    // =========================================================================
    // Teardown and debugging
    // =========================================================================

    /// Frees every page reachable from the root and clears the tree.
    pub fn destroy(&mut self) -> Result<()> {
        if self.root_page_id.is_valid() {
            self.destroy_subtree(self.root_page_id)?;
            self.root_page_id = PageId::INVALID;
            self.sync_registry()?;
        }
        Ok(())
    }

    /// Frees a subtree bottom-up. The node is unpinned before recursing
    /// so at most one page is pinned at a time.
    fn destroy_subtree(&self, page_id: PageId) -> Result<()> {
        let node = self.load_any(page_id)?;
        let children: Vec<PageId> = match &node {
            Node::Leaf(_) => Vec::new(),
            Node::Internal(internal) => (0..internal.size()).map(|i| internal.value_at(i)).collect(),
        };
        self.unpin(page_id, false);
        for child in children {
            self.destroy_subtree(child)?;
        }
        self.pool.delete_page(page_id)?;
        Ok(())
    }

    /// Renders the tree structure in dot format for debugging.
    pub fn to_graphviz(&self) -> Result<String> {
        use std::fmt::Write as _;

        fn hex_key(key: &[u8]) -> String {
            key.iter().take(8).map(|b| format!("{b:02x}")).collect()
        }

        let mut out = String::from("digraph btree {\n  node [shape=record];\n");
        if self.root_page_id.is_valid() {
            let mut stack = vec![self.root_page_id];
            while let Some(page_id) = stack.pop() {
                let node = self.load_any(page_id)?;
                match &node {
                    Node::Leaf(leaf) => {
                        let keys: Vec<String> =
                            (0..leaf.size()).map(|i| hex_key(leaf.key_at(i))).collect();
                        let _ = writeln!(
                            out,
                            "  page_{} [label=\"leaf {}|{}\"];",
                            page_id.page_num,
                            page_id,
                            keys.join("|")
                        );
                        if leaf.next_page_id().is_valid() {
                            let _ = writeln!(
                                out,
                                "  page_{} -> page_{} [style=dashed];",
                                page_id.page_num,
                                leaf.next_page_id().page_num
                            );
                        }
                    }
                    Node::Internal(internal) => {
                        let keys: Vec<String> = (1..internal.size())
                            .map(|i| hex_key(internal.key_at(i)))
                            .collect();
                        let _ = writeln!(
                            out,
                            "  page_{} [label=\"int {}|{}\"];",
                            page_id.page_num,
                            page_id,
                            keys.join("|")
                        );
                        for i in 0..internal.size() {
                            let child = internal.value_at(i);
                            let _ = writeln!(
                                out,
                                "  page_{} -> page_{};",
                                page_id.page_num, child.page_num
                            );
                            stack.push(child);
                        }
                    }
                }
                self.unpin(page_id, false);
            }
        }
        out.push_str("}\n");
        Ok(out)
    }

    // =========================================================================
    // Page plumbing
    // =========================================================================

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.comparator.key_size() {
            return Err(MarlinError::InvalidParameter {
                name: "key".to_string(),
                value: format!("{} bytes, expected {}", key.len(), self.comparator.key_size()),
            });
        }
        Ok(())
    }

    /// Fetches a page (pinning it) and decodes it as node kind `N`.
    /// The pin is released here only if decoding fails.
    fn load<N: NodePage>(&self, page_id: PageId) -> Result<N> {
        let frame = self.pool.fetch_page(page_id)?;
        let data = Box::new(**frame.read_data());
        match N::from_page(data) {
            Ok(node) => Ok(node),
            Err(e) => {
                self.pool.unpin_page(page_id, false);
                Err(e)
            }
        }
    }

    /// Fetches a page (pinning it) and decodes it as whichever node kind
    /// its header tag names.
    fn load_any(&self, page_id: PageId) -> Result<Node> {
        let frame = self.pool.fetch_page(page_id)?;
        let data = Box::new(**frame.read_data());
        match Node::from_page(data) {
            Ok(node) => Ok(node),
            Err(e) => {
                self.pool.unpin_page(page_id, false);
                Err(e)
            }
        }
    }

    /// Writes a node's page image back into its (still pinned) frame.
    fn store<N: NodePage>(&self, node: &N) -> Result<()> {
        self.pool.write_back(node.page_id(), node.page_bytes())
    }

    fn unpin(&self, page_id: PageId, dirty: bool) {
        self.pool.unpin_page(page_id, dirty);
    }

    /// Persists the current root in the registry.
    fn sync_registry(&mut self) -> Result<()> {
        if self.registered {
            registry::update(&self.pool, self.index_id, self.root_page_id)
        } else {
            registry::insert(&self.pool, self.index_id, self.root_page_id)?;
            self.registered = true;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeySchema;
    use marlin_buffer::{BufferPoolConfig, DiskManager, DiskManagerConfig};

    fn test_pool(num_frames: usize) -> (tempfile::TempDir, Arc<BufferPool>) {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskManager::new(DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        })
        .unwrap();
        let pool = Arc::new(BufferPool::new(BufferPoolConfig { num_frames }, disk));
        (dir, pool)
    }

    fn small_tree(pool: &Arc<BufferPool>) -> BPlusTree {
        let schema = KeySchema::int64().unwrap();
        BPlusTree::new(1, 1, pool.clone(), schema.comparator(), 4, 4).unwrap()
    }

    fn rid(key: i64) -> RowId {
        RowId::new(marlin_common::page::PageId::new(9, key as u32), 0)
    }

    #[test]
    fn test_new_tree_is_empty() {
        let (_dir, pool) = test_pool(32);
        let tree = small_tree(&pool);
        assert!(tree.is_empty());
        assert!(!tree.root_page_id().is_valid());
    }

    #[test]
    fn test_rejects_catalog_file_id() {
        let (_dir, pool) = test_pool(32);
        let schema = KeySchema::int64().unwrap();
        let result = BPlusTree::new(1, 0, pool.clone(), schema.comparator(), 4, 4);
        assert!(matches!(result, Err(MarlinError::InvalidParameter { .. })));
    }

    #[test]
    fn test_rejects_tiny_max_sizes() {
        let (_dir, pool) = test_pool(32);
        let schema = KeySchema::int64().unwrap();
        assert!(BPlusTree::new(1, 1, pool.clone(), schema.comparator(), 1, 4).is_err());
        assert!(BPlusTree::new(1, 1, pool.clone(), schema.comparator(), 4, 2).is_err());
    }

    #[test]
    fn test_derived_max_sizes() {
        let (_dir, pool) = test_pool(32);
        let schema = KeySchema::int64().unwrap();
        let tree = BPlusTree::new(1, 1, pool.clone(), schema.comparator(), 0, 0).unwrap();
        assert!(tree.leaf_max_size >= 2);
        assert!(tree.internal_max_size >= 3);
    }

    #[test]
    fn test_empty_lookup() {
        let (_dir, pool) = test_pool(32);
        let schema = KeySchema::int64().unwrap();
        let tree = small_tree(&pool);

        assert_eq!(tree.get(&schema.encode_i64(5).unwrap()).unwrap(), None);
        assert!(tree.iter().unwrap() == tree.end());
        assert!(tree.check());
    }

    #[test]
    fn test_insert_get_single() {
        let (_dir, pool) = test_pool(32);
        let schema = KeySchema::int64().unwrap();
        let mut tree = small_tree(&pool);

        assert!(tree.insert(&schema.encode_i64(42).unwrap(), rid(42)).unwrap());
        assert!(!tree.is_empty());
        assert_eq!(tree.get(&schema.encode_i64(42).unwrap()).unwrap(), Some(rid(42)));
        assert_eq!(tree.get(&schema.encode_i64(43).unwrap()).unwrap(), None);
        assert!(tree.check());
    }

    #[test]
    fn test_insert_duplicate() {
        let (_dir, pool) = test_pool(32);
        let schema = KeySchema::int64().unwrap();
        let mut tree = small_tree(&pool);

        assert!(tree.insert(&schema.encode_i64(7).unwrap(), rid(7)).unwrap());
        assert!(!tree.insert(&schema.encode_i64(7).unwrap(), rid(99)).unwrap());
        assert_eq!(tree.get(&schema.encode_i64(7).unwrap()).unwrap(), Some(rid(7)));
        assert!(tree.check());
    }

    #[test]
    fn test_root_registered_on_first_insert() {
        let (_dir, pool) = test_pool(32);
        let schema = KeySchema::int64().unwrap();
        let mut tree = small_tree(&pool);

        assert_eq!(registry::get_root(&pool, 1).unwrap(), None);
        tree.insert(&schema.encode_i64(1).unwrap(), rid(1)).unwrap();
        assert_eq!(
            registry::get_root(&pool, 1).unwrap(),
            Some(tree.root_page_id())
        );
    }

    #[test]
    fn test_split_creates_internal_root() {
        let (_dir, pool) = test_pool(32);
        let schema = KeySchema::int64().unwrap();
        let mut tree = small_tree(&pool);

        for k in 1..=5 {
            tree.insert(&schema.encode_i64(k).unwrap(), rid(k)).unwrap();
        }

        // Root is now internal with one separator.
        let root = tree.load_any(tree.root_page_id()).unwrap();
        let root_id = root.page_id();
        match &root {
            Node::Internal(internal) => assert_eq!(internal.size(), 2),
            Node::Leaf(_) => panic!("root should have split into an internal node"),
        }
        tree.unpin(root_id, false);

        let keys: Vec<i64> = (1..=5).collect();
        let got: Vec<_> = tree.iter().unwrap().map(|(k, _)| k).collect();
        let expect: Vec<_> = keys.iter().map(|&k| schema.encode_i64(k).unwrap()).collect();
        assert_eq!(got, expect);
        assert_eq!(
            registry::get_root(&pool, 1).unwrap(),
            Some(tree.root_page_id())
        );
        assert!(tree.check());
    }

    #[test]
    fn test_key_width_mismatch() {
        let (_dir, pool) = test_pool(32);
        let mut tree = small_tree(&pool);
        assert!(tree.insert(b"abc", rid(1)).is_err());
        assert!(tree.get(b"abc").is_err());
        assert!(tree.remove(b"abc").is_err());
    }

    #[test]
    fn test_remove_missing_key_is_noop() {
        let (_dir, pool) = test_pool(32);
        let schema = KeySchema::int64().unwrap();
        let mut tree = small_tree(&pool);

        tree.remove(&schema.encode_i64(5).unwrap()).unwrap();
        tree.insert(&schema.encode_i64(1).unwrap(), rid(1)).unwrap();
        tree.remove(&schema.encode_i64(5).unwrap()).unwrap();
        assert_eq!(tree.get(&schema.encode_i64(1).unwrap()).unwrap(), Some(rid(1)));
        assert!(tree.check());
    }

    #[test]
    fn test_destroy_frees_pages() {
        let (_dir, pool) = test_pool(32);
        let schema = KeySchema::int64().unwrap();
        let mut tree = small_tree(&pool);

        for k in 1..=20 {
            tree.insert(&schema.encode_i64(k).unwrap(), rid(k)).unwrap();
        }
        tree.destroy().unwrap();

        assert!(tree.is_empty());
        assert_eq!(
            registry::get_root(&pool, 1).unwrap(),
            Some(marlin_common::page::PageId::INVALID)
        );
        assert!(tree.check());
    }

    #[test]
    fn test_to_graphviz_mentions_all_leaves() {
        let (_dir, pool) = test_pool(32);
        let schema = KeySchema::int64().unwrap();
        let mut tree = small_tree(&pool);
        for k in 1..=5 {
            tree.insert(&schema.encode_i64(k).unwrap(), rid(k)).unwrap();
        }

        let dot = tree.to_graphviz().unwrap();
        assert!(dot.starts_with("digraph btree {"));
        assert!(dot.contains("leaf"));
        assert!(dot.contains("int"));
        assert!(tree.check());
    }
}
