//! Disk-backed B+ tree index.
//!
//! Node pages live in the buffer pool and are borrowed by pinning. Every
//! tree operation follows the same discipline: pin on fetch, write the
//! mutated node image back through the pool, unpin exactly once with the
//! dirty flag reflecting whether the page changed.
//!
//! Page layout for both node kinds:
//! ```text
//! +-------------------+
//! | Node Header (32)  |
//! +-------------------+
//! | Slot Array        |
//! | (fixed stride)    |
//! +-------------------+
//! ```
//!
//! Leaf slots are `(key, row id)` sorted ascending; internal slots are
//! `(key, child page id)` where slot 0 carries only the child pointer.

pub mod internal;
pub mod iterator;
pub mod leaf;
pub mod node;
pub mod registry;
pub mod tree;

pub use internal::InternalNode;
pub use iterator::IndexIterator;
pub use leaf::LeafNode;
pub use node::{Node, NodeHeader, NodePage, NODE_HEADER_SIZE};
pub use tree::BPlusTree;
