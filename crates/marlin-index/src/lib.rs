//! MarlinDB disk-backed B+ tree index.
//!
//! Maps fixed-width ordered keys to row identifiers. All node pages are
//! fetched from and written back through the shared buffer pool; the
//! designated root of each index is persisted in the root registry page.

pub mod btree;
pub mod key;

pub use btree::iterator::IndexIterator;
pub use btree::registry::ROOT_REGISTRY_PAGE;
pub use btree::tree::BPlusTree;
pub use key::{KeyComparator, KeySchema, KeyType, KeyValue};
