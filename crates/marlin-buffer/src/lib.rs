//! MarlinDB buffer pool.
//!
//! Manages a fixed set of in-memory frames caching disk pages. Pages are
//! borrowed via pinning: a pinned page cannot be evicted, and the pin must
//! be returned with `unpin_page` together with a dirty flag. Dirty pages
//! are written back to disk on eviction or flush.

pub mod disk;
pub mod frame;
pub mod page_table;
pub mod pool;

pub use disk::{DiskManager, DiskManagerConfig};
pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats};
