//! Buffer frame management.

use marlin_common::page::{PageId, PAGE_SIZE};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Unique identifier for a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// A frame in the buffer pool holding a single page.
///
/// All replacement bookkeeping lives here: the pin count makes a frame
/// ineligible for eviction while borrowed, the referenced flag buys it
/// one grace lap of the pool's victim sweep after its last pin, and the
/// dirty flag forces a write-back before the frame is reused.
pub struct BufferFrame {
    /// Frame identifier.
    frame_id: FrameId,
    /// The page currently stored in this frame.
    page_id: Mutex<Option<PageId>>,
    /// Page data buffer.
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
    /// Number of users currently borrowing this page.
    pin_count: AtomicU32,
    /// Whether the page has been modified since it was last written out.
    is_dirty: AtomicBool,
    /// Set on every pin; consumed by the eviction sweep.
    referenced: AtomicBool,
}

impl BufferFrame {
    /// Creates a new empty buffer frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: Mutex::new(None),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            referenced: AtomicBool::new(false),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page ID currently stored in this frame.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        *self.page_id.lock()
    }

    /// Sets the page ID for this frame.
    #[inline]
    pub fn set_page_id(&self, page_id: Option<PageId>) {
        *self.page_id.lock() = page_id;
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count, returning the previous value. Pinning
    /// also marks the frame referenced for the eviction sweep.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.referenced.store(true, Ordering::Relaxed);
        self.pin_count.fetch_add(1, Ordering::AcqRel)
    }

    /// Decrements the pin count, returning the new value.
    /// An unpin without a matching pin is clamped at zero.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            self.pin_count.store(0, Ordering::Release);
            return 0;
        }
        prev - 1
    }

    /// Returns true if this frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    /// Returns true if this frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Sets the dirty flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Returns true if the frame was pinned since the sweep last passed.
    #[inline]
    pub fn is_referenced(&self) -> bool {
        self.referenced.load(Ordering::Relaxed)
    }

    /// Clears the referenced flag, returning its prior value. The
    /// eviction sweep calls this to spend a frame's grace lap.
    #[inline]
    pub fn take_referenced(&self) -> bool {
        self.referenced.swap(false, Ordering::Relaxed)
    }

    /// Returns a read guard for the page data.
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Returns a write guard for the page data.
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Copies the given bytes into the frame.
    pub fn copy_from(&self, src: &[u8]) {
        let mut data = self.data.write();
        data[..src.len()].copy_from_slice(src);
    }

    /// Clears the frame back to its empty state for reuse.
    pub fn reset(&self) {
        self.set_page_id(None);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.referenced.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}
