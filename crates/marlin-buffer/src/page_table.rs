//! Resident-page bookkeeping for the buffer pool.

use crate::frame::FrameId;
use marlin_common::page::PageId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Maps resident page IDs to the frames holding them.
pub struct PageTable {
    entries: Mutex<HashMap<PageId, FrameId>>,
}

impl PageTable {
    /// Creates a new page table sized for the given frame count.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Returns the frame holding the given page, if resident.
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.lock().get(&page_id).copied()
    }

    /// Returns true if the page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.entries.lock().contains_key(&page_id)
    }

    /// Records that a page now lives in the given frame.
    pub fn insert(&self, page_id: PageId, frame_id: FrameId) {
        self.entries.lock().insert(page_id, frame_id);
    }

    /// Removes a page's mapping, returning the frame it occupied.
    pub fn remove(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.lock().remove(&page_id)
    }

    /// Returns the number of resident pages.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no pages are resident.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Calls `f` for each resident (page, frame) pair. Iteration stops
    /// early if `f` returns false.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(PageId, FrameId) -> bool,
    {
        let entries = self.entries.lock();
        for (&page_id, &frame_id) in entries.iter() {
            if !f(page_id, frame_id) {
                break;
            }
        }
    }
}
