//! Buffer pool manager.

use crate::disk::{DiskManager, DiskManagerConfig};
use crate::frame::{BufferFrame, FrameId};
use crate::page_table::PageTable;
use marlin_common::page::{PageId, PAGE_SIZE};
use marlin_common::{MarlinError, Result, StorageConfig};
use parking_lot::Mutex;
use sysinfo::System;

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping for resident pages
/// - Free frame list for new pages
/// - A sweeping victim scan over the frames themselves for eviction
/// - Pin counting: a pinned page is leased to its borrower and never evicted
///
/// The pool owns the disk manager, so a fetch miss reloads the page from
/// disk and dirty eviction victims are written back transparently.
pub struct BufferPool {
    config: BufferPoolConfig,
    frames: Vec<BufferFrame>,
    page_table: PageTable,
    free_list: Mutex<Vec<FrameId>>,
    /// Where the last eviction sweep stopped.
    sweep_hand: Mutex<usize>,
    disk: DiskManager,
}

impl BufferPool {
    /// Creates a new buffer pool over the given disk manager.
    pub fn new(config: BufferPoolConfig, disk: DiskManager) -> Self {
        let num_frames = config.num_frames;
        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            sweep_hand: Mutex::new(0),
            disk,
        }
    }

    /// Builds a pool and its disk manager from storage configuration.
    pub fn from_storage_config(config: &StorageConfig) -> Result<Self> {
        if config.page_size != PAGE_SIZE {
            return Err(MarlinError::InvalidParameter {
                name: "page_size".to_string(),
                value: config.page_size.to_string(),
            });
        }
        let disk = DiskManager::new(DiskManagerConfig {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        })?;
        Ok(Self::new(
            BufferPoolConfig {
                num_frames: config.buffer_pool_pages,
            },
            disk,
        ))
    }

    /// Creates a buffer pool sized to 25% of available system RAM,
    /// with a floor of 1,000 frames.
    pub fn auto_sized(disk: DiskManager) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let num_frames = (available_bytes / 4 / PAGE_SIZE).max(1_000);
        Self::new(BufferPoolConfig { num_frames }, disk)
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is resident in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(page_id)
    }

    /// Fetches a page, pinning it.
    ///
    /// Resident pages are returned directly; evicted pages are reloaded
    /// from disk. The caller must balance this with exactly one
    /// `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            return Ok(frame);
        }

        if !self.disk.page_exists(page_id)? {
            return Err(MarlinError::PageNotFound(page_id));
        }

        let frame_id = self.allocate_frame()?;
        let frame = &self.frames[frame_id.0 as usize];
        self.disk.read_page(page_id, frame.write_data().as_mut_slice())?;
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.page_table.insert(page_id, frame_id);
        Ok(frame)
    }

    /// Allocates a fresh page in the given file and pins a zeroed frame
    /// for it. Returns the new page's ID together with the frame.
    pub fn new_page(&self, file_id: u32) -> Result<(PageId, &BufferFrame)> {
        let page_id = self.disk.allocate_page(file_id)?;
        let frame_id = match self.allocate_frame() {
            Ok(frame_id) => frame_id,
            Err(e) => {
                self.disk.free_page(page_id);
                return Err(e);
            }
        };

        let frame = &self.frames[frame_id.0 as usize];
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.page_table.insert(page_id, frame_id);
        Ok((page_id, frame))
    }

    /// Fetches a well-known page, creating it zeroed if it does not exist
    /// yet. Used for catalog pages with fixed page IDs.
    pub fn ensure_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        match self.fetch_page(page_id) {
            Ok(frame) => Ok(frame),
            Err(MarlinError::PageNotFound(_)) => {
                // Reserve the page on disk so a clean eviction keeps it readable.
                self.disk.write_page(page_id, &[0u8; PAGE_SIZE])?;
                self.fetch_page(page_id)
            }
            Err(e) => Err(e),
        }
    }

    /// Finds a frame for a new resident page, evicting if necessary.
    /// Dirty victims are written back to disk before reuse.
    fn allocate_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok(frame_id);
        }

        let victim_id = self.find_victim().ok_or(MarlinError::BufferPoolFull)?;
        let frame = &self.frames[victim_id.0 as usize];

        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(old_page_id, data.as_slice())?;
            }
            self.page_table.remove(old_page_id);
        }
        frame.reset();
        Ok(victim_id)
    }

    /// Sweeps the frame array for an eviction victim.
    ///
    /// A frame's referenced flag (set on every pin) buys it one grace
    /// lap. Three sweeps, each admitting more: the first spends
    /// referenced flags and takes only clean unreferenced frames, the
    /// second takes any clean frame, the last takes whatever is
    /// unpinned. Preferring clean pages means eviction usually skips the
    /// write-back.
    fn find_victim(&self) -> Option<FrameId> {
        let mut hand = self.sweep_hand.lock();
        let num_frames = self.frames.len();

        for sweep in 0..3 {
            for _ in 0..num_frames {
                let index = *hand;
                *hand = (index + 1) % num_frames;

                let frame = &self.frames[index];
                if frame.page_id().is_none() || frame.is_pinned() {
                    continue;
                }
                if sweep == 0 && frame.take_referenced() {
                    continue;
                }
                if sweep < 2 && frame.is_dirty() {
                    continue;
                }
                return Some(FrameId(index as u32));
            }
        }
        None
    }

    /// Unpins a page, OR-merging the dirty flag.
    ///
    /// When the pin count drops to zero the page becomes fair game for
    /// the eviction sweep. Returns false if the page is not resident.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if is_dirty {
                frame.set_dirty(true);
            }
            frame.unpin();
            return true;
        }
        false
    }

    /// Overwrites the data of a resident page.
    ///
    /// The caller must hold a pin on the page; the dirty flag is set when
    /// that pin is returned.
    pub fn write_back(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let frame_id = self
            .page_table
            .get(page_id)
            .ok_or(MarlinError::PageNotFound(page_id))?;
        self.frames[frame_id.0 as usize].copy_from(data);
        Ok(())
    }

    /// Deletes a page, returning its page number to the allocator.
    ///
    /// Callers guarantee the page is unpinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        if let Some(frame_id) = self.page_table.remove(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                self.page_table.insert(page_id, frame_id);
                return Err(MarlinError::PagePinned(page_id));
            }
            frame.reset();
            self.free_list.lock().push(frame_id);
        }
        self.disk.free_page(page_id);
        Ok(())
    }

    /// Flushes a page to disk if it is resident and dirty.
    /// Returns true if a write happened.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(page_id, data.as_slice())?;
                frame.set_dirty(false);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Flushes all dirty resident pages. Returns the number flushed.
    pub fn flush_all(&self) -> Result<usize> {
        let mut dirty_pages = Vec::new();
        self.page_table.for_each(|page_id, frame_id| {
            if self.frames[frame_id.0 as usize].is_dirty() {
                dirty_pages.push((page_id, frame_id));
            }
            true
        });

        for &(page_id, frame_id) in &dirty_pages {
            let frame = &self.frames[frame_id.0 as usize];
            let data = frame.read_data();
            self.disk.write_page(page_id, data.as_slice())?;
            frame.set_dirty(false);
        }
        Ok(dirty_pages.len())
    }

    /// Debug hook: returns true if no resident page holds a pin.
    pub fn check_all_unpinned(&self) -> bool {
        let mut all_unpinned = true;
        self.page_table.for_each(|_, frame_id| {
            if self.frames[frame_id.0 as usize].is_pinned() {
                all_unpinned = false;
                return false;
            }
            true
        });
        all_unpinned
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned_count = 0;
        let mut dirty_count = 0;
        self.page_table.for_each(|_, frame_id| {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_count += 1;
            }
            if frame.is_dirty() {
                dirty_count += 1;
            }
            true
        });

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_count(),
            used_frames: self.page_table.len(),
            pinned_frames: pinned_count,
            dirty_frames: dirty_count,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}
