//! Disk manager for page-level file I/O.

use marlin_common::page::{PageId, PAGE_SIZE};
use marlin_common::{MarlinError, Result};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages to disk files.
///
/// Each file_id maps to a separate data file. File 0 holds catalog pages
/// (the index root registry), higher file IDs hold index pages. Freed page
/// numbers are recycled through an in-memory free list; the file itself is
/// never shrunk.
pub struct DiskManager {
    config: DiskManagerConfig,
    /// Open file handles keyed by file_id.
    files: Mutex<HashMap<u32, FileHandle>>,
}

/// Handle for an open data file.
struct FileHandle {
    file: File,
    /// Number of pages ever allocated in the file.
    num_pages: u32,
    /// Page numbers freed and available for reuse.
    free_pages: Vec<u32>,
}

impl DiskManager {
    /// Creates a new disk manager, creating the data directory if needed.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            config,
            files: Mutex::new(HashMap::new()),
        })
    }

    fn file_path(&self, file_id: u32) -> PathBuf {
        self.config.data_dir.join(format!("marlin_{file_id}.dat"))
    }

    /// Opens (or creates) the file for `file_id`, then runs `f` on its handle.
    fn with_file<R>(&self, file_id: u32, f: impl FnOnce(&mut FileHandle) -> Result<R>) -> Result<R> {
        let mut files = self.files.lock();
        let handle = match files.entry(file_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = self.file_path(file_id);
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&path)?;
                let len = file.metadata()?.len();
                entry.insert(FileHandle {
                    file,
                    num_pages: (len as usize / PAGE_SIZE) as u32,
                    free_pages: Vec::new(),
                })
            }
        };
        f(handle)
    }

    /// Allocates a page number in the given file, reusing freed pages first.
    /// The file is extended (zero-filled) so the page is immediately readable.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageId> {
        self.with_file(file_id, |handle| {
            if let Some(page_num) = handle.free_pages.pop() {
                return Ok(PageId::new(file_id, page_num));
            }
            let page_num = handle.num_pages;
            handle.num_pages += 1;
            handle
                .file
                .set_len(handle.num_pages as u64 * PAGE_SIZE as u64)?;
            Ok(PageId::new(file_id, page_num))
        })
    }

    /// Returns a freed page number to the allocator.
    pub fn free_page(&self, page_id: PageId) {
        let _ = self.with_file(page_id.file_id, |handle| {
            handle.free_pages.push(page_id.page_num);
            Ok(())
        });
    }

    /// Reads a page from disk into `buf`.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        self.with_file(page_id.file_id, |handle| {
            if page_id.page_num >= handle.num_pages {
                return Err(MarlinError::PageNotFound(page_id));
            }
            let offset = page_id.page_num as u64 * PAGE_SIZE as u64;
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.read_exact(buf)?;
            Ok(())
        })
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        let fsync = self.config.fsync_enabled;
        self.with_file(page_id.file_id, |handle| {
            let offset = page_id.page_num as u64 * PAGE_SIZE as u64;
            if page_id.page_num >= handle.num_pages {
                handle.num_pages = page_id.page_num + 1;
                handle
                    .file
                    .set_len(handle.num_pages as u64 * PAGE_SIZE as u64)?;
            }
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.write_all(data)?;
            if fsync {
                handle.file.sync_data()?;
            }
            Ok(())
        })
    }

    /// Returns the number of pages allocated in the given file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        self.with_file(file_id, |handle| Ok(handle.num_pages))
    }

    /// Returns true if the page lies within the allocated region of its file.
    pub fn page_exists(&self, page_id: PageId) -> Result<bool> {
        self.with_file(page_id.file_id, |handle| {
            Ok(page_id.page_num < handle.num_pages)
        })
    }
}
