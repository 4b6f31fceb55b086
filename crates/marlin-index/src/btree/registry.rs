//! Index root registry.
//!
//! A well-known catalog page mapping `index_id` to the index's current
//! root page. Every root change is written through here so an index can
//! be reopened after restart.

use marlin_buffer::BufferPool;
use marlin_common::page::{PageId, PageType, PAGE_SIZE};
use marlin_common::{MarlinError, Result};

/// The registry's fixed location: page 0 of catalog file 0.
pub const ROOT_REGISTRY_PAGE: PageId = PageId {
    file_id: 0,
    page_num: 0,
};

// Page layout:
// - page_type: 1 byte (IndexRoots)
// - reserved: 3 bytes
// - entry_count: 4 bytes
// - entries: (index_id: u32, root: PageId codec) * entry_count
const OFF_COUNT: usize = 4;
const ENTRIES_START: usize = 8;
const ENTRY_SIZE: usize = 12;

/// Largest number of indexes one registry page can hold.
pub const REGISTRY_CAPACITY: usize = (PAGE_SIZE - ENTRIES_START) / ENTRY_SIZE;

fn entry_count(data: &[u8]) -> usize {
    u32::from_le_bytes([data[OFF_COUNT], data[OFF_COUNT + 1], data[OFF_COUNT + 2], data[OFF_COUNT + 3]])
        as usize
}

fn set_entry_count(data: &mut [u8], count: usize) {
    data[OFF_COUNT..OFF_COUNT + 4].copy_from_slice(&(count as u32).to_le_bytes());
}

fn entry_at(data: &[u8], index: usize) -> (u32, PageId) {
    let off = ENTRIES_START + index * ENTRY_SIZE;
    let index_id = u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]);
    let root = PageId::from_bytes(&data[off + 4..off + 12]);
    (index_id, root)
}

fn write_entry(data: &mut [u8], index: usize, index_id: u32, root: PageId) {
    let off = ENTRIES_START + index * ENTRY_SIZE;
    data[off..off + 4].copy_from_slice(&index_id.to_le_bytes());
    data[off + 4..off + 12].copy_from_slice(&root.to_bytes());
}

fn find_entry(data: &[u8], index_id: u32) -> Option<usize> {
    (0..entry_count(data)).find(|&i| entry_at(data, i).0 == index_id)
}

/// Looks up the registered root for `index_id`.
///
/// `None` means the index was never registered; a registered index whose
/// tree is currently empty maps to `PageId::INVALID`.
pub fn get_root(pool: &BufferPool, index_id: u32) -> Result<Option<PageId>> {
    let frame = pool.ensure_page(ROOT_REGISTRY_PAGE)?;
    let root = {
        let data = frame.read_data();
        find_entry(data.as_slice(), index_id).map(|i| entry_at(data.as_slice(), i).1)
    };
    pool.unpin_page(ROOT_REGISTRY_PAGE, false);
    Ok(root)
}

/// Registers an index for the first time. Re-registering an existing
/// index overwrites its root in place.
pub fn insert(pool: &BufferPool, index_id: u32, root: PageId) -> Result<()> {
    let frame = pool.ensure_page(ROOT_REGISTRY_PAGE)?;
    let result = {
        let mut data = frame.write_data();
        let data = data.as_mut_slice();
        match find_entry(data, index_id) {
            Some(i) => {
                write_entry(data, i, index_id, root);
                Ok(())
            }
            None => {
                let count = entry_count(data);
                if count >= REGISTRY_CAPACITY {
                    Err(MarlinError::RegistryFull)
                } else {
                    data[0] = PageType::IndexRoots as u8;
                    write_entry(data, count, index_id, root);
                    set_entry_count(data, count + 1);
                    Ok(())
                }
            }
        }
    };
    pool.unpin_page(ROOT_REGISTRY_PAGE, result.is_ok());
    result
}

/// Updates the root of an already-registered index.
pub fn update(pool: &BufferPool, index_id: u32, root: PageId) -> Result<()> {
    let frame = pool.ensure_page(ROOT_REGISTRY_PAGE)?;
    let result = {
        let mut data = frame.write_data();
        let data = data.as_mut_slice();
        match find_entry(data, index_id) {
            Some(i) => {
                write_entry(data, i, index_id, root);
                Ok(())
            }
            None => Err(MarlinError::Internal(format!(
                "index {index_id} is not registered"
            ))),
        }
    };
    pool.unpin_page(ROOT_REGISTRY_PAGE, result.is_ok());
    result
}

/// Drops an index's registration entirely.
pub fn remove(pool: &BufferPool, index_id: u32) -> Result<()> {
    let frame = pool.ensure_page(ROOT_REGISTRY_PAGE)?;
    let removed = {
        let mut data = frame.write_data();
        let data = data.as_mut_slice();
        if let Some(i) = find_entry(data, index_id) {
            let count = entry_count(data);
            let (last_id, last_root) = entry_at(data, count - 1);
            write_entry(data, i, last_id, last_root);
            set_entry_count(data, count - 1);
            true
        } else {
            false
        }
    };
    pool.unpin_page(ROOT_REGISTRY_PAGE, removed);
    Ok(())
}
